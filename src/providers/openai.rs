//! OpenAI-backed transcription and summarization.
//!
//! Calls the audio transcription endpoint (Whisper) and chat completions
//! through the shared pooled client, with per-call deadlines.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    shared_http_client, ProviderError, SummaryResponse, Summarizer, Transcriber, Transcription,
    SUMMARIZE_TIMEOUT, TRANSCRIBE_TIMEOUT,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const SUMMARY_SYSTEM_PROMPT: &str =
    "You are a helpful assistant that creates clear, concise summaries of video transcripts.";

pub struct OpenAiClient {
    base_url: String,
    api_key: String,
    transcription_model: String,
    summary_model: String,
}

impl OpenAiClient {
    pub fn new(api_key: String, transcription_model: String, summary_model: String) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key,
            transcription_model,
            summary_model,
        }
    }

    async fn error_from_response(response: reqwest::Response) -> ProviderError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let message = body.chars().take(500).collect();
        ProviderError::from_status(status, message)
    }
}

#[async_trait]
impl Transcriber for OpenAiClient {
    async fn transcribe(&self, audio_path: &Path) -> Result<Transcription, ProviderError> {
        let audio = tokio::fs::read(audio_path)
            .await
            .map_err(|e| ProviderError::NotConfigured(format!("cannot read {audio_path:?}: {e}")))?;

        let file_name = audio_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "audio.mp3".to_string());

        log::info!(
            "Transcribing {file_name} ({:.2} MB) with {}",
            audio.len() as f64 / 1024.0 / 1024.0,
            self.transcription_model
        );

        let part = reqwest::multipart::Part::bytes(audio)
            .file_name(file_name)
            .mime_str("audio/mpeg")
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .text("model", self.transcription_model.clone())
            .text("response_format", "verbose_json")
            .part("file", part);

        let response = shared_http_client()
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(TRANSCRIBE_TIMEOUT)
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let body: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        log::info!("Transcribed {} characters", body.text.len());
        Ok(Transcription {
            text: body.text,
            audio_duration_seconds: body.duration,
        })
    }

    fn provider(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.transcription_model
    }
}

#[async_trait]
impl Summarizer for OpenAiClient {
    async fn summarize(&self, prompt: &str) -> Result<SummaryResponse, ProviderError> {
        log::info!(
            "Summarizing with {} (prompt {} chars)",
            self.summary_model,
            prompt.len()
        );

        let request = ChatRequest {
            model: self.summary_model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SUMMARY_SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            temperature: 0.7,
            max_tokens: 1000,
        };

        let response = shared_http_client()
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(SUMMARIZE_TIMEOUT)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        let text = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ProviderError::Malformed("empty completion".to_string()))?;

        log::info!("Generated summary ({} characters)", text.len());
        Ok(SummaryResponse {
            text,
            prompt_tokens: body.usage.as_ref().map(|u| u.prompt_tokens),
            response_tokens: body.usage.as_ref().map(|u| u.completion_tokens),
        })
    }

    fn provider(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.summary_model
    }
}

/// Prompt template for the summarization stage.
pub fn build_summary_prompt(transcript: &str, title: &str, channel: Option<&str>) -> String {
    let source_line = match channel {
        Some(channel) => format!("Video: {title} (channel: {channel})"),
        None => format!("Video: {title}"),
    };

    format!(
        "You are summarizing a YouTube video transcript. Please provide:\n\
         \n\
         1. A concise 2-3 sentence overview of the main topic\n\
         2. Key points as 5 to 10 bullet points, scaled to how many distinct \
         topics the video covers\n\
         3. Important conclusions or takeaways, as a short paragraph\n\
         \n\
         Keep the summary clear, well-structured, and informative.\n\
         \n\
         {source_line}\n\
         \n\
         Transcript:\n{transcript}\n\
         \n\
         Please provide the summary:"
    )
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: i64,
    completion_tokens: i64,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
    #[serde(default)]
    duration: Option<f64>,
}
