//! Note store client (Trilium ETAPI) and the publish-failure backup sink.
//!
//! Notes are created in two steps: create under the configured parent, then
//! attach a `source_id` label so later runs can deduplicate by video id.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{shared_http_client, NoteRef, NoteStore, ProviderError, PUBLISH_TIMEOUT};

pub struct EtapiClient {
    base_url: String,
    token: String,
    parent_note_id: String,
}

impl EtapiClient {
    pub fn new(base_url: String, token: String, parent_note_id: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            parent_note_id,
        }
    }

    fn note_url(&self, note_id: &str) -> String {
        format!("{}/#root/{note_id}", self.base_url)
    }

    async fn error_from_response(response: reqwest::Response) -> ProviderError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        ProviderError::from_status(status, body.chars().take(500).collect())
    }
}

#[async_trait]
impl NoteStore for EtapiClient {
    async fn find_by_label(
        &self,
        name: &str,
        value: &str,
    ) -> Result<Option<NoteRef>, ProviderError> {
        let search = format!("#{name}=\"{value}\"");
        log::info!("Searching note store for {search}");

        let response = shared_http_client()
            .get(format!("{}/etapi/notes", self.base_url))
            .bearer_auth(&self.token)
            .query(&[("search", search.as_str())])
            .timeout(PUBLISH_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        // The search endpoint returns either a bare list or {"results": [...]}
        let notes = body
            .get("results")
            .and_then(|r| r.as_array())
            .or_else(|| body.as_array());

        let note_id = notes
            .and_then(|list| list.first())
            .and_then(|note| note.get("noteId"))
            .and_then(|id| id.as_str());

        Ok(note_id.map(|id| NoteRef {
            note_id: id.to_string(),
            url: self.note_url(id),
        }))
    }

    async fn create_note(&self, title: &str, body_html: &str) -> Result<NoteRef, ProviderError> {
        let payload = json!({
            "parentNoteId": self.parent_note_id,
            "title": title,
            "type": "text",
            "mime": "text/html",
            "content": body_html,
        });

        let response = shared_http_client()
            .post(format!("{}/etapi/create-note", self.base_url))
            .bearer_auth(&self.token)
            .timeout(PUBLISH_TIMEOUT)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let body: CreateNoteResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        let note_id = body
            .note
            .map(|n| n.note_id)
            .ok_or_else(|| ProviderError::Malformed("create-note returned no noteId".to_string()))?;

        log::info!("Created note {note_id}: {title}");
        Ok(NoteRef {
            url: self.note_url(&note_id),
            note_id,
        })
    }

    async fn add_label(
        &self,
        note_id: &str,
        name: &str,
        value: &str,
    ) -> Result<(), ProviderError> {
        let payload = json!({
            "noteId": note_id,
            "type": "label",
            "name": name,
            "value": value,
        });

        let response = shared_http_client()
            .post(format!("{}/etapi/attributes", self.base_url))
            .bearer_auth(&self.token)
            .timeout(PUBLISH_TIMEOUT)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        log::info!("Attached {name}={value} to note {note_id}");
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct CreateNoteResponse {
    note: Option<CreatedNote>,
}

#[derive(Debug, Deserialize)]
struct CreatedNote {
    #[serde(rename = "noteId")]
    note_id: String,
}

// ============================================================================
// Backup sink
// ============================================================================

/// Local fallback when publishing to the note store fails: the full payload
/// lands in `backup_dir/{video_id}.json` so nothing is lost.
pub struct BackupSink {
    dir: std::path::PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BackupPayload {
    pub video_id: String,
    pub title: String,
    pub transcript: String,
    pub summary: String,
    pub watch_url: String,
}

impl BackupSink {
    pub fn new(dir: std::path::PathBuf) -> std::io::Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn write(&self, payload: &BackupPayload) -> std::io::Result<std::path::PathBuf> {
        let path = self.dir.join(format!("{}.json", payload.video_id));
        let body = serde_json::to_vec_pretty(payload)?;
        std::fs::write(&path, body)?;
        log::info!("Saved publish backup to {path:?}");
        Ok(path)
    }
}

// ============================================================================
// Markdown rendering
// ============================================================================

/// Render the model's markdown-flavored summary into the HTML the note
/// store accepts. Handles headers, bullet lists, bold and italic; anything
/// else passes through escaped.
pub fn markdown_to_html(text: &str) -> String {
    let mut html = Vec::new();
    let mut in_list = false;

    for line in text.lines() {
        let line = line.trim();

        if line.is_empty() {
            if in_list {
                html.push("</ul>".to_string());
                in_list = false;
            }
            html.push("<br>".to_string());
            continue;
        }

        if let Some(rest) = line.strip_prefix("### ") {
            close_list(&mut html, &mut in_list);
            html.push(format!("<h3>{}</h3>", escape_html(rest)));
        } else if let Some(rest) = line.strip_prefix("## ") {
            close_list(&mut html, &mut in_list);
            html.push(format!("<h2>{}</h2>", escape_html(rest)));
        } else if let Some(rest) = line.strip_prefix("# ") {
            close_list(&mut html, &mut in_list);
            html.push(format!("<h1>{}</h1>", escape_html(rest)));
        } else if let Some(rest) = line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")) {
            if !in_list {
                html.push("<ul>".to_string());
                in_list = true;
            }
            html.push(format!("<li>{}</li>", inline_formatting(rest.trim())));
        } else {
            close_list(&mut html, &mut in_list);
            html.push(format!("<p>{}</p>", inline_formatting(line)));
        }
    }

    if in_list {
        html.push("</ul>".to_string());
    }

    html.join("\n")
}

/// The full note body: rendered summary plus a footer link to the source.
pub fn note_body(summary: &str, video_id: &str) -> String {
    format!(
        "<div class=\"video-summary\">\n{}\n</div>\n\n\
         <p style=\"margin-top: 2em; padding-top: 1em; border-top: 1px solid #ccc;\">\n\
         \u{20}   <strong>YouTube:</strong> <a href=\"{}\" target=\"_blank\">Watch Video</a>\n\
         </p>\n",
        markdown_to_html(summary),
        watch_url(video_id),
    )
}

pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={video_id}")
}

fn close_list(html: &mut Vec<String>, in_list: &mut bool) {
    if *in_list {
        html.push("</ul>".to_string());
        *in_list = false;
    }
}

/// `**bold**` and `*italic*` over escaped text.
fn inline_formatting(text: &str) -> String {
    let escaped = escape_html(text);
    let bolded = replace_pairs(&escaped, "**", "<strong>", "</strong>");
    replace_pairs(&bolded, "*", "<em>", "</em>")
}

/// Replace paired occurrences of `marker` with open/close tags; an unpaired
/// trailing marker is left as-is.
fn replace_pairs(text: &str, marker: &str, open: &str, close: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    loop {
        let Some(start) = rest.find(marker) else {
            out.push_str(rest);
            return out;
        };
        let after = &rest[start + marker.len()..];
        let Some(end) = after.find(marker) else {
            out.push_str(rest);
            return out;
        };
        if end == 0 {
            // empty pair, e.g. "****": emit literally and move on
            out.push_str(&rest[..start + marker.len() * 2]);
            rest = &after[marker.len()..];
            continue;
        }
        out.push_str(&rest[..start]);
        out.push_str(open);
        out.push_str(&after[..end]);
        out.push_str(close);
        rest = &after[end + marker.len()..];
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn headers_and_paragraphs() {
        let html = markdown_to_html("## Overview\nPlain text here");
        assert!(html.contains("<h2>Overview</h2>"));
        assert!(html.contains("<p>Plain text here</p>"));
    }

    #[test]
    fn bullet_lists_open_and_close() {
        let html = markdown_to_html("- first\n- second\n\nafter");
        assert!(html.contains("<ul>"));
        assert!(html.contains("<li>first</li>"));
        assert!(html.contains("<li>second</li>"));
        assert!(html.contains("</ul>"));
        assert!(html.contains("<p>after</p>"));
    }

    #[test]
    fn list_at_end_of_input_is_closed() {
        let html = markdown_to_html("* only item");
        assert!(html.ends_with("</ul>"));
    }

    #[test]
    fn bold_and_italic_inline() {
        let html = markdown_to_html("this is **bold** and *slanted*");
        assert!(html.contains("<strong>bold</strong>"));
        assert!(html.contains("<em>slanted</em>"));
    }

    #[test]
    fn unpaired_markers_pass_through() {
        let html = markdown_to_html("a lone *star and 2**3 math");
        assert!(html.contains("a lone *star"));
        assert!(!html.contains("<em>"));
    }

    #[test]
    fn html_is_escaped() {
        let html = markdown_to_html("<script>alert('x')</script> & more");
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(html.contains("&amp; more"));
    }

    #[test]
    fn note_body_links_the_video() {
        let body = note_body("A **summary**", "dQw4w9WgXcQ");
        assert!(body.contains("https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
        assert!(body.contains("<strong>summary</strong>"));
    }

    #[test]
    fn backup_sink_writes_payload() {
        let temp = TempDir::new().unwrap();
        let sink = BackupSink::new(temp.path().join("backup")).unwrap();

        let path = sink
            .write(&BackupPayload {
                video_id: "dQw4w9WgXcQ".to_string(),
                title: "Title".to_string(),
                transcript: "words".to_string(),
                summary: "short".to_string(),
                watch_url: watch_url("dQw4w9WgXcQ"),
            })
            .unwrap();

        let raw = std::fs::read_to_string(path).unwrap();
        let parsed: BackupPayload = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.video_id, "dQw4w9WgXcQ");
        assert_eq!(parsed.summary, "short");
    }
}
