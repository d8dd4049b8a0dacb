use serde::{Deserialize, Serialize};

/// What a queue row points at: a YouTube video or a generated digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueKind {
    Video,
    Summary,
}

impl Default for QueueKind {
    fn default() -> Self {
        Self::Video
    }
}

impl std::fmt::Display for QueueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Summary => write!(f, "summary"),
        }
    }
}

impl From<String> for QueueKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "summary" => Self::Summary,
            _ => Self::Video,
        }
    }
}

/// One row of the playback queue.
///
/// Positions form a dense `0..N-1` sequence; every mutation renumbers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: i64,
    pub video_id: String,
    pub title: String,
    pub channel: Option<String>,
    pub thumbnail_url: Option<String>,
    pub position: i64,
    pub kind: QueueKind,
    pub week_tag: Option<String>,
    pub skip_pipeline: bool,
    pub created_at: String,
}

impl QueueEntry {
    pub fn from_db_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            video_id: row.get("video_id")?,
            title: row.get("title")?,
            channel: row.get("channel")?,
            thumbnail_url: row.get("thumbnail_url")?,
            position: row.get("position")?,
            kind: row.get::<_, String>("kind")?.into(),
            week_tag: row.get("week_tag")?,
            skip_pipeline: row.get::<_, i64>("skip_pipeline")? != 0,
            created_at: row.get("created_at")?,
        })
    }
}

/// One row of play history: one per distinct video, counted on replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub video_id: String,
    pub title: String,
    pub channel: Option<String>,
    pub thumbnail_url: Option<String>,
    pub play_count: i64,
    pub first_played_at: String,
    pub last_played_at: String,
}

impl HistoryEntry {
    pub fn from_db_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            video_id: row.get("video_id")?,
            title: row.get("title")?,
            channel: row.get("channel")?,
            thumbnail_url: row.get("thumbnail_url")?,
            play_count: row.get("play_count")?,
            first_played_at: row.get("first_played_at")?,
            last_played_at: row.get("last_played_at")?,
        })
    }
}

/// One external-model call, appended to the usage ledger.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageRecord {
    pub provider: String,
    pub model: String,
    pub feature: String,
    pub prompt_tokens: Option<i64>,
    pub response_tokens: Option<i64>,
    pub reasoning_tokens: Option<i64>,
    pub audio_duration_seconds: Option<f64>,
    pub video_id: Option<String>,
}

/// Aggregated usage for one provider/model/feature bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageBucket {
    pub provider: String,
    pub model: String,
    pub feature: String,
    pub call_count: i64,
    pub prompt_tokens: i64,
    pub response_tokens: i64,
    pub reasoning_tokens: i64,
    pub total_tokens: i64,
}

/// Usage ledger rollup returned by the `usage_summary` command.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageSummary {
    pub buckets: Vec<UsageBucket>,
    pub call_count: i64,
    pub total_tokens: i64,
}
