pub mod models;

#[cfg(test)]
mod tests;

use anyhow::{bail, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub use models::*;

/// SQLite store for play history, the playback queue, and the usage ledger.
///
/// All writes go through the connection mutex plus a transaction, so queue
/// positions are always observed as a contiguous `0..N-1` sequence.
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        // Enable WAL mode for concurrent reads
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA temp_store=MEMORY;
        ",
        )?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.init_schema()?;

        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                video_id TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                channel TEXT,
                thumbnail_url TEXT,
                play_count INTEGER NOT NULL DEFAULT 1,
                first_played_at TEXT NOT NULL,
                last_played_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_history_video ON history(video_id);
            CREATE INDEX IF NOT EXISTS idx_history_last_played
                ON history(last_played_at DESC);

            CREATE TABLE IF NOT EXISTS queue (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                video_id TEXT NOT NULL,
                title TEXT NOT NULL,
                channel TEXT,
                thumbnail_url TEXT,
                position INTEGER NOT NULL,
                kind TEXT NOT NULL DEFAULT 'video',
                week_tag TEXT,
                skip_pipeline INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_queue_position ON queue(position ASC);

            CREATE TABLE IF NOT EXISTS usage_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                provider TEXT NOT NULL,
                model TEXT NOT NULL,
                feature TEXT NOT NULL,
                prompt_tokens INTEGER,
                response_tokens INTEGER,
                reasoning_tokens INTEGER,
                total_tokens INTEGER,
                audio_duration_seconds REAL,
                video_id TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_usage_timestamp
                ON usage_records(timestamp DESC);
            CREATE INDEX IF NOT EXISTS idx_usage_provider_model
                ON usage_records(provider, model);
            "#,
        )?;

        // Migration: add skip_pipeline to queues created before it existed
        // (idempotent; the error just means the column is already there)
        let _ = conn.execute(
            "ALTER TABLE queue ADD COLUMN skip_pipeline INTEGER NOT NULL DEFAULT 0",
            [],
        );

        Ok(())
    }

    // =========================================================================
    // Play history
    // =========================================================================

    /// Record a play: insert on first encounter, otherwise bump the play
    /// count, refresh metadata, and advance `last_played_at`.
    pub fn record_play(
        &self,
        video_id: &str,
        title: &str,
        channel: Option<&str>,
        thumbnail_url: Option<&str>,
    ) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "INSERT INTO history (video_id, title, channel, thumbnail_url, play_count, first_played_at, last_played_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5)
             ON CONFLICT(video_id) DO UPDATE SET
                title = excluded.title,
                channel = excluded.channel,
                thumbnail_url = excluded.thumbnail_url,
                play_count = play_count + 1,
                last_played_at = excluded.last_played_at",
            params![video_id, title, channel, thumbnail_url, now],
        )?;

        let (id, play_count): (i64, i64) = conn.query_row(
            "SELECT id, play_count FROM history WHERE video_id = ?1",
            params![video_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        log::info!("Recorded play for {video_id} ({title}), play count {play_count}");
        Ok(id)
    }

    /// Most recently played videos, newest first.
    pub fn recent_history(&self, limit: i64) -> Result<Vec<HistoryEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, video_id, title, channel, thumbnail_url, play_count,
                    first_played_at, last_played_at
             FROM history
             ORDER BY last_played_at DESC
             LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], HistoryEntry::from_db_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Title for a video previously seen in history, if any.
    pub fn history_title(&self, video_id: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let title = conn
            .query_row(
                "SELECT title FROM history WHERE video_id = ?1",
                params![video_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(title)
    }

    pub fn clear_history(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM history", [])?;
        log::info!("History cleared");
        Ok(())
    }

    // =========================================================================
    // Playback queue
    // =========================================================================

    /// Append a video to the end of the queue.
    pub fn queue_append(
        &self,
        video_id: &str,
        title: &str,
        channel: Option<&str>,
        thumbnail_url: Option<&str>,
        skip_pipeline: bool,
    ) -> Result<i64> {
        self.queue_insert(
            video_id,
            title,
            channel,
            thumbnail_url,
            QueueKind::Video,
            None,
            skip_pipeline,
        )
    }

    /// Append a digest entry referencing a week tag instead of a video.
    pub fn queue_append_summary(&self, title: &str, week_tag: &str) -> Result<i64> {
        self.queue_insert("", title, None, None, QueueKind::Summary, Some(week_tag), true)
    }

    fn queue_insert(
        &self,
        video_id: &str,
        title: &str,
        channel: Option<&str>,
        thumbnail_url: Option<&str>,
        kind: QueueKind,
        week_tag: Option<&str>,
        skip_pipeline: bool,
    ) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().unwrap();

        let max_pos: Option<i64> =
            conn.query_row("SELECT MAX(position) FROM queue", [], |row| row.get(0))?;
        let next_position = max_pos.map(|p| p + 1).unwrap_or(0);

        conn.execute(
            "INSERT INTO queue (video_id, title, channel, thumbnail_url, position, kind, week_tag, skip_pipeline, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                video_id,
                title,
                channel,
                thumbnail_url,
                next_position,
                kind.to_string(),
                week_tag,
                skip_pipeline as i64,
                now
            ],
        )?;

        let id = conn.last_insert_rowid();
        log::info!("Added to queue at position {next_position}: {title} ({video_id})");
        Ok(id)
    }

    /// The current queue, ordered by position.
    pub fn queue_list(&self) -> Result<Vec<QueueEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, video_id, title, channel, thumbnail_url, position, kind,
                    week_tag, skip_pipeline, created_at
             FROM queue
             ORDER BY position ASC",
        )?;
        let rows = stmt
            .query_map([], QueueEntry::from_db_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Remove one entry and renumber the rest so positions stay contiguous.
    ///
    /// Returns false when the entry does not exist.
    pub fn queue_remove(&self, entry_id: i64) -> Result<bool> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let removed_position: Option<i64> = tx
            .query_row(
                "SELECT position FROM queue WHERE id = ?1",
                params![entry_id],
                |row| row.get(0),
            )
            .optional()?;

        let Some(removed_position) = removed_position else {
            return Ok(false);
        };

        tx.execute("DELETE FROM queue WHERE id = ?1", params![entry_id])?;
        tx.execute(
            "UPDATE queue SET position = position - 1 WHERE position > ?1",
            params![removed_position],
        )?;

        tx.commit()?;
        log::info!("Removed queue entry {entry_id} and renumbered");
        Ok(true)
    }

    /// Atomically rewrite queue positions to match the given entry-id order.
    ///
    /// Rejects the input unless it is exactly a permutation of the current
    /// entry-id set.
    pub fn queue_reorder(&self, ordered_ids: &[i64]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let current: Vec<i64> = {
            let mut stmt = tx.prepare("SELECT id FROM queue")?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<Vec<i64>, _>>()?;
            ids
        };

        let current_set: HashSet<i64> = current.iter().copied().collect();
        let given_set: HashSet<i64> = ordered_ids.iter().copied().collect();
        if current_set != given_set || ordered_ids.len() != current.len() {
            bail!(
                "queue reorder set mismatch: queue has {} entries, request named {}",
                current.len(),
                ordered_ids.len()
            );
        }

        for (position, entry_id) in ordered_ids.iter().enumerate() {
            tx.execute(
                "UPDATE queue SET position = ?1 WHERE id = ?2",
                params![position as i64, entry_id],
            )?;
        }

        tx.commit()?;
        log::info!("Reordered queue ({} entries)", ordered_ids.len());
        Ok(())
    }

    /// Remove and return the entry at the head of the queue.
    pub fn queue_pop_current(&self) -> Result<Option<QueueEntry>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let entry = tx
            .query_row(
                "SELECT id, video_id, title, channel, thumbnail_url, position, kind,
                        week_tag, skip_pipeline, created_at
                 FROM queue
                 ORDER BY position ASC
                 LIMIT 1",
                [],
                QueueEntry::from_db_row,
            )
            .optional()?;

        let Some(entry) = entry else {
            return Ok(None);
        };

        tx.execute("DELETE FROM queue WHERE id = ?1", params![entry.id])?;
        tx.execute(
            "UPDATE queue SET position = position - 1 WHERE position > ?1",
            params![entry.position],
        )?;

        tx.commit()?;
        Ok(Some(entry))
    }

    /// The entry that would play after the current head, if any.
    pub fn queue_peek_next(&self) -> Result<Option<QueueEntry>> {
        let conn = self.conn.lock().unwrap();
        let entry = conn
            .query_row(
                "SELECT id, video_id, title, channel, thumbnail_url, position, kind,
                        week_tag, skip_pipeline, created_at
                 FROM queue
                 WHERE position = 1",
                [],
                QueueEntry::from_db_row,
            )
            .optional()?;
        Ok(entry)
    }

    pub fn queue_clear(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM queue", [])?;
        log::info!("Queue cleared");
        Ok(())
    }

    // =========================================================================
    // Usage ledger
    // =========================================================================

    /// Append one external-model call to the usage ledger.
    pub fn log_usage(&self, record: &UsageRecord) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        let total = record.prompt_tokens.unwrap_or(0)
            + record.response_tokens.unwrap_or(0)
            + record.reasoning_tokens.unwrap_or(0);

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO usage_records (
                timestamp, provider, model, feature,
                prompt_tokens, response_tokens, reasoning_tokens, total_tokens,
                audio_duration_seconds, video_id
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                now,
                record.provider,
                record.model,
                record.feature,
                record.prompt_tokens,
                record.response_tokens,
                record.reasoning_tokens,
                total,
                record.audio_duration_seconds,
                record.video_id,
            ],
        )?;

        let id = conn.last_insert_rowid();
        log::debug!(
            "Logged usage: {}/{} for {} ({total} tokens)",
            record.provider,
            record.model,
            record.feature
        );
        Ok(id)
    }

    /// Aggregate usage grouped by provider, model, and feature.
    pub fn usage_summary(&self) -> Result<UsageSummary> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT provider, model, feature,
                    COUNT(*) as call_count,
                    SUM(COALESCE(prompt_tokens, 0)),
                    SUM(COALESCE(response_tokens, 0)),
                    SUM(COALESCE(reasoning_tokens, 0)),
                    SUM(COALESCE(total_tokens, 0))
             FROM usage_records
             GROUP BY provider, model, feature
             ORDER BY SUM(COALESCE(total_tokens, 0)) DESC",
        )?;

        let buckets = stmt
            .query_map([], |row| {
                Ok(UsageBucket {
                    provider: row.get(0)?,
                    model: row.get(1)?,
                    feature: row.get(2)?,
                    call_count: row.get(3)?,
                    prompt_tokens: row.get(4)?,
                    response_tokens: row.get(5)?,
                    reasoning_tokens: row.get(6)?,
                    total_tokens: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut summary = UsageSummary::default();
        for bucket in &buckets {
            summary.call_count += bucket.call_count;
            summary.total_tokens += bucket.total_tokens;
        }
        summary.buckets = buckets;

        Ok(summary)
    }
}
