// Edge-case tests for the queue, history, and usage tables
// Run with: cargo test --lib database::tests

#[cfg(test)]
mod queue_tests {
    use crate::database::Database;
    use tempfile::TempDir;

    fn setup_test_db() -> (Database, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Database::new(&db_path).unwrap();
        (db, temp_dir)
    }

    fn positions(db: &Database) -> Vec<i64> {
        db.queue_list().unwrap().iter().map(|e| e.position).collect()
    }

    fn titles(db: &Database) -> Vec<String> {
        db.queue_list().unwrap().iter().map(|e| e.title.clone()).collect()
    }

    // =========================================================================
    // Append / position assignment
    // =========================================================================

    #[test]
    fn test_append_assigns_dense_positions() {
        let (db, _temp) = setup_test_db();
        db.queue_append("aaaaaaaaaaa", "A", None, None, false).unwrap();
        db.queue_append("bbbbbbbbbbb", "B", None, None, false).unwrap();
        db.queue_append("ccccccccccc", "C", None, None, false).unwrap();

        assert_eq!(positions(&db), vec![0, 1, 2]);
        assert_eq!(titles(&db), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_append_to_empty_queue_starts_at_zero() {
        let (db, _temp) = setup_test_db();
        db.queue_append("aaaaaaaaaaa", "A", None, None, false).unwrap();
        assert_eq!(positions(&db), vec![0]);
    }

    #[test]
    fn test_append_same_video_twice_creates_two_rows() {
        let (db, _temp) = setup_test_db();
        // The queue itself does not deduplicate; that rule lives in the
        // command surface via the job engine.
        db.queue_append("aaaaaaaaaaa", "A", None, None, false).unwrap();
        db.queue_append("aaaaaaaaaaa", "A", None, None, false).unwrap();
        assert_eq!(positions(&db), vec![0, 1]);
    }

    #[test]
    fn test_append_preserves_skip_pipeline_flag() {
        let (db, _temp) = setup_test_db();
        db.queue_append("aaaaaaaaaaa", "A", None, None, true).unwrap();
        db.queue_append("bbbbbbbbbbb", "B", None, None, false).unwrap();

        let entries = db.queue_list().unwrap();
        assert!(entries[0].skip_pipeline);
        assert!(!entries[1].skip_pipeline);
    }

    // =========================================================================
    // Remove / renumber
    // =========================================================================

    #[test]
    fn test_remove_middle_renumbers() {
        let (db, _temp) = setup_test_db();
        db.queue_append("aaaaaaaaaaa", "A", None, None, false).unwrap();
        let b = db.queue_append("bbbbbbbbbbb", "B", None, None, false).unwrap();
        db.queue_append("ccccccccccc", "C", None, None, false).unwrap();

        assert!(db.queue_remove(b).unwrap());
        assert_eq!(positions(&db), vec![0, 1]);
        assert_eq!(titles(&db), vec!["A", "C"]);
    }

    #[test]
    fn test_remove_head_renumbers() {
        let (db, _temp) = setup_test_db();
        let a = db.queue_append("aaaaaaaaaaa", "A", None, None, false).unwrap();
        db.queue_append("bbbbbbbbbbb", "B", None, None, false).unwrap();

        assert!(db.queue_remove(a).unwrap());
        assert_eq!(positions(&db), vec![0]);
        assert_eq!(titles(&db), vec!["B"]);
    }

    #[test]
    fn test_remove_missing_returns_false() {
        let (db, _temp) = setup_test_db();
        db.queue_append("aaaaaaaaaaa", "A", None, None, false).unwrap();
        assert!(!db.queue_remove(99999).unwrap());
        assert_eq!(positions(&db), vec![0]);
    }

    // =========================================================================
    // Reorder
    // =========================================================================

    #[test]
    fn test_reorder_then_remove_keeps_positions_dense() {
        // Seed scenario: [A@0, B@1, C@2] -> reorder [C, A, B] -> remove A
        let (db, _temp) = setup_test_db();
        let a = db.queue_append("aaaaaaaaaaa", "A", None, None, false).unwrap();
        let b = db.queue_append("bbbbbbbbbbb", "B", None, None, false).unwrap();
        let c = db.queue_append("ccccccccccc", "C", None, None, false).unwrap();

        db.queue_reorder(&[c, a, b]).unwrap();
        assert_eq!(titles(&db), vec!["C", "A", "B"]);
        assert_eq!(positions(&db), vec![0, 1, 2]);

        db.queue_remove(a).unwrap();
        assert_eq!(titles(&db), vec!["C", "B"]);
        assert_eq!(positions(&db), vec![0, 1]);
    }

    #[test]
    fn test_reorder_rejects_missing_entry() {
        let (db, _temp) = setup_test_db();
        let a = db.queue_append("aaaaaaaaaaa", "A", None, None, false).unwrap();
        db.queue_append("bbbbbbbbbbb", "B", None, None, false).unwrap();

        let result = db.queue_reorder(&[a]);
        assert!(result.is_err());
        // Failed reorder must not have touched anything
        assert_eq!(positions(&db), vec![0, 1]);
    }

    #[test]
    fn test_reorder_rejects_unknown_entry() {
        let (db, _temp) = setup_test_db();
        let a = db.queue_append("aaaaaaaaaaa", "A", None, None, false).unwrap();
        let b = db.queue_append("bbbbbbbbbbb", "B", None, None, false).unwrap();

        assert!(db.queue_reorder(&[a, b, 99999]).is_err());
        assert!(db.queue_reorder(&[a, 99999]).is_err());
    }

    #[test]
    fn test_reorder_empty_queue_with_empty_input() {
        let (db, _temp) = setup_test_db();
        db.queue_reorder(&[]).unwrap();
    }

    // =========================================================================
    // Pop / peek
    // =========================================================================

    #[test]
    fn test_pop_current_returns_head_and_renumbers() {
        let (db, _temp) = setup_test_db();
        db.queue_append("aaaaaaaaaaa", "A", None, None, false).unwrap();
        db.queue_append("bbbbbbbbbbb", "B", None, None, false).unwrap();

        let popped = db.queue_pop_current().unwrap().unwrap();
        assert_eq!(popped.title, "A");
        assert_eq!(popped.position, 0);

        assert_eq!(titles(&db), vec!["B"]);
        assert_eq!(positions(&db), vec![0]);
    }

    #[test]
    fn test_pop_current_empty_queue() {
        let (db, _temp) = setup_test_db();
        assert!(db.queue_pop_current().unwrap().is_none());
    }

    #[test]
    fn test_peek_next_is_position_one() {
        let (db, _temp) = setup_test_db();
        db.queue_append("aaaaaaaaaaa", "A", None, None, false).unwrap();
        assert!(db.queue_peek_next().unwrap().is_none());

        db.queue_append("bbbbbbbbbbb", "B", None, None, false).unwrap();
        let next = db.queue_peek_next().unwrap().unwrap();
        assert_eq!(next.title, "B");
    }

    #[test]
    fn test_clear_queue() {
        let (db, _temp) = setup_test_db();
        db.queue_append("aaaaaaaaaaa", "A", None, None, false).unwrap();
        db.queue_append("bbbbbbbbbbb", "B", None, None, false).unwrap();

        db.queue_clear().unwrap();
        assert!(db.queue_list().unwrap().is_empty());

        // Appending after a clear restarts at position 0
        db.queue_append("ccccccccccc", "C", None, None, false).unwrap();
        assert_eq!(positions(&db), vec![0]);
    }

    #[test]
    fn test_summary_entries_order_with_videos() {
        let (db, _temp) = setup_test_db();
        db.queue_append("aaaaaaaaaaa", "A", None, None, false).unwrap();
        db.queue_append_summary("Week 5 digest", "2026-W05").unwrap();

        let entries = db.queue_list().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].kind, crate::database::QueueKind::Summary);
        assert_eq!(entries[1].week_tag.as_deref(), Some("2026-W05"));
        assert_eq!(positions(&db), vec![0, 1]);
    }
}

#[cfg(test)]
mod history_tests {
    use crate::database::Database;
    use tempfile::TempDir;

    fn setup_test_db() -> (Database, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Database::new(&db_path).unwrap();
        (db, temp_dir)
    }

    #[test]
    fn test_first_play_inserts_with_count_one() {
        let (db, _temp) = setup_test_db();
        db.record_play("aaaaaaaaaaa", "Title", Some("Channel"), None).unwrap();

        let history = db.recent_history(10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].play_count, 1);
        assert_eq!(history[0].first_played_at, history[0].last_played_at);
    }

    #[test]
    fn test_replay_increments_count_single_row() {
        let (db, _temp) = setup_test_db();
        db.record_play("aaaaaaaaaaa", "Title", None, None).unwrap();
        db.record_play("aaaaaaaaaaa", "Title", None, None).unwrap();

        let history = db.recent_history(10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].play_count, 2);
        assert!(history[0].last_played_at >= history[0].first_played_at);
    }

    #[test]
    fn test_replay_refreshes_metadata() {
        let (db, _temp) = setup_test_db();
        db.record_play("aaaaaaaaaaa", "Old Title", None, None).unwrap();
        db.record_play("aaaaaaaaaaa", "New Title", Some("Channel"), Some("http://thumb"))
            .unwrap();

        let history = db.recent_history(10).unwrap();
        assert_eq!(history[0].title, "New Title");
        assert_eq!(history[0].channel.as_deref(), Some("Channel"));
        assert_eq!(history[0].thumbnail_url.as_deref(), Some("http://thumb"));
    }

    #[test]
    fn test_recent_orders_by_last_played() {
        let (db, _temp) = setup_test_db();
        db.record_play("aaaaaaaaaaa", "First", None, None).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        db.record_play("bbbbbbbbbbb", "Second", None, None).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        db.record_play("aaaaaaaaaaa", "First", None, None).unwrap();

        let history = db.recent_history(10).unwrap();
        assert_eq!(history[0].title, "First");
        assert_eq!(history[1].title, "Second");
    }

    #[test]
    fn test_recent_respects_limit() {
        let (db, _temp) = setup_test_db();
        for i in 0..5 {
            db.record_play(&format!("aaaaaaaaaa{i}"), &format!("T{i}"), None, None)
                .unwrap();
        }
        assert_eq!(db.recent_history(3).unwrap().len(), 3);
    }

    #[test]
    fn test_history_title_lookup() {
        let (db, _temp) = setup_test_db();
        assert!(db.history_title("aaaaaaaaaaa").unwrap().is_none());

        db.record_play("aaaaaaaaaaa", "Title", None, None).unwrap();
        assert_eq!(db.history_title("aaaaaaaaaaa").unwrap().as_deref(), Some("Title"));
    }

    #[test]
    fn test_clear_history() {
        let (db, _temp) = setup_test_db();
        db.record_play("aaaaaaaaaaa", "Title", None, None).unwrap();
        db.clear_history().unwrap();
        assert!(db.recent_history(10).unwrap().is_empty());
    }

    #[test]
    fn test_title_special_characters_round_trip() {
        let (db, _temp) = setup_test_db();
        let titles = vec![
            "Title with 'quotes'",
            "Title with \"double quotes\"",
            "Title; DROP TABLE history;--",
            "Title with emoji 🎙️",
        ];

        for (i, title) in titles.iter().enumerate() {
            let id = format!("aaaaaaaaaa{i}");
            db.record_play(&id, title, None, None).unwrap();
            assert_eq!(db.history_title(&id).unwrap().as_deref(), Some(*title));
        }
    }
}

#[cfg(test)]
mod usage_tests {
    use crate::database::{Database, UsageRecord};
    use tempfile::TempDir;

    fn setup_test_db() -> (Database, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Database::new(&db_path).unwrap();
        (db, temp_dir)
    }

    fn record(feature: &str, prompt: i64, response: i64) -> UsageRecord {
        UsageRecord {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            feature: feature.to_string(),
            prompt_tokens: Some(prompt),
            response_tokens: Some(response),
            ..Default::default()
        }
    }

    #[test]
    fn test_log_usage_appends() {
        let (db, _temp) = setup_test_db();
        let id1 = db.log_usage(&record("summarization", 100, 50)).unwrap();
        let id2 = db.log_usage(&record("summarization", 200, 80)).unwrap();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_usage_summary_aggregates_by_bucket() {
        let (db, _temp) = setup_test_db();
        db.log_usage(&record("summarization", 100, 50)).unwrap();
        db.log_usage(&record("summarization", 200, 80)).unwrap();
        db.log_usage(&record("transcription", 0, 0)).unwrap();

        let summary = db.usage_summary().unwrap();
        assert_eq!(summary.buckets.len(), 2);
        assert_eq!(summary.call_count, 3);
        assert_eq!(summary.total_tokens, 430);

        let sum_bucket = summary
            .buckets
            .iter()
            .find(|b| b.feature == "summarization")
            .unwrap();
        assert_eq!(sum_bucket.call_count, 2);
        assert_eq!(sum_bucket.prompt_tokens, 300);
        assert_eq!(sum_bucket.response_tokens, 130);
    }

    #[test]
    fn test_usage_summary_empty_ledger() {
        let (db, _temp) = setup_test_db();
        let summary = db.usage_summary().unwrap();
        assert!(summary.buckets.is_empty());
        assert_eq!(summary.call_count, 0);
        assert_eq!(summary.total_tokens, 0);
    }

    #[test]
    fn test_audio_duration_stored_without_tokens() {
        let (db, _temp) = setup_test_db();
        let rec = UsageRecord {
            provider: "openai".to_string(),
            model: "whisper-1".to_string(),
            feature: "transcription".to_string(),
            audio_duration_seconds: Some(621.5),
            video_id: Some("aaaaaaaaaaa".to_string()),
            ..Default::default()
        };
        db.log_usage(&rec).unwrap();

        let summary = db.usage_summary().unwrap();
        assert_eq!(summary.buckets[0].total_tokens, 0);
        assert_eq!(summary.call_count, 1);
    }
}
