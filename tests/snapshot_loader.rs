// Snapshot directories on disk through the loader and the pipeline

#[cfg(test)]
mod tests {
    use prop_ev::config::Config;
    use prop_ev::feed::{FileSnapshotSource, SnapshotSource};
    use prop_ev::pipeline::build_report;
    use prop_ev::report::StrategyMode;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    const CONTEXT: &str = r#"{
        "snapshot_id": "2026-01-10T18",
        "now_utc": "2026-01-10T18:00:00Z",
        "events": {"e1": {"home_team": "BOS", "away_team": "NYK"}},
        "players": [
            {"event_id": "e1", "player": "Ann", "injury_status": "available", "roster_status": "active"}
        ],
        "health": {"official_injuries_ready": true, "injuries_stale": false, "roster_stale": false}
    }"#;

    fn quote_line(side: &str, price: i64, book: &str) -> String {
        format!(
            r#"{{"event_id":"e1","market":"player_points","player":"Ann","point":24.5,"side":"{side}","price":{price},"book":"{book}","link":"","last_update":"2026-01-10T17:55:00Z"}}"#
        )
    }

    fn write_snapshot(dir: &Path) {
        let mut lines = vec![
            quote_line("over", -110, "sharp1"),
            quote_line("under", -110, "sharp1"),
            quote_line("over", -110, "sharp2"),
            quote_line("under", -110, "sharp2"),
            "{truncated".to_string(),
            String::new(),
            quote_line("over", 116, "soft"),
        ];
        lines.push(String::new());
        fs::write(dir.join("quotes.jsonl"), lines.join("\n")).unwrap();
        fs::write(dir.join("context.json"), CONTEXT).unwrap();

        let entries: Vec<String> = (0..=20)
            .map(|bucket| {
                format!(
                    r#"{{"market":"player_points","side":"over","bucket":{bucket},"delta":0.01,"sample_size":50}}"#
                )
            })
            .collect();
        fs::write(
            dir.join("calibration.json"),
            format!(r#"{{"bucket_size":0.05,"entries":[{}]}}"#, entries.join(",")),
        )
        .unwrap();
        fs::write(
            dir.join("priors.json"),
            r#"{"window_days":30,"rows_used":412,"adjustments":{"player_points::over":{"delta":0.02,"sample_size":80}}}"#,
        )
        .unwrap();
    }

    #[test]
    fn test_load_and_report() {
        let dir = TempDir::new().unwrap();
        write_snapshot(dir.path());

        let snapshot = FileSnapshotSource::new(dir.path()).load_snapshot().unwrap();
        assert_eq!(snapshot.snapshot_id, "2026-01-10T18");
        assert_eq!(snapshot.quotes.len(), 5);
        assert_eq!(snapshot.malformed_quote_lines, 1);
        assert!(snapshot.minutes.is_empty());

        let mut config = Config::default();
        config.baseline.exclude_selected_book = true;
        let report = build_report(&snapshot, &config).unwrap();
        assert_eq!(report.strategy_mode, StrategyMode::FullBoard);
        assert_eq!(report.health_report.feeds.malformed_quote_lines, 1);

        let c = &report.candidates[0];
        assert!(c.eligible, "reason: {:?}", c.reason);
        assert_eq!(c.home_team.as_deref(), Some("BOS"));
        let p = c.model_p_hit.unwrap();
        assert!((c.p_hit_calibrated.unwrap() - (p + 0.01)).abs() < 1e-9);
        assert_eq!(c.historical_prior_samples, 80);
        assert!((c.historical_prior_delta - 0.02).abs() < 1e-12);
        assert_eq!(report.execution_plan.selected.len(), 1);

        let json = report.to_json().unwrap();
        assert!(json.contains("\"strategy_mode\": \"full_board\""));
    }

    #[test]
    fn test_missing_context_fails() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("quotes.jsonl"), quote_line("over", -110, "b1")).unwrap();
        let err = FileSnapshotSource::new(dir.path()).load_snapshot().unwrap_err();
        assert!(err.to_string().contains("context.json"));
    }

    #[test]
    fn test_bad_calibration_file_fails() {
        let dir = TempDir::new().unwrap();
        write_snapshot(dir.path());
        fs::write(dir.path().join("calibration.json"), "[not a lookup").unwrap();
        assert!(FileSnapshotSource::new(dir.path()).load_snapshot().is_err());
    }
}
