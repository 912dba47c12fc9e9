pub mod types;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

use crate::engine::calibration::{CalibrationLookup, RollingPriors};
use types::{MinutesForecast, QuoteRow, Snapshot, SnapshotContext};

pub const QUOTES_FILE: &str = "quotes.jsonl";
pub const CONTEXT_FILE: &str = "context.json";
pub const MINUTES_FILE: &str = "minutes.json";
pub const PRIORS_FILE: &str = "priors.json";
pub const CALIBRATION_FILE: &str = "calibration.json";

/// Anything that can hand the engine one immutable snapshot.
pub trait SnapshotSource {
    fn load_snapshot(&self) -> Result<Snapshot>;
}

/// A snapshot directory on disk.
pub struct FileSnapshotSource {
    dir: PathBuf,
}

impl FileSnapshotSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

impl SnapshotSource for FileSnapshotSource {
    fn load_snapshot(&self) -> Result<Snapshot> {
        let context: SnapshotContext = read_json(&self.path(CONTEXT_FILE))?;
        let (quotes, malformed) = read_quotes(&self.path(QUOTES_FILE))?;
        let mut snapshot = Snapshot::new(context, quotes);
        snapshot.malformed_quote_lines = malformed;

        if let Some(minutes) = read_optional::<Vec<MinutesForecast>>(&self.path(MINUTES_FILE))? {
            snapshot.minutes = minutes;
        }
        if let Some(priors) = read_optional::<RollingPriors>(&self.path(PRIORS_FILE))? {
            snapshot.priors = priors;
        }
        let calibration = read_optional::<CalibrationLookup>(&self.path(CALIBRATION_FILE))?;
        if let Some(calibration) = calibration {
            snapshot.calibration = calibration;
        }

        tracing::debug!(
            snapshot_id = %snapshot.snapshot_id,
            quotes = snapshot.quotes.len(),
            malformed,
            events = snapshot.events.len(),
            players = snapshot.players.len(),
            minutes = snapshot.minutes.len(),
            "snapshot loaded"
        );
        Ok(snapshot)
    }
}

/// Parse newline-delimited quote rows. Blank lines are ignored; lines that
/// are not valid JSON are skipped and counted.
pub fn parse_quotes(content: &str) -> (Vec<QuoteRow>, usize) {
    let mut rows = Vec::new();
    let mut malformed = 0;
    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<QuoteRow>(line) {
            Ok(row) => rows.push(row),
            Err(e) => {
                malformed += 1;
                tracing::warn!(line = i + 1, error = %e, "skipping malformed quote line");
            }
        }
    }
    (rows, malformed)
}

fn read_quotes(path: &Path) -> Result<(Vec<QuoteRow>, usize)> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read quotes: {}", path.display()))?;
    Ok(parse_quotes(&content))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn read_optional<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    read_json(path).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quotes_skips_bad_lines() {
        let content = r#"{"event_id":"e1","market":"player_points","player":"A","point":20.5,"side":"over","price":-110,"book":"fd"}

not json
{"event_id":"e1","market":"player_points","player":"A","point":20.5,"side":"under","price":"-110","book":"fd"}
"#;
        let (rows, malformed) = parse_quotes(content);
        assert_eq!(rows.len(), 2);
        assert_eq!(malformed, 1);
        assert_eq!(rows[1].side, "under");
    }
}
