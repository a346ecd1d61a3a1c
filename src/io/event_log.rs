//! Accepted-event persistence
//!
//! Events are written in JSONL format (one JSON object per line) to the file
//! specified in config. The same file is read back at startup to rebuild the
//! roster.

use crate::domain::types::EntryEvent;
use anyhow::Context;
use async_trait::async_trait;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Append-only sink for accepted events
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn append(&self, event: &EntryEvent) -> anyhow::Result<()>;
}

/// JSONL file store
pub struct JsonlEventLog {
    file_path: PathBuf,
}

impl JsonlEventLog {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        let file_path = file_path.into();
        info!(file_path = %file_path.display(), "event_log_initialized");
        Self { file_path }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Read every event in the log
    ///
    /// A missing file is an empty log. Lines that fail to parse are skipped.
    pub fn load(&self) -> anyhow::Result<Vec<EntryEvent>> {
        load_events(&self.file_path)
    }
}

#[async_trait]
impl EventStore for JsonlEventLog {
    async fn append(&self, event: &EntryEvent) -> anyhow::Result<()> {
        let mut line = serde_json::to_string(event).context("Failed to serialize event")?;
        line.push('\n');

        if let Some(parent) = self.file_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)
            .await
            .with_context(|| format!("Failed to open {}", self.file_path.display()))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        debug!(file = %self.file_path.display(), bytes = %line.len(), "event_log_written");
        Ok(())
    }
}

/// Read events from a JSONL file
pub fn load_events(path: &Path) -> anyhow::Result<Vec<EntryEvent>> {
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to open event log {}", path.display()))
        }
    };

    let mut events = Vec::new();
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<EntryEvent>(&line) {
            Ok(event) => events.push(event),
            Err(e) => warn!(line = %(line_no + 1), error = %e, "event_log_line_skipped"),
        }
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{EntryKind, SignalScores, SubjectId};
    use std::fs;
    use tempfile::tempdir;

    fn event(subject: &str, kind: EntryKind) -> EntryEvent {
        EntryEvent::new(
            "main",
            SubjectId::new(subject),
            kind,
            88,
            true,
            false,
            SignalScores { gps: Some(90), wifi: Some(100), motion: None },
        )
    }

    #[tokio::test]
    async fn test_append_and_load() {
        let dir = tempdir().unwrap();
        let log = JsonlEventLog::new(dir.path().join("entries.jsonl"));

        let e1 = event("alice", EntryKind::Entry);
        let e2 = event("alice", EntryKind::Exit);
        log.append(&e1).await.unwrap();
        log.append(&e2).await.unwrap();

        let content = fs::read_to_string(log.path()).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.ends_with('\n'));

        assert_eq!(log.load().unwrap(), vec![e1, e2]);
    }

    #[tokio::test]
    async fn test_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("nested").join("dir").join("entries.jsonl");
        let log = JsonlEventLog::new(&nested);

        log.append(&event("bob", EntryKind::Entry)).await.unwrap();
        assert!(nested.exists());
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let log = JsonlEventLog::new(dir.path().join("absent.jsonl"));
        assert!(log.load().unwrap().is_empty());
    }

    #[test]
    fn test_load_skips_malformed_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("entries.jsonl");
        let good = event("carol", EntryKind::Entry);
        let content = format!(
            "{}\n{{\"not\":\"an event\"}}\n\n{}\n",
            serde_json::to_string(&good).unwrap(),
            "garbage"
        );
        fs::write(&path, content).unwrap();

        let events = load_events(&path).unwrap();
        assert_eq!(events, vec![good]);
    }
}
