//! Engagement ledger
//!
//! Durable map from item id to the agents that already replied to it:
//!
//! ```json
//! { "abc123": [ { "comment": "...", "agent": "agent0", "timestamp": 1792300000.5 } ] }
//! ```
//!
//! Single writer per file. The whole map is rewritten through a temp file and
//! a rename after every successful record, so readers never see partial JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::{PilotError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementRecord {
    /// Text that was posted
    pub comment: String,
    pub agent: String,
    /// Unix seconds
    pub timestamp: f64,
}

pub type LedgerEntries = BTreeMap<String, Vec<EngagementRecord>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded,
    /// The (item, agent) pair was already present; nothing was written
    AlreadyRecorded,
}

pub struct EngagementLedger {
    path: PathBuf,
    entries: LedgerEntries,
}

impl EngagementLedger {
    /// Load the ledger, degrading to empty when the file is absent or unreadable
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match read_entries(&path) {
            Ok(Some(entries)) => {
                info!(
                    "Loaded engagement ledger {} ({} items)",
                    path.display(),
                    entries.len()
                );
                entries
            }
            Ok(None) => {
                debug!("No engagement ledger at {}, starting empty", path.display());
                LedgerEntries::new()
            }
            Err(e) => {
                warn!(
                    "Engagement ledger {} unreadable, starting empty: {}",
                    path.display(),
                    e
                );
                LedgerEntries::new()
            }
        };

        Self { path, entries }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn has_acted(&self, item_id: &str, agent: &str) -> bool {
        self.entries
            .get(item_id)
            .map(|records| records.iter().any(|r| r.agent == agent))
            .unwrap_or(false)
    }

    pub fn records(&self, item_id: &str) -> &[EngagementRecord] {
        self.entries.get(item_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn item_count(&self) -> usize {
        self.entries.len()
    }

    pub fn record_count(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// Number of records per agent
    pub fn counts_by_agent(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for record in self.entries.values().flatten() {
            *counts.entry(record.agent.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Merge whatever is currently on disk into memory.
    ///
    /// Records are only ever added, so a missing or corrupt file leaves the
    /// in-memory view as is.
    pub fn refresh(&mut self) {
        match read_entries(&self.path) {
            Ok(Some(on_disk)) => merge(&mut self.entries, on_disk),
            Ok(None) => {}
            Err(e) => warn!("Engagement ledger refresh skipped: {}", e),
        }
    }

    /// Append a record and persist the whole ledger.
    ///
    /// Idempotent per (item, agent). On a failed write the in-memory ledger is
    /// left as it was before the call.
    pub fn record(
        &mut self,
        item_id: &str,
        agent: &str,
        text: &str,
        at: DateTime<Utc>,
    ) -> Result<RecordOutcome> {
        self.refresh();
        if self.has_acted(item_id, agent) {
            return Ok(RecordOutcome::AlreadyRecorded);
        }

        let records = self.entries.entry(item_id.to_string()).or_default();
        records.push(EngagementRecord {
            comment: text.to_string(),
            agent: agent.to_string(),
            timestamp: at.timestamp_millis() as f64 / 1000.0,
        });

        if let Err(e) = self.persist() {
            // Roll back so memory never claims an engagement the file lacks
            if let Some(records) = self.entries.get_mut(item_id) {
                records.pop();
                if records.is_empty() {
                    self.entries.remove(item_id);
                }
            }
            return Err(e);
        }

        Ok(RecordOutcome::Recorded)
    }

    fn persist(&self) -> Result<()> {
        let directory = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let write = || -> std::io::Result<()> {
            std::fs::create_dir_all(directory)?;
            let mut tmp = NamedTempFile::new_in(directory)?;
            serde_json::to_writer_pretty(&mut tmp, &self.entries)?;
            tmp.write_all(b"\n")?;
            tmp.as_file().sync_all()?;
            tmp.persist(&self.path).map_err(|e| e.error)?;
            Ok(())
        };

        write().map_err(|e| {
            PilotError::LedgerWrite(format!("{}: {}", self.path.display(), e))
        })
    }
}

fn read_entries(path: &Path) -> Result<Option<LedgerEntries>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if raw.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(&raw)?))
}

fn merge(into: &mut LedgerEntries, from: LedgerEntries) {
    for (item_id, records) in from {
        let existing = into.entry(item_id).or_default();
        for record in records {
            if !existing.iter().any(|r| r.agent == record.agent) {
                existing.push(record);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = EngagementLedger::load(dir.path().join("comments.json"));
        assert_eq!(ledger.item_count(), 0);
        assert!(!ledger.has_acted("abc123", "agent0"));
    }

    #[test]
    fn test_corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("comments.json");
        std::fs::write(&path, "{ not json").unwrap();

        let ledger = EngagementLedger::load(&path);
        assert_eq!(ledger.item_count(), 0);
    }

    #[test]
    fn test_record_persists_expected_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("comments.json");

        let mut ledger = EngagementLedger::load(&path);
        let outcome = ledger
            .record("abc123", "agent0", "Have you tried fixtures?", at())
            .unwrap();
        assert_eq!(outcome, RecordOutcome::Recorded);

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let records = value["abc123"].as_array().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["agent"], "agent0");
        assert_eq!(records[0]["comment"], "Have you tried fixtures?");
        assert_eq!(records[0]["timestamp"].as_f64().unwrap(), at().timestamp() as f64);

        let reloaded = EngagementLedger::load(&path);
        assert!(reloaded.has_acted("abc123", "agent0"));
        assert!(!reloaded.has_acted("abc123", "agent1"));
    }

    #[test]
    fn test_record_is_at_most_once_per_agent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("comments.json");

        let mut ledger = EngagementLedger::load(&path);
        ledger.record("abc123", "agent0", "first", at()).unwrap();
        let again = ledger.record("abc123", "agent0", "second", at()).unwrap();
        assert_eq!(again, RecordOutcome::AlreadyRecorded);
        ledger.record("abc123", "agent1", "other agent", at()).unwrap();

        let reloaded = EngagementLedger::load(&path);
        let agents: Vec<&str> = reloaded
            .records("abc123")
            .iter()
            .map(|r| r.agent.as_str())
            .collect();
        assert_eq!(agents, vec!["agent0", "agent1"]);
        assert_eq!(reloaded.records("abc123")[0].comment, "first");
        assert_eq!(reloaded.counts_by_agent().get("agent0"), Some(&1));
    }

    #[test]
    fn test_record_sees_writes_made_after_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("comments.json");

        let mut stale = EngagementLedger::load(&path);
        let mut other = EngagementLedger::load(&path);
        other.record("abc123", "agent0", "from another run", at()).unwrap();

        assert!(!stale.has_acted("abc123", "agent0"));
        let outcome = stale.record("abc123", "agent0", "duplicate", at()).unwrap();
        assert_eq!(outcome, RecordOutcome::AlreadyRecorded);
        assert_eq!(EngagementLedger::load(&path).record_count(), 1);
    }

    #[test]
    fn test_failed_write_leaves_ledger_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be makes the final rename fail
        let path = dir.path().join("comments.json");
        std::fs::create_dir(&path).unwrap();

        let mut ledger = EngagementLedger::load(&path);
        let err = ledger.record("abc123", "agent0", "text", at()).unwrap_err();
        assert!(matches!(err, PilotError::LedgerWrite(_)));
        assert!(!ledger.has_acted("abc123", "agent0"));
        assert_eq!(ledger.item_count(), 0);
    }
}
