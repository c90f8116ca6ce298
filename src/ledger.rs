// Ledger writer seam plus a JSONL journal implementation. The journal is the
// outbox a wallet/chain layer replays; it assigns indexes the same way the
// ledger does (sequential, never reused).

use crate::error::LedgerError;
use crate::types::{LedgerReceipt, WriteIntent, WriteMode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Submits one attestation create or update.
pub trait LedgerWriter: Send + Sync {
    fn write_attestation(&self, intent: &WriteIntent) -> Result<LedgerReceipt, LedgerError>;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JournalLine {
    pub ledger_index: u64,
    pub tx_handle: String,
    pub recorded_at: DateTime<Utc>,
    pub intent: WriteIntent,
}

#[derive(Default)]
struct JournalState {
    next_index: u64,
    known: BTreeSet<u64>,
}

/// Append-only JSONL ledger.
pub struct JournalLedger {
    path: PathBuf,
    state: Mutex<JournalState>,
}

impl JournalLedger {
    /// Open (or start) a journal, recovering assigned indexes from disk.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        let mut state = JournalState::default();
        for line in read_journal(&path)? {
            state.known.insert(line.ledger_index);
            state.next_index = state.next_index.max(line.ledger_index + 1);
        }
        log::debug!(
            "journal {}: {} attestations, next index {}",
            path.display(),
            state.known.len(),
            state.next_index
        );
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, line: &JournalLine) -> Result<(), LedgerError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LedgerError::Unreachable(e.to_string()))?;
        }
        let json =
            serde_json::to_string(line).map_err(|e| LedgerError::Rejected(e.to_string()))?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| LedgerError::Unreachable(format!("{}: {}", self.path.display(), e)))?;
        writeln!(file, "{}", json).map_err(|e| LedgerError::Unreachable(e.to_string()))?;
        Ok(())
    }
}

impl LedgerWriter for JournalLedger {
    fn write_attestation(&self, intent: &WriteIntent) -> Result<LedgerReceipt, LedgerError> {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let ledger_index = match intent.mode {
            WriteMode::Create => state.next_index,
            WriteMode::Update { ledger_index } => {
                if !state.known.contains(&ledger_index) {
                    return Err(LedgerError::UnknownIndex(ledger_index));
                }
                ledger_index
            }
        };

        let line = JournalLine {
            ledger_index,
            tx_handle: tx_handle(intent, ledger_index),
            recorded_at: Utc::now(),
            intent: intent.clone(),
        };
        self.append(&line)?;

        if matches!(intent.mode, WriteMode::Create) {
            state.known.insert(ledger_index);
            state.next_index += 1;
        }
        Ok(LedgerReceipt {
            ledger_index,
            tx_handle: line.tx_handle,
        })
    }
}

/// Read every line of a journal. A missing journal is empty.
pub fn read_journal(path: &Path) -> Result<Vec<JournalLine>, LedgerError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| LedgerError::Unreachable(format!("{}: {}", path.display(), e)))?;
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .enumerate()
        .map(|(i, l)| {
            serde_json::from_str(l).map_err(|e| {
                LedgerError::Malformed(format!("{} line {}: {}", path.display(), i + 1, e))
            })
        })
        .collect()
}

fn tx_handle(intent: &WriteIntent, ledger_index: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(ledger_index.to_le_bytes());
    hasher.update(intent.payload.org_name.as_bytes());
    hasher.update(intent.payload.developer_address.as_bytes());
    hasher.update(intent.payload.timestamp.to_le_bytes());
    format!("0x{}", hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AttestationPayload;

    fn intent(org: &str, mode: WriteMode) -> WriteIntent {
        WriteIntent {
            mode,
            payload: AttestationPayload {
                org_name: org.to_string(),
                developer_address: "0xdev".to_string(),
                total_score: 50,
                repo_activity_score: 50,
                tenure_score: 50,
                language_stack_score: 50,
                quality_score: 50,
                oss_contribution_score: 50,
                consistency_score: 50,
                total_prs: 1,
                merged_prs: 1,
                estimated_loc: 100,
                issue_count: 0,
                repo_count: 1,
                active_weeks: 1,
                tenure_years: 0,
                timestamp: 1_700_000_000_000,
            },
        }
    }

    #[test]
    fn creates_get_sequential_indexes() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = JournalLedger::open(dir.path().join("journal.jsonl")).unwrap();
        let a = ledger.write_attestation(&intent("acme", WriteMode::Create)).unwrap();
        let b = ledger.write_attestation(&intent("globex", WriteMode::Create)).unwrap();
        assert_eq!(a.ledger_index, 0);
        assert_eq!(b.ledger_index, 1);
        assert!(a.tx_handle.starts_with("0x"));
        assert_ne!(a.tx_handle, b.tx_handle);
    }

    #[test]
    fn update_keeps_index() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = JournalLedger::open(dir.path().join("journal.jsonl")).unwrap();
        let created = ledger.write_attestation(&intent("acme", WriteMode::Create)).unwrap();
        let updated = ledger
            .write_attestation(&intent("acme", WriteMode::Update { ledger_index: created.ledger_index }))
            .unwrap();
        assert_eq!(updated.ledger_index, created.ledger_index);
        assert_eq!(read_journal(ledger.path()).unwrap().len(), 2);
    }

    #[test]
    fn update_of_unknown_index_fails() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = JournalLedger::open(dir.path().join("journal.jsonl")).unwrap();
        let err = ledger
            .write_attestation(&intent("acme", WriteMode::Update { ledger_index: 9 }))
            .unwrap_err();
        assert_eq!(err, LedgerError::UnknownIndex(9));
        assert!(read_journal(ledger.path()).unwrap().is_empty());
    }

    #[test]
    fn reopen_recovers_indexes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/journal.jsonl");
        {
            let ledger = JournalLedger::open(&path).unwrap();
            ledger.write_attestation(&intent("acme", WriteMode::Create)).unwrap();
            ledger.write_attestation(&intent("globex", WriteMode::Create)).unwrap();
        }
        let ledger = JournalLedger::open(&path).unwrap();
        let next = ledger.write_attestation(&intent("initech", WriteMode::Create)).unwrap();
        assert_eq!(next.ledger_index, 2);
        assert!(ledger
            .write_attestation(&intent("acme", WriteMode::Update { ledger_index: 0 }))
            .is_ok());
    }

    #[test]
    fn corrupt_journal_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        std::fs::write(&path, "{not json}\n").unwrap();
        assert!(matches!(JournalLedger::open(&path), Err(LedgerError::Malformed(_))));
    }
}
