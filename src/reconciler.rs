// Attestation reconciler: decide create vs update per organization, submit
// writes one at a time with pacing, and keep the index cache in step.
//
// Per-org state: pending → generating → attesting → completed | failed.
// Orgs without records are skipped. A failure never aborts the batch unless
// the configured failure threshold is reached. A timed-out write is awaited
// before the next one is issued.

use crate::cache::{payload_hash, CacheStore};
use crate::config::EngineConfig;
use crate::error::{FailureKind, LedgerError};
use crate::ledger::LedgerWriter;
use crate::scaler::build_payload;
use crate::scheduler::{Clock, SystemClock, WriteScheduler};
use crate::types::{
    AttestationCache, AttestationPayload, BatchReport, CacheEntry, LedgerReceipt,
    OrgOutcome, OrgReputationScore, OrgStatus, WriteAction, WriteIntent, WriteMode,
};
use chrono::Utc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

/// Create when the org has no cached index, update that index otherwise.
pub fn plan_write(payload: AttestationPayload, cache: &AttestationCache) -> WriteIntent {
    let mode = match cache.get(&payload.org_name) {
        Some(entry) => WriteMode::Update {
            ledger_index: entry.ledger_index,
        },
        None => WriteMode::Create,
    };
    WriteIntent { mode, payload }
}

/// Intents a pass would submit, without submitting them. No-data orgs are left out.
pub fn plan_batch(
    scores: &[OrgReputationScore],
    developer_address: &str,
    timestamp_ms: u64,
    cache: &AttestationCache,
) -> Vec<WriteIntent> {
    scores
        .iter()
        .filter(|s| s.record_count > 0)
        .map(|s| plan_write(build_payload(s, developer_address, timestamp_ms), cache))
        .collect()
}

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub write_interval: Duration,
    pub write_timeout: Duration,
    pub max_failures: Option<usize>,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            write_interval: Duration::from_secs(2),
            write_timeout: Duration::from_secs(30),
            max_failures: None,
        }
    }
}

impl From<&EngineConfig> for ReconcilerConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            write_interval: config.write_interval(),
            write_timeout: config.write_timeout(),
            max_failures: config.max_failures,
        }
    }
}

pub struct Reconciler {
    ledger: Arc<dyn LedgerWriter>,
    cache: Arc<dyn CacheStore>,
    config: ReconcilerConfig,
    clock: Arc<dyn Clock>,
}

impl Reconciler {
    pub fn new(
        ledger: Arc<dyn LedgerWriter>,
        cache: Arc<dyn CacheStore>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            ledger,
            cache,
            config,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// One reconciliation pass for one user. Orgs are processed strictly in
    /// order; the caller must not run two passes for the same user at once.
    pub fn run(
        &self,
        user: &str,
        developer_address: &str,
        scores: &[OrgReputationScore],
        timestamp_ms: u64,
    ) -> BatchReport {
        let mut report = BatchReport {
            user: user.to_string(),
            outcomes: scores.iter().map(|s| OrgOutcome::pending(&s.org_name)).collect(),
            halted: false,
        };
        let mut pass = Pass {
            scheduler: WriteScheduler::new(self.config.write_interval, self.clock.clone()),
            slot: 0,
            late: None,
        };
        let mut failures = 0usize;

        log::info!("reconciling {} organizations for {}", scores.len(), user);
        for (i, score) in scores.iter().enumerate() {
            self.settle_late(user, &mut pass, &mut report.outcomes);
            pass.slot = i;
            let outcome = &mut report.outcomes[i];
            self.reconcile_org(user, developer_address, score, timestamp_ms, &mut pass, outcome);
            log_outcome(outcome);

            if outcome.status == OrgStatus::Failed {
                failures += 1;
                let remaining = scores.len() - i - 1;
                if let Some(max) = self.config.max_failures {
                    if failures >= max && remaining > 0 {
                        log::warn!(
                            "{} failures reached threshold {}, leaving {} organizations pending",
                            failures,
                            max,
                            remaining
                        );
                        report.halted = true;
                        break;
                    }
                }
            }
        }
        self.settle_late(user, &mut pass, &mut report.outcomes);

        log::info!(
            "pass for {}: {} created, {} updated, {} failed, {} skipped",
            user,
            report.created(),
            report.updated(),
            report.failed(),
            report.skipped()
        );
        report
    }

    fn reconcile_org(
        &self,
        user: &str,
        developer_address: &str,
        score: &OrgReputationScore,
        timestamp_ms: u64,
        pass: &mut Pass,
        outcome: &mut OrgOutcome,
    ) {
        if score.record_count == 0 {
            outcome.skip(FailureKind::NoData, "no contribution records");
            return;
        }

        outcome.status = OrgStatus::Generating;
        let payload = build_payload(score, developer_address, timestamp_ms);
        outcome.new_score = payload.total_score;
        let hash = payload_hash(&payload);

        // Re-read per org: a concurrent writer may have filled the entry.
        let cache = match self.cache.read_cache(user) {
            Ok(c) => c,
            Err(e) => {
                outcome.fail(FailureKind::CacheUnavailable, e.to_string());
                return;
            }
        };
        let previous = cache.get(&score.org_name);
        outcome.previous_score = previous.map(|e| e.last_score);
        outcome.changed = previous.map(|e| e.payload_hash != hash).unwrap_or(true);

        let intent = plan_write(payload, &cache);
        log::debug!("{}: {:?}", score.org_name, intent.mode);
        outcome.status = OrgStatus::Attesting;

        let (receipt, action) = match self.submit(&intent, pass) {
            Ok(receipt) => match intent.mode {
                WriteMode::Create => (receipt, WriteAction::Created),
                WriteMode::Update { .. } => (receipt, WriteAction::Updated),
            },
            Err(LedgerError::UnknownIndex(stale)) => {
                log::warn!(
                    "{}: cached index {} unknown to the ledger, creating a new entry",
                    score.org_name,
                    stale
                );
                outcome.stale_index = Some(stale);
                let fallback = WriteIntent {
                    mode: WriteMode::Create,
                    payload: intent.payload.clone(),
                };
                match self.submit(&fallback, pass) {
                    Ok(receipt) => (receipt, WriteAction::Created),
                    Err(e) => {
                        outcome.fail(e.kind(), e.to_string());
                        return;
                    }
                }
            }
            Err(e) => {
                outcome.fail(e.kind(), e.to_string());
                return;
            }
        };

        outcome.action = Some(action);
        outcome.ledger_index = Some(receipt.ledger_index);
        outcome.tx_handle = Some(receipt.tx_handle);

        let entry = CacheEntry {
            ledger_index: receipt.ledger_index,
            last_score: outcome.new_score,
            payload_hash: hash,
            updated_at: Utc::now(),
        };
        if let Err(e) = self.cache.write_cache(user, &score.org_name, entry) {
            outcome.fail(
                FailureKind::CacheUnavailable,
                format!("ledger index {} not cached: {}", receipt.ledger_index, e),
            );
            return;
        }
        outcome.status = OrgStatus::Completed;
    }

    /// Issue one paced write and validate the receipt. A write that times
    /// out is parked in `pass.late` and reported as unreachable.
    fn submit(
        &self,
        intent: &WriteIntent,
        pass: &mut Pass,
    ) -> Result<LedgerReceipt, LedgerError> {
        pass.scheduler.wait_turn();
        let attempt = self.write_with_timeout(intent);
        pass.scheduler.record_write();
        match attempt? {
            WriteAttempt::Answered(result) => check_receipt(intent, result),
            WriteAttempt::TimedOut(rx) => {
                pass.late = Some(LateWrite {
                    slot: pass.slot,
                    intent: intent.clone(),
                    rx,
                });
                Err(LedgerError::Unreachable(format!(
                    "no answer within {:?}",
                    self.config.write_timeout
                )))
            }
        }
    }

    /// Run the write on a worker thread, waiting at most `write_timeout`.
    fn write_with_timeout(&self, intent: &WriteIntent) -> Result<WriteAttempt, LedgerError> {
        let (tx, rx) = mpsc::channel();
        let ledger = Arc::clone(&self.ledger);
        let owned = intent.clone();
        std::thread::Builder::new()
            .name("ledger-write".to_string())
            .spawn(move || {
                let _ = tx.send(ledger.write_attestation(&owned));
            })
            .map_err(|e| LedgerError::Unreachable(format!("spawning writer: {}", e)))?;

        match rx.recv_timeout(self.config.write_timeout) {
            Ok(result) => Ok(WriteAttempt::Answered(result)),
            Err(RecvTimeoutError::Timeout) => Ok(WriteAttempt::TimedOut(rx)),
            Err(RecvTimeoutError::Disconnected) => Ok(WriteAttempt::Answered(Err(
                LedgerError::Unreachable("writer exited without an answer".to_string()),
            ))),
        }
    }

    /// Block until a timed-out write finishes. A late success is cached so the
    /// next pass updates that index instead of creating a second entry. The
    /// org stays failed for this pass.
    fn settle_late(&self, user: &str, pass: &mut Pass, outcomes: &mut [OrgOutcome]) {
        let late = match pass.late.take() {
            Some(late) => late,
            None => return,
        };
        let outcome = &mut outcomes[late.slot];
        log::debug!("{}: waiting for timed-out write", outcome.org_name);

        let result = late.rx.recv().unwrap_or_else(|_| {
            Err(LedgerError::Unreachable("writer exited without an answer".to_string()))
        });
        let receipt = match check_receipt(&late.intent, result) {
            Ok(receipt) => receipt,
            Err(e) => {
                log::warn!("{}: timed-out write failed: {}", outcome.org_name, e);
                return;
            }
        };

        log::warn!(
            "{}: timed-out write landed at index {}, caching it",
            outcome.org_name,
            receipt.ledger_index
        );
        outcome.ledger_index = Some(receipt.ledger_index);
        outcome.tx_handle = Some(receipt.tx_handle);
        let entry = CacheEntry {
            ledger_index: receipt.ledger_index,
            last_score: late.intent.payload.total_score,
            payload_hash: payload_hash(&late.intent.payload),
            updated_at: Utc::now(),
        };
        if let Err(e) = self.cache.write_cache(user, &outcome.org_name, entry) {
            log::warn!(
                "{}: ledger index {} not cached: {}",
                outcome.org_name,
                receipt.ledger_index,
                e
            );
        }
    }
}

/// Per-pass write state. At most one write is in flight for the user.
struct Pass {
    scheduler: WriteScheduler,
    /// Index of the org being reconciled
    slot: usize,
    late: Option<LateWrite>,
}

/// A write that outlived `write_timeout` and is still running.
struct LateWrite {
    slot: usize,
    intent: WriteIntent,
    rx: Receiver<Result<LedgerReceipt, LedgerError>>,
}

enum WriteAttempt {
    Answered(Result<LedgerReceipt, LedgerError>),
    TimedOut(Receiver<Result<LedgerReceipt, LedgerError>>),
}

fn check_receipt(
    intent: &WriteIntent,
    result: Result<LedgerReceipt, LedgerError>,
) -> Result<LedgerReceipt, LedgerError> {
    let receipt = result?;
    if receipt.tx_handle.trim().is_empty() {
        return Err(LedgerError::Malformed("empty transaction handle".to_string()));
    }
    if let WriteMode::Update { ledger_index } = intent.mode {
        if receipt.ledger_index != ledger_index {
            return Err(LedgerError::Malformed(format!(
                "update of index {} answered with index {}",
                ledger_index, receipt.ledger_index
            )));
        }
    }
    Ok(receipt)
}

fn log_outcome(outcome: &OrgOutcome) {
    match (&outcome.status, &outcome.failure) {
        (OrgStatus::Failed, Some(f)) => {
            log::warn!("{}: failed ({}): {}", outcome.org_name, f.kind, f.reason)
        }
        (OrgStatus::Skipped, _) => log::debug!("{}: no contributions, skipped", outcome.org_name),
        (status, _) => log::info!(
            "{}: {} {:?} index={:?} score {:?} → {}",
            outcome.org_name,
            status,
            outcome.action,
            outcome.ledger_index,
            outcome.previous_score,
            outcome.new_score
        ),
    }
}
