// Engine: fetch a user's contributions, score every organization in
// parallel, and run per-user serialized reconciliation passes.

use crate::config::{EngineConfig, ScoringParams};
use crate::error::ReputationError;
use crate::extractor::{self, LanguageEstimator, RepoLanguageEstimator};
use crate::reconciler::Reconciler;
use crate::scorer;
use crate::source::ContributionSource;
use crate::types::{BatchReport, ContributionRecord, OrgProfile, OrgReputationScore, ReputationReport};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

pub struct ReputationEngine {
    source: Arc<dyn ContributionSource>,
    estimator: Box<dyn LanguageEstimator>,
    profiles: BTreeMap<String, OrgProfile>,
    params: ScoringParams,
}

impl ReputationEngine {
    pub fn new(source: Arc<dyn ContributionSource>) -> Self {
        Self {
            source,
            estimator: Box::new(RepoLanguageEstimator::default()),
            profiles: BTreeMap::new(),
            params: ScoringParams::default(),
        }
    }

    /// Engine with the org profiles and scoring params of a config.
    pub fn from_config(source: Arc<dyn ContributionSource>, config: &EngineConfig) -> Self {
        Self::new(source)
            .with_profiles(config.orgs.clone())
            .with_params(config.scoring.clone())
    }

    pub fn with_estimator(mut self, estimator: Box<dyn LanguageEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn with_profiles(mut self, profiles: BTreeMap<String, OrgProfile>) -> Self {
        self.profiles = profiles;
        self
    }

    pub fn with_params(mut self, params: ScoringParams) -> Self {
        self.params = params;
        self
    }

    /// Read interface: overall score plus per-org breakdown, as of now.
    pub fn compute(&self, user: &str) -> Result<ReputationReport, ReputationError> {
        self.compute_at(user, Utc::now())
    }

    /// A provider failure is an error; a user with no contributions is an
    /// empty report with overall score 0.
    pub fn compute_at(&self, user: &str, now: DateTime<Utc>) -> Result<ReputationReport, ReputationError> {
        let records = self.source.fetch_contributions(user)?;
        log::info!("{}: {} contribution records", user, records.len());
        Ok(self.score_records(user, &records, now))
    }

    pub fn score_records(
        &self,
        user: &str,
        records: &[ContributionRecord],
        now: DateTime<Utc>,
    ) -> ReputationReport {
        let organizations = self.score_orgs(records, now);
        let overall_score = scorer::overall_points(&organizations);
        log::debug!(
            "{}: {} organizations, overall {}",
            user,
            organizations.len(),
            overall_score
        );
        ReputationReport {
            user: user.to_string(),
            overall_score,
            organizations,
            computed_at: now,
        }
    }

    /// Per-org scores, sorted by org name.
    pub fn score_orgs(&self, records: &[ContributionRecord], now: DateTime<Utc>) -> Vec<OrgReputationScore> {
        let orgs = extractor::organizations(records);
        let default_profile = OrgProfile::default();

        let mut scores: Vec<OrgReputationScore> = orgs
            .par_iter()
            .map(|org| {
                let inputs = extractor::extract_org_inputs(
                    records,
                    org,
                    self.estimator.as_ref(),
                    &self.params,
                    now,
                );
                let profile = self.profiles.get(org).unwrap_or(&default_profile);
                scorer::score_org(&inputs, profile, &self.params, now)
            })
            .collect();

        scores.sort_by(|a, b| a.org_name.cmp(&b.org_name));
        scores
    }
}

/// Scores plus the batch outcome of one pass.
#[derive(Debug, Clone)]
pub struct SyncResult {
    pub report: ReputationReport,
    pub batch: BatchReport,
}

/// Runs reconciliation passes. Passes for the same user serialize on that
/// user's lock; different users proceed in parallel.
pub struct SyncService {
    engine: ReputationEngine,
    reconciler: Reconciler,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SyncService {
    pub fn new(engine: ReputationEngine, reconciler: Reconciler) -> Self {
        Self {
            engine,
            reconciler,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn sync(&self, user: &str, developer_address: &str) -> Result<SyncResult, ReputationError> {
        self.sync_at(user, developer_address, Utc::now())
    }

    pub fn sync_at(
        &self,
        user: &str,
        developer_address: &str,
        now: DateTime<Utc>,
    ) -> Result<SyncResult, ReputationError> {
        let lock = self.user_lock(user);
        let _guard = lock.lock().unwrap_or_else(|p| p.into_inner());

        let report = self.engine.compute_at(user, now)?;
        let timestamp_ms = now.timestamp_millis().max(0) as u64;
        let batch = self
            .reconciler
            .run(user, developer_address, &report.organizations, timestamp_ms);
        Ok(SyncResult { report, batch })
    }

    fn user_lock(&self, user: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        locks
            .entry(user.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStore;
    use crate::error::LedgerError;
    use crate::ledger::LedgerWriter;
    use crate::reconciler::ReconcilerConfig;
    use crate::source::StaticSource;
    use crate::types::{ContributionKind, LedgerReceipt, RecordState, WriteIntent, WriteMode};
    use chrono::{Duration, TimeZone};
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn merged_pr(repo: &str, days_ago: i64) -> ContributionRecord {
        let created = now() - Duration::days(days_ago);
        ContributionRecord {
            kind: ContributionKind::PullRequest,
            organization: repo.split('/').next().unwrap().to_string(),
            repository: repo.to_string(),
            created_at: created,
            closed_at: Some(created + Duration::days(1)),
            merged_at: Some(created + Duration::days(1)),
            state: RecordState::Merged,
            language: Some("Rust".to_string()),
        }
    }

    fn source() -> Arc<StaticSource> {
        Arc::new(
            StaticSource::new()
                .with_user(
                    "alice",
                    vec![merged_pr("zeta/core", 3), merged_pr("acme/api", 10), merged_pr("acme/web", 40)],
                )
                .with_user("newbie", vec![]),
        )
    }

    /// Counts concurrent writers; fails the test if two overlap.
    #[derive(Default)]
    struct OverlapLedger {
        next: AtomicU64,
        writes: AtomicUsize,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    impl LedgerWriter for OverlapLedger {
        fn write_attestation(&self, intent: &WriteIntent) -> Result<LedgerReceipt, LedgerError> {
            let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now_active, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(5));
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.writes.fetch_add(1, Ordering::SeqCst);
            let i = match intent.mode {
                WriteMode::Create => self.next.fetch_add(1, Ordering::SeqCst),
                WriteMode::Update { ledger_index } => ledger_index,
            };
            Ok(LedgerReceipt {
                ledger_index: i,
                tx_handle: format!("0x{}", i),
            })
        }
    }

    #[test]
    fn report_is_sorted_and_has_overall() {
        let engine = ReputationEngine::new(source());
        let report = engine.compute_at("alice", now()).unwrap();
        let names: Vec<&str> = report.organizations.iter().map(|o| o.org_name.as_str()).collect();
        assert_eq!(names, vec!["acme", "zeta"]);
        assert!(report.overall_score > 0);
        assert!(report.overall_score <= scorer::OVERALL_MAX);
        assert_eq!(report.organizations[0].metrics.total_prs, 2);
    }

    #[test]
    fn no_contributions_is_empty_report() {
        let engine = ReputationEngine::new(source());
        let report = engine.compute_at("newbie", now()).unwrap();
        assert!(report.organizations.is_empty());
        assert_eq!(report.overall_score, 0);
    }

    #[test]
    fn provider_failure_is_an_error() {
        let engine = ReputationEngine::new(source());
        assert!(matches!(
            engine.compute_at("ghost", now()),
            Err(ReputationError::Fetch(_))
        ));
    }

    #[test]
    fn configured_profile_changes_repo_activity() {
        let mut profiles = BTreeMap::new();
        profiles.insert(
            "acme".to_string(),
            OrgProfile {
                repo_total: Some(2),
                ..Default::default()
            },
        );
        let plain = ReputationEngine::new(source()).compute_at("alice", now()).unwrap();
        let tuned = ReputationEngine::new(source())
            .with_profiles(profiles)
            .compute_at("alice", now())
            .unwrap();
        assert!(
            tuned.organizations[0].breakdown.repo_activity
                > plain.organizations[0].breakdown.repo_activity
        );
    }

    #[test]
    fn same_user_passes_never_overlap() {
        let ledger = Arc::new(OverlapLedger::default());
        let config = ReconcilerConfig {
            write_interval: std::time::Duration::ZERO,
            ..Default::default()
        };
        let reconciler = Reconciler::new(ledger.clone(), Arc::new(MemoryCacheStore::new()), config);
        let service = Arc::new(SyncService::new(ReputationEngine::new(source()), reconciler));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let service = Arc::clone(&service);
                std::thread::spawn(move || service.sync_at("alice", "0xdev", now()).unwrap())
            })
            .collect();
        for h in handles {
            let result = h.join().unwrap();
            assert_eq!(result.batch.failed(), 0);
        }
        assert_eq!(ledger.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(ledger.writes.load(Ordering::SeqCst), 8);
        assert_eq!(ledger.next.load(Ordering::SeqCst), 2);
    }
}
