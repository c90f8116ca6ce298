use crate::error::FailureKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Number of trailing 7-day buckets in `OrgMetricInputs::weekly_activity`.
pub const ACTIVITY_WEEKS: usize = 52;

// ── Contribution data (read-only input) ──

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContributionKind {
    #[default]
    PullRequest,
    Issue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordState {
    Open,
    Closed,
    Merged,
}

/// A single pull request or issue, validated at the source boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContributionRecord {
    pub kind: ContributionKind,
    /// Owner part of `repository`
    pub organization: String,
    /// Full name, `owner/name`
    pub repository: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_at: Option<DateTime<Utc>>,
    pub state: RecordState,
    /// Primary language of the repository, when the provider knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl ContributionRecord {
    pub fn is_merged(&self) -> bool {
        self.merged_at.is_some()
    }

    /// True when the record lives in a repository owned by `org`.
    pub fn belongs_to(&self, org: &str) -> bool {
        self.repository
            .strip_prefix(org)
            .map(|rest| rest.starts_with('/'))
            .unwrap_or(false)
    }
}

// ── Metric inputs and scores ──

/// Raw per-organization counters derived from contribution records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgMetricInputs {
    pub org_name: String,
    /// Records of any kind in the org
    pub record_count: usize,
    pub pr_total: usize,
    pub pr_merged: usize,
    /// Merged PRs inside the recency window
    pub merged_recent: usize,
    pub issue_count: usize,
    pub repo_count: usize,
    /// Distinct repositories with at least one merged PR
    pub repos_with_merges: usize,
    pub first_contribution_year: i32,
    /// Most recent week last
    pub weekly_activity: Vec<u32>,
    pub language_mix: BTreeMap<String, f64>,
}

impl OrgMetricInputs {
    pub fn active_weeks(&self) -> usize {
        self.weekly_activity.iter().filter(|&&n| n > 0).count()
    }
}

/// The six bounded sub-scores, each in [0,1].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OrgMetricSet {
    pub repo_activity: f64,
    pub tenure: f64,
    pub language_stack: f64,
    pub quality: f64,
    pub oss_contribution: f64,
    pub consistency: f64,
}

impl OrgMetricSet {
    /// Sub-scores in weight order.
    pub fn values(&self) -> [f64; 6] {
        [
            self.repo_activity,
            self.tenure,
            self.language_stack,
            self.quality,
            self.oss_contribution,
            self.consistency,
        ]
    }
}

/// Display and payload summary of an organization's raw counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrgMetricsSummary {
    pub total_prs: u64,
    pub merged_prs: u64,
    pub estimated_loc: u64,
    pub issue_count: u64,
    pub repo_count: u64,
    pub active_weeks: u64,
    pub tenure_years: u64,
    pub first_contribution_year: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgReputationScore {
    pub org_name: String,
    /// In [0,1], rounded to two decimals
    pub total_score: f64,
    pub breakdown: OrgMetricSet,
    pub metrics: OrgMetricsSummary,
    /// Records seen for this org; zero means no data
    pub record_count: usize,
}

/// Read interface: overall score plus per-organization breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReputationReport {
    pub user: String,
    /// 0–1000 points
    pub overall_score: u32,
    pub organizations: Vec<OrgReputationScore>,
    pub computed_at: DateTime<Utc>,
}

/// Org-wide context that sharpens scoring when known.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrgProfile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub founding_year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_total: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_distribution: Option<BTreeMap<String, f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub typical_weekly_rate: Option<f64>,
}

// ── Ledger payload and write intents ──

/// Integer-scaled attestation payload persisted on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationPayload {
    pub org_name: String,
    pub developer_address: String,
    pub total_score: u32,
    pub repo_activity_score: u32,
    pub tenure_score: u32,
    pub language_stack_score: u32,
    pub quality_score: u32,
    pub oss_contribution_score: u32,
    pub consistency_score: u32,
    #[serde(rename = "totalPRs")]
    pub total_prs: u64,
    #[serde(rename = "mergedPRs")]
    pub merged_prs: u64,
    #[serde(rename = "estimatedLOC")]
    pub estimated_loc: u64,
    pub issue_count: u64,
    pub repo_count: u64,
    pub active_weeks: u64,
    pub tenure_years: u64,
    /// Epoch milliseconds
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum WriteMode {
    Create,
    Update { ledger_index: u64 },
}

/// Scaled payload plus the create/update decision, prior to submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteIntent {
    #[serde(flatten)]
    pub mode: WriteMode,
    pub payload: AttestationPayload,
}

impl WriteIntent {
    pub fn org_name(&self) -> &str {
        &self.payload.org_name
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerReceipt {
    pub ledger_index: u64,
    pub tx_handle: String,
}

/// Locally cached ledger index for one (user, organization) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub ledger_index: u64,
    /// Scaled total score (0–100) of the last successful write
    pub last_score: u32,
    #[serde(default)]
    pub payload_hash: String,
    pub updated_at: DateTime<Utc>,
}

/// org name → cache entry
pub type AttestationCache = BTreeMap<String, CacheEntry>;

// ── Reconciliation results ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrgStatus {
    Pending,
    Generating,
    Attesting,
    Completed,
    Failed,
    Skipped,
}

impl fmt::Display for OrgStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrgStatus::Pending => write!(f, "pending"),
            OrgStatus::Generating => write!(f, "generating"),
            OrgStatus::Attesting => write!(f, "attesting"),
            OrgStatus::Completed => write!(f, "completed"),
            OrgStatus::Failed => write!(f, "failed"),
            OrgStatus::Skipped => write!(f, "skipped"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteAction {
    Created,
    Updated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub reason: String,
}

/// Result of reconciling one organization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrgOutcome {
    pub org_name: String,
    pub status: OrgStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<WriteAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_index: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_score: Option<u32>,
    pub new_score: u32,
    /// False when the scaled payload equals the last one written
    pub changed: bool,
    /// Cached index the ledger no longer recognized
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stale_index: Option<u64>,
    /// Why the org did not complete. Skipped orgs carry `no-data` here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
}

impl OrgOutcome {
    pub fn pending(org_name: &str) -> Self {
        Self {
            org_name: org_name.to_string(),
            status: OrgStatus::Pending,
            action: None,
            ledger_index: None,
            tx_handle: None,
            previous_score: None,
            new_score: 0,
            changed: false,
            stale_index: None,
            failure: None,
        }
    }

    pub fn fail(&mut self, kind: FailureKind, reason: impl Into<String>) {
        self.status = OrgStatus::Failed;
        self.failure = Some(Failure {
            kind,
            reason: reason.into(),
        });
    }

    /// Mark as skipped. Not counted as a failure.
    pub fn skip(&mut self, kind: FailureKind, reason: impl Into<String>) {
        self.status = OrgStatus::Skipped;
        self.failure = Some(Failure {
            kind,
            reason: reason.into(),
        });
    }
}

/// Outcome of one reconciliation pass for one user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchReport {
    pub user: String,
    pub outcomes: Vec<OrgOutcome>,
    /// Stopped early after reaching the failure threshold
    pub halted: bool,
}

impl BatchReport {
    fn count(&self, pred: impl Fn(&OrgOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(o)).count()
    }

    pub fn created(&self) -> usize {
        self.count(|o| o.action == Some(WriteAction::Created) && o.status == OrgStatus::Completed)
    }

    pub fn updated(&self) -> usize {
        self.count(|o| o.action == Some(WriteAction::Updated) && o.status == OrgStatus::Completed)
    }

    pub fn failed(&self) -> usize {
        self.count(|o| o.status == OrgStatus::Failed)
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| o.status == OrgStatus::Skipped)
    }

    pub fn outcome(&self, org: &str) -> Option<&OrgOutcome> {
        self.outcomes.iter().find(|o| o.org_name == org)
    }
}
