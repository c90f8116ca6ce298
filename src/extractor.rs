// Metric extractor: derive per-organization counters from a user's full
// contribution record set.

use crate::config::ScoringParams;
use crate::types::{
    ContributionKind, ContributionRecord, OrgMetricInputs, OrgMetricsSummary, ACTIVITY_WEEKS,
};
use chrono::{DateTime, Datelike, Duration, Utc};
use std::collections::{BTreeMap, BTreeSet};

const WEEK_SECONDS: i64 = 7 * 24 * 60 * 60;

/// Estimates how a user's org contributions split across languages.
pub trait LanguageEstimator: Send + Sync {
    fn estimate(&self, records: &[&ContributionRecord], pr_total: usize) -> BTreeMap<String, f64>;
}

/// Fixed share per language, scaled by PR count. Used when the provider has no
/// per-repository language data.
pub struct FixedSplitEstimator {
    split: Vec<(String, f64)>,
}

impl FixedSplitEstimator {
    pub fn new(split: Vec<(String, f64)>) -> Self {
        Self { split }
    }
}

impl Default for FixedSplitEstimator {
    fn default() -> Self {
        Self::new(vec![
            ("TypeScript".to_string(), 0.4),
            ("JavaScript".to_string(), 0.3),
            ("Python".to_string(), 0.2),
            ("Other".to_string(), 0.1),
        ])
    }
}

impl LanguageEstimator for FixedSplitEstimator {
    fn estimate(&self, _records: &[&ContributionRecord], pr_total: usize) -> BTreeMap<String, f64> {
        self.split
            .iter()
            .map(|(lang, share)| (lang.clone(), pr_total as f64 * share))
            .collect()
    }
}

/// Counts PRs per repository language; falls back to the fixed split when no
/// record carries a language.
#[derive(Default)]
pub struct RepoLanguageEstimator {
    fallback: FixedSplitEstimator,
}

impl LanguageEstimator for RepoLanguageEstimator {
    fn estimate(&self, records: &[&ContributionRecord], pr_total: usize) -> BTreeMap<String, f64> {
        let mut mix: BTreeMap<String, f64> = BTreeMap::new();
        for rec in records.iter().filter(|r| r.kind == ContributionKind::PullRequest) {
            if let Some(ref lang) = rec.language {
                *mix.entry(lang.clone()).or_insert(0.0) += 1.0;
            }
        }
        if mix.is_empty() {
            return self.fallback.estimate(records, pr_total);
        }
        mix
    }
}

/// Distinct organizations (repository owners) in a record set, sorted.
pub fn organizations(records: &[ContributionRecord]) -> Vec<String> {
    records
        .iter()
        .filter_map(|r| r.repository.split_once('/').map(|(owner, _)| owner.to_string()))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Derive the metric inputs of one organization. Always structurally complete,
/// even when the user has no records there.
pub fn extract_org_inputs(
    records: &[ContributionRecord],
    org: &str,
    estimator: &dyn LanguageEstimator,
    params: &ScoringParams,
    now: DateTime<Utc>,
) -> OrgMetricInputs {
    let org_records: Vec<&ContributionRecord> =
        records.iter().filter(|r| r.belongs_to(org)).collect();

    let prs: Vec<&ContributionRecord> = org_records
        .iter()
        .copied()
        .filter(|r| r.kind == ContributionKind::PullRequest)
        .collect();
    let merged: Vec<&ContributionRecord> = prs.iter().copied().filter(|r| r.is_merged()).collect();

    // A window reaching past the representable range counts every merge.
    let recency_cutoff = Duration::try_days(params.recency_window_days)
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let merged_recent = merged
        .iter()
        .filter(|r| r.merged_at.map(|m| m > recency_cutoff).unwrap_or(false))
        .count();

    let repos: BTreeSet<&str> = org_records.iter().map(|r| r.repository.as_str()).collect();
    let merged_repos: BTreeSet<&str> = merged.iter().map(|r| r.repository.as_str()).collect();

    let first_contribution_year = org_records
        .iter()
        .map(|r| r.created_at)
        .min()
        .map(|t| t.year())
        .unwrap_or_else(|| now.year());

    OrgMetricInputs {
        org_name: org.to_string(),
        record_count: org_records.len(),
        pr_total: prs.len(),
        pr_merged: merged.len(),
        merged_recent,
        issue_count: org_records.len() - prs.len(),
        repo_count: repos.len(),
        repos_with_merges: merged_repos.len(),
        first_contribution_year,
        weekly_activity: weekly_activity(&org_records, now),
        language_mix: estimator.estimate(&org_records, prs.len()),
    }
}

/// Bucket records into trailing 7-day windows ending at `now`, most recent last.
pub fn weekly_activity(records: &[&ContributionRecord], now: DateTime<Utc>) -> Vec<u32> {
    let mut buckets = vec![0u32; ACTIVITY_WEEKS];
    for rec in records {
        let age = now.signed_duration_since(rec.created_at).num_seconds();
        if age < 0 {
            continue;
        }
        let weeks_ago = (age / WEEK_SECONDS) as usize;
        if weeks_ago < ACTIVITY_WEEKS {
            buckets[ACTIVITY_WEEKS - 1 - weeks_ago] += 1;
        }
    }
    buckets
}

/// Display/payload counters for an organization.
pub fn summarize(inputs: &OrgMetricInputs, params: &ScoringParams, now: DateTime<Utc>) -> OrgMetricsSummary {
    OrgMetricsSummary {
        total_prs: inputs.pr_total as u64,
        merged_prs: inputs.pr_merged as u64,
        estimated_loc: inputs.pr_total as u64 * params.loc_per_pr,
        issue_count: inputs.issue_count as u64,
        repo_count: inputs.repo_count as u64,
        active_weeks: inputs.active_weeks() as u64,
        tenure_years: (now.year() - inputs.first_contribution_year).max(0) as u64,
        first_contribution_year: inputs.first_contribution_year,
    }
}
