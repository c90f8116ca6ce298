// Scorer module: six bounded sub-scores, their weighted org total, and the
// cross-organization overall score.
//
// Org total:
//   total = 0.10*repo_activity + 0.15*tenure + 0.15*language_stack
//         + 0.20*quality + 0.25*oss_contribution + 0.15*consistency
//   rounded to two decimals.
//
// Overall (0..1000 points):
//   weight_i = 2*merged_prs + estimated_loc/100 + 1.5*issue_count
//   overall  = floor(10 * sum(percent_i * weight_i) / sum(weight_i))
//   over orgs with at least one merged PR, percent_i = org total scaled x100.

use crate::config::ScoringParams;
use crate::extractor;
use crate::scaler;
use crate::types::{
    AttestationPayload, OrgMetricInputs, OrgMetricSet, OrgMetricsSummary, OrgProfile,
    OrgReputationScore,
};
use chrono::{DateTime, Datelike, Utc};
use std::collections::BTreeMap;

/// Aggregation weights; must sum to exactly 1.0.
#[derive(Debug, Clone, Copy)]
pub struct ScoreWeights {
    pub repo_activity: f64,
    pub tenure: f64,
    pub language_stack: f64,
    pub quality: f64,
    pub oss_contribution: f64,
    pub consistency: f64,
}

impl ScoreWeights {
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

pub const WEIGHTS: ScoreWeights = ScoreWeights {
    repo_activity: 0.10,
    tenure: 0.15,
    language_stack: 0.15,
    quality: 0.20,
    oss_contribution: 0.25,
    consistency: 0.15,
};

// --- sub-score constants ---
const REPO_BREADTH_TARGET: f64 = 10.0;
const REPO_SHARE_CAP: f64 = 0.5;
const MERGE_RATE_WEIGHT: f64 = 0.7;
const RECENCY_WEIGHT: f64 = 0.3;
const OSS_PR_TARGET: f64 = 50.0;
const OSS_ISSUE_TARGET: f64 = 30.0;
const OSS_REVIEW_TARGET: f64 = 40.0;
const OSS_PR_WEIGHT: f64 = 0.5;
const OSS_ISSUE_WEIGHT: f64 = 0.2;
const OSS_REVIEW_WEIGHT: f64 = 0.3;

// --- org weight constants ---
const MERGED_PR_WEIGHT: f64 = 2.0;
const LOC_DIVISOR: f64 = 100.0;
const ISSUE_WEIGHT: f64 = 1.5;

/// Upper bound of the canonical overall score.
pub const OVERALL_MAX: u32 = 1000;

/// Map any number into [0,1]; non-finite input becomes 0.
pub fn bounded(x: f64) -> f64 {
    if x.is_finite() {
        x.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Breadth of repositories touched. `org_repo_total` is the org-wide repo
/// count when known; otherwise breadth is measured against 10 repos.
pub fn repo_activity_score(contributed: usize, major: usize, org_repo_total: Option<usize>) -> f64 {
    match org_repo_total {
        Some(total) if total > 0 => {
            let total = total as f64;
            let own = (contributed as f64 / total).min(REPO_SHARE_CAP);
            let major = (major as f64 / total).min(REPO_SHARE_CAP);
            bounded(own + major)
        }
        _ => bounded(contributed as f64 / REPO_BREADTH_TARGET),
    }
}

pub fn tenure_score(
    first_contribution_year: i32,
    org_founding_year: i32,
    current_year: i32,
    has_contributions: bool,
) -> f64 {
    if !has_contributions {
        return 0.0;
    }
    let org_age = current_year - org_founding_year;
    if org_age <= 0 {
        return 0.0;
    }
    let tenure = current_year - first_contribution_year;
    bounded(tenure as f64 / org_age as f64)
}

/// Weighted overlap of the user's language mix with the org's distribution.
pub fn language_stack_score(user: &BTreeMap<String, f64>, org: &BTreeMap<String, f64>) -> f64 {
    let mut total = 0.0;
    let mut weight = 0.0;
    for (lang, org_weight) in org {
        let user_weight = user.get(lang).copied().unwrap_or(0.0);
        total += user_weight * org_weight;
        weight += org_weight;
    }
    if weight > 0.0 {
        bounded(total / weight)
    } else {
        0.0
    }
}

pub fn quality_score(merged: usize, total: usize, merged_recent: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let merge_rate = merged as f64 / total as f64;
    let recency_bonus = merged_recent as f64 / merged.max(1) as f64;
    bounded(MERGE_RATE_WEIGHT * merge_rate + RECENCY_WEIGHT * recency_bonus)
}

/// `reviews` is 0 until the data source exposes review counts.
pub fn oss_contribution_score(merged: usize, issues: usize, reviews: usize) -> f64 {
    let pr = (merged as f64 / OSS_PR_TARGET).min(1.0);
    let issue = (issues as f64 / OSS_ISSUE_TARGET).min(1.0);
    let review = (reviews as f64 / OSS_REVIEW_TARGET).min(1.0);
    bounded(OSS_PR_WEIGHT * pr + OSS_ISSUE_WEIGHT * issue + OSS_REVIEW_WEIGHT * review)
}

/// Recency-weighted weekly average (weight (i+1)/n, most recent last) relative
/// to a reference weekly rate.
pub fn consistency_score(weekly: &[u32], reference: f64) -> f64 {
    if weekly.is_empty() || !(reference > 0.0) {
        return 0.0;
    }
    let n = weekly.len() as f64;
    let (sum, weights) = weekly
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(sum, weights), (i, &count)| {
            let w = (i + 1) as f64 / n;
            (sum + count as f64 * w, weights + w)
        });
    bounded((sum / weights) / reference)
}

/// Reference weekly rate: the org's typical rate when known, else the user's
/// own plain mean floored at 1.
pub fn reference_weekly_rate(weekly: &[u32], profile: &OrgProfile) -> f64 {
    if let Some(rate) = profile.typical_weekly_rate {
        return rate;
    }
    if weekly.is_empty() {
        return 1.0;
    }
    let mean = weekly.iter().map(|&n| n as f64).sum::<f64>() / weekly.len() as f64;
    mean.max(1.0)
}

/// Compute all six sub-scores of an organization.
pub fn metric_set(
    inputs: &OrgMetricInputs,
    profile: &OrgProfile,
    params: &ScoringParams,
    now: DateTime<Utc>,
) -> OrgMetricSet {
    let current_year = now.year();
    let has_contributions = inputs.record_count > 0;
    let founding_year = profile
        .founding_year
        .unwrap_or_else(|| params.default_founding_year.min(inputs.first_contribution_year));
    let org_languages = profile
        .language_distribution
        .as_ref()
        .unwrap_or(&inputs.language_mix);

    OrgMetricSet {
        repo_activity: repo_activity_score(
            inputs.repo_count,
            inputs.repos_with_merges,
            profile.repo_total,
        ),
        tenure: tenure_score(
            inputs.first_contribution_year,
            founding_year,
            current_year,
            has_contributions,
        ),
        language_stack: language_stack_score(&inputs.language_mix, org_languages),
        quality: quality_score(inputs.pr_merged, inputs.pr_total, inputs.merged_recent),
        oss_contribution: oss_contribution_score(inputs.pr_merged, inputs.issue_count, 0),
        consistency: consistency_score(
            &inputs.weekly_activity,
            reference_weekly_rate(&inputs.weekly_activity, profile),
        ),
    }
}

/// Weighted org total in [0,1], rounded to two decimals.
pub fn aggregate(set: &OrgMetricSet) -> f64 {
    let total: f64 = WEIGHTS
        .values()
        .iter()
        .zip(set.values().iter())
        .map(|(w, s)| w * bounded(*s))
        .sum();
    round2(bounded(total))
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Full score for one organization.
pub fn score_org(
    inputs: &OrgMetricInputs,
    profile: &OrgProfile,
    params: &ScoringParams,
    now: DateTime<Utc>,
) -> OrgReputationScore {
    let breakdown = metric_set(inputs, profile, params, now);
    OrgReputationScore {
        org_name: inputs.org_name.clone(),
        total_score: aggregate(&breakdown),
        breakdown,
        metrics: extractor::summarize(inputs, params, now),
        record_count: inputs.record_count,
    }
}

/// Contribution-volume weight of an organization in the overall score.
pub fn org_weight(metrics: &OrgMetricsSummary) -> f64 {
    MERGED_PR_WEIGHT * metrics.merged_prs as f64
        + metrics.estimated_loc as f64 / LOC_DIVISOR
        + ISSUE_WEIGHT * metrics.issue_count as f64
}

fn weighted_orgs(orgs: &[OrgReputationScore]) -> impl Iterator<Item = (&OrgReputationScore, f64)> + '_ {
    orgs.iter()
        .filter(|o| o.metrics.merged_prs > 0)
        .map(|o| (o, org_weight(&o.metrics)))
}

/// Canonical overall score, 0..=1000 points.
pub fn overall_points(orgs: &[OrgReputationScore]) -> u32 {
    let (sum, weights) = weighted_orgs(orgs).fold((0.0, 0.0), |(sum, weights), (o, w)| {
        let percent = scaler::scale(o.total_score) as f64;
        (sum + percent * w, weights + w)
    });
    if weights <= 0.0 {
        return 0;
    }
    let points = (sum * 10.0 / weights).floor();
    if points.is_finite() {
        (points as u32).min(OVERALL_MAX)
    } else {
        0
    }
}

/// Legacy overall in the 0–1 domain: `floor(Σ t·w / Σ w)`. Only a perfect
/// record reaches 1; prefer `overall_points`.
pub fn overall_unit(orgs: &[OrgReputationScore]) -> u32 {
    let (sum, weights) = weighted_orgs(orgs)
        .fold((0.0, 0.0), |(sum, weights), (o, w)| (sum + o.total_score * w, weights + w));
    if weights <= 0.0 {
        return 0;
    }
    bounded((sum / weights).floor()) as u32
}

/// Overall score as the on-ledger algorithm computes it from persisted
/// payloads: a 0..=100 weighted average of the x100 totals. Convert with
/// `percent_to_points`.
///
/// Every payload is weighted, including orgs without merged PRs, whose LOC
/// and issues still give them weight. `overall_points` leaves those orgs out,
/// so the two agree only when every org has a merge.
pub fn ledger_overall_percent(payloads: &[AttestationPayload]) -> u32 {
    let (sum, weights) = payloads
        .iter()
        .map(|p| {
            let w = MERGED_PR_WEIGHT * p.merged_prs as f64
                + p.estimated_loc as f64 / LOC_DIVISOR
                + ISSUE_WEIGHT * p.issue_count as f64;
            (p.total_score.min(100) as f64, w)
        })
        .fold((0.0, 0.0), |(sum, weights), (s, w)| (sum + s * w, weights + w));
    if weights <= 0.0 {
        return 0;
    }
    ((sum / weights).floor() as u32).min(100)
}

/// Percent (0..=100) → canonical points (0..=1000).
pub fn percent_to_points(percent: u32) -> u32 {
    percent.min(100) * 10
}

/// Account-wide counters used by the profile activity score.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProfileStats {
    pub total_stars: u64,
    pub merged_prs: u64,
    pub total_repos: u64,
    pub organizations: u64,
}

/// Profile activity points, 0..=1000. A volume formula independent of the
/// six-metric model; never blend it with `overall_points`.
pub fn activity_points(stats: &ProfileStats) -> u32 {
    let raw = stats.total_stars * 2 + stats.merged_prs * 10 + stats.total_repos * 5 + stats.organizations * 15;
    (raw / 10).min(OVERALL_MAX as u64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
    }

    fn org(name: &str, total: f64, merged: u64, loc: u64, issues: u64) -> OrgReputationScore {
        OrgReputationScore {
            org_name: name.to_string(),
            total_score: total,
            breakdown: OrgMetricSet::default(),
            metrics: OrgMetricsSummary {
                merged_prs: merged,
                estimated_loc: loc,
                issue_count: issues,
                ..Default::default()
            },
            record_count: 1,
        }
    }

    fn set(values: [f64; 6]) -> OrgMetricSet {
        OrgMetricSet {
            repo_activity: values[0],
            tenure: values[1],
            language_stack: values[2],
            quality: values[3],
            oss_contribution: values[4],
            consistency: values[5],
        }
    }

    #[test]
    fn weights_sum_to_one() {
        let sum: f64 = WEIGHTS.values().iter().sum();
        assert_eq!(sum, 1.0);
    }

    #[test]
    fn aggregate_worked_example() {
        let total = aggregate(&set([0.80, 0.90, 0.85, 0.88, 0.82, 0.87]));
        assert_eq!(total, 0.85);
        assert_eq!(scaler::scale(total), 85);
    }

    #[test]
    fn aggregate_stays_in_unit_interval() {
        assert_eq!(aggregate(&set([1.0; 6])), 1.0);
        assert_eq!(aggregate(&set([0.0; 6])), 0.0);
        assert_eq!(aggregate(&set([5.0, -1.0, f64::NAN, f64::INFINITY, 2.0, 1.0])), 0.5);
    }

    #[test]
    fn repo_activity_fallback_and_org_share() {
        assert_eq!(repo_activity_score(5, 0, None), 0.5);
        assert_eq!(repo_activity_score(25, 0, None), 1.0);
        assert_eq!(repo_activity_score(3, 2, Some(0)), 0.3);
        assert!((repo_activity_score(2, 1, Some(10)) - 0.3).abs() < 1e-12);
        assert_eq!(repo_activity_score(8, 8, Some(10)), 1.0);
    }

    #[test]
    fn tenure_guards_zero_org_age() {
        assert_eq!(tenure_score(2025, 2025, 2025, true), 0.0);
        assert_eq!(tenure_score(2020, 2030, 2025, true), 0.0);
        assert_eq!(tenure_score(2015, 2015, 2025, false), 0.0);
        assert_eq!(tenure_score(2020, 2015, 2025, true), 0.5);
        assert_eq!(tenure_score(2010, 2015, 2025, true), 1.0);
    }

    #[test]
    fn language_stack_overlap() {
        let user: BTreeMap<String, f64> = [("Rust".to_string(), 0.5)].into_iter().collect();
        let org: BTreeMap<String, f64> =
            [("Rust".to_string(), 1.0), ("Go".to_string(), 1.0)].into_iter().collect();
        assert_eq!(language_stack_score(&user, &org), 0.25);
        assert_eq!(language_stack_score(&user, &BTreeMap::new()), 0.0);
    }

    #[test]
    fn quality_blends_merge_rate_and_recency() {
        assert_eq!(quality_score(0, 0, 0), 0.0);
        assert!((quality_score(5, 10, 5) - 0.65).abs() < 1e-12);
        assert!((quality_score(10, 10, 0) - 0.7).abs() < 1e-12);
    }

    #[test]
    fn oss_contribution_caps_each_part() {
        assert_eq!(oss_contribution_score(0, 0, 0), 0.0);
        assert!((oss_contribution_score(100, 100, 0) - 0.7).abs() < 1e-12);
        assert!((oss_contribution_score(25, 15, 0) - 0.35).abs() < 1e-12);
    }

    #[test]
    fn consistency_zero_reference_is_zero() {
        assert_eq!(consistency_score(&[1, 2, 3], 0.0), 0.0);
        assert_eq!(consistency_score(&[1, 2, 3], f64::NAN), 0.0);
        assert_eq!(consistency_score(&[], 1.0), 0.0);
    }

    #[test]
    fn consistency_rewards_recent_activity() {
        let mut early = vec![0u32; 52];
        early[0] = 10;
        let mut late = vec![0u32; 52];
        late[51] = 10;
        let reference = 1.0;
        assert!(consistency_score(&late, reference) > consistency_score(&early, reference));
        assert_eq!(consistency_score(&[4, 4, 4], 2.0), 1.0);
    }

    #[test]
    fn reference_rate_prefers_profile() {
        let profile = OrgProfile {
            typical_weekly_rate: Some(3.0),
            ..Default::default()
        };
        assert_eq!(reference_weekly_rate(&[10, 10], &profile), 3.0);
        assert_eq!(reference_weekly_rate(&[0, 0], &OrgProfile::default()), 1.0);
        assert_eq!(reference_weekly_rate(&[4, 6], &OrgProfile::default()), 5.0);
    }

    #[test]
    fn zero_contributions_score_zero() {
        let inputs = extractor::extract_org_inputs(
            &[],
            "acme",
            &extractor::FixedSplitEstimator::default(),
            &ScoringParams::default(),
            now(),
        );
        let score = score_org(&inputs, &OrgProfile::default(), &ScoringParams::default(), now());
        assert_eq!(score.total_score, 0.0);
        assert_eq!(score.breakdown, OrgMetricSet::default());
    }

    #[test]
    fn org_weight_formula() {
        let o = org("a", 0.5, 10, 1000, 4);
        assert_eq!(org_weight(&o.metrics), 36.0);
    }

    #[test]
    fn overall_points_example() {
        // weights: 2*45 + 1000/100 = 100 and 2*5 + 1000/100 = 20
        let orgs = vec![org("a", 0.85, 45, 1000, 0), org("b", 0.40, 5, 1000, 0)];
        assert_eq!(overall_points(&orgs), 775);
    }

    #[test]
    fn overall_unit_example() {
        let orgs = vec![org("a", 0.85, 45, 1000, 0), org("b", 0.40, 5, 1000, 0)];
        assert_eq!(overall_unit(&orgs), 0);
        assert_eq!(overall_unit(&[org("a", 1.0, 3, 0, 0)]), 1);
    }

    #[test]
    fn overall_ignores_orgs_without_merges() {
        let orgs = vec![org("a", 0.50, 10, 0, 0), org("b", 1.0, 0, 50_000, 40)];
        assert_eq!(overall_points(&orgs), 500);
        assert_eq!(overall_points(&[org("b", 1.0, 0, 100, 1)]), 0);
        assert_eq!(overall_points(&[]), 0);
    }

    #[test]
    fn ledger_percent_converts_to_points() {
        let payload = |total: u32, merged: u64| AttestationPayload {
            org_name: "x".to_string(),
            developer_address: "0x1".to_string(),
            total_score: total,
            repo_activity_score: 0,
            tenure_score: 0,
            language_stack_score: 0,
            quality_score: 0,
            oss_contribution_score: 0,
            consistency_score: 0,
            total_prs: merged,
            merged_prs: merged,
            estimated_loc: 1000,
            issue_count: 0,
            repo_count: 1,
            active_weeks: 0,
            tenure_years: 0,
            timestamp: 0,
        };
        let percent = ledger_overall_percent(&[payload(85, 45), payload(40, 5)]);
        assert_eq!(percent, 77);
        assert_eq!(percent_to_points(percent), 770);
        assert_eq!(ledger_overall_percent(&[]), 0);
    }

    #[test]
    fn ledger_percent_weights_orgs_without_merges() {
        let payload = |total: u32, merged: u64, loc: u64| AttestationPayload {
            org_name: "x".to_string(),
            developer_address: "0x1".to_string(),
            total_score: total,
            repo_activity_score: 0,
            tenure_score: 0,
            language_stack_score: 0,
            quality_score: 0,
            oss_contribution_score: 0,
            consistency_score: 0,
            total_prs: merged,
            merged_prs: merged,
            estimated_loc: loc,
            issue_count: 0,
            repo_count: 1,
            active_weeks: 0,
            tenure_years: 0,
            timestamp: 0,
        };
        // weight 1000/100 = 10 from LOC alone
        assert_eq!(ledger_overall_percent(&[payload(90, 0, 1000)]), 90);
        // weights 100 and 10: (8500 + 400) / 110
        assert_eq!(ledger_overall_percent(&[payload(85, 45, 1000), payload(40, 0, 1000)]), 80);
        assert_eq!(ledger_overall_percent(&[payload(90, 0, 0)]), 0);
    }

    #[test]
    fn activity_points_formula_and_cap() {
        let stats = ProfileStats {
            total_stars: 50,
            merged_prs: 20,
            total_repos: 10,
            organizations: 2,
        };
        assert_eq!(activity_points(&stats), 38);
        let big = ProfileStats {
            total_stars: 100_000,
            ..stats
        };
        assert_eq!(activity_points(&big), 1000);
    }
}
