// Score scaler: map [0,1] scores into the integer domain the ledger persists.
// Fails closed: anything non-finite or outside [0,1] becomes 0.

use crate::types::{AttestationPayload, OrgReputationScore};

/// Upper end of the attestation score domain.
pub const SCALE_MAX: u32 = 100;

/// Scale a unit score to 0..=100, rounding half away from zero.
pub fn scale(x: f64) -> u32 {
    if !x.is_finite() || !(0.0..=1.0).contains(&x) {
        return 0;
    }
    (x * SCALE_MAX as f64).round() as u32
}

/// Inverse of `scale`, up to rounding. Values above the domain clamp to 1.
pub fn unscale(v: u32) -> f64 {
    v.min(SCALE_MAX) as f64 / SCALE_MAX as f64
}

/// Build the ledger payload for one organization's score.
pub fn build_payload(
    score: &OrgReputationScore,
    developer_address: &str,
    timestamp_ms: u64,
) -> AttestationPayload {
    let b = &score.breakdown;
    let m = &score.metrics;
    AttestationPayload {
        org_name: score.org_name.clone(),
        developer_address: developer_address.to_string(),
        total_score: scale(score.total_score),
        repo_activity_score: scale(b.repo_activity),
        tenure_score: scale(b.tenure),
        language_stack_score: scale(b.language_stack),
        quality_score: scale(b.quality),
        oss_contribution_score: scale(b.oss_contribution),
        consistency_score: scale(b.consistency),
        total_prs: m.total_prs,
        merged_prs: m.merged_prs,
        estimated_loc: m.estimated_loc,
        issue_count: m.issue_count,
        repo_count: m.repo_count,
        active_weeks: m.active_weeks,
        tenure_years: m.tenure_years,
        timestamp: timestamp_ms,
    }
}
