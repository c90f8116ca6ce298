// Engine configuration: read/write config.toml, defaults rooted in the
// platform config/data directories.

use crate::types::OrgProfile;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "org-reputation";

/// Upper bound for `scoring.recency_window_days` (100 years).
pub const MAX_RECENCY_WINDOW_DAYS: i64 = 36_500;

/// Tunables for the six-metric model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringParams {
    /// Founding year assumed for orgs without a profile (capped by first contribution)
    pub default_founding_year: i32,
    /// Merged PRs newer than this count toward the quality recency bonus
    pub recency_window_days: i64,
    /// Lines of code credited per PR when estimating LOC
    pub loc_per_pr: u64,
}

impl Default for ScoringParams {
    fn default() -> Self {
        Self {
            default_founding_year: 2015,
            recency_window_days: 180,
            loc_per_pr: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding `<user>.json` contribution exports
    pub data_dir: PathBuf,
    /// Directory holding per-user attestation caches
    pub cache_dir: PathBuf,
    /// JSONL outbox consumed by the wallet layer
    pub journal_path: PathBuf,
    /// Minimum spacing between two ledger writes
    pub write_interval_ms: u64,
    /// Longest wait for a single ledger write
    pub write_timeout_ms: u64,
    /// Stop a pass after this many failed organizations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_failures: Option<usize>,
    pub scoring: ScoringParams,
    /// Org-wide context keyed by org name
    pub orgs: BTreeMap<String, OrgProfile>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let data = data_root();
        Self {
            data_dir: data.join("contributions"),
            cache_dir: data.join("cache"),
            journal_path: data.join("ledger-journal.jsonl"),
            write_interval_ms: 2_000,
            write_timeout_ms: 30_000,
            max_failures: None,
            scoring: ScoringParams::default(),
            orgs: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    pub fn write_interval(&self) -> Duration {
        Duration::from_millis(self.write_interval_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

/// Default location of config.toml.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("config.toml")
}

fn data_root() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

/// Read config.toml.
pub fn load(path: &Path) -> Result<EngineConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let config: EngineConfig =
        toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
    validate(&config)?;
    Ok(config)
}

/// Read config.toml if present, defaults otherwise.
pub fn load_or_default(path: &Path) -> Result<EngineConfig> {
    if path.exists() {
        load(path)
    } else {
        log::debug!("no config at {}, using defaults", path.display());
        Ok(EngineConfig::default())
    }
}

/// Write config.toml, creating parent directories.
pub fn save(path: &Path, config: &EngineConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config).context("serializing config")?;
    std::fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

fn validate(config: &EngineConfig) -> Result<()> {
    if config.write_timeout_ms == 0 {
        anyhow::bail!("write_timeout_ms must be positive");
    }
    let window = config.scoring.recency_window_days;
    if window <= 0 || window > MAX_RECENCY_WINDOW_DAYS {
        anyhow::bail!(
            "scoring.recency_window_days must be between 1 and {}, got {}",
            MAX_RECENCY_WINDOW_DAYS,
            window
        );
    }
    for (org, profile) in &config.orgs {
        if let Some(rate) = profile.typical_weekly_rate {
            if !rate.is_finite() || rate < 0.0 {
                anyhow::bail!("orgs.{}.typical_weekly_rate must be a non-negative number", org);
            }
        }
    }
    Ok(())
}
