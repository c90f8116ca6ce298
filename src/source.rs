// Contribution source: the data-provider seam. Raw exports are validated here,
// before anything reaches the extractor.

use crate::error::FetchError;
use crate::types::{ContributionKind, ContributionRecord, RecordState};
use crate::util::sanitize_file_stem;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Supplies every PR/issue of a user across all organizations.
pub trait ContributionSource: Send + Sync {
    fn fetch_contributions(&self, user: &str) -> Result<Vec<ContributionRecord>, FetchError>;
}

/// Reads `<dir>/<user>.json` exports produced by the source-control provider.
/// The user name is sanitized before it becomes a file name.
pub struct JsonFileSource {
    dir: PathBuf,
}

impl JsonFileSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, user: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_file_stem(user)))
    }
}

impl ContributionSource for JsonFileSource {
    fn fetch_contributions(&self, user: &str) -> Result<Vec<ContributionRecord>, FetchError> {
        parse_export(&self.path_for(user))
    }
}

/// In-memory source, keyed by user.
#[derive(Default)]
pub struct StaticSource {
    records: HashMap<String, Vec<ContributionRecord>>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, user: &str, records: Vec<ContributionRecord>) -> Self {
        self.records.insert(user.to_string(), records);
        self
    }
}

impl ContributionSource for StaticSource {
    fn fetch_contributions(&self, user: &str) -> Result<Vec<ContributionRecord>, FetchError> {
        self.records
            .get(user)
            .cloned()
            .ok_or_else(|| FetchError::Unavailable(format!("no contribution data for {}", user)))
    }
}

/// Parse a contribution export file. Invalid records are skipped; a file whose
/// records are all invalid is rejected.
pub fn parse_export(path: &Path) -> Result<Vec<ContributionRecord>, FetchError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| FetchError::Unavailable(format!("opening {}: {}", path.display(), e)))?;
    parse_records(&content)
}

/// Parse and validate a JSON array of raw contribution records.
pub fn parse_records(json: &str) -> Result<Vec<ContributionRecord>, FetchError> {
    let values: Vec<serde_json::Value> = serde_json::from_str(json)?;
    let total = values.len();
    let mut records = Vec::with_capacity(total);

    for (i, value) in values.into_iter().enumerate() {
        let raw: RawContribution = match serde_json::from_value(value) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("skipping contribution #{}: {}", i, e);
                continue;
            }
        };
        match raw.validate() {
            Ok(rec) => records.push(rec),
            Err(reason) => log::warn!("skipping contribution #{}: {}", i, reason),
        }
    }

    if total > 0 && records.is_empty() {
        return Err(FetchError::Invalid(format!(
            "none of {} records passed validation",
            total
        )));
    }
    log::debug!("parsed {}/{} contribution records", records.len(), total);
    Ok(records)
}

/// Provider shape: repository as a plain full name or `{ "full_name": ... }`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawRepository {
    Name(String),
    Object { full_name: String },
}

#[derive(Deserialize)]
struct RawContribution {
    #[serde(default)]
    kind: ContributionKind,
    repository: RawRepository,
    created_at: DateTime<Utc>,
    #[serde(default)]
    closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    merged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    language: Option<String>,
}

impl RawContribution {
    fn validate(self) -> Result<ContributionRecord, String> {
        let repository = match self.repository {
            RawRepository::Name(n) => n,
            RawRepository::Object { full_name } => full_name,
        };
        let repository = repository.trim().to_string();
        let (owner, name) = repository
            .split_once('/')
            .ok_or_else(|| format!("repository '{}' is not owner/name", repository))?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return Err(format!("repository '{}' is not owner/name", repository));
        }
        if self.kind == ContributionKind::Issue && self.merged_at.is_some() {
            return Err(format!("issue in {} carries a merge timestamp", repository));
        }
        if let Some(merged) = self.merged_at {
            if merged < self.created_at {
                return Err(format!("{} merged before it was created", repository));
            }
        }

        let state = match self.state.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("merged") => RecordState::Merged,
            Some("closed") => RecordState::Closed,
            Some("open") => RecordState::Open,
            None if self.merged_at.is_some() => RecordState::Merged,
            None if self.closed_at.is_some() => RecordState::Closed,
            None => RecordState::Open,
            Some(other) => return Err(format!("unknown state '{}'", other)),
        };

        let language = self
            .language
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty());

        Ok(ContributionRecord {
            kind: self.kind,
            organization: owner.to_string(),
            repository,
            created_at: self.created_at,
            closed_at: self.closed_at,
            merged_at: self.merged_at,
            state,
            language,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_object_repository() {
        let json = r#"[
            {"repository": "acme/api", "created_at": "2024-01-02T00:00:00Z", "state": "open"},
            {"repository": {"full_name": "acme/web"}, "created_at": "2024-01-03T00:00:00Z",
             "merged_at": "2024-01-04T00:00:00Z", "state": "closed", "language": "Rust"}
        ]"#;
        let records = parse_records(json).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].organization, "acme");
        assert_eq!(records[0].kind, ContributionKind::PullRequest);
        assert_eq!(records[1].repository, "acme/web");
        assert!(records[1].is_merged());
        assert_eq!(records[1].language.as_deref(), Some("Rust"));
    }

    #[test]
    fn state_inferred_from_timestamps() {
        let json = r#"[
            {"repository": "acme/api", "created_at": "2024-01-02T00:00:00Z", "merged_at": "2024-01-05T00:00:00Z"},
            {"kind": "issue", "repository": "acme/api", "created_at": "2024-01-02T00:00:00Z", "closed_at": "2024-01-03T00:00:00Z"}
        ]"#;
        let records = parse_records(json).unwrap();
        assert_eq!(records[0].state, RecordState::Merged);
        assert_eq!(records[1].state, RecordState::Closed);
        assert_eq!(records[1].kind, ContributionKind::Issue);
    }

    #[test]
    fn invalid_records_are_skipped() {
        let json = r#"[
            {"repository": "no-slash", "created_at": "2024-01-02T00:00:00Z"},
            {"repository": "acme/api", "created_at": "not a date"},
            {"repository": "acme/api", "created_at": "2024-01-05T00:00:00Z", "merged_at": "2024-01-01T00:00:00Z"},
            {"repository": "acme/api", "created_at": "2024-01-02T00:00:00Z"}
        ]"#;
        let records = parse_records(json).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn all_invalid_is_an_error() {
        let json = r#"[{"repository": "/", "created_at": "2024-01-02T00:00:00Z"}]"#;
        assert!(matches!(parse_records(json), Err(FetchError::Invalid(_))));
    }

    #[test]
    fn empty_export_is_not_an_error() {
        assert!(parse_records("[]").unwrap().is_empty());
    }

    #[test]
    fn missing_export_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let source = JsonFileSource::new(dir.path());
        assert!(matches!(
            source.fetch_contributions("ghost"),
            Err(FetchError::Unavailable(_))
        ));
    }

    #[test]
    fn user_name_cannot_leave_data_dir() {
        let root = tempfile::tempdir().unwrap();
        let data = root.path().join("data");
        std::fs::create_dir(&data).unwrap();
        let export = r#"[{"repository": "acme/api", "created_at": "2025-01-01T00:00:00Z", "state": "open"}]"#;
        std::fs::write(root.path().join("secret.json"), export).unwrap();

        let source = JsonFileSource::new(&data);
        assert_eq!(source.path_for("../secret"), data.join("___secret.json"));
        assert!(matches!(
            source.fetch_contributions("../secret"),
            Err(FetchError::Unavailable(_))
        ));

        std::fs::write(data.join("___secret.json"), export).unwrap();
        assert_eq!(source.fetch_contributions("../secret").unwrap().len(), 1);
    }
}
