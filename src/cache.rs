// Attestation cache: per-user map of org → ledger index, persisted as TOML.
// Read-modify-write per organization so a crash mid-pass keeps earlier orgs.

use crate::error::ReputationError;
use crate::types::{AttestationCache, AttestationPayload, CacheEntry};
use crate::util::sanitize_file_stem;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const CACHE_VERSION: &str = "1.0";

/// Durable, per-user storage of ledger indexes.
pub trait CacheStore: Send + Sync {
    /// Current cache of a user. A user never synced has an empty cache.
    fn read_cache(&self, user: &str) -> Result<AttestationCache, ReputationError>;

    /// Insert or replace the entry of one organization.
    fn write_cache(&self, user: &str, org: &str, entry: CacheEntry) -> Result<(), ReputationError>;
}

/// SHA256 of a payload, ignoring its timestamp. Equal hashes mean a rewrite
/// would change nothing but the timestamp.
pub fn payload_hash(payload: &AttestationPayload) -> String {
    let mut stable = payload.clone();
    stable.timestamp = 0;
    // Serializing a plain struct of strings and integers cannot fail.
    let bytes = serde_json::to_vec(&stable).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    hex::encode(hasher.finalize())
}

#[derive(Serialize, Deserialize)]
struct CacheFile {
    version: String,
    user: String,
    #[serde(default)]
    entries: AttestationCache,
}

/// One `attestations-<user>.toml` per user under a cache directory.
pub struct TomlCacheStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl TomlCacheStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path_for(&self, user: &str) -> PathBuf {
        self.dir.join(format!("attestations-{}.toml", sanitize_file_stem(user)))
    }

    fn read_file(&self, path: &Path, user: &str) -> Result<AttestationCache, ReputationError> {
        if !path.exists() {
            return Ok(AttestationCache::new());
        }
        let content = std::fs::read_to_string(path)?;
        let file: CacheFile = toml::from_str(&content)
            .map_err(|e| ReputationError::Cache(format!("{}: {}", path.display(), e)))?;
        if file.user != user {
            return Err(ReputationError::Cache(format!(
                "{} belongs to '{}', not '{}'",
                path.display(),
                file.user,
                user
            )));
        }
        Ok(file.entries)
    }

    fn write_file(&self, path: &Path, file: &CacheFile) -> Result<(), ReputationError> {
        std::fs::create_dir_all(&self.dir)?;
        let content =
            toml::to_string_pretty(file).map_err(|e| ReputationError::Cache(e.to_string()))?;
        let tmp = path.with_extension("toml.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl CacheStore for TomlCacheStore {
    fn read_cache(&self, user: &str) -> Result<AttestationCache, ReputationError> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        self.read_file(&self.path_for(user), user)
    }

    fn write_cache(&self, user: &str, org: &str, entry: CacheEntry) -> Result<(), ReputationError> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let path = self.path_for(user);
        let mut entries = self.read_file(&path, user)?;
        entries.insert(org.to_string(), entry);
        let file = CacheFile {
            version: CACHE_VERSION.to_string(),
            user: user.to_string(),
            entries,
        };
        self.write_file(&path, &file)?;
        log::debug!("cache {}: {} entries", path.display(), file.entries.len());
        Ok(())
    }
}

/// Process-local cache, for tests and dry runs.
#[derive(Default)]
pub struct MemoryCacheStore {
    users: Mutex<HashMap<String, AttestationCache>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryCacheStore {
    fn read_cache(&self, user: &str) -> Result<AttestationCache, ReputationError> {
        let users = self.users.lock().unwrap_or_else(|p| p.into_inner());
        Ok(users.get(user).cloned().unwrap_or_default())
    }

    fn write_cache(&self, user: &str, org: &str, entry: CacheEntry) -> Result<(), ReputationError> {
        let mut users = self.users.lock().unwrap_or_else(|p| p.into_inner());
        users
            .entry(user.to_string())
            .or_default()
            .insert(org.to_string(), entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn entry(index: u64, score: u32) -> CacheEntry {
        CacheEntry {
            ledger_index: index,
            last_score: score,
            payload_hash: String::new(),
            updated_at: Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
        }
    }

    fn payload(total: u32, timestamp: u64) -> AttestationPayload {
        AttestationPayload {
            org_name: "acme".to_string(),
            developer_address: "0xdev".to_string(),
            total_score: total,
            repo_activity_score: 80,
            tenure_score: 90,
            language_stack_score: 85,
            quality_score: 88,
            oss_contribution_score: 82,
            consistency_score: 87,
            total_prs: 42,
            merged_prs: 38,
            estimated_loc: 4200,
            issue_count: 15,
            repo_count: 5,
            active_weeks: 26,
            tenure_years: 2,
            timestamp,
        }
    }

    #[test]
    fn hash_ignores_timestamp() {
        assert_eq!(payload_hash(&payload(85, 1)), payload_hash(&payload(85, 2)));
        assert_ne!(payload_hash(&payload(85, 1)), payload_hash(&payload(86, 1)));
    }

    #[test]
    fn unknown_user_has_empty_cache() {
        let dir = tempfile::tempdir().unwrap();
        let store = TomlCacheStore::new(dir.path());
        assert!(store.read_cache("nobody").unwrap().is_empty());
    }

    #[test]
    fn toml_store_roundtrip_keeps_other_orgs() {
        let dir = tempfile::tempdir().unwrap();
        let store = TomlCacheStore::new(dir.path().join("cache"));
        store.write_cache("alice", "acme", entry(0, 85)).unwrap();
        store.write_cache("alice", "globex", entry(1, 40)).unwrap();
        store.write_cache("alice", "acme", entry(0, 90)).unwrap();

        let cache = store.read_cache("alice").unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache["acme"].last_score, 90);
        assert_eq!(cache["globex"].ledger_index, 1);
        assert!(store.read_cache("bob").unwrap().is_empty());
    }

    #[test]
    fn user_names_are_sanitized_in_paths() {
        let store = TomlCacheStore::new("/tmp/c");
        let path = store.path_for("../evil user");
        assert_eq!(path.file_name().unwrap(), "attestations-___evil_user.toml");
    }

    #[test]
    fn corrupt_file_is_a_cache_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = TomlCacheStore::new(dir.path());
        std::fs::write(store.path_for("alice"), "not = [valid").unwrap();
        assert!(matches!(store.read_cache("alice"), Err(ReputationError::Cache(_))));
    }

    #[test]
    fn memory_store_isolates_users() {
        let store = MemoryCacheStore::new();
        store.write_cache("alice", "acme", entry(3, 50)).unwrap();
        assert_eq!(store.read_cache("alice").unwrap()["acme"].ledger_index, 3);
        assert!(store.read_cache("bob").unwrap().is_empty());
    }
}
