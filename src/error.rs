use std::fmt;

/// Typed error for org-reputation library operations.
#[derive(Debug)]
pub enum ReputationError {
    /// The contribution data provider failed; no reputation is computable
    Fetch(FetchError),
    /// Attestation cache read/write errors
    Cache(String),
    /// Configuration errors (missing dirs, invalid options)
    Config(String),
    /// IO errors (file read/write)
    Io(std::io::Error),
}

impl fmt::Display for ReputationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReputationError::Fetch(err) => write!(f, "fetch error: {}", err),
            ReputationError::Cache(msg) => write!(f, "cache error: {}", msg),
            ReputationError::Config(msg) => write!(f, "config error: {}", msg),
            ReputationError::Io(err) => write!(f, "IO error: {}", err),
        }
    }
}

impl std::error::Error for ReputationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReputationError::Fetch(err) => Some(err),
            ReputationError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ReputationError {
    fn from(err: std::io::Error) -> Self {
        ReputationError::Io(err)
    }
}

impl From<FetchError> for ReputationError {
    fn from(err: FetchError) -> Self {
        ReputationError::Fetch(err)
    }
}

/// Failure of the contribution data provider.
///
/// Distinguishes "the user has no contributions" (an `Ok` with an empty list)
/// from "the provider could not be asked".
#[derive(Debug)]
pub enum FetchError {
    /// Provider unreachable or export missing
    Unavailable(String),
    /// Provider answered with data that fails boundary validation
    Invalid(String),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Unavailable(msg) => write!(f, "contribution source unavailable: {}", msg),
            FetchError::Invalid(msg) => write!(f, "invalid contribution data: {}", msg),
        }
    }
}

impl std::error::Error for FetchError {}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Invalid(err.to_string())
    }
}

/// Error returned by a ledger write.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerError {
    /// Transport failure or no answer within the write timeout
    Unreachable(String),
    /// The ledger refused the payload (schema/validation failure upstream)
    Rejected(String),
    /// An update targeted an index the ledger does not know
    UnknownIndex(u64),
    /// The ledger answered but the receipt is unusable
    Malformed(String),
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerError::Unreachable(msg) => write!(f, "ledger unreachable: {}", msg),
            LedgerError::Rejected(msg) => write!(f, "ledger rejected write: {}", msg),
            LedgerError::UnknownIndex(idx) => write!(f, "ledger has no entry at index {}", idx),
            LedgerError::Malformed(msg) => write!(f, "malformed response: {}", msg),
        }
    }
}

impl std::error::Error for LedgerError {}

impl LedgerError {
    /// Failure category reported to the caller.
    pub fn kind(&self) -> FailureKind {
        match self {
            LedgerError::Unreachable(_) => FailureKind::LedgerUnreachable,
            LedgerError::Rejected(_) | LedgerError::Malformed(_) => FailureKind::LedgerRejected,
            LedgerError::UnknownIndex(_) => FailureKind::StaleCache,
        }
    }
}

/// Per-organization failure taxonomy surfaced in a batch report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    LedgerUnreachable,
    LedgerRejected,
    StaleCache,
    NoData,
    CacheUnavailable,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::LedgerUnreachable => write!(f, "ledger-unreachable"),
            FailureKind::LedgerRejected => write!(f, "ledger-rejected"),
            FailureKind::StaleCache => write!(f, "stale-cache"),
            FailureKind::NoData => write!(f, "no-data"),
            FailureKind::CacheUnavailable => write!(f, "cache-unavailable"),
        }
    }
}
