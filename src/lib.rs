pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod ledger;
pub mod reconciler;
pub mod scaler;
pub mod scheduler;
pub mod scorer;
pub mod source;
pub mod types;
mod util;

pub use config::{EngineConfig, ScoringParams};
pub use engine::{ReputationEngine, SyncResult, SyncService};
pub use error::{FailureKind, FetchError, LedgerError, ReputationError};
pub use reconciler::{Reconciler, ReconcilerConfig};
pub use types::*;
