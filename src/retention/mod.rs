//! Retention policy engine
//!
//! Walks a date-partitioned work tree (`<root>/YYYY/MM/DD/<kind>-<id>`) and
//! deletes intermediate artifacts whose downstream products already exist.
//!
//! - A WorkUnitDirectory whose name matches a rule's glob but not its id
//!   pattern aborts the pass before anything is deleted
//! - A file that fails to delete is logged and skipped
//! - A root that cannot be listed is fatal

mod engine;
mod rules;

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub use engine::{GcReport, RetentionEngine, RetentionMode, WorkUnit};
pub use rules::{DeletionPolicy, RetentionRule, RuleSpec, TierPair, ID_PLACEHOLDER};

/// Retention result type
pub type RetentionResult<T> = Result<T, RetentionError>;

/// Errors that abort a retention pass
#[derive(Debug, Error)]
pub enum RetentionError {
    /// The work tree does not have the shape the rules expect.
    #[error("configuration integrity violation: '{path}' matches rule '{rule}' but not its id pattern '{pattern}'")]
    ConfigurationIntegrity {
        path: PathBuf,
        rule: String,
        pattern: String,
    },

    #[error("cannot enumerate {path}: {source}")]
    Enumerate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid rule '{rule}': {reason}")]
    InvalidRule { rule: String, reason: String },
}
