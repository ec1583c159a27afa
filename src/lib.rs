//! stagehand - work-directory janitor and remote staging
//!
//! Keeps a date-partitioned processing work tree from filling its disk by
//! deleting intermediate artifacts once their downstream products exist, and
//! stages finished products to remote hosts behind done markers so
//! consumers never ingest a partial payload.

pub mod config;
pub mod exit;
pub mod guard;
pub mod janitor;
pub mod logging;
pub mod retention;
pub mod signal;
pub mod staging;

pub use stagehand_remote as remote;

pub use config::{ConfigError, EffectiveConfig, StagehandConfig};
pub use exit::ExitCode;
pub use guard::{ExclusiveLock, GuardError, RunGuard};
pub use janitor::{Janitor, JanitorReport, JanitorStatus};
pub use retention::{GcReport, RetentionEngine, RetentionError, RetentionMode, RetentionRule, RuleSpec};
pub use signal::ShutdownSignal;
pub use staging::{StageItem, StageOutcome, StageReceipt, StagingError, StagingOptions, StagingOrchestrator};
