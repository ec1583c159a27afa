//! Janitor run
//!
//! One scheduled invocation: take the singleton lock, run a retention pass
//! over the work tree, release the lock, and summarize the outcome in a
//! [`JanitorReport`] whose exit code the binary returns.

use std::path::PathBuf;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{ConfigError, JanitorConfig, StagehandConfig};
use crate::exit::ExitCode;
use crate::guard::{GuardError, RunGuard};
use crate::retention::{GcReport, RetentionEngine, RetentionMode, RetentionRule};
use crate::signal::ShutdownSignal;

/// Schema identifier for janitor reports
pub const JANITOR_REPORT_SCHEMA_ID: &str = "stagehand/janitor_report@1";

/// Errors building a janitor from configuration
#[derive(Debug, Error)]
pub enum JanitorError {
    #[error("janitor.root is not set (use --root or [janitor] root)")]
    MissingRoot,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Outcome of a janitor run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JanitorStatus {
    Completed,
    /// Another instance holds the lock; nothing was touched
    AlreadyRunning,
    /// Stopped early on a shutdown request
    Interrupted,
    Failed,
}

impl JanitorStatus {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            JanitorStatus::Completed => ExitCode::Success,
            JanitorStatus::AlreadyRunning => ExitCode::AlreadyRunning,
            JanitorStatus::Interrupted => ExitCode::Interrupted,
            JanitorStatus::Failed => ExitCode::Failure,
        }
    }
}

/// Summary of one janitor run
#[derive(Debug, Clone, Serialize)]
pub struct JanitorReport {
    pub schema_id: String,
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub root: PathBuf,
    pub lock_path: PathBuf,
    pub status: JanitorStatus,
    pub exit_code: i32,

    /// Present when the retention pass ran to completion or was interrupted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gc: Option<GcReport>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JanitorReport {
    pub fn human_summary(&self) -> String {
        match (&self.status, &self.gc) {
            (JanitorStatus::AlreadyRunning, _) => {
                format!("another janitor holds {}", self.lock_path.display())
            }
            (JanitorStatus::Failed, _) => format!(
                "janitor failed: {}",
                self.error.as_deref().unwrap_or("unknown error")
            ),
            (status, Some(gc)) => format!(
                "{}{} work units scanned, {} candidates, {} deleted, {} bytes {}, {} errors",
                if *status == JanitorStatus::Interrupted { "interrupted: " } else { "" },
                gc.scanned,
                gc.candidates.len(),
                gc.deleted,
                gc.bytes_reclaimed,
                if gc.dry_run { "reclaimable" } else { "reclaimed" },
                gc.errors.len(),
            ),
            (_, None) => "no retention pass ran".to_string(),
        }
    }
}

/// Singleton retention run over one work tree
pub struct Janitor {
    root: PathBuf,
    guard: RunGuard,
    engine: RetentionEngine,
}

impl Janitor {
    pub fn new(
        root: impl Into<PathBuf>,
        lock_path: impl Into<PathBuf>,
        rules: Vec<RetentionRule>,
        mode: RetentionMode,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            root: root.into(),
            guard: RunGuard::new(lock_path),
            engine: RetentionEngine::new(rules, mode).with_shutdown(shutdown),
        }
    }

    /// Build from the `[janitor]` section.
    pub fn from_config(config: &StagehandConfig, shutdown: ShutdownSignal) -> Result<Self, JanitorError> {
        let JanitorConfig {
            root,
            lock_path,
            dry_run,
            ..
        } = &config.janitor;
        let root = root.clone().ok_or(JanitorError::MissingRoot)?;
        let mode = if *dry_run {
            RetentionMode::DryRun
        } else {
            RetentionMode::Delete
        };
        Ok(Self::new(
            root,
            lock_path.clone(),
            config.compile_rules()?,
            mode,
            shutdown,
        ))
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    /// Run once. Never panics on operational failures; the report carries
    /// the status and exit code.
    pub fn run(&self) -> JanitorReport {
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let start = Instant::now();

        info!(run_id = %run_id, root = %self.root.display(), lock = %self.guard.lock_path().display(), "janitor starting");

        let (status, gc, error) = match self.guard.run_exclusive(|| self.engine.collect_garbage(&self.root)) {
            Ok(Ok(gc)) => {
                let status = if gc.interrupted {
                    JanitorStatus::Interrupted
                } else {
                    JanitorStatus::Completed
                };
                (status, Some(gc), None)
            }
            Ok(Err(e)) => {
                error!(error = %e, "retention pass aborted");
                (JanitorStatus::Failed, None, Some(e.to_string()))
            }
            Err(e @ GuardError::Contention { .. }) => {
                warn!(error = %e, "janitor already running, exiting");
                (JanitorStatus::AlreadyRunning, None, Some(e.to_string()))
            }
            Err(e) => {
                error!(error = %e, "cannot take janitor lock");
                (JanitorStatus::Failed, None, Some(e.to_string()))
            }
        };

        let report = JanitorReport {
            schema_id: JANITOR_REPORT_SCHEMA_ID.to_string(),
            run_id,
            started_at,
            finished_at: Utc::now(),
            duration_ms: start.elapsed().as_millis() as u64,
            root: self.root.clone(),
            lock_path: self.guard.lock_path().to_path_buf(),
            status,
            exit_code: status.exit_code().as_i32(),
            gc,
            error,
        };
        info!(run_id = %report.run_id, status = ?report.status, "{}", report.human_summary());
        report
    }
}
