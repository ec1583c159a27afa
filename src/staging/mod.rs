//! Staging orchestrator
//!
//! Composes remote path operations into the upload-for-ingest protocol. A
//! product is available to consumers exactly when its done marker exists, so
//! every operation here orders marker writes after payload writes and marker
//! removals before payload removals.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use stagehand_remote::marker::marker_path;
use stagehand_remote::{RemoteError, RemotePathOperator, RemoteShell};
use thiserror::Error;
use tracing::{info, warn};

/// Staging result type
pub type StagingResult<T> = Result<T, StagingError>;

/// Errors from staging operations
#[derive(Debug, Error)]
pub enum StagingError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("{remote} did not become available within {waited:?}")]
    NotAvailable { remote: String, waited: Duration },
}

/// How a staging request was satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    /// Payload transferred and marker written
    Uploaded,
    /// Payload moved on the remote host and marker written
    Published,
    /// Marker already present; nothing transferred
    AlreadyStaged,
}

/// Record of a staged product
#[derive(Debug, Clone, Serialize)]
pub struct StageReceipt {
    pub remote_path: String,
    pub marker_path: String,
    pub outcome: StageOutcome,
    pub elapsed_ms: u64,
}

/// One entry of a batch upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageItem {
    pub local: PathBuf,
    pub remote: String,
}

/// Staging options
#[derive(Debug, Clone, Copy, Default)]
pub struct StagingOptions {
    /// Re-upload even when the marker is already present
    pub force: bool,
}

/// Upload, publish, withdraw and pull products against one host
pub struct StagingOrchestrator<S: RemoteShell> {
    operator: RemotePathOperator<S>,
    options: StagingOptions,
}

impl<S: RemoteShell> StagingOrchestrator<S> {
    pub fn new(shell: S, options: StagingOptions) -> Self {
        Self {
            operator: RemotePathOperator::new(shell),
            options,
        }
    }

    pub fn operator(&self) -> &RemotePathOperator<S> {
        &self.operator
    }

    /// Upload `local` to `remote` and mark it done.
    ///
    /// A product whose marker already exists is left alone unless `force`.
    pub fn stage_for_ingest(&self, local: &Path, remote: &str) -> StagingResult<StageReceipt> {
        let start = Instant::now();

        if !self.options.force && self.operator.marker_exists(remote)? {
            info!(remote, "already staged, skipping upload");
            return Ok(StageReceipt {
                remote_path: remote.to_string(),
                marker_path: marker_path(remote),
                outcome: StageOutcome::AlreadyStaged,
                elapsed_ms: elapsed_ms(start),
            });
        }

        let receipt = self.operator.upload_for_ingest(local, remote)?;
        Ok(StageReceipt {
            remote_path: receipt.remote_path,
            marker_path: receipt.marker_path,
            outcome: StageOutcome::Uploaded,
            elapsed_ms: elapsed_ms(start),
        })
    }

    /// Move an already-remote payload to `dest` and mark it done there.
    pub fn publish(&self, src: &str, dest: &str) -> StagingResult<StageReceipt> {
        let start = Instant::now();

        self.operator.clear_marker(dest)?;
        self.operator.move_path(src, dest)?;
        let marker = self.operator.write_marker(dest)?;

        info!(src, dest, "published");
        Ok(StageReceipt {
            remote_path: dest.to_string(),
            marker_path: marker,
            outcome: StageOutcome::Published,
            elapsed_ms: elapsed_ms(start),
        })
    }

    /// Make a product unavailable, then delete it.
    pub fn withdraw(&self, remote: &str) -> StagingResult<()> {
        self.operator.clear_marker(remote)?;
        self.operator.remove_path(remote)?;
        info!(remote, "withdrawn");
        Ok(())
    }

    /// True when the product's marker exists.
    pub fn is_available(&self, remote: &str) -> StagingResult<bool> {
        Ok(self.operator.marker_exists(remote)?)
    }

    /// Poll for the marker until it appears or `timeout` passes.
    pub fn wait_until_available(
        &self,
        remote: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> StagingResult<()> {
        let start = Instant::now();
        loop {
            if self.is_available(remote)? {
                return Ok(());
            }
            if start.elapsed() >= timeout {
                return Err(StagingError::NotAvailable {
                    remote: remote.to_string(),
                    waited: start.elapsed(),
                });
            }
            thread::sleep(poll_interval);
        }
    }

    /// Pull a remote path into `local_dir`, replacing any stale local copy.
    pub fn pull(&self, remote: &str, local_dir: &Path) -> StagingResult<PathBuf> {
        Ok(self.operator.fetch_remote_path(remote, local_dir)?)
    }

    /// Stage every item, continuing past failures. Results are in input order.
    pub fn stage_batch(&self, items: &[StageItem]) -> Vec<StagingResult<StageReceipt>> {
        items
            .iter()
            .map(|item| {
                let result = self.stage_for_ingest(&item.local, &item.remote);
                if let Err(ref e) = result {
                    warn!(local = %item.local.display(), remote = %item.remote, error = %e, "staging failed");
                }
                result
            })
            .collect()
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagehand_remote::mock::{FailureConfig, FlakyShell, ShellOp};
    use stagehand_remote::LocalShell;
    use std::fs;
    use tempfile::TempDir;

    fn orchestrator(force: bool) -> StagingOrchestrator<FlakyShell<LocalShell>> {
        StagingOrchestrator::new(
            FlakyShell::new(LocalShell::default()),
            StagingOptions { force },
        )
    }

    #[test]
    fn test_stage_skips_when_marker_present() {
        let temp = TempDir::new().unwrap();
        let local = temp.path().join("product.zip");
        fs::write(&local, b"v1").unwrap();
        let remote = temp.path().join("remote").join("product.zip");
        let remote = remote.to_str().unwrap();

        let staging = orchestrator(false);
        let first = staging.stage_for_ingest(&local, remote).unwrap();
        assert_eq!(first.outcome, StageOutcome::Uploaded);

        fs::write(&local, b"v2").unwrap();
        let second = staging.stage_for_ingest(&local, remote).unwrap();
        assert_eq!(second.outcome, StageOutcome::AlreadyStaged);
        assert_eq!(fs::read(remote).unwrap(), b"v1");
    }

    #[test]
    fn test_force_reuploads() {
        let temp = TempDir::new().unwrap();
        let local = temp.path().join("product.zip");
        fs::write(&local, b"v1").unwrap();
        let remote = temp.path().join("out").join("product.zip");
        let remote = remote.to_str().unwrap();

        let staging = orchestrator(true);
        staging.stage_for_ingest(&local, remote).unwrap();
        fs::write(&local, b"v2").unwrap();
        let receipt = staging.stage_for_ingest(&local, remote).unwrap();

        assert_eq!(receipt.outcome, StageOutcome::Uploaded);
        assert_eq!(fs::read(remote).unwrap(), b"v2");
    }

    #[test]
    fn test_withdraw_removes_marker_first() {
        let temp = TempDir::new().unwrap();
        let local = temp.path().join("p.zip");
        fs::write(&local, b"x").unwrap();
        let remote = temp.path().join("out").join("p.zip");
        let remote = remote.to_str().unwrap();

        let staging = orchestrator(false);
        staging.stage_for_ingest(&local, remote).unwrap();

        // Payload removal fails: the product must already be unavailable.
        staging
            .operator()
            .shell()
            .inject(ShellOp::Exec, FailureConfig::error(1, "busy").when_script_contains("rm -rf"));
        assert!(staging.withdraw(remote).is_err());
        assert!(!staging.is_available(remote).unwrap());
        assert!(Path::new(remote).exists());
    }

    #[test]
    fn test_wait_until_available_times_out() {
        let temp = TempDir::new().unwrap();
        let remote = temp.path().join("never.zip");
        let staging = orchestrator(false);

        let err = staging
            .wait_until_available(
                remote.to_str().unwrap(),
                Duration::from_millis(100),
                Duration::from_millis(20),
            )
            .unwrap_err();
        assert!(matches!(err, StagingError::NotAvailable { .. }));
    }

    #[test]
    fn test_batch_continues_past_failures() {
        let temp = TempDir::new().unwrap();
        let good = temp.path().join("good.zip");
        fs::write(&good, b"ok").unwrap();
        let out = temp.path().join("out");

        let items = vec![
            StageItem {
                local: temp.path().join("missing.zip"),
                remote: out.join("missing.zip").to_string_lossy().into_owned(),
            },
            StageItem {
                local: good.clone(),
                remote: out.join("good.zip").to_string_lossy().into_owned(),
            },
        ];

        let results = orchestrator(false).stage_batch(&items);
        assert!(results[0].is_err());
        assert_eq!(results[1].as_ref().unwrap().outcome, StageOutcome::Uploaded);
        assert!(out.join("good.zip.done").exists());
        assert!(!out.join("missing.zip.done").exists());
    }
}
