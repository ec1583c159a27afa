//! Remote path operator
//!
//! Move, remove, upload and fetch primitives against a single host. None of
//! them is idempotent on its own: callers get idempotence from done markers.
//!
//! Ordering in `upload_for_ingest` is load-bearing. The marker is removed
//! before the payload is touched and written only after the payload transfer
//! has succeeded, so a consumer polling for the marker never sees it beside a
//! missing or partial payload.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{RemoteError, RemoteResult};
use crate::marker::marker_path;
use crate::shell::{sh_quote, CommandOutput, RemoteShell};

/// Result of a completed `upload_for_ingest`
#[derive(Debug, Clone)]
pub struct UploadReceipt {
    pub remote_path: String,
    pub marker_path: String,
    /// Collected operator output for diagnostics
    pub output: String,
}

/// Path operations against one host
pub struct RemotePathOperator<S: RemoteShell> {
    shell: S,
}

impl<S: RemoteShell> RemotePathOperator<S> {
    pub fn new(shell: S) -> Self {
        Self { shell }
    }

    pub fn shell(&self) -> &S {
        &self.shell
    }

    /// Run a script and turn a non-zero exit into `RemoteError::Execution`.
    fn run(&self, step: &str, script: &str) -> RemoteResult<CommandOutput> {
        debug!(step, target = %self.shell.target(), script, "remote step");
        let output = self.shell.exec(script)?;
        self.check(step, output)
    }

    fn check(&self, step: &str, output: CommandOutput) -> RemoteResult<CommandOutput> {
        if output.success() {
            Ok(output)
        } else {
            Err(RemoteError::Execution {
                step: step.to_string(),
                target: self.shell.target(),
                status: output.status_text(),
                stderr: output.stderr.trim().to_string(),
            })
        }
    }

    /// True when `path` exists (dangling symlinks included).
    pub fn path_exists(&self, path: &str) -> RemoteResult<bool> {
        let q = sh_quote(path);
        let output = self
            .shell
            .exec(&format!("if [ -e {q} ] || [ -L {q} ]; then exit 0; else exit 1; fi"))?;
        match output.code {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(RemoteError::Execution {
                step: "exists".to_string(),
                target: self.shell.target(),
                status: output.status_text(),
                stderr: output.stderr.trim().to_string(),
            }),
        }
    }

    /// Move `src` to `dest`, replacing whatever `dest` held.
    ///
    /// Returns the concatenated output of every step.
    pub fn move_path(&self, src: &str, dest: &str) -> RemoteResult<String> {
        if normalize(src) == normalize(dest) {
            return Err(RemoteError::InvalidRequest(format!(
                "refusing to move {} onto itself",
                src
            )));
        }

        let mut log = String::new();

        if self.path_exists(dest)? {
            info!(dest, target = %self.shell.target(), "destination exists, replacing");
            log.push_str(&self.run("remove-destination", &format!("rm -rf -- {}", sh_quote(dest)))?.combined());
        }

        if let Some(parent) = remote_parent(dest) {
            log.push_str(&self.run("create-parent", &format!("mkdir -p -- {}", sh_quote(parent)))?.combined());
        }

        log.push_str(
            &self
                .run("move", &format!("mv -- {} {}", sh_quote(src), sh_quote(dest)))?
                .combined(),
        );

        info!(src, dest, target = %self.shell.target(), "moved remote path");
        Ok(log)
    }

    /// Recursively delete `path`. Absent paths are not an error.
    pub fn remove_path(&self, path: &str) -> RemoteResult<()> {
        self.run("remove", &format!("rm -rf -- {}", sh_quote(path)))?;
        info!(path, target = %self.shell.target(), "removed remote path");
        Ok(())
    }

    /// Delete everything inside `path`, keeping `path` itself. Absent paths
    /// are not an error.
    pub fn remove_path_contents(&self, path: &str) -> RemoteResult<()> {
        let q = sh_quote(path);
        self.run(
            "remove-contents",
            &format!("if [ -d {q} ]; then find {q} -mindepth 1 -maxdepth 1 -exec rm -rf -- {{}} +; fi"),
        )?;
        info!(path, target = %self.shell.target(), "emptied remote directory");
        Ok(())
    }

    /// Write the done marker for `payload`.
    pub fn write_marker(&self, payload: &str) -> RemoteResult<String> {
        let marker = marker_path(payload);
        self.run("write-marker", &format!(": > {}", sh_quote(&marker)))?;
        Ok(marker)
    }

    /// Remove the done marker for `payload` (absent is fine).
    pub fn clear_marker(&self, payload: &str) -> RemoteResult<()> {
        self.run("clear-marker", &format!("rm -f -- {}", sh_quote(&marker_path(payload))))?;
        Ok(())
    }

    pub fn marker_exists(&self, payload: &str) -> RemoteResult<bool> {
        self.path_exists(&marker_path(payload))
    }

    /// Upload `local` to `remote` and mark it done.
    ///
    /// Steps: clear stale marker and payload, create the parent, push with
    /// mode bits preserved, write the marker. Any failing step aborts before
    /// the marker is written.
    pub fn upload_for_ingest(&self, local: &Path, remote: &str) -> RemoteResult<UploadReceipt> {
        fs::symlink_metadata(local).map_err(|e| RemoteError::local_io(local, e))?;

        let mut log = String::new();

        self.clear_marker(remote)?;
        log.push_str(&self.run("remove-existing", &format!("rm -rf -- {}", sh_quote(remote)))?.combined());

        if let Some(parent) = remote_parent(remote) {
            log.push_str(&self.run("create-parent", &format!("mkdir -p -- {}", sh_quote(parent)))?.combined());
        }

        let pushed = self.shell.push(local, remote)?;
        log.push_str(&self.check("upload", pushed)?.combined());

        let marker = self.write_marker(remote)?;

        info!(
            local = %local.display(),
            remote,
            marker = %marker,
            target = %self.shell.target(),
            "uploaded for ingest"
        );

        Ok(UploadReceipt {
            remote_path: remote.to_string(),
            marker_path: marker,
            output: log,
        })
    }

    /// Pull `remote` into `local_dir`, replacing any local entry of the same
    /// name, and return the absolute local path.
    pub fn fetch_remote_path(&self, remote: &str, local_dir: &Path) -> RemoteResult<PathBuf> {
        let name = remote_basename(remote).ok_or_else(|| {
            RemoteError::InvalidRequest(format!("remote path '{}' has no file name", remote))
        })?;

        fs::create_dir_all(local_dir).map_err(|e| RemoteError::local_io(local_dir, e))?;
        let local = local_dir.join(name);

        if let Ok(meta) = fs::symlink_metadata(&local) {
            debug!(path = %local.display(), "removing stale local copy");
            let removed = if meta.is_dir() {
                fs::remove_dir_all(&local)
            } else {
                fs::remove_file(&local)
            };
            removed.map_err(|e| RemoteError::local_io(&local, e))?;
        }

        let pulled = self.shell.pull(remote, local_dir)?;
        self.check("download", pulled)?;

        let absolute = fs::canonicalize(&local).map_err(|e| RemoteError::local_io(&local, e))?;
        info!(remote, local = %absolute.display(), target = %self.shell.target(), "fetched remote path");
        Ok(absolute)
    }
}

fn normalize(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

/// Parent directory of a POSIX remote path, if it names one.
pub fn remote_parent(path: &str) -> Option<&str> {
    let trimmed = normalize(path);
    match trimmed.rfind('/') {
        Some(0) if trimmed.len() > 1 => Some("/"),
        Some(0) | None => None,
        Some(idx) => Some(&trimmed[..idx]),
    }
}

/// Final component of a POSIX remote path.
pub fn remote_basename(path: &str) -> Option<&str> {
    let trimmed = normalize(path);
    let name = trimmed.rsplit('/').next()?;
    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name)
    }
}
