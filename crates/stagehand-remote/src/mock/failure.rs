//! Failure injection for shell collaborators

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use crate::error::RemoteResult;
use crate::shell::{CommandOutput, RemoteShell};

/// Shell operation kinds that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShellOp {
    Exec,
    Push,
    Pull,
}

/// Failure configuration for an operation
#[derive(Debug, Clone)]
pub struct FailureConfig {
    /// Exit code reported for the failed call
    pub exit_code: i32,
    /// stderr reported for the failed call
    pub stderr: String,
    /// Only fail exec calls whose script contains this text
    pub script_contains: Option<String>,
    /// Number of times to fail before succeeding (None = always fail)
    pub fail_count: Option<u32>,
    /// For pushes: write the first half of the payload before failing
    pub partial_write: bool,
}

impl FailureConfig {
    /// Create a config that fails with the given exit code and message
    pub fn error(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stderr: stderr.into(),
            script_contains: None,
            fail_count: None,
            partial_write: false,
        }
    }

    /// A push that dies mid-transfer, leaving a truncated payload behind
    pub fn interrupted_transfer() -> Self {
        Self {
            partial_write: true,
            ..Self::error(1, "lost connection")
        }
    }

    /// Restrict an exec failure to scripts containing `needle`
    pub fn when_script_contains(mut self, needle: impl Into<String>) -> Self {
        self.script_contains = Some(needle.into());
        self
    }

    /// Set the number of times to fail before succeeding
    pub fn with_fail_count(mut self, count: u32) -> Self {
        self.fail_count = Some(count);
        self
    }

    fn output(&self) -> CommandOutput {
        CommandOutput {
            code: Some(self.exit_code),
            stdout: String::new(),
            stderr: self.stderr.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct FailureState {
    configs: HashMap<ShellOp, FailureConfig>,
    failures: HashMap<ShellOp, u32>,
}

/// A shell that delegates to `inner` unless a failure is injected
pub struct FlakyShell<S: RemoteShell> {
    inner: S,
    state: Mutex<FailureState>,
    calls: Mutex<Vec<(ShellOp, String)>>,
}

impl<S: RemoteShell> FlakyShell<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            state: Mutex::new(FailureState::default()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Inject a failure for an operation
    pub fn inject(&self, op: ShellOp, config: FailureConfig) {
        if let Ok(mut state) = self.state.lock() {
            state.configs.insert(op, config);
            state.failures.insert(op, 0);
        }
    }

    /// Clear any injected failure for an operation
    pub fn clear(&self, op: ShellOp) {
        if let Ok(mut state) = self.state.lock() {
            state.configs.remove(&op);
            state.failures.remove(&op);
        }
    }

    /// Calls received so far, with the script or path argument
    pub fn calls(&self) -> Vec<(ShellOp, String)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, op: ShellOp, detail: &str) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((op, detail.to_string()));
        }
    }

    /// Returns the failure to report for this call, if any.
    fn should_fail(&self, op: ShellOp, detail: &str) -> Option<FailureConfig> {
        let mut state = self.state.lock().ok()?;
        let config = state.configs.get(&op)?.clone();

        if let Some(ref needle) = config.script_contains {
            if !detail.contains(needle.as_str()) {
                return None;
            }
        }

        let count = state.failures.entry(op).or_insert(0);
        if let Some(max) = config.fail_count {
            if *count >= max {
                return None;
            }
        }
        *count += 1;
        Some(config)
    }
}

impl<S: RemoteShell> RemoteShell for FlakyShell<S> {
    fn target(&self) -> String {
        self.inner.target()
    }

    fn exec(&self, script: &str) -> RemoteResult<CommandOutput> {
        self.record(ShellOp::Exec, script);
        match self.should_fail(ShellOp::Exec, script) {
            Some(config) => Ok(config.output()),
            None => self.inner.exec(script),
        }
    }

    fn push(&self, local: &Path, remote: &str) -> RemoteResult<CommandOutput> {
        self.record(ShellOp::Push, remote);
        match self.should_fail(ShellOp::Push, remote) {
            Some(config) => {
                if config.partial_write {
                    if let Ok(bytes) = fs::read(local) {
                        let _ = fs::write(remote, &bytes[..bytes.len() / 2]);
                    }
                }
                Ok(config.output())
            }
            None => self.inner.push(local, remote),
        }
    }

    fn pull(&self, remote: &str, local_dir: &Path) -> RemoteResult<CommandOutput> {
        self.record(ShellOp::Pull, remote);
        match self.should_fail(ShellOp::Pull, remote) {
            Some(config) => Ok(config.output()),
            None => self.inner.pull(remote, local_dir),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::LocalShell;

    #[test]
    fn test_fail_count_then_succeed() {
        let shell = FlakyShell::new(LocalShell::default());
        shell.inject(ShellOp::Exec, FailureConfig::error(255, "connection reset").with_fail_count(1));

        let first = shell.exec("true").unwrap();
        assert_eq!(first.code, Some(255));
        assert_eq!(first.stderr, "connection reset");

        let second = shell.exec("true").unwrap();
        assert!(second.success());
        assert_eq!(shell.calls().len(), 2);
    }

    #[test]
    fn test_script_filter() {
        let shell = FlakyShell::new(LocalShell::default());
        shell.inject(ShellOp::Exec, FailureConfig::error(1, "mv failed").when_script_contains("mv "));

        assert!(shell.exec("true").unwrap().success());
        assert!(!shell.exec("mv a b").unwrap().success());

        shell.clear(ShellOp::Exec);
        assert!(shell.exec("true").unwrap().success());
    }
}
