//! Shell collaborators
//!
//! Abstracts the remote host for testability. Provides:
//! - `RemoteShell` trait: run a script, push a local path, pull a remote path
//! - `SshShell`: ssh for scripts, scp for payloads (production)
//! - `LocalShell`: the same scripts via `sh -c` and `cp` on this machine
//!
//! Every child runs under the transfer deadline; an expired child is sent
//! SIGTERM, then killed.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::endpoint::{RemoteEndpoint, Scheme};
use crate::error::{RemoteError, RemoteResult};
use crate::timeout::TransferTimeouts;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const TERMINATION_GRACE: Duration = Duration::from_secs(2);

/// Captured result of one child process
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Exit code (None when killed by a signal)
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Human-readable exit status for diagnostics.
    pub fn status_text(&self) -> String {
        match self.code {
            Some(code) => format!("exit code {}", code),
            None => "signal".to_string(),
        }
    }

    /// stdout followed by stderr, as operators return for diagnostics.
    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&self.stderr);
        }
        out
    }
}

/// A host that can run shell scripts and exchange paths with this machine
pub trait RemoteShell: Send + Sync {
    /// Target description for logs and errors (`user@host` or `localhost`).
    fn target(&self) -> String;

    /// Run a POSIX shell script on the host. A non-zero exit is returned as
    /// output, not as an error; only spawn failures and timeouts are errors.
    fn exec(&self, script: &str) -> RemoteResult<CommandOutput>;

    /// Copy a local file or directory to `remote`, preserving mode bits.
    fn push(&self, local: &Path, remote: &str) -> RemoteResult<CommandOutput>;

    /// Copy `remote` into the local directory `local_dir`.
    fn pull(&self, remote: &str, local_dir: &Path) -> RemoteResult<CommandOutput>;
}

impl<T: RemoteShell + ?Sized> RemoteShell for Box<T> {
    fn target(&self) -> String {
        (**self).target()
    }

    fn exec(&self, script: &str) -> RemoteResult<CommandOutput> {
        (**self).exec(script)
    }

    fn push(&self, local: &Path, remote: &str) -> RemoteResult<CommandOutput> {
        (**self).push(local, remote)
    }

    fn pull(&self, remote: &str, local_dir: &Path) -> RemoteResult<CommandOutput> {
        (**self).pull(remote, local_dir)
    }
}

/// Build the shell collaborator an endpoint asks for.
pub fn shell_for(
    endpoint: &RemoteEndpoint,
    ssh: &SshConfig,
    timeouts: TransferTimeouts,
) -> RemoteResult<Box<dyn RemoteShell>> {
    match endpoint.scheme() {
        Scheme::Ssh => Ok(Box::new(SshShell::from_endpoint(endpoint, ssh.clone(), timeouts)?)),
        Scheme::File => Ok(Box::new(LocalShell::new(timeouts))),
        Scheme::WebDav { .. } => Err(RemoteError::endpoint(
            &endpoint.to_string(),
            "WebDAV endpoints have no shell; use the directory fetcher",
        )),
    }
}

/// Quote a string for a POSIX shell.
pub fn sh_quote(s: &str) -> String {
    if !s.is_empty()
        && s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"/._-+=:,@%".contains(&b))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// SSH transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    /// SSH port (default 22, overridden by an explicit endpoint port)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Path to SSH private key
    #[serde(default, alias = "key_path")]
    pub identity_file: Option<PathBuf>,
    /// Server alive interval for detecting dead connections
    #[serde(default = "default_server_alive_interval")]
    pub server_alive_interval: u32,
    /// Server alive count max
    #[serde(default = "default_server_alive_count_max")]
    pub server_alive_count_max: u32,
    /// Never prompt for passwords or host keys
    #[serde(default = "default_batch_mode")]
    pub batch_mode: bool,
    #[serde(default = "default_ssh_program")]
    pub ssh_program: String,
    #[serde(default = "default_scp_program")]
    pub scp_program: String,
}

fn default_port() -> u16 {
    22
}

fn default_server_alive_interval() -> u32 {
    15
}

fn default_server_alive_count_max() -> u32 {
    2
}

fn default_batch_mode() -> bool {
    true
}

fn default_ssh_program() -> String {
    "ssh".to_string()
}

fn default_scp_program() -> String {
    "scp".to_string()
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            identity_file: None,
            server_alive_interval: default_server_alive_interval(),
            server_alive_count_max: default_server_alive_count_max(),
            batch_mode: default_batch_mode(),
            ssh_program: default_ssh_program(),
            scp_program: default_scp_program(),
        }
    }
}

/// ssh/scp shell for production use
pub struct SshShell {
    target: String,
    port: u16,
    config: SshConfig,
    timeouts: TransferTimeouts,
}

impl SshShell {
    pub fn new(target: impl Into<String>, config: SshConfig, timeouts: TransferTimeouts) -> Self {
        Self {
            target: target.into(),
            port: config.port,
            config,
            timeouts,
        }
    }

    pub fn from_endpoint(
        endpoint: &RemoteEndpoint,
        config: SshConfig,
        timeouts: TransferTimeouts,
    ) -> RemoteResult<Self> {
        let target = endpoint
            .ssh_target()
            .ok_or_else(|| RemoteError::endpoint(&endpoint.to_string(), "missing host"))?;
        let mut shell = Self::new(target, config, timeouts);
        if let Some(port) = endpoint.port() {
            shell.port = port;
        }
        Ok(shell)
    }

    /// Options shared by ssh and scp. `port_flag` is `-p` for ssh, `-P` for scp.
    fn common_args(&self, port_flag: &str) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            format!("ConnectTimeout={}", self.timeouts.connect_timeout_seconds),
            "-o".to_string(),
            format!("ServerAliveInterval={}", self.config.server_alive_interval),
            "-o".to_string(),
            format!("ServerAliveCountMax={}", self.config.server_alive_count_max),
            port_flag.to_string(),
            self.port.to_string(),
        ];

        if self.config.batch_mode {
            args.push("-o".to_string());
            args.push("BatchMode=yes".to_string());
        }

        if let Some(ref key) = self.config.identity_file {
            args.push("-i".to_string());
            args.push(key.display().to_string());
        }

        args
    }

    fn remote_spec(&self, remote: &str) -> String {
        format!("{}:{}", self.target, remote)
    }
}

impl RemoteShell for SshShell {
    fn target(&self) -> String {
        self.target.clone()
    }

    fn exec(&self, script: &str) -> RemoteResult<CommandOutput> {
        let mut cmd = Command::new(&self.config.ssh_program);
        cmd.args(self.common_args("-p")).arg(&self.target).arg(script);
        run_with_deadline(&self.config.ssh_program, cmd, self.timeouts.transfer())
    }

    fn push(&self, local: &Path, remote: &str) -> RemoteResult<CommandOutput> {
        let mut cmd = Command::new(&self.config.scp_program);
        cmd.args(self.common_args("-P"))
            .args(["-p", "-r"])
            .arg(local)
            .arg(self.remote_spec(remote));
        run_with_deadline(&self.config.scp_program, cmd, self.timeouts.transfer())
    }

    fn pull(&self, remote: &str, local_dir: &Path) -> RemoteResult<CommandOutput> {
        let mut cmd = Command::new(&self.config.scp_program);
        cmd.args(self.common_args("-P"))
            .args(["-p", "-r"])
            .arg(self.remote_spec(remote))
            .arg(local_dir);
        run_with_deadline(&self.config.scp_program, cmd, self.timeouts.transfer())
    }
}

/// Shell that runs everything on this machine
#[derive(Debug, Clone, Default)]
pub struct LocalShell {
    timeouts: TransferTimeouts,
}

impl LocalShell {
    pub fn new(timeouts: TransferTimeouts) -> Self {
        Self { timeouts }
    }
}

impl RemoteShell for LocalShell {
    fn target(&self) -> String {
        "localhost".to_string()
    }

    fn exec(&self, script: &str) -> RemoteResult<CommandOutput> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        run_with_deadline("sh", cmd, self.timeouts.transfer())
    }

    fn push(&self, local: &Path, remote: &str) -> RemoteResult<CommandOutput> {
        let mut cmd = Command::new("cp");
        cmd.arg("-pR").arg(local).arg(remote);
        run_with_deadline("cp", cmd, self.timeouts.transfer())
    }

    fn pull(&self, remote: &str, local_dir: &Path) -> RemoteResult<CommandOutput> {
        let mut cmd = Command::new("cp");
        cmd.arg("-pR").arg(remote).arg(local_dir);
        run_with_deadline("cp", cmd, self.timeouts.transfer())
    }
}

/// Spawn `cmd` and wait for it, killing it once `deadline` has passed.
pub(crate) fn run_with_deadline(
    program: &str,
    mut cmd: Command,
    deadline: Duration,
) -> RemoteResult<CommandOutput> {
    debug!(program, ?cmd, "spawning");

    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| RemoteError::Spawn {
            program: program.to_string(),
            source,
        })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stdout_handle = thread::spawn(move || drain(stdout));
    let stderr_handle = thread::spawn(move || drain(stderr));

    let start = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(source) => {
                return Err(RemoteError::Spawn {
                    program: program.to_string(),
                    source,
                })
            }
        }

        if start.elapsed() >= deadline {
            warn!(program, elapsed = ?start.elapsed(), "deadline exceeded, terminating child");
            terminate(&mut child);
            // Readers are left detached: a grandchild may still hold the pipes.
            drop(stdout_handle);
            drop(stderr_handle);
            return Err(RemoteError::Timeout {
                step: program.to_string(),
                elapsed: start.elapsed(),
            });
        }

        thread::sleep(POLL_INTERVAL);
    };

    let stdout = stdout_handle.join().unwrap_or_default();
    let stderr = stderr_handle.join().unwrap_or_default();

    Ok(CommandOutput {
        code: status.code(),
        stdout,
        stderr,
    })
}

fn drain<R: Read>(stream: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut stream) = stream {
        let _ = stream.read_to_end(&mut buf);
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// SIGTERM, a short grace period, then SIGKILL.
fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        let pid = Pid::from_raw(child.id() as i32);
        let _ = signal::kill(pid, Signal::SIGTERM);

        let start = Instant::now();
        while start.elapsed() < TERMINATION_GRACE {
            match child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(_) => break,
            }
        }
    }

    let _ = child.kill();
    let _ = child.wait();
}
