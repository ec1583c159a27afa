//! Remote operation errors
//!
//! Every failing remote step surfaces as a typed error so callers always know
//! whether a done marker was written.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

/// Remote result type
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Errors from remote path operations and transfers
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// A shell or transfer step exited non-zero.
    #[error("remote step '{step}' failed with {status} on {target}: {stderr}")]
    Execution {
        step: String,
        target: String,
        status: String,
        stderr: String,
    },

    /// An HTTP listing or download returned a non-2xx status.
    #[error("transfer of {url} failed with HTTP {status}")]
    Transfer { url: String, status: u16 },

    /// The HTTP client itself failed (connection refused, TLS, body read).
    #[error("HTTP client error for {url}: {message}")]
    Http { url: String, message: String },

    /// A child process exceeded its deadline and was killed.
    #[error("remote step '{step}' timed out after {elapsed:?}")]
    Timeout { step: String, elapsed: Duration },

    /// A collaborator binary could not be started.
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// Local filesystem failure during a staging or fetch operation.
    #[error("local I/O error at {path}: {source}")]
    LocalIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid endpoint '{input}': {reason}")]
    Endpoint { input: String, reason: String },

    /// A server response that cannot be interpreted.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The caller asked for something that cannot be done safely.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl RemoteError {
    pub(crate) fn local_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        RemoteError::LocalIo {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn endpoint(input: &str, reason: impl Into<String>) -> Self {
        RemoteError::Endpoint {
            input: crate::endpoint::redact_userinfo(input),
            reason: reason.into(),
        }
    }
}
