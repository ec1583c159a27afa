//! stagehand remote collaborators
//!
//! Remote path operations (move, remove, upload-for-ingest, fetch) over ssh
//! or the local shell, done-marker naming, and recursive WebDAV mirroring.

pub mod dav;
pub mod endpoint;
pub mod error;
pub mod marker;
pub mod mock;
pub mod operator;
pub mod shell;
pub mod timeout;

pub use dav::{DavTransport, DirectoryFetcher, FetchReport, HttpDav};
pub use endpoint::{Credentials, RemoteEndpoint, Scheme};
pub use error::{RemoteError, RemoteResult};
pub use operator::{RemotePathOperator, UploadReceipt};
pub use shell::{shell_for, CommandOutput, LocalShell, RemoteShell, SshConfig, SshShell};
pub use timeout::{TimeoutValidationError, TransferTimeouts};
