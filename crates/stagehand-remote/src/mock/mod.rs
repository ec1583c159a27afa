//! In-process test doubles
//!
//! `FlakyShell` wraps a real shell and injects failures per operation;
//! `MockDav` serves an in-memory collection tree over the `DavTransport`
//! seam. Both record the calls they receive so tests can assert ordering.

mod dav;
mod failure;

pub use dav::MockDav;
pub use failure::{FailureConfig, FlakyShell, ShellOp};
