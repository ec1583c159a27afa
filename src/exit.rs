//! Stable process exit codes

use serde::{Deserialize, Serialize};

use crate::signal::EXIT_CODE_INTERRUPTED;

/// Exit codes for the `stagehand` binary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum ExitCode {
    /// Completed, including passes with nothing to do
    Success = 0,
    /// Any fatal error
    Failure = 1,
    /// Bad command line
    Usage = 2,
    /// Another janitor holds the lock (EX_TEMPFAIL)
    AlreadyRunning = 75,
    /// Stopped by SIGINT/SIGTERM
    Interrupted = EXIT_CODE_INTERRUPTED,
}

impl ExitCode {
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    pub fn from_i32(code: i32) -> Option<Self> {
        match code {
            0 => Some(ExitCode::Success),
            1 => Some(ExitCode::Failure),
            2 => Some(ExitCode::Usage),
            75 => Some(ExitCode::AlreadyRunning),
            EXIT_CODE_INTERRUPTED => Some(ExitCode::Interrupted),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(ExitCode::Success.as_i32(), 0);
        assert_eq!(ExitCode::AlreadyRunning.as_i32(), 75);
        assert_eq!(ExitCode::Interrupted.as_i32(), 130);
        for code in [0, 1, 2, 75, 130] {
            assert_eq!(ExitCode::from_i32(code).unwrap().as_i32(), code);
        }
        assert_eq!(ExitCode::from_i32(42), None);
    }
}
