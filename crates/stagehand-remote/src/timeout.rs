//! Transfer deadlines
//!
//! Remote steps run as child processes or HTTP requests that can hang on a
//! dead connection. Every one of them runs under a deadline so a stuck
//! transfer cannot hold the caller (or the janitor lock) forever.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default connect timeout (seconds)
pub const DEFAULT_CONNECT_TIMEOUT_SECONDS: u64 = 30;

/// Default per-step transfer timeout (40 minutes, sized for multi-GB rasters)
pub const DEFAULT_TRANSFER_TIMEOUT_SECONDS: u64 = 2400;

/// Timeout configuration for remote steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTimeouts {
    /// Connection establishment timeout
    #[serde(default = "default_connect")]
    pub connect_timeout_seconds: u64,

    /// Wall-clock limit for a single step (one shell command, one upload,
    /// one HTTP request including its body)
    #[serde(default = "default_transfer")]
    pub transfer_timeout_seconds: u64,
}

fn default_connect() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECONDS
}

fn default_transfer() -> u64 {
    DEFAULT_TRANSFER_TIMEOUT_SECONDS
}

impl Default for TransferTimeouts {
    fn default() -> Self {
        Self {
            connect_timeout_seconds: DEFAULT_CONNECT_TIMEOUT_SECONDS,
            transfer_timeout_seconds: DEFAULT_TRANSFER_TIMEOUT_SECONDS,
        }
    }
}

impl TransferTimeouts {
    /// Validate bounds
    pub fn validate(&self) -> Result<(), TimeoutValidationError> {
        // connect_timeout_seconds must be in (0, 300]
        if self.connect_timeout_seconds == 0 || self.connect_timeout_seconds > 300 {
            return Err(TimeoutValidationError::ConnectOutOfBounds {
                value: self.connect_timeout_seconds,
            });
        }

        // transfer_timeout_seconds must be in (0, 86400]
        if self.transfer_timeout_seconds == 0 || self.transfer_timeout_seconds > 86400 {
            return Err(TimeoutValidationError::TransferOutOfBounds {
                value: self.transfer_timeout_seconds,
            });
        }

        Ok(())
    }

    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn transfer(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout_seconds)
    }
}

/// Timeout validation errors
#[derive(Debug, thiserror::Error)]
pub enum TimeoutValidationError {
    #[error("connect_timeout_seconds must be in (0, 300], got {value}")]
    ConnectOutOfBounds { value: u64 },

    #[error("transfer_timeout_seconds must be in (0, 86400], got {value}")]
    TransferOutOfBounds { value: u64 },
}
