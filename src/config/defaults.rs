//! Built-in defaults (layer 1)

use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use stagehand_remote::timeout::{DEFAULT_CONNECT_TIMEOUT_SECONDS, DEFAULT_TRANSFER_TIMEOUT_SECONDS};

/// File name of the janitor lock inside the system temp directory
pub const LOCK_FILE_NAME: &str = "stagehand-janitor.lock";

/// Default janitor lock location
pub fn default_lock_path() -> PathBuf {
    env::temp_dir().join(LOCK_FILE_NAME)
}

/// Built-in default configuration values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDefaults {
    /// Janitor lock file (default: `<tmp>/stagehand-janitor.lock`)
    pub lock_path: PathBuf,

    /// Report without deleting (default: false)
    pub dry_run: bool,

    /// Connection timeout in seconds (default: 30)
    pub connect_timeout_seconds: u64,

    /// Per-step transfer timeout in seconds (default: 2400 = 40 minutes)
    pub transfer_timeout_seconds: u64,

    /// SSH port (default: 22)
    pub ssh_port: u16,

    /// Never prompt in ssh/scp (default: true)
    pub ssh_batch_mode: bool,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            lock_path: default_lock_path(),
            dry_run: false,
            connect_timeout_seconds: DEFAULT_CONNECT_TIMEOUT_SECONDS,
            transfer_timeout_seconds: DEFAULT_TRANSFER_TIMEOUT_SECONDS,
            ssh_port: 22,
            ssh_batch_mode: true,
        }
    }
}

impl BuiltinDefaults {
    /// Convert to JSON Value for merging
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "janitor": {
                "lock_path": self.lock_path.to_string_lossy(),
                "dry_run": self.dry_run,
                "rule": []
            },
            "transfer": {
                "connect_timeout_seconds": self.connect_timeout_seconds,
                "transfer_timeout_seconds": self.transfer_timeout_seconds
            },
            "ssh": {
                "port": self.ssh_port,
                "batch_mode": self.ssh_batch_mode
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let defaults = BuiltinDefaults::default();
        assert_eq!(defaults.connect_timeout_seconds, 30);
        assert_eq!(defaults.transfer_timeout_seconds, 2400);
        assert_eq!(defaults.ssh_port, 22);
        assert!(!defaults.dry_run);
        assert!(defaults.lock_path.ends_with(LOCK_FILE_NAME));
    }

    #[test]
    fn test_to_value() {
        let value = BuiltinDefaults::default().to_value();

        assert_eq!(value["transfer"]["transfer_timeout_seconds"], 2400);
        assert_eq!(value["janitor"]["dry_run"], false);
        assert!(value["janitor"]["rule"].as_array().unwrap().is_empty());
    }
}
