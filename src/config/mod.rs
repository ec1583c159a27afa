//! Layered configuration
//!
//! 1. Built-in defaults
//! 2. Host file (`$STAGEHAND_CONFIG` or ~/.config/stagehand/stagehand.toml)
//! 3. CLI flags

mod defaults;
mod effective;
mod merge;

pub use defaults::{default_lock_path, BuiltinDefaults, LOCK_FILE_NAME};
pub use effective::{
    default_config_path, ConfigError, ConfigOrigin, ConfigSource, EffectiveConfig, JanitorConfig,
    StagehandConfig, CONFIG_ENV,
};
pub use merge::{deep_merge, merge_layers};
