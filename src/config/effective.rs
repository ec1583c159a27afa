//! Effective configuration with provenance
//!
//! The merged JSON document is kept (redacted) for `config show`; the typed
//! [`StagehandConfig`] is what the rest of the crate consumes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use stagehand_remote::{SshConfig, TimeoutValidationError, TransferTimeouts};

use super::defaults::{default_lock_path, BuiltinDefaults};
use super::merge::merge_layers;
use crate::retention::{RetentionError, RetentionRule, RuleSpec};

/// Schema version for effective_config
pub const SCHEMA_VERSION: u32 = 1;

/// Schema identifier
pub const SCHEMA_ID: &str = "stagehand/effective_config@1";

/// Environment variable naming the host config file
pub const CONFIG_ENV: &str = "STAGEHAND_CONFIG";

/// Origin of a configuration source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    Host,
    Cli,
}

/// A contributing config source with provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSource {
    pub origin: ConfigOrigin,

    /// File path (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// SHA-256 digest of raw file bytes (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// `[janitor]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JanitorConfig {
    /// Work tree root (`<root>/YYYY/MM/DD/<kind>-<id>`)
    #[serde(default)]
    pub root: Option<PathBuf>,

    #[serde(default = "default_lock_path")]
    pub lock_path: PathBuf,

    #[serde(default)]
    pub dry_run: bool,

    /// Retention rules, one `[[janitor.rule]]` table each
    #[serde(default)]
    pub rule: Vec<RuleSpec>,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            root: None,
            lock_path: default_lock_path(),
            dry_run: false,
            rule: Vec::new(),
        }
    }
}

/// Typed configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StagehandConfig {
    #[serde(default)]
    pub janitor: JanitorConfig,

    #[serde(default)]
    pub transfer: TransferTimeouts,

    #[serde(default)]
    pub ssh: SshConfig,
}

impl StagehandConfig {
    /// Compile the janitor rules.
    pub fn compile_rules(&self) -> Result<Vec<RetentionRule>, ConfigError> {
        let rules = self
            .janitor
            .rule
            .iter()
            .cloned()
            .map(RetentionRule::compile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rules)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.transfer.validate()?;
        self.compile_rules()?;

        let mut names: Vec<&str> = self.janitor.rule.iter().map(|r| r.name.as_str()).collect();
        names.sort_unstable();
        if let Some(dup) = names.windows(2).find(|w| w[0] == w[1]) {
            return Err(ConfigError::Validation(format!(
                "duplicate rule name '{}'",
                dup[0]
            )));
        }
        Ok(())
    }
}

/// Effective configuration with full provenance
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub schema_version: u32,
    pub schema_id: String,
    pub created_at: DateTime<Utc>,

    /// The merged configuration object, secrets redacted
    pub config: Value,

    /// Contributing sources in precedence order
    pub sources: Vec<ConfigSource>,

    /// Redacted key paths
    pub redactions: Vec<String>,

    #[serde(skip)]
    typed: StagehandConfig,
}

/// Keys that contain secrets and should be redacted
const SECRET_KEYS: &[&str] = &["password", "token", "secret", "credential"];

impl EffectiveConfig {
    /// Resolve the host file and build.
    ///
    /// An explicitly named file must exist. The default location
    /// (`$STAGEHAND_CONFIG`, else `~/.config/stagehand/stagehand.toml`) is
    /// skipped when absent.
    pub fn load(explicit: Option<&Path>, cli_overrides: Option<Value>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::Io {
                        path: path.to_path_buf(),
                        source: io::Error::new(io::ErrorKind::NotFound, "config file not found"),
                    });
                }
                Self::build(Some(path), cli_overrides)
            }
            None => {
                let discovered = default_config_path();
                Self::build(discovered.as_deref(), cli_overrides)
            }
        }
    }

    /// Build from layers; a host path that does not exist is skipped.
    pub fn build(host_config_path: Option<&Path>, cli_overrides: Option<Value>) -> Result<Self, ConfigError> {
        let mut layers = Vec::new();
        let mut sources = Vec::new();

        layers.push(BuiltinDefaults::default().to_value());
        sources.push(ConfigSource {
            origin: ConfigOrigin::Builtin,
            path: None,
            digest: None,
        });

        if let Some(path) = host_config_path {
            if path.exists() {
                let (value, digest) = load_toml_file(path)?;
                layers.push(value);
                sources.push(ConfigSource {
                    origin: ConfigOrigin::Host,
                    path: Some(path.to_string_lossy().to_string()),
                    digest: Some(digest),
                });
            }
        }

        if let Some(cli) = cli_overrides {
            layers.push(cli);
            sources.push(ConfigSource {
                origin: ConfigOrigin::Cli,
                path: None,
                digest: None,
            });
        }

        let mut merged = merge_layers(layers);

        let typed: StagehandConfig = serde_json::from_value(merged.clone())
            .map_err(|e| ConfigError::Parse {
                path: None,
                message: e.to_string(),
            })?;
        typed.validate()?;

        let redactions = redact_secrets(&mut merged);

        Ok(Self {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            created_at: Utc::now(),
            config: merged,
            sources,
            redactions,
            typed,
        })
    }

    pub fn typed(&self) -> &StagehandConfig {
        &self.typed
    }

    pub fn into_typed(self) -> StagehandConfig {
        self.typed
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Get a config value by dot-separated path
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut current = &self.config;
        for part in path.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }
}

/// `$STAGEHAND_CONFIG`, else `~/.config/stagehand/stagehand.toml`
pub fn default_config_path() -> Option<PathBuf> {
    if let Some(path) = env::var_os(CONFIG_ENV) {
        return Some(PathBuf::from(path));
    }
    let home = env::var_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("stagehand")
            .join("stagehand.toml"),
    )
}

/// Load and parse a TOML file, returning the value and digest
fn load_toml_file(path: &Path) -> Result<(Value, String), ConfigError> {
    let bytes = fs::read(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let digest = hex::encode(hasher.finalize());

    let parse_error = |message: String| ConfigError::Parse {
        path: Some(path.to_path_buf()),
        message,
    };
    let contents = String::from_utf8(bytes).map_err(|e| parse_error(format!("invalid UTF-8: {}", e)))?;
    let toml_value: toml::Value = toml::from_str(&contents).map_err(|e| parse_error(e.to_string()))?;

    Ok((toml_to_json(toml_value), digest))
}

fn toml_to_json(toml: toml::Value) -> Value {
    match toml {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::Number(i.into()),
        toml::Value::Float(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(arr) => Value::Array(arr.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect(),
        ),
    }
}

/// Redact secrets in the config, returning list of redacted paths
fn redact_secrets(value: &mut Value) -> Vec<String> {
    let mut redactions = Vec::new();
    redact_recursive(value, String::new(), &mut redactions);
    redactions
}

fn redact_recursive(value: &mut Value, path: String, redactions: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                let key_lower = key.to_lowercase();
                let current_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", path, key)
                };

                let is_secret = SECRET_KEYS.iter().any(|s| key_lower.contains(s));
                if is_secret && !val.is_object() && !val.is_array() {
                    *val = Value::String("[REDACTED]".to_string());
                    redactions.push(current_path);
                } else {
                    redact_recursive(val, current_path, redactions);
                }
            }
        }
        Value::Array(arr) => {
            for (i, val) in arr.iter_mut().enumerate() {
                redact_recursive(val, format!("{}[{}]", path, i), redactions);
            }
        }
        _ => {}
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("parse error{}: {message}", .path.as_ref().map(|p| format!(" in {}", p.display())).unwrap_or_default())]
    Parse {
        path: Option<PathBuf>,
        message: String,
    },

    #[error("validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Rule(#[from] RetentionError),

    #[error(transparent)]
    Timeout(#[from] TimeoutValidationError),
}
