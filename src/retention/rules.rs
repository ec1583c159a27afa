//! Retention rules
//!
//! A rule selects WorkUnitDirectories by name glob, extracts an identifying
//! token from each name, and applies one deletion policy:
//!
//! - `tiered`: an ordered list of (predecessor, successor) glob pairs. The
//!   predecessor files go once at least one successor file exists.
//! - `marker_gated`: product subdirectories go once a completion marker
//!   exists in the WorkUnitDirectory.
//!
//! The literal `{id}` inside any glob is replaced by the extracted token.

use globset::{Glob, GlobMatcher};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use super::{RetentionError, RetentionResult};

/// Placeholder for the extracted token inside rule globs
pub const ID_PLACEHOLDER: &str = "{id}";

fn default_marker() -> String {
    "*.done".to_string()
}

/// One predecessor -> successor derivation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierPair {
    pub predecessor: String,
    pub successor: String,
}

impl TierPair {
    pub fn new(predecessor: impl Into<String>, successor: impl Into<String>) -> Self {
        Self {
            predecessor: predecessor.into(),
            successor: successor.into(),
        }
    }
}

/// Deletion eligibility policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeletionPolicy {
    /// Delete predecessor files once a successor file exists
    Tiered { tiers: Vec<TierPair> },
    /// Delete product subdirectories once a completion marker exists
    MarkerGated {
        #[serde(default = "default_marker")]
        marker: String,
        product_glob: String,
    },
}

/// Rule as written in configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    /// Pipeline kind, used in logs
    pub name: String,
    /// Glob over WorkUnitDirectory names, e.g. `insar-*`
    pub dir_glob: String,
    /// Regex extracting the token; uses the `id` group, else group 1, else
    /// the whole match
    pub id_pattern: String,
    #[serde(flatten)]
    pub policy: DeletionPolicy,
}

/// A validated rule ready to run
#[derive(Debug, Clone)]
pub struct RetentionRule {
    spec: RuleSpec,
    dir_matcher: GlobMatcher,
    id_regex: Regex,
}

impl RetentionRule {
    /// Validate every pattern in `spec`.
    pub fn compile(spec: RuleSpec) -> RetentionResult<Self> {
        let dir_matcher = compile_glob(&spec.name, &spec.dir_glob)?;
        let id_regex = Regex::new(&spec.id_pattern).map_err(|e| RetentionError::InvalidRule {
            rule: spec.name.clone(),
            reason: format!("id_pattern '{}': {}", spec.id_pattern, e),
        })?;

        match &spec.policy {
            DeletionPolicy::Tiered { tiers } => {
                if tiers.is_empty() {
                    return Err(RetentionError::InvalidRule {
                        rule: spec.name.clone(),
                        reason: "tiered rule has no tiers".to_string(),
                    });
                }
                for pair in tiers {
                    validate_template(&spec.name, &pair.predecessor)?;
                    validate_template(&spec.name, &pair.successor)?;
                    if pair.predecessor == pair.successor {
                        return Err(RetentionError::InvalidRule {
                            rule: spec.name.clone(),
                            reason: format!("tier '{}' is its own successor", pair.predecessor),
                        });
                    }
                }
            }
            DeletionPolicy::MarkerGated {
                marker,
                product_glob,
            } => {
                validate_template(&spec.name, marker)?;
                validate_template(&spec.name, product_glob)?;
            }
        }

        Ok(Self {
            spec,
            dir_matcher,
            id_regex,
        })
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &RuleSpec {
        &self.spec
    }

    pub fn policy(&self) -> &DeletionPolicy {
        &self.spec.policy
    }

    /// True when a directory name belongs to this rule's pipeline kind.
    pub fn matches_dir(&self, name: &str) -> bool {
        self.dir_matcher.is_match(name)
    }

    /// Extract the identifying token from a directory name.
    pub fn extract_id(&self, name: &str) -> Option<String> {
        let caps = self.id_regex.captures(name)?;
        let token = caps
            .name("id")
            .or_else(|| caps.get(1))
            .or_else(|| caps.get(0))?
            .as_str();
        if token.is_empty() {
            None
        } else {
            Some(token.to_string())
        }
    }

    /// Compile a rule glob for one WorkUnitDirectory.
    pub fn matcher_for(&self, template: &str, id: &str) -> RetentionResult<GlobMatcher> {
        let pattern = template.replace(ID_PLACEHOLDER, &globset::escape(id));
        compile_glob(&self.spec.name, &pattern)
    }
}

fn compile_glob(rule: &str, pattern: &str) -> RetentionResult<GlobMatcher> {
    Glob::new(pattern)
        .map(|g| g.compile_matcher())
        .map_err(|e| RetentionError::InvalidRule {
            rule: rule.to_string(),
            reason: format!("glob '{}': {}", pattern, e),
        })
}

fn validate_template(rule: &str, template: &str) -> RetentionResult<()> {
    compile_glob(rule, &template.replace(ID_PLACEHOLDER, "x")).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiered() -> RuleSpec {
        RuleSpec {
            name: "insar".to_string(),
            dir_glob: "insar-*".to_string(),
            id_pattern: r"^insar-(?P<id>S1[A-Z0-9_]+)$".to_string(),
            policy: DeletionPolicy::Tiered {
                tiers: vec![TierPair::new("*.h5", "*.slc")],
            },
        }
    }

    #[test]
    fn test_extract_named_group() {
        let rule = RetentionRule::compile(tiered()).unwrap();
        assert!(rule.matches_dir("insar-S1A_IW_001"));
        assert!(!rule.matches_dir("rtc-S1A_IW_001"));
        assert_eq!(rule.extract_id("insar-S1A_IW_001").as_deref(), Some("S1A_IW_001"));
        assert_eq!(rule.extract_id("insar-garbage"), None);
    }

    #[test]
    fn test_extract_falls_back_to_whole_match() {
        let spec = RuleSpec {
            id_pattern: r"^insar-\d+$".to_string(),
            ..tiered()
        };
        let rule = RetentionRule::compile(spec).unwrap();
        assert_eq!(rule.extract_id("insar-42").as_deref(), Some("insar-42"));
    }

    #[test]
    fn test_empty_tiers_rejected() {
        let spec = RuleSpec {
            policy: DeletionPolicy::Tiered { tiers: vec![] },
            ..tiered()
        };
        assert!(matches!(
            RetentionRule::compile(spec),
            Err(RetentionError::InvalidRule { .. })
        ));
    }

    #[test]
    fn test_bad_regex_rejected() {
        let spec = RuleSpec {
            id_pattern: "insar-(".to_string(),
            ..tiered()
        };
        assert!(RetentionRule::compile(spec).is_err());
    }

    #[test]
    fn test_bad_glob_rejected() {
        let spec = RuleSpec {
            policy: DeletionPolicy::Tiered {
                tiers: vec![TierPair::new("*.[h5", "*.slc")],
            },
            ..tiered()
        };
        assert!(RetentionRule::compile(spec).is_err());
    }

    #[test]
    fn test_id_substitution_is_escaped() {
        let spec = RuleSpec {
            name: "rtc".to_string(),
            dir_glob: "rtc-*".to_string(),
            id_pattern: r"^rtc-(.+)$".to_string(),
            policy: DeletionPolicy::MarkerGated {
                marker: default_marker(),
                product_glob: "{id}_RTC".to_string(),
            },
        };
        let rule = RetentionRule::compile(spec).unwrap();
        let m = rule.matcher_for("{id}_RTC", "S1[A]*").unwrap();
        assert!(m.is_match("S1[A]*_RTC"));
        assert!(!m.is_match("S1A_anything_RTC"));
    }

    #[test]
    fn test_policy_deserializes_from_tagged_table() {
        let value = serde_json::json!({
            "name": "rtc",
            "dir_glob": "rtc-*",
            "id_pattern": "^rtc-(.+)$",
            "kind": "marker_gated",
            "product_glob": "{id}"
        });
        let spec: RuleSpec = serde_json::from_value(value).unwrap();
        assert_eq!(
            spec.policy,
            DeletionPolicy::MarkerGated {
                marker: "*.done".to_string(),
                product_glob: "{id}".to_string(),
            }
        );
    }
}
