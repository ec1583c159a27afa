//! Retention pass execution
//!
//! A pass runs in two phases. `plan` enumerates every WorkUnitDirectory and
//! extracts its token, failing the whole pass on the first name that matches
//! a rule glob but not its id pattern. Only then does `collect_garbage`
//! visit each directory and apply its rule.
//!
//! Within one directory the tier pairs run in configured order, and each
//! pair re-checks its successors immediately before deleting predecessors.

use std::fs;
use std::path::{Path, PathBuf};

use globset::GlobMatcher;
use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::rules::{DeletionPolicy, RetentionRule};
use super::{RetentionError, RetentionResult};
use crate::signal::ShutdownSignal;

/// Number of numeric date-partition levels above each WorkUnitDirectory
const PARTITION_DEPTH: usize = 3;

/// Whether a pass deletes or only reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionMode {
    #[default]
    Delete,
    /// List candidates without deleting
    DryRun,
}

/// A WorkUnitDirectory selected by a rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkUnit {
    pub path: PathBuf,
    /// Index into the engine's rule list
    pub rule: usize,
    /// Token extracted from the directory name
    pub id: String,
}

/// Result of a retention pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GcReport {
    /// WorkUnitDirectories visited
    pub scanned: usize,
    /// Paths eligible for deletion (deleted unless dry-run)
    pub candidates: Vec<PathBuf>,
    /// Paths actually deleted
    pub deleted: usize,
    /// Bytes reclaimed (or reclaimable, in dry-run)
    pub bytes_reclaimed: u64,
    /// Errors encountered (non-fatal)
    pub errors: Vec<String>,
    pub dry_run: bool,
    /// The pass stopped early on a shutdown request
    pub interrupted: bool,
}

impl GcReport {
    fn record_error(&mut self, message: String) {
        warn!("{}", message);
        self.errors.push(message);
    }
}

/// Applies retention rules to a work tree
pub struct RetentionEngine {
    rules: Vec<RetentionRule>,
    mode: RetentionMode,
    shutdown: Option<ShutdownSignal>,
}

impl RetentionEngine {
    pub fn new(rules: Vec<RetentionRule>, mode: RetentionMode) -> Self {
        Self {
            rules,
            mode,
            shutdown: None,
        }
    }

    /// Stop between WorkUnitDirectories once `signal` is raised.
    pub fn with_shutdown(mut self, signal: ShutdownSignal) -> Self {
        self.shutdown = Some(signal);
        self
    }

    pub fn rules(&self) -> &[RetentionRule] {
        &self.rules
    }

    pub fn mode(&self) -> RetentionMode {
        self.mode
    }

    fn stop_requested(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|s| s.is_requested())
    }

    /// Run one pass over `root`.
    pub fn collect_garbage(&self, root: &Path) -> RetentionResult<GcReport> {
        let mut report = GcReport {
            dry_run: self.mode == RetentionMode::DryRun,
            ..Default::default()
        };

        let units = self.plan_into(root, &mut report)?;
        info!(
            root = %root.display(),
            units = units.len(),
            dry_run = report.dry_run,
            "retention pass starting"
        );

        for unit in &units {
            if self.stop_requested() {
                warn!(remaining = units.len() - report.scanned, "shutdown requested, stopping pass");
                report.interrupted = true;
                break;
            }

            report.scanned += 1;
            let rule = &self.rules[unit.rule];
            match rule.policy() {
                DeletionPolicy::Tiered { tiers } => {
                    for pair in tiers {
                        self.apply_tier(rule, unit, &pair.predecessor, &pair.successor, &mut report)?;
                    }
                }
                DeletionPolicy::MarkerGated {
                    marker,
                    product_glob,
                } => {
                    self.apply_marker_gate(rule, unit, marker, product_glob, &mut report)?;
                }
            }
        }

        info!(
            scanned = report.scanned,
            candidates = report.candidates.len(),
            deleted = report.deleted,
            bytes = report.bytes_reclaimed,
            errors = report.errors.len(),
            "retention pass finished"
        );
        Ok(report)
    }

    /// Enumerate and validate every WorkUnitDirectory under `root`.
    pub fn plan(&self, root: &Path) -> RetentionResult<Vec<WorkUnit>> {
        let mut scratch = GcReport::default();
        self.plan_into(root, &mut scratch)
    }

    fn plan_into(&self, root: &Path, report: &mut GcReport) -> RetentionResult<Vec<WorkUnit>> {
        let root_entries = list_dir(root).map_err(|source| RetentionError::Enumerate {
            path: root.to_path_buf(),
            source,
        })?;

        let mut partitions: Vec<PathBuf> = root_entries
            .into_iter()
            .filter(|(name, is_dir)| *is_dir && is_partition(name))
            .map(|(name, _)| root.join(name))
            .collect();

        for _ in 1..PARTITION_DEPTH {
            let mut next = Vec::new();
            for dir in &partitions {
                match list_dir(dir) {
                    Ok(entries) => next.extend(
                        entries
                            .into_iter()
                            .filter(|(name, is_dir)| *is_dir && is_partition(name))
                            .map(|(name, _)| dir.join(name)),
                    ),
                    Err(e) => report.record_error(format!("cannot list {}: {}", dir.display(), e)),
                }
            }
            partitions = next;
        }

        let mut units = Vec::new();
        for day in &partitions {
            let entries = match list_dir(day) {
                Ok(entries) => entries,
                Err(e) => {
                    report.record_error(format!("cannot list {}: {}", day.display(), e));
                    continue;
                }
            };

            for (name, is_dir) in entries {
                if !is_dir {
                    continue;
                }
                for (index, rule) in self.rules.iter().enumerate() {
                    if !rule.matches_dir(&name) {
                        continue;
                    }
                    let path = day.join(&name);
                    let id = rule.extract_id(&name).ok_or_else(|| {
                        RetentionError::ConfigurationIntegrity {
                            path: path.clone(),
                            rule: rule.name().to_string(),
                            pattern: rule.spec().id_pattern.clone(),
                        }
                    })?;
                    units.push(WorkUnit {
                        path,
                        rule: index,
                        id,
                    });
                }
            }
        }

        Ok(units)
    }

    fn apply_tier(
        &self,
        rule: &RetentionRule,
        unit: &WorkUnit,
        predecessor: &str,
        successor: &str,
        report: &mut GcReport,
    ) -> RetentionResult<()> {
        let successor_matcher = rule.matcher_for(successor, &unit.id)?;
        let predecessor_matcher = rule.matcher_for(predecessor, &unit.id)?;

        let entries = match list_dir(&unit.path) {
            Ok(entries) => entries,
            Err(e) => {
                report.record_error(format!("cannot list {}: {}", unit.path.display(), e));
                return Ok(());
            }
        };

        let successors = matching(&entries, &successor_matcher, false);
        if successors.is_empty() {
            debug!(dir = %unit.path.display(), successor, "no successor yet, keeping predecessors");
            return Ok(());
        }

        for name in matching(&entries, &predecessor_matcher, false) {
            // Never treat the successor evidence itself as deletable.
            if successor_matcher.is_match(&name) {
                continue;
            }
            let path = unit.path.join(&name);
            let size = fs::symlink_metadata(&path).map(|m| m.len()).unwrap_or(0);
            self.delete(rule, &path, size, false, report);
        }

        Ok(())
    }

    fn apply_marker_gate(
        &self,
        rule: &RetentionRule,
        unit: &WorkUnit,
        marker: &str,
        product_glob: &str,
        report: &mut GcReport,
    ) -> RetentionResult<()> {
        let marker_matcher = rule.matcher_for(marker, &unit.id)?;
        let product_matcher = rule.matcher_for(product_glob, &unit.id)?;

        let entries = match list_dir(&unit.path) {
            Ok(entries) => entries,
            Err(e) => {
                report.record_error(format!("cannot list {}: {}", unit.path.display(), e));
                return Ok(());
            }
        };

        if matching(&entries, &marker_matcher, false).is_empty() {
            debug!(dir = %unit.path.display(), marker, "no completion marker, keeping products");
            return Ok(());
        }

        for name in matching(&entries, &product_matcher, true) {
            let path = unit.path.join(&name);
            self.delete(rule, &path, dir_size(&path), true, report);
        }

        Ok(())
    }

    fn delete(&self, rule: &RetentionRule, path: &Path, size: u64, is_dir: bool, report: &mut GcReport) {
        report.candidates.push(path.to_path_buf());

        if self.mode == RetentionMode::DryRun {
            info!(rule = rule.name(), path = %path.display(), bytes = size, "dry-run: would delete");
            report.bytes_reclaimed += size;
            return;
        }

        let result = if is_dir {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };

        match result {
            Ok(()) => {
                info!(rule = rule.name(), path = %path.display(), bytes = size, "deleted");
                report.deleted += 1;
                report.bytes_reclaimed += size;
            }
            Err(e) => report.record_error(format!("failed to delete {}: {}", path.display(), e)),
        }
    }
}

/// Directory entries as (name, is_dir), sorted by name. Non-UTF-8 names are
/// skipped: no rule glob can select them.
fn list_dir(dir: &Path) -> std::io::Result<Vec<(String, bool)>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let Ok(name) = entry.file_name().into_string() else {
            debug!(dir = %dir.display(), "skipping non-UTF-8 entry");
            continue;
        };
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        entries.push((name, is_dir));
    }
    entries.sort();
    Ok(entries)
}

fn matching(entries: &[(String, bool)], matcher: &GlobMatcher, want_dirs: bool) -> Vec<String> {
    entries
        .iter()
        .filter(|(name, is_dir)| *is_dir == want_dirs && matcher.is_match(name))
        .map(|(name, _)| name.clone())
        .collect()
}

fn is_partition(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit())
}

/// Calculate directory size recursively.
fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retention::{RuleSpec, TierPair};
    use tempfile::TempDir;

    fn insar_rule() -> RetentionRule {
        RetentionRule::compile(RuleSpec {
            name: "insar".to_string(),
            dir_glob: "insar-*".to_string(),
            id_pattern: r"^insar-(S1\w+)$".to_string(),
            policy: DeletionPolicy::Tiered {
                tiers: vec![TierPair::new("*.h5", "*.slc")],
            },
        })
        .unwrap()
    }

    fn make_unit(root: &Path, name: &str, files: &[&str]) -> PathBuf {
        let dir = root.join("2024").join("03").join("07").join(name);
        fs::create_dir_all(&dir).unwrap();
        for f in files {
            fs::write(dir.join(f), b"data").unwrap();
        }
        dir
    }

    #[test]
    fn test_is_partition() {
        assert!(is_partition("2024"));
        assert!(is_partition("07"));
        assert!(!is_partition("lost+found"));
        assert!(!is_partition(""));
    }

    #[test]
    fn test_plan_finds_units_at_depth_four() {
        let temp = TempDir::new().unwrap();
        make_unit(temp.path(), "insar-S1A_001", &[]);
        make_unit(temp.path(), "rtc-S1A_001", &[]);
        fs::create_dir_all(temp.path().join("scratch").join("insar-S1A_999")).unwrap();

        let engine = RetentionEngine::new(vec![insar_rule()], RetentionMode::Delete);
        let units = engine.plan(temp.path()).unwrap();

        assert_eq!(units.len(), 1);
        assert_eq!(units[0].id, "S1A_001");
        assert!(units[0].path.ends_with("2024/03/07/insar-S1A_001"));
    }

    #[test]
    fn test_missing_root_is_fatal() {
        let temp = TempDir::new().unwrap();
        let engine = RetentionEngine::new(vec![insar_rule()], RetentionMode::Delete);
        let err = engine.collect_garbage(&temp.path().join("absent")).unwrap_err();
        assert!(matches!(err, RetentionError::Enumerate { .. }));
    }

    #[test]
    fn test_successor_matching_predecessor_glob_is_kept() {
        let temp = TempDir::new().unwrap();
        let rule = RetentionRule::compile(RuleSpec {
            name: "wide".to_string(),
            dir_glob: "insar-*".to_string(),
            id_pattern: r"^insar-(.+)$".to_string(),
            policy: DeletionPolicy::Tiered {
                tiers: vec![TierPair::new("*", "*.slc")],
            },
        })
        .unwrap();
        let dir = make_unit(temp.path(), "insar-S1A_002", &["a.h5", "c.slc"]);

        let engine = RetentionEngine::new(vec![rule], RetentionMode::Delete);
        let report = engine.collect_garbage(temp.path()).unwrap();

        assert_eq!(report.deleted, 1);
        assert!(!dir.join("a.h5").exists());
        assert!(dir.join("c.slc").exists());
    }

    #[test]
    fn test_shutdown_interrupts_pass() {
        let temp = TempDir::new().unwrap();
        let dir = make_unit(temp.path(), "insar-S1A_003", &["a.h5", "c.slc"]);

        let signal = ShutdownSignal::new();
        signal.request();
        let engine = RetentionEngine::new(vec![insar_rule()], RetentionMode::Delete).with_shutdown(signal);
        let report = engine.collect_garbage(temp.path()).unwrap();

        assert!(report.interrupted);
        assert_eq!(report.scanned, 0);
        assert!(dir.join("a.h5").exists());
    }

    #[test]
    fn test_dry_run_counts_bytes() {
        let temp = TempDir::new().unwrap();
        make_unit(temp.path(), "insar-S1A_004", &["a.h5", "b.h5", "c.slc"]);

        let engine = RetentionEngine::new(vec![insar_rule()], RetentionMode::DryRun);
        let report = engine.collect_garbage(temp.path()).unwrap();

        assert!(report.dry_run);
        assert_eq!(report.deleted, 0);
        assert_eq!(report.candidates.len(), 2);
        assert_eq!(report.bytes_reclaimed, 8);
    }
}
