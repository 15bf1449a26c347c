//! Channel classification lookup with hot reload.
//!
//! [`ClassificationResolver`] serves `channel_id -> (name, code)` lookups
//! from an in-memory [`RuleTable`]. Before each lookup it compares the rule
//! file's modification time with the one the table was loaded from and, on
//! change, loads a fresh table and swaps it in whole.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::rules_file::{ClassificationRule, RuleTable, RulesFile};
use crate::errors::ConfigError;

/// The result of a lookup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Classification {
    /// Written as `classfyname`.
    pub name: String,
    /// Written as `classfy`.
    pub code: String,
}

impl From<&ClassificationRule> for Classification {
    fn from(rule: &ClassificationRule) -> Self {
        Self {
            name: rule.classfyname.clone(),
            code: rule.classfy.clone(),
        }
    }
}

/// Summary counts over the loaded rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuleStatistics {
    pub total_rules: usize,
    pub unique_codes: usize,
    pub unique_names: usize,
}

/// Channel classification resolver.
///
/// Thread-safe: readers clone an `Arc` to the current table under a short
/// read lock, and every change (reload, add, remove) builds a new table and
/// replaces the `Arc` under the write lock, so a reader sees either the old
/// table or the new one. At most one hot reload runs at a time; callers that
/// arrive during a reload are served from the current table.
pub struct ClassificationResolver {
    table: RwLock<Arc<RuleTable>>,
    /// Backing rule file (absent for in-memory tables).
    rules_file_path: Option<PathBuf>,
    /// Set while a hot reload is reading the rule file.
    reloading: AtomicBool,
    /// Modification time of a rule file that failed to load, so a broken
    /// file is not re-read on every lookup.
    failed_marker: Mutex<Option<SystemTime>>,
}

impl ClassificationResolver {
    /// Load the rule file at `path` and build a resolver backed by it.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "initializing classification resolver");
        let table = RulesFile::load(path)?;
        Ok(Self::build(table, Some(path.to_path_buf())))
    }

    /// A resolver over a fixed table with no backing file.
    pub fn in_memory(table: RuleTable) -> Self {
        Self::build(table, None)
    }

    fn build(table: RuleTable, rules_file_path: Option<PathBuf>) -> Self {
        Self {
            table: RwLock::new(Arc::new(table)),
            rules_file_path,
            reloading: AtomicBool::new(false),
            failed_marker: Mutex::new(None),
        }
    }

    pub fn rules_file_path(&self) -> Option<&Path> {
        self.rules_file_path.as_deref()
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    /// Resolve a channel id. Never fails: unknown channels get the default.
    pub fn resolve(&self, channel_id: &str) -> Classification {
        Classification::from(&self.rule(channel_id))
    }

    /// The rule that applies to `channel_id`, the default included.
    pub fn rule(&self, channel_id: &str) -> ClassificationRule {
        self.check_reload();
        let table = self.snapshot();
        match table.rules.get(channel_id.trim()) {
            Some(rule) => rule.clone(),
            None => {
                debug!(channel_id, "no classification rule, using default");
                table.default_rule.clone()
            }
        }
    }

    pub fn default_rule(&self) -> ClassificationRule {
        self.snapshot().default_rule.clone()
    }

    /// All explicit rules, ordered by channel id.
    pub fn rules(&self) -> Vec<ClassificationRule> {
        self.check_reload();
        self.snapshot().rules.values().cloned().collect()
    }

    pub fn channel_ids(&self) -> Vec<String> {
        self.check_reload();
        self.snapshot().rules.keys().cloned().collect()
    }

    pub fn statistics(&self) -> RuleStatistics {
        let table = self.snapshot();
        RuleStatistics {
            total_rules: table.rules.len(),
            unique_codes: table
                .rules
                .values()
                .map(|r| r.classfy.as_str())
                .collect::<HashSet<_>>()
                .len(),
            unique_names: table
                .rules
                .values()
                .map(|r| r.classfyname.as_str())
                .collect::<HashSet<_>>()
                .len(),
        }
    }

    /// Check that the default and every rule carry a name and a code.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let table = self.snapshot();
        let default = &table.default_rule;
        if default.classfyname.trim().is_empty() || default.classfy.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "default".into(),
                detail: "default classification must have classfyname and classfy".into(),
            });
        }
        for (channel_id, rule) in &table.rules {
            if rule.classfyname.trim().is_empty() || rule.classfy.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: format!("classification_rules.{channel_id}"),
                    detail: "rule must have classfyname and classfy".into(),
                });
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Add or replace a rule in memory. Call [`save`](Self::save) to persist.
    pub fn add_rule(&self, channel_id: &str, classfyname: &str, classfy: &str) {
        let channel_id = channel_id.trim().to_string();
        info!(%channel_id, classfyname, classfy, "adding classification rule");
        self.update(|table| {
            table.rules.insert(
                channel_id.clone(),
                ClassificationRule {
                    channel_id: channel_id.clone(),
                    classfyname: classfyname.to_string(),
                    classfy: classfy.to_string(),
                },
            );
        });
    }

    /// Remove a rule in memory. Returns whether a rule was removed.
    pub fn remove_rule(&self, channel_id: &str) -> bool {
        let mut removed = false;
        self.update(|table| {
            removed = table.rules.remove(channel_id.trim()).is_some();
        });
        if removed {
            info!(channel_id, "removed classification rule");
        }
        removed
    }

    /// Write the current table to the rule file.
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = self.require_path()?;
        let mut guard = self.table.write().unwrap_or_else(PoisonError::into_inner);
        let modified = RulesFile::save(path, &guard)?;
        let mut next = RuleTable::clone(&guard);
        next.modified = modified;
        *guard = Arc::new(next);
        Ok(())
    }

    /// Force a reload from the rule file, surfacing any error.
    pub fn reload(&self) -> Result<(), ConfigError> {
        let path = self.require_path()?;
        let table = RulesFile::load(path)?;
        self.swap(table);
        info!("classification rules reloaded");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn snapshot(&self) -> Arc<RuleTable> {
        Arc::clone(&self.table.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn swap(&self, table: RuleTable) {
        let mut guard = self.table.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(table);
    }

    fn update(&self, apply: impl FnOnce(&mut RuleTable)) {
        let mut guard = self.table.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = RuleTable::clone(&guard);
        apply(&mut next);
        *guard = Arc::new(next);
    }

    fn require_path(&self) -> Result<&Path, ConfigError> {
        self.rules_file_path
            .as_deref()
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "classification.rules_file".into(),
                detail: "resolver has no backing rule file".into(),
            })
    }

    /// Reload the table if the rule file changed. Failures are logged and
    /// the previous table stays in service.
    fn check_reload(&self) {
        let Some(path) = self.rules_file_path.as_deref() else {
            return;
        };

        if self
            .reloading
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("classification reload in progress, serving current table");
            return;
        }
        let _guard = ReloadGuard(&self.reloading);

        let current = match std::fs::metadata(path).and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "cannot stat classification rules");
                return;
            }
        };
        if self.snapshot().modified == Some(current) {
            return;
        }
        let mut failed = self
            .failed_marker
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *failed == Some(current) {
            return;
        }

        match RulesFile::load(path) {
            Ok(table) => {
                self.swap(table);
                *failed = None;
                info!(path = %path.display(), "classification rules changed, reloaded");
            }
            Err(e) => {
                *failed = Some(current);
                warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to reload classification rules, keeping previous table"
                );
            }
        }
    }
}

/// Clears the reload flag on drop.
struct ReloadGuard<'a>(&'a AtomicBool);

impl Drop for ReloadGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
