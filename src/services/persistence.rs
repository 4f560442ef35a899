use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;

use crate::services::export::{InterchangeRecord, decode_records, encode_records};
use crate::state::{RuleSet, RuleSetRecords};

/// Bulk storage for a rule set.
///
/// Both operations are all-or-nothing from the caller's point of view: a load
/// yields a complete snapshot and a save replaces the previous one.
#[cfg_attr(test, mockall::automock)]
pub trait RuleStore {
    fn load_all(&self) -> Result<RuleSetRecords>;
    fn save_all(&self, records: &RuleSetRecords) -> Result<()>;
}

/// Rule store backed by a single YAML interchange file.
#[derive(Debug, Clone)]
pub struct YamlRuleStore {
    path: Utf8PathBuf,
}

impl YamlRuleStore {
    pub fn new<P: AsRef<Utf8Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

impl RuleStore for YamlRuleStore {
    /// A missing file is an empty rule set.
    fn load_all(&self) -> Result<RuleSetRecords> {
        if !self.path.exists() {
            tracing::warn!("Rule set file not found at {}, starting empty", self.path);
            return Ok(RuleSetRecords::default());
        }

        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read rule set: {}", self.path))?;
        if contents.trim().is_empty() {
            return Ok(RuleSetRecords::default());
        }

        let records: Vec<InterchangeRecord> = serde_yaml_ng::from_str(&contents)
            .with_context(|| format!("Failed to parse rule set: {}", self.path))?;
        let records = decode_records(records)
            .with_context(|| format!("Corrupt rule set file: {}", self.path))?;

        tracing::info!(
            "Loaded {} mods and {} rules from {}",
            records.mods.len(),
            records.rules.len(),
            self.path
        );
        Ok(records)
    }

    /// Writes to a sibling temporary file first, then renames over the target.
    fn save_all(&self, records: &RuleSetRecords) -> Result<()> {
        let yaml_string = serde_yaml_ng::to_string(&encode_records(records))
            .context("Failed to serialize rule set to YAML")?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {}", parent))?;
            }
        }

        let temp_path = self.path.with_extension("yaml.tmp");
        fs::write(&temp_path, yaml_string)
            .with_context(|| format!("Failed to write rule set: {}", temp_path))?;
        fs::rename(&temp_path, &self.path)
            .with_context(|| format!("Failed to replace rule set: {}", self.path))?;

        tracing::info!(
            "Saved {} mods and {} rules to {}",
            records.mods.len(),
            records.rules.len(),
            self.path
        );
        Ok(())
    }
}

/// Load a rule set, replaying every stored rule through the validator.
pub fn load_rule_set(store: &dyn RuleStore) -> Result<RuleSet> {
    let records = store.load_all()?;
    let rule_set = RuleSet::from_records(records).context("Stored rule set is inconsistent")?;
    Ok(rule_set)
}

pub fn save_rule_set(store: &dyn RuleStore, rule_set: &RuleSet) -> Result<()> {
    store.save_all(&rule_set.to_records())
}
