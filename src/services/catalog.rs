//! Mod metadata lookup.
//!
//! [`MetadataLookup`] is the seam for anything that can describe a mod by
//! name: a local data directory, a remote index. [`resolve_mod`] turns a lookup
//! result into a stored mod.

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use std::future::Future;
use thiserror::Error;

use crate::diagnostics::RuleError;
use crate::models::{ModId, ModSource};
use crate::state::RuleSet;

/// What a lookup knows about a mod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModDescriptor {
    pub name: String,
    pub hash: Option<String>,
    pub source: ModSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    Found(ModDescriptor),
    NotFound,
    /// The source could not be reached; retrying later may succeed
    TransientFailure(String),
}

pub trait MetadataLookup {
    fn lookup_mod(&self, identifier: &str) -> impl Future<Output = LookupOutcome> + Send;
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CatalogError {
    #[error("Metadata lookup failed: {0}")]
    Transient(String),

    #[error(transparent)]
    Store(#[from] RuleError),
}

/// Look `identifier` up and upsert the result.
///
/// Returns `Ok(None)` when the lookup has never heard of the mod; that case is
/// logged as a warning and leaves the rule set untouched.
pub async fn resolve_mod<L: MetadataLookup>(
    lookup: &L,
    rule_set: &mut RuleSet,
    identifier: &str,
) -> Result<Option<ModId>, CatalogError> {
    match lookup.lookup_mod(identifier).await {
        LookupOutcome::Found(descriptor) => {
            let id = rule_set.upsert_mod(&descriptor.name, descriptor.hash.as_deref(), descriptor.source)?;
            Ok(Some(id))
        }
        LookupOutcome::NotFound => {
            tracing::warn!("Mod not found by metadata lookup: {}", identifier);
            Ok(None)
        }
        LookupOutcome::TransientFailure(reason) => {
            tracing::warn!("Metadata lookup for {} failed: {}", identifier, reason);
            Err(CatalogError::Transient(reason))
        }
    }
}

/// Finds plugins in a game's data directory, matching names caselessly.
#[derive(Debug, Clone)]
pub struct DataDirCatalog {
    data_dir: Utf8PathBuf,
    plugin_pattern: Regex,
}

impl DataDirCatalog {
    pub fn new<P: AsRef<Utf8Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            plugin_pattern: Regex::new(r"(?i)\.(esp|esm|esl|omwaddon)$").expect("Invalid regex"),
        }
    }

    pub fn data_dir(&self) -> &Utf8Path {
        &self.data_dir
    }

    pub fn is_plugin(&self, file_name: &str) -> bool {
        self.plugin_pattern.is_match(file_name)
    }

    /// Plugin file names in the data directory, sorted caselessly.
    pub async fn list_plugins(&self) -> Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.data_dir)
            .await
            .with_context(|| format!("Failed to read data directory: {}", self.data_dir))?;

        let mut plugins = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if self.is_plugin(name) {
                    plugins.push(name.to_string());
                }
            }
        }

        plugins.sort_by_key(|name| name.to_lowercase());
        tracing::debug!("Found {} plugins in {}", plugins.len(), self.data_dir);
        Ok(plugins)
    }
}

impl MetadataLookup for DataDirCatalog {
    async fn lookup_mod(&self, identifier: &str) -> LookupOutcome {
        let wanted = identifier.trim();
        if !self.is_plugin(wanted) {
            return LookupOutcome::NotFound;
        }

        match self.list_plugins().await {
            Ok(plugins) => plugins
                .into_iter()
                .find(|name| name.eq_ignore_ascii_case(wanted))
                .map(|name| {
                    LookupOutcome::Found(ModDescriptor {
                        name,
                        hash: None,
                        source: ModSource::Local,
                    })
                })
                .unwrap_or(LookupOutcome::NotFound),
            Err(e) => LookupOutcome::TransientFailure(format!("{:#}", e)),
        }
    }
}
