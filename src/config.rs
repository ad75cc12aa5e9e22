// src/config.rs
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use crate::rebase::batch::{DEFAULT_TIMESTAMP_COLUMN, DEFAULT_WORKERS};
use crate::rebase::{BatchOptions, OffsetPolicy};

/// Suffix appended to a site's source directory when no `dest` is given.
pub const DEFAULT_DEST_SUFFIX: &str = "_rebased";

/// A YAML file listing the sites to rebase in one run.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SitesConfig {
    #[serde(default = "default_timestamp_column")]
    pub timestamp_column: String,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub offset_policy: OffsetPolicy,
    pub sites: Vec<Site>,
}

/// An independent group of files that shares one offset per run.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Site {
    pub name: String,
    pub source: PathBuf,
    #[serde(default)]
    pub dest: Option<PathBuf>,
}

fn default_timestamp_column() -> String {
    DEFAULT_TIMESTAMP_COLUMN.to_string()
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

impl Site {
    /// `dest` if set, else `<source>_rebased` next to the source.
    pub fn dest_dir(&self) -> PathBuf {
        match &self.dest {
            Some(d) => d.clone(),
            None => default_dest(&self.source),
        }
    }
}

/// `<source>_rebased`, keeping the source's parent directory.
pub fn default_dest(source: &Path) -> PathBuf {
    let mut name: OsString = source
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("site"));
    name.push(DEFAULT_DEST_SUFFIX);
    source.with_file_name(name)
}

impl SitesConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading sites config {}", path.display()))?;
        let config: SitesConfig = serde_yaml::from_str(&text)
            .with_context(|| format!("parsing sites config {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid sites config {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.timestamp_column.trim().is_empty() {
            bail!("timestamp_column must not be empty");
        }
        if self.sites.is_empty() {
            bail!("no sites configured");
        }
        let mut seen = HashSet::new();
        for site in &self.sites {
            if site.name.trim().is_empty() {
                bail!("site with source {} has an empty name", site.source.display());
            }
            if !seen.insert(site.name.as_str()) {
                bail!("duplicate site name {:?}", site.name);
            }
            if site.dest_dir() == site.source {
                bail!("site {:?} writes into its own source directory", site.name);
            }
        }
        Ok(())
    }

    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            timestamp_column: self.timestamp_column.clone(),
            workers: self.workers,
            today: None,
            offset_policy: self.offset_policy,
        }
    }
}
