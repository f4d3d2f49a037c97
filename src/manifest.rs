//! Durable job state.
//!
//! The manifest is rewritten after every single-item transition. Writes go to
//! a sibling `*.json.tmp` file which is then renamed over the live path, so a
//! reader sees either the old or the new document and a killed process loses
//! at most the item it was working on.
//!
//! A manifest that fails to parse is renamed aside to
//! `*.json.corrupt.<timestamp>` and replaced with an empty one: corruption
//! never blocks a backup run, and earlier quarantined copies are kept. A
//! manifest written by a newer schema is the one load failure that stops the
//! run, since starting fresh would overwrite it.

use anyhow::{Context, Result};
use chrono::Utc;
use std::fs::File;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::BackupError;
use crate::models::{Manifest, StatusUpdate, TabRecord, MANIFEST_VERSION};

/// Load and save a manifest at a fixed path.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    path: PathBuf,
    output_root: Option<PathBuf>,
}

impl ManifestStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            output_root: None,
        }
    }

    /// The store for the configured manifest, migrating legacy paths against
    /// the configured output directory.
    pub fn for_config(config: &Config) -> Self {
        Self::new(&config.paths.manifest).with_output_root(&config.paths.output_dir)
    }

    /// Output root that legacy `local_path` values are rewritten against
    /// when an older manifest is loaded.
    pub fn with_output_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.output_root = Some(root.into());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Temporary path used while saving.
    pub fn temp_path(&self) -> PathBuf {
        self.path.with_extension("json.tmp")
    }

    /// Where an unparseable manifest is moved: a timestamped sibling that
    /// does not exist yet.
    pub fn quarantine_path(&self) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S");
        let base = self.path.with_extension(format!("json.corrupt.{}", stamp));
        let mut candidate = base.clone();
        let mut n = 1;
        while candidate.exists() {
            let mut name = base.clone().into_os_string();
            name.push(format!("-{}", n));
            candidate = PathBuf::from(name);
            n += 1;
        }
        candidate
    }

    /// Return the persisted manifest, or an empty one if there is none.
    pub fn load(&self) -> Result<Manifest> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Manifest::new()),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read manifest: {}", self.path.display())
                })
            }
        };

        let mut manifest: Manifest = match serde_json::from_slice(&bytes) {
            Ok(m) => m,
            Err(e) => {
                let quarantine = self.quarantine_path();
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Manifest corrupted, starting fresh. Old manifest moved to {}",
                    quarantine.display()
                );
                std::fs::rename(&self.path, &quarantine).with_context(|| {
                    format!("Failed to quarantine manifest to {}", quarantine.display())
                })?;
                return Ok(Manifest::new());
            }
        };

        if manifest.version > MANIFEST_VERSION {
            return Err(BackupError::ManifestVersion {
                found: manifest.version,
                supported: MANIFEST_VERSION,
            }
            .into());
        }
        if manifest.version < MANIFEST_VERSION {
            info!(
                from = manifest.version,
                to = MANIFEST_VERSION,
                "Migrating manifest schema"
            );
            manifest.version = MANIFEST_VERSION;
            if let Some(root) = &self.output_root {
                let moved = manifest.relocate_legacy_paths(root);
                if moved > 0 {
                    info!(count = moved, "Rewrote legacy local paths relative to output root");
                }
            }
        }

        Ok(manifest)
    }

    /// Persist atomically: write a temp file, flush it to disk, rename.
    pub fn save(&self, manifest: &Manifest) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create manifest directory: {}", parent.display())
                })?;
            }
        }

        let json = serde_json::to_vec_pretty(manifest)?;
        let tmp = self.temp_path();
        let result = (|| -> Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()?;
            std::fs::rename(&tmp, &self.path)?;
            Ok(())
        })();

        if let Err(e) = result {
            let _ = std::fs::remove_file(&tmp);
            return Err(e).with_context(|| {
                format!("Failed to save manifest: {}", self.path.display())
            });
        }
        Ok(())
    }

    /// Single mutation entry point: merge a transition into the record for
    /// `url` and persist the whole manifest before returning.
    pub fn update_status(
        &self,
        manifest: &mut Manifest,
        url: &str,
        update: StatusUpdate,
    ) -> Result<TabRecord> {
        let record = manifest.apply(url, update, Utc::now()).clone();
        self.save(manifest)?;
        Ok(record)
    }
}
