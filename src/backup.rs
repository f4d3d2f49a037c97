//! Backup orchestration.
//!
//! Drives the discovery list against the manifest and a [`Fetcher`]: selects
//! work by mode, processes one tab at a time in list order, records every
//! outcome in the manifest before moving on, and paces requests with
//! jittered delays, batch pauses and exponential backoff after failures.
//! The fetch session is rotated every `fetcher.rotation_size` items; a
//! failed rotation rebuilds the fetcher instead of aborting the run.

use anyhow::Result;
use chrono::Utc;
use std::fmt;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::{Config, PacingConfig};
use crate::discovery::load_tab_entries;
use crate::error::BackupError;
use crate::fetcher::Fetcher;
use crate::fetcher_process::ProcessFetcher;
use crate::manifest::ManifestStore;
use crate::models::{Manifest, StatusUpdate, TabEntry, TabStatus};
use crate::pacing::{backoff_delay, jittered_delay, Pause, PauseKind, TokioPause};
use crate::progress::{ProgressEvent, ProgressMode, ProgressReporter};
use crate::writer::{TabWriter, UrlPolicy, WrittenTab};

/// Which tabs a run considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupMode {
    /// Everything not yet `completed`.
    Backup,
    /// Only URLs the manifest has never seen.
    Sync,
    /// Only `failed` tabs.
    Retry,
}

impl fmt::Display for BackupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackupMode::Backup => "backup",
            BackupMode::Sync => "sync",
            BackupMode::Retry => "retry",
        })
    }
}

/// Filter the discovery list for a mode, preserving order.
pub fn select_work<'a>(
    entries: &'a [TabEntry],
    manifest: &Manifest,
    mode: BackupMode,
) -> Vec<&'a TabEntry> {
    entries
        .iter()
        .filter(|e| match mode {
            BackupMode::Backup => manifest.status_of(&e.url) != TabStatus::Completed,
            BackupMode::Sync => !manifest.contains(&e.url),
            BackupMode::Retry => manifest.status_of(&e.url) == TabStatus::Failed,
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Success,
    Failed,
    /// Already `completed` when reached.
    Skipped,
    /// Rejected by the URL allow-list; never fetched, never recorded.
    Rejected,
}

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupSummary {
    pub selected: usize,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub rejected: usize,
    pub rotations: usize,
    pub rebuilds: usize,
}

impl BackupSummary {
    fn record(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Success => self.success += 1,
            ItemOutcome::Failed => self.failed += 1,
            ItemOutcome::Skipped => self.skipped += 1,
            ItemOutcome::Rejected => {
                self.failed += 1;
                self.rejected += 1;
            }
        }
    }

    pub fn print(&self) {
        println!("{}", "=".repeat(60));
        println!("BACKUP COMPLETE");
        println!("  Success: {}", self.success);
        println!("  Failed:  {}", self.failed);
        println!("  Skipped: {}", self.skipped);
        if self.rejected > 0 {
            println!("  (of failed, rejected URLs: {})", self.rejected);
        }
        println!("{}", "=".repeat(60));
    }
}

/// Knobs for a run, resolved from [`Config`].
#[derive(Debug, Clone)]
pub struct BackupSettings {
    pub pacing: PacingConfig,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub rotation_size: usize,
}

impl BackupSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            pacing: config.pacing.clone(),
            max_retries: config.retry.max_retries,
            backoff_base: config.retry.backoff_base(),
            rotation_size: config.fetcher.rotation_size.max(1),
        }
    }
}

/// Processes tabs one at a time against a manifest store.
pub struct BackupRunner<'a> {
    store: ManifestStore,
    writer: TabWriter,
    policy: UrlPolicy,
    settings: BackupSettings,
    pause: &'a dyn Pause,
    progress: &'a dyn ProgressReporter,
}

impl<'a> BackupRunner<'a> {
    pub fn new(
        config: &Config,
        pause: &'a dyn Pause,
        progress: &'a dyn ProgressReporter,
    ) -> Self {
        Self {
            store: ManifestStore::for_config(config),
            writer: TabWriter::new(&config.paths.output_dir),
            policy: UrlPolicy::new(config.source.clone()),
            settings: BackupSettings::from_config(config),
            pause,
            progress,
        }
    }

    pub fn store(&self) -> &ManifestStore {
        &self.store
    }

    /// Run one pass over the selected tabs.
    ///
    /// Per-tab failures are recorded in the manifest and never returned;
    /// only a failure to persist the manifest itself aborts the run.
    pub async fn run(
        &self,
        entries: &[TabEntry],
        manifest: &mut Manifest,
        mode: BackupMode,
        fetcher: &mut dyn Fetcher,
    ) -> Result<BackupSummary> {
        let work = select_work(entries, manifest, mode);
        let mut summary = BackupSummary {
            selected: work.len(),
            ..BackupSummary::default()
        };

        if work.is_empty() {
            info!(%mode, "No tabs to process!");
            return Ok(summary);
        }

        info!(%mode, count = work.len(), "Processing tabs");
        let total = work.len();
        let mut since_rotation = 0usize;

        for (i, entry) in work.into_iter().enumerate() {
            let n = i + 1;
            self.progress.report(ProgressEvent::Backing {
                n: n as u64,
                total: total as u64,
                label: format!("{} - {}", entry.band_name, entry.song_name),
            });

            let outcome = self.backup_one(entry, manifest, fetcher).await?;
            summary.record(outcome);

            since_rotation += 1;
            if since_rotation >= self.settings.rotation_size {
                self.rotate(fetcher, &mut summary).await;
                since_rotation = 0;
            }

            if n < total {
                if n % self.settings.pacing.batch_size == 0 {
                    self.pause
                        .pause(PauseKind::Batch, self.settings.pacing.batch_pause())
                        .await;
                }
                let delay = jittered_delay(&self.settings.pacing, &mut rand::thread_rng());
                self.pause.pause(PauseKind::Between, delay).await;
            }
        }

        if let Err(e) = fetcher.close().await {
            warn!(error = %e, "Failed to close fetcher cleanly");
        }

        manifest.last_sync = Some(Utc::now());
        self.store.save(manifest)?;
        Ok(summary)
    }

    async fn backup_one(
        &self,
        entry: &TabEntry,
        manifest: &mut Manifest,
        fetcher: &mut dyn Fetcher,
    ) -> Result<ItemOutcome> {
        let url = match self.policy.check(&entry.url) {
            Ok(url) => url,
            Err(e) => {
                error!(url = %entry.url, error = %e, "Invalid URL rejected");
                return Ok(ItemOutcome::Rejected);
            }
        };

        if manifest.status_of(&entry.url) == TabStatus::Completed {
            return Ok(ItemOutcome::Skipped);
        }

        info!("Backing up: {} - {}", entry.band_name, entry.song_name);

        match self.fetch_and_write(entry, &url, fetcher).await {
            Ok(written) => {
                self.store.update_status(
                    manifest,
                    &entry.url,
                    StatusUpdate::Completed {
                        local_path: written.relative_path,
                        file_hash: written.file_hash,
                        file_size: written.file_size,
                        artist: entry.band_name.clone(),
                        song: entry.song_name.clone(),
                    },
                )?;
                info!(path = %written.path.display(), "  Saved");
                Ok(ItemOutcome::Success)
            }
            Err(e) => {
                let record = self.store.update_status(
                    manifest,
                    &entry.url,
                    StatusUpdate::Failed {
                        error: format!("{:#}", e),
                    },
                )?;
                error!(url = %entry.url, error = %format!("{:#}", e), "  Failed");

                let retry_count = record.retry_count;
                if retry_count <= self.settings.max_retries {
                    let delay = backoff_delay(self.settings.backoff_base, retry_count);
                    info!(
                        "  Backing off {:.0}s before next request (retry {}/{})",
                        delay.as_secs_f64(),
                        retry_count,
                        self.settings.max_retries
                    );
                    self.pause.pause(PauseKind::Backoff, delay).await;
                }
                Ok(ItemOutcome::Failed)
            }
        }
    }

    async fn fetch_and_write(
        &self,
        entry: &TabEntry,
        url: &url::Url,
        fetcher: &mut dyn Fetcher,
    ) -> Result<WrittenTab> {
        let fetched = fetcher.fetch(url).await?;
        if fetched.content.trim().is_empty() {
            return Err(BackupError::EmptyContent.into());
        }
        self.writer.write(&fetched, entry)
    }

    async fn rotate(&self, fetcher: &mut dyn Fetcher, summary: &mut BackupSummary) {
        info!("Rotating fetch session...");
        match fetcher.rotate().await {
            Ok(()) => {
                summary.rotations += 1;
                info!("Session rotation complete (auth preserved)");
            }
            Err(e) => {
                error!(error = %e, "Session rotation failed, attempting recovery...");
                match fetcher.rebuild().await {
                    Ok(()) => {
                        summary.rebuilds += 1;
                        info!("Fetcher recovery complete (may need re-auth)");
                    }
                    Err(e) => {
                        error!(error = %e, "Fetcher rebuild failed; continuing with next tab");
                    }
                }
            }
        }
    }
}

/// `tabvault backup|sync|retry`.
pub async fn run_backup(config: &Config, mode: BackupMode, progress: ProgressMode) -> Result<()> {
    let entries = load_tab_entries(&config.paths.urls_file)?;
    let reporter = progress.reporter();
    let pause = TokioPause;
    let runner = BackupRunner::new(config, &pause, reporter.as_ref());
    let mut manifest = runner.store().load()?;

    if select_work(&entries, &manifest, mode).is_empty() {
        info!(%mode, "No tabs to process!");
        BackupSummary::default().print();
        return Ok(());
    }

    let mut fetcher = ProcessFetcher::new(&config.fetcher)?;
    let summary = runner
        .run(&entries, &mut manifest, mode, &mut fetcher)
        .await?;
    summary.print();
    Ok(())
}
