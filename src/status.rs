//! Backup progress overview.
//!
//! Summarizes how much of the discovery list is safely on disk: completed,
//! failed and pending counts, hash coverage, and when the last sync and
//! verification ran. Used by `tabvault status` to decide what to run next.

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::discovery::load_tab_entries;
use crate::manifest::ManifestStore;
use crate::models::{Manifest, TabEntry, TabState};

/// Counts over the discovery list, keyed by manifest status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub needs_redownload: usize,
    pub pending: usize,
    pub with_hash: usize,
}

impl StatusCounts {
    pub fn compute(entries: &[TabEntry], manifest: &Manifest) -> Self {
        let mut counts = StatusCounts {
            total: entries.len(),
            ..Default::default()
        };
        for entry in entries {
            let Some(record) = manifest.tabs.get(&entry.url) else {
                counts.pending += 1;
                continue;
            };
            match &record.state {
                TabState::Completed { file_hash, .. } => {
                    counts.completed += 1;
                    if file_hash.is_some() {
                        counts.with_hash += 1;
                    }
                }
                TabState::Failed {
                    needs_redownload, ..
                } => {
                    counts.failed += 1;
                    if *needs_redownload {
                        counts.needs_redownload += 1;
                    }
                }
                TabState::Pending => counts.pending += 1,
            }
        }
        counts
    }

    fn percent(&self, n: usize) -> usize {
        if self.total > 0 {
            n * 100 / self.total
        } else {
            0
        }
    }
}

/// Run the status command: load the discovery list and manifest, print a summary.
pub fn run_status(config: &Config) -> Result<()> {
    let entries = load_tab_entries(&config.paths.urls_file)?;
    let manifest = ManifestStore::for_config(config).load()?;
    let counts = StatusCounts::compute(&entries, &manifest);

    println!("TabVault Backup Status");
    println!("======================");
    println!();
    println!("  Manifest:    {}", config.paths.manifest.display());
    println!("  Output:      {}", config.paths.output_dir.display());
    println!();
    println!("  Total tabs:  {}", counts.total);
    println!(
        "  Completed:   {} ({}%)",
        counts.completed,
        counts.percent(counts.completed)
    );
    println!("  Failed:      {}", counts.failed);
    if counts.needs_redownload > 0 {
        println!("    (needs redownload: {})", counts.needs_redownload);
    }
    println!("  Pending:     {}", counts.pending);
    println!(
        "  With hash:   {} / {}",
        counts.with_hash, counts.completed
    );
    println!();
    println!("  Last sync:   {}", format_when(manifest.last_sync));
    println!("  Last verify: {}", format_when(manifest.last_verify));
    if let Some(rebuilt) = manifest.rebuilt_at {
        println!("  Rebuilt:     {}", format_when(Some(rebuilt)));
    }

    let untracked = manifest
        .tabs
        .keys()
        .filter(|url| !entries.iter().any(|e| &e.url == *url))
        .count();
    if untracked > 0 {
        println!("  Not in list: {}", untracked);
    }

    println!();
    if counts.completed > counts.with_hash {
        println!("  Hint: run 'tabvault rehash' to add hashes to older backups.");
    }
    if counts.failed > 0 {
        println!("  Hint: run 'tabvault retry' to retry failed downloads.");
    }
    if counts.pending > 0 {
        println!("  Hint: run 'tabvault sync' to download new tabs.");
    }
    if manifest.tabs.is_empty() {
        println!("  Hint: no manifest yet; run 'tabvault backup' to start.");
    }

    Ok(())
}

fn format_when(ts: Option<DateTime<Utc>>) -> String {
    match ts {
        Some(ts) => format!(
            "{} ({})",
            ts.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M"),
            format_relative(ts, Utc::now())
        ),
        None => "never".to_string(),
    }
}

/// Format a timestamp relative to `now` (e.g. "3 hours ago").
fn format_relative(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = (now - ts).num_seconds();

    if delta < 0 {
        return ts.format("%Y-%m-%d %H:%M").to_string();
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StatusUpdate;
    use chrono::Duration;
    use std::path::PathBuf;

    fn entry(url: &str) -> TabEntry {
        TabEntry {
            url: url.to_string(),
            song_name: "Song".into(),
            band_name: "Band".into(),
            tab_type: "Tab".into(),
        }
    }

    #[test]
    fn test_counts_cover_every_status() {
        let entries: Vec<TabEntry> = ["u1", "u2", "u3", "u4"].iter().map(|u| entry(u)).collect();
        let now = Utc::now();
        let mut m = Manifest::new();
        m.apply(
            "u1",
            StatusUpdate::Completed {
                local_path: PathBuf::from("band/song-tab.txt"),
                file_hash: "sha256:ab".into(),
                file_size: 10,
                artist: "Band".into(),
                song: "Song".into(),
            },
            now,
        );
        m.apply("u2", StatusUpdate::Failed { error: "boom".into() }, now);
        m.apply(
            "u3",
            StatusUpdate::NeedsRedownload {
                reason: "Verification failed: missing".into(),
            },
            now,
        );
        m.apply("not-listed", StatusUpdate::Failed { error: "x".into() }, now);

        let counts = StatusCounts::compute(&entries, &m);
        assert_eq!(
            counts,
            StatusCounts {
                total: 4,
                completed: 1,
                failed: 2,
                needs_redownload: 1,
                pending: 1,
                with_hash: 1,
            }
        );
        assert_eq!(counts.percent(counts.completed), 25);
    }

    #[test]
    fn test_relative_time() {
        let now = Utc::now();
        assert_eq!(format_relative(now, now), "just now");
        assert_eq!(format_relative(now - Duration::minutes(1), now), "1 min ago");
        assert_eq!(format_relative(now - Duration::hours(3), now), "3 hours ago");
        assert_eq!(format_relative(now - Duration::days(40), now), "40 days ago");
        assert_eq!(format_when(None), "never");
    }
}
