//! Reconstructing manifest state from the files on disk.
//!
//! Every durable fact about a completed tab lives in its file header, so a
//! lost or corrupted manifest can be rebuilt from the output tree alone.
//! Orphan detection and rehashing work from the same directory scan. None of
//! these operations delete or modify tab files.

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime, TimeZone, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::BTreeSet;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::integrity::{hash_file, parse_header, validate_content, Structure};
use crate::manifest::ManifestStore;
use crate::models::{Manifest, TabRecord, TabState};
use crate::writer::{contained_local_path, UrlPolicy};

const TAB_FILE_GLOB: &str = "**/*.txt";

/// All tab files under `root`, sorted. A missing root yields no files.
pub fn scan_tab_files(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let include = build_globset(&[TAB_FILE_GLOB.to_string()])?;
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        if include.is_match(relative) {
            files.push(path.to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

fn parse_backed_up(value: &str) -> Option<chrono::DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M").ok()?;
    Local
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Build a fresh manifest from the tab files under `root`.
///
/// Files without a parseable `URL:` header, or whose URL fails the source
/// allow-list, are skipped with a warning. Structurally invalid files are
/// still recorded (verification will flag them).
pub fn rebuild_manifest(root: &Path, policy: &UrlPolicy) -> Result<Manifest> {
    let now = Utc::now();
    let mut manifest = Manifest {
        rebuilt_at: Some(now),
        ..Manifest::new()
    };

    if !root.exists() {
        error!(root = %root.display(), "Tabs directory not found");
        return Ok(manifest);
    }

    let files = scan_tab_files(root)?;
    info!("Found {} tab files to process...", files.len());

    for (i, path) in files.iter().enumerate() {
        if (i + 1) % 50 == 0 {
            info!("Processing file {}/{}...", i + 1, files.len());
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not read tab file");
                continue;
            }
        };

        let header = parse_header(&content);
        let Some(url) = header.url.clone() else {
            warn!(path = %path.display(), "Could not extract URL from tab file");
            continue;
        };
        if let Err(e) = policy.check(&url) {
            warn!(path = %path.display(), error = %e, "Skipping tab file with disallowed URL");
            continue;
        }
        if let Structure::Invalid(reason) = validate_content(&content) {
            warn!(path = %path.display(), reason = %reason, "Invalid file structure");
        }
        if manifest.contains(&url) {
            warn!(path = %path.display(), %url, "Duplicate URL on disk, keeping first file");
            continue;
        }

        let file_hash = hash_file(path)?;
        let file_size = std::fs::metadata(path)
            .with_context(|| format!("Failed to stat {}", path.display()))?
            .len();
        let local_path = path.strip_prefix(root).unwrap_or(path).to_path_buf();

        manifest.tabs.insert(
            url,
            TabRecord {
                state: TabState::Completed {
                    local_path,
                    file_hash: Some(file_hash),
                    file_size: Some(file_size),
                },
                updated_at: Some(now),
                retry_count: 0,
                artist: Some(header.artist.unwrap_or_else(|| "Unknown".to_string())),
                song: Some(header.song.unwrap_or_else(|| "Unknown".to_string())),
                backed_up_at: header.backed_up.as_deref().and_then(parse_backed_up),
                rebuilt: true,
            },
        );
    }

    info!("Rebuilt manifest with {} tabs", manifest.tabs.len());
    Ok(manifest)
}

fn normalize(path: PathBuf) -> PathBuf {
    match path.canonicalize() {
        Ok(p) => p,
        Err(_) => std::path::absolute(&path).unwrap_or(path),
    }
}

/// Tab files on disk that no `completed` record points to.
pub fn find_orphans(manifest: &Manifest, root: &Path) -> Result<Vec<PathBuf>> {
    let tracked: BTreeSet<PathBuf> = manifest
        .completed()
        .filter_map(|(_, record)| match &record.state {
            TabState::Completed { local_path, .. } => contained_local_path(root, local_path)
                .ok()
                .map(normalize),
            _ => None,
        })
        .collect();

    let on_disk: BTreeSet<PathBuf> = scan_tab_files(root)?.into_iter().map(normalize).collect();
    Ok(on_disk.difference(&tracked).cloned().collect())
}

/// Counts from a rehash pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RehashReport {
    pub updated: usize,
    pub skipped: usize,
    pub missing: usize,
    /// Records whose `local_path` points outside the output root.
    pub outside: usize,
}

/// Fill in `file_hash`/`file_size` for completed records that lack them.
pub fn rehash(manifest: &mut Manifest, root: &Path) -> Result<RehashReport> {
    let mut report = RehashReport::default();
    for (url, record) in manifest.tabs.iter_mut() {
        let TabState::Completed {
            local_path,
            file_hash,
            file_size,
        } = &mut record.state
        else {
            continue;
        };

        if file_hash.is_some() && file_size.is_some() {
            report.skipped += 1;
            continue;
        }

        let path = match contained_local_path(root, local_path) {
            Ok(path) => path,
            Err(e) => {
                warn!(url = %url, error = %e, "Skipping record outside output root");
                report.outside += 1;
                continue;
            }
        };
        if !path.is_file() {
            report.missing += 1;
            continue;
        }

        *file_hash = Some(hash_file(&path)?);
        *file_size = Some(
            std::fs::metadata(&path)
                .with_context(|| format!("Failed to stat {}", path.display()))?
                .len(),
        );
        report.updated += 1;
    }
    Ok(report)
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{}", prompt);
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(answer.trim().eq_ignore_ascii_case("y"))
}

/// `tabvault rebuild-manifest [--yes]`.
pub fn run_rebuild_manifest(config: &Config, yes: bool) -> Result<()> {
    println!("\nRebuilding manifest from files on disk...");
    println!("This will create a new manifest based on existing tab files.\n");

    let store = ManifestStore::for_config(config);
    if store.exists() && !yes && !confirm("Existing manifest found. Overwrite? [y/N] ")? {
        println!("Aborted.");
        return Ok(());
    }

    let policy = UrlPolicy::new(config.source.clone());
    let manifest = rebuild_manifest(&config.paths.output_dir, &policy)?;
    store.save(&manifest)?;

    println!("\nManifest rebuilt successfully!");
    println!(
        "Found {} tabs in {}/",
        manifest.tabs.len(),
        config.paths.output_dir.display()
    );
    Ok(())
}

/// `tabvault find-orphans`.
pub fn run_find_orphans(config: &Config) -> Result<()> {
    println!("\nSearching for orphan files...");
    let manifest = ManifestStore::for_config(config).load()?;
    let orphans = find_orphans(&manifest, &config.paths.output_dir)?;

    if orphans.is_empty() {
        println!("No orphan files found. All files are tracked in manifest.");
        return Ok(());
    }

    println!(
        "\nFound {} orphan file(s) not tracked in manifest:\n",
        orphans.len()
    );
    for orphan in &orphans {
        println!("  {}", orphan.display());
    }
    println!("\nThese files exist on disk but are not in the backup manifest.");
    println!("Run 'tabvault rebuild-manifest' to create a fresh manifest including them,");
    println!("or remove them manually if they are not needed.");
    Ok(())
}

/// `tabvault rehash`.
pub fn run_rehash(config: &Config) -> Result<()> {
    println!("\nComputing hashes for existing files...");
    let store = ManifestStore::for_config(config);
    let mut manifest = store.load()?;
    let report = rehash(&mut manifest, &config.paths.output_dir)?;
    store.save(&manifest)?;

    println!("\nRehashing complete!");
    println!("  Updated:  {}", report.updated);
    println!("  Skipped:  {} (already had hash)", report.skipped);
    println!("  Missing:  {} (file not found)", report.missing);
    if report.outside > 0 {
        println!("  Outside:  {} (path outside output root)", report.outside);
    }
    Ok(())
}
