//! Batch integrity verification of completed tabs.
//!
//! Each `completed` record is checked in a fixed order:
//!
//! 1. the path stays under the output root (else `invalid`) and the file
//!    exists (else `missing`); either failure ends the checks,
//! 2. the stored hash matches a fresh hash (else `corrupted`),
//! 3. the file is structurally valid (else `invalid`),
//! 4. the header URL matches the manifest key (else `invalid`),
//! 5. the stored size matches (else `corrupted`, unless already failing).
//!
//! All issue strings are kept even though one status is reported. Checks 3
//! and 4 override a `corrupted` from check 2, while check 5 never overrides
//! anything. Verification only reads files; `--fix` changes manifest state
//! and nothing else.

use anyhow::Result;
use chrono::Utc;
use std::path::Path;
use tracing::info;

use crate::config::Config;
use crate::integrity::{hash_file, read_header, validate_structure, Structure};
use crate::manifest::ManifestStore;
use crate::models::{Manifest, StatusUpdate, TabRecord, TabState};
use crate::progress::{ProgressEvent, ProgressMode, ProgressReporter};
use crate::writer::contained_local_path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyStatus {
    Ok,
    Missing,
    Corrupted,
    Invalid,
}

impl VerifyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerifyStatus::Ok => "ok",
            VerifyStatus::Missing => "missing",
            VerifyStatus::Corrupted => "corrupted",
            VerifyStatus::Invalid => "invalid",
        }
    }
}

/// Result of checking one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCheck {
    pub url: String,
    pub status: VerifyStatus,
    pub issues: Vec<String>,
}

/// Aggregate of a verification pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub total: usize,
    pub passed: usize,
    pub missing: usize,
    pub corrupted: usize,
    pub invalid: usize,
    /// Every non-`ok` check, in manifest key order.
    pub issues: Vec<FileCheck>,
}

fn abbreviate(hash: &str) -> String {
    hash.chars().take(20).collect()
}

/// Check one `completed` record against the file it points to.
pub fn verify_record(url: &str, record: &TabRecord, root: &Path) -> FileCheck {
    let mut check = FileCheck {
        url: url.to_string(),
        status: VerifyStatus::Ok,
        issues: Vec::new(),
    };

    let TabState::Completed {
        local_path,
        file_hash,
        file_size,
    } = &record.state
    else {
        check.status = VerifyStatus::Missing;
        check.issues.push("No local_path in manifest".to_string());
        return check;
    };

    let path = match contained_local_path(root, local_path) {
        Ok(path) => path,
        Err(_) => {
            check.status = VerifyStatus::Invalid;
            check.issues.push(format!(
                "Path outside output root: {}",
                local_path.display()
            ));
            return check;
        }
    };
    if !path.is_file() {
        check.status = VerifyStatus::Missing;
        check
            .issues
            .push(format!("File not found: {}", local_path.display()));
        return check;
    }

    if let Some(stored) = file_hash {
        match hash_file(&path) {
            Ok(current) if &current == stored => {}
            Ok(current) => {
                check.status = VerifyStatus::Corrupted;
                check.issues.push(format!(
                    "Hash mismatch: expected {}..., got {}...",
                    abbreviate(stored),
                    abbreviate(&current)
                ));
            }
            Err(e) => {
                check.status = VerifyStatus::Corrupted;
                check.issues.push(format!("Cannot hash file: {:#}", e));
            }
        }
    }

    if let Structure::Invalid(reason) = validate_structure(&path) {
        check.status = VerifyStatus::Invalid;
        check.issues.push(format!("Invalid structure: {}", reason));
    }

    if let Ok(header) = read_header(&path) {
        if let Some(file_url) = header.url {
            if file_url != url {
                check.status = VerifyStatus::Invalid;
                check.issues.push(format!("URL mismatch: file has {}", file_url));
            }
        }
    }

    if let Some(stored) = file_size {
        if let Ok(meta) = std::fs::metadata(&path) {
            let actual = meta.len();
            if actual != *stored {
                if check.status == VerifyStatus::Ok {
                    check.status = VerifyStatus::Corrupted;
                }
                check.issues.push(format!(
                    "Size mismatch: expected {}, got {}",
                    stored, actual
                ));
            }
        }
    }

    check
}

/// Verify every `completed` record.
pub fn verify_all(
    manifest: &Manifest,
    root: &Path,
    progress: &dyn ProgressReporter,
) -> VerifyReport {
    let completed: Vec<_> = manifest.completed().collect();
    let mut report = VerifyReport {
        total: completed.len(),
        ..VerifyReport::default()
    };

    for (i, (url, record)) in completed.into_iter().enumerate() {
        progress.report(ProgressEvent::Verifying {
            n: (i + 1) as u64,
            total: report.total as u64,
        });

        let check = verify_record(url, record, root);
        match check.status {
            VerifyStatus::Ok => report.passed += 1,
            VerifyStatus::Missing => report.missing += 1,
            VerifyStatus::Corrupted => report.corrupted += 1,
            VerifyStatus::Invalid => report.invalid += 1,
        }
        if check.status != VerifyStatus::Ok {
            report.issues.push(check);
        }
    }
    report
}

/// Demote every failing record to `failed` with `needs_redownload`, so the
/// next `retry` run picks it up. Returns the number of records changed.
pub fn apply_fix(
    store: &ManifestStore,
    manifest: &mut Manifest,
    report: &VerifyReport,
) -> Result<usize> {
    for issue in &report.issues {
        store.update_status(
            manifest,
            &issue.url,
            StatusUpdate::NeedsRedownload {
                reason: format!("Verification failed: {}", issue.status.as_str()),
            },
        )?;
    }
    Ok(report.issues.len())
}

impl VerifyReport {
    pub fn print(&self, manifest: &Manifest) {
        let pct = 100.0 * self.passed as f64 / self.total.max(1) as f64;
        println!("{}", "=".repeat(50));
        println!("VERIFICATION COMPLETE");
        println!("{}", "=".repeat(50));
        println!("Total checked:  {}", self.total);
        println!("Passed:         {} ({:.1}%)", self.passed, pct);
        println!("Missing:        {}", self.missing);
        println!("Corrupted:      {}", self.corrupted);
        println!("Invalid:        {}", self.invalid);
        println!("{}", "=".repeat(50));

        if self.issues.is_empty() {
            println!("\nAll files passed verification!");
            return;
        }

        println!("\nIssues found:");
        for issue in &self.issues {
            let name = manifest
                .tabs
                .get(&issue.url)
                .map(|r| r.display_name())
                .unwrap_or_else(|| issue.url.clone());
            println!("  {}: {}", issue.status.as_str().to_uppercase(), name);
            for problem in &issue.issues {
                println!("      {}", problem);
            }
        }
    }
}

/// `tabvault verify [--fix] [--verbose]`.
pub fn run_verify(config: &Config, fix: bool, verbose: bool, progress: ProgressMode) -> Result<()> {
    let store = ManifestStore::for_config(config);
    let mut manifest = store.load()?;

    println!("\nVerifying completed tabs...");
    let reporter = progress.reporter();
    let report = verify_all(&manifest, &config.paths.output_dir, reporter.as_ref());
    report.print(&manifest);

    if verbose {
        let failing: std::collections::HashSet<&str> =
            report.issues.iter().map(|i| i.url.as_str()).collect();
        println!("\nChecked files:");
        for (url, record) in manifest.completed() {
            let mark = if failing.contains(url.as_str()) { "FAIL" } else { "ok" };
            println!("  [{:>4}] {}", mark, record.display_name());
        }
    }

    if !report.issues.is_empty() {
        if fix {
            println!("\nMarking broken files for re-download...");
            let marked = apply_fix(&store, &mut manifest, &report)?;
            println!("Marked {} tabs for re-download.", marked);
            println!("Run 'tabvault retry' to re-download them.");
        } else {
            println!("\nRun with --fix to mark broken files for re-download.");
        }
    }

    manifest.last_verify = Some(Utc::now());
    store.save(&manifest)?;
    info!(
        total = report.total,
        passed = report.passed,
        issues = report.issues.len(),
        "Verification finished"
    );
    Ok(())
}
