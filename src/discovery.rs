use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::path::Path;
use tracing::warn;

use crate::models::TabEntry;

/// Load the discovery list (`tab_urls.json`).
///
/// A missing file is a setup error: nothing can be backed up without it.
/// Duplicate URLs keep their first occurrence so list order stays stable.
pub fn load_tab_entries(path: &Path) -> Result<Vec<TabEntry>> {
    if !path.exists() {
        bail!(
            "Tab URLs file not found: {}. Extract the URLs from your exported tab list first.",
            path.display()
        );
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read tab URLs file: {}", path.display()))?;
    let entries: Vec<TabEntry> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse tab URLs file: {}", path.display()))?;

    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(entries.len());
    for entry in entries {
        if seen.insert(entry.url.clone()) {
            unique.push(entry);
        } else {
            warn!(url = %entry.url, "Duplicate URL in discovery list, keeping first");
        }
    }
    Ok(unique)
}
