//! Core data models used throughout tabvault.
//!
//! The manifest is a single JSON document keyed by tab URL. Each record
//! carries an explicit, tagged state so that a `completed` record without a
//! path, or a `failed` record without an error, cannot be constructed.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod timestamp {
    //! Timestamp parsing for manifest fields.
    //!
    //! This release writes RFC 3339. Older manifests carry naive ISO-8601
    //! (`2024-05-01T12:30:00.123456`, local time), which must still load.

    use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
    use serde::{de::Error, Deserialize, Deserializer};

    /// Parse RFC 3339, or naive ISO-8601 interpreted as local time.
    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        let raw = raw.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        let naive = raw
            .parse::<NaiveDateTime>()
            .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
            .ok()?;
        Some(
            Local
                .from_local_datetime(&naive)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|| Utc.from_utc_datetime(&naive)),
        )
    }

    pub fn deserialize_opt<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(None),
            Some(raw) => parse(&raw)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("invalid timestamp: {}", raw))),
        }
    }
}

/// Schema version written by this release.
pub const MANIFEST_VERSION: u32 = 2;

/// Version assumed for documents written before the field existed.
pub const LEGACY_MANIFEST_VERSION: u32 = 1;

fn legacy_version() -> u32 {
    LEGACY_MANIFEST_VERSION
}

fn is_false(b: &bool) -> bool {
    !*b
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

/// Flat status used for filtering and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TabStatus {
    Pending,
    Completed,
    Failed,
}

impl TabStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TabStatus::Pending => "pending",
            TabStatus::Completed => "completed",
            TabStatus::Failed => "failed",
        }
    }
}

/// Per-tab state, serialized as the `status` tag plus its fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TabState {
    Pending,
    Completed {
        /// Relative to the output root; absolute paths are accepted on read.
        local_path: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_hash: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_size: Option<u64>,
    },
    Failed {
        #[serde(default)]
        error: String,
        #[serde(default, skip_serializing_if = "is_false")]
        needs_redownload: bool,
        /// Path of a previously written file, kept for reference only.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        local_path: Option<PathBuf>,
    },
}

impl TabState {
    pub fn status(&self) -> TabStatus {
        match self {
            TabState::Pending => TabStatus::Pending,
            TabState::Completed { .. } => TabStatus::Completed,
            TabState::Failed { .. } => TabStatus::Failed,
        }
    }

    fn local_path(&self) -> Option<&PathBuf> {
        match self {
            TabState::Pending => None,
            TabState::Completed { local_path, .. } => Some(local_path),
            TabState::Failed { local_path, .. } => local_path.as_ref(),
        }
    }
}

/// One manifest entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabRecord {
    #[serde(flatten)]
    pub state: TabState,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "timestamp::deserialize_opt"
    )]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub song: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "timestamp::deserialize_opt"
    )]
    pub backed_up_at: Option<DateTime<Utc>>,
    /// Set when the record was reconstructed from a file on disk.
    #[serde(default, skip_serializing_if = "is_false")]
    pub rebuilt: bool,
}

impl TabRecord {
    pub fn pending() -> Self {
        Self {
            state: TabState::Pending,
            updated_at: None,
            retry_count: 0,
            artist: None,
            song: None,
            backed_up_at: None,
            rebuilt: false,
        }
    }

    pub fn status(&self) -> TabStatus {
        self.state.status()
    }

    pub fn display_name(&self) -> String {
        format!(
            "{} - {}",
            self.artist.as_deref().unwrap_or("Unknown"),
            self.song.as_deref().unwrap_or("Unknown")
        )
    }
}

/// A state transition requested through the manifest store.
#[derive(Debug, Clone)]
pub enum StatusUpdate {
    Completed {
        local_path: PathBuf,
        file_hash: String,
        file_size: u64,
        artist: String,
        song: String,
    },
    Failed {
        error: String,
    },
    /// Demotion requested by verification; does not count as a failed attempt.
    NeedsRedownload {
        reason: String,
    },
}

/// The durable job-state document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default = "legacy_version")]
    pub version: u32,
    #[serde(default, deserialize_with = "timestamp::deserialize_opt")]
    pub last_sync: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "timestamp::deserialize_opt")]
    pub last_verify: Option<DateTime<Utc>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "timestamp::deserialize_opt"
    )]
    pub rebuilt_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tabs: BTreeMap<String, TabRecord>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION,
            last_sync: None,
            last_verify: None,
            rebuilt_at: None,
            tabs: BTreeMap::new(),
        }
    }
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Status of a URL; absent means pending.
    pub fn status_of(&self, url: &str) -> TabStatus {
        self.tabs
            .get(url)
            .map(|r| r.status())
            .unwrap_or(TabStatus::Pending)
    }

    pub fn contains(&self, url: &str) -> bool {
        self.tabs.contains_key(url)
    }

    pub fn retry_count(&self, url: &str) -> u32 {
        self.tabs.get(url).map(|r| r.retry_count).unwrap_or(0)
    }

    /// Iterate over `completed` records in key order.
    pub fn completed(&self) -> impl Iterator<Item = (&String, &TabRecord)> {
        self.tabs
            .iter()
            .filter(|(_, r)| r.status() == TabStatus::Completed)
    }

    /// Rewrite version-1 `local_path` values, which were relative to the
    /// working directory (`tabs/<artist>/...`), so they are relative to the
    /// output root. Returns the number of paths changed.
    pub fn relocate_legacy_paths(&mut self, output_root: &Path) -> usize {
        let mut changed = 0;
        for record in self.tabs.values_mut() {
            let path = match &mut record.state {
                TabState::Completed { local_path, .. } => local_path,
                TabState::Failed {
                    local_path: Some(local_path),
                    ..
                } => local_path,
                _ => continue,
            };
            if let Some(relative) = legacy_relative(path, output_root) {
                *path = relative;
                changed += 1;
            }
        }
        changed
    }

    /// Apply a transition, creating the record if the URL is new.
    ///
    /// Fields not named by the update are kept. Entering `completed` resets
    /// `retry_count`; a plain failure increments it; a verification demotion
    /// leaves it untouched.
    pub fn apply(&mut self, url: &str, update: StatusUpdate, now: DateTime<Utc>) -> &TabRecord {
        let record = self
            .tabs
            .entry(url.to_string())
            .or_insert_with(TabRecord::pending);

        match update {
            StatusUpdate::Completed {
                local_path,
                file_hash,
                file_size,
                artist,
                song,
            } => {
                record.state = TabState::Completed {
                    local_path,
                    file_hash: Some(file_hash),
                    file_size: Some(file_size),
                };
                record.retry_count = 0;
                record.artist = Some(artist);
                record.song = Some(song);
                record.backed_up_at = Some(now);
            }
            StatusUpdate::Failed { error } => {
                let previous = record.state.local_path().cloned();
                record.state = TabState::Failed {
                    error,
                    needs_redownload: false,
                    local_path: previous,
                };
                record.retry_count = record.retry_count.saturating_add(1);
            }
            StatusUpdate::NeedsRedownload { reason } => {
                let previous = record.state.local_path().cloned();
                record.state = TabState::Failed {
                    error: reason,
                    needs_redownload: true,
                    local_path: previous,
                };
            }
        }
        record.updated_at = Some(now);
        record
    }
}

fn legacy_relative(path: &Path, output_root: &Path) -> Option<PathBuf> {
    let path = path.strip_prefix(".").unwrap_or(path);
    let rest = match path.strip_prefix(output_root) {
        Ok(rest) => rest.to_path_buf(),
        Err(_) if path.is_absolute() => return None,
        Err(_) => {
            let root_name = output_root.file_name()?;
            let mut components = path.components();
            match components.next() {
                Some(Component::Normal(first)) if first == root_name => {
                    components.as_path().to_path_buf()
                }
                _ => return None,
            }
        }
    };
    Some(rest).filter(|p| !p.as_os_str().is_empty())
}

/// One item of the discovery input (`tab_urls.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabEntry {
    pub url: String,
    pub song_name: String,
    pub band_name: String,
    #[serde(rename = "type", default = "default_tab_type")]
    pub tab_type: String,
}

fn default_tab_type() -> String {
    "Tab".to_string()
}

/// Content returned by a [`Fetcher`](crate::fetcher::Fetcher).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FetchedTab {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tuning: Option<String>,
}
