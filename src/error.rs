//! Typed failures that callers need to tell apart.
//!
//! Everything else flows through `anyhow`. These variants exist because the
//! backup loop and the tests match on them: an unsafe URL is rejected
//! without touching the manifest, a traversal attempt must fail before any
//! write, and a newer manifest schema must stop the run instead of being
//! quarantined as corruption.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("URL rejected by source allow-list: {0}")]
    UnsafeUrl(String),

    #[error("path traversal detected: {path} is outside {root}")]
    PathTraversal { path: PathBuf, root: PathBuf },

    #[error("failed to extract tab content")]
    EmptyContent,

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("manifest schema version {found} is newer than supported version {supported}")]
    ManifestVersion { found: u32, supported: u32 },
}
