//! Content hashing and structural validation of tab files.
//!
//! A tab file is a short header block followed by a `---` separator line and
//! the extracted body:
//!
//! ```text
//! Song: Mr Jones
//! Artist: Counting Crows
//! Type: Chords
//! URL: https://tabs.ultimate-guitar.com/tab/counting-crows/mr-jones-chords-1
//! Backed up: 2024-05-01 12:30
//!
//! ---
//!
//! <body>
//! ```
//!
//! The header is the only place a tab's URL, song and artist survive on disk,
//! which is what lets the recovery tooling rebuild a lost manifest.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Prefix of every digest this module produces.
pub const HASH_PREFIX: &str = "sha256:";

/// Literal separator between header and body.
pub const SEPARATOR: &str = "---";

/// Bodies shorter than this (after trimming) are treated as truncated.
pub const MIN_CONTENT_CHARS: usize = 10;

const REQUIRED_FIELDS: [&str; 3] = ["Song:", "Artist:", "URL:"];

const CHUNK_SIZE: usize = 8192;

/// Compute `sha256:<hex>` of a file with a fixed-size read buffer.
pub fn hash_file(path: &Path) -> Result<String> {
    let file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut reader = BufReader::with_capacity(CHUNK_SIZE, file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        let n = reader
            .read(&mut buf)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{}{:x}", HASH_PREFIX, hasher.finalize()))
}

/// Hash an in-memory buffer the same way [`hash_file`] hashes a file.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{}{:x}", HASH_PREFIX, hasher.finalize())
}

/// Header fields parsed from a tab file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TabHeader {
    pub song: Option<String>,
    pub artist: Option<String>,
    pub tab_type: Option<String>,
    pub url: Option<String>,
    pub backed_up: Option<String>,
    pub tuning: Option<String>,
}

/// Parse header lines up to the first separator line.
pub fn parse_header(content: &str) -> TabHeader {
    let mut header = TabHeader::default();
    for line in content.lines() {
        if line.trim_end() == SEPARATOR {
            break;
        }
        let field = |prefix: &str| {
            line.strip_prefix(prefix)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        if let Some(v) = field("Song:") {
            header.song = Some(v);
        } else if let Some(v) = field("Artist:") {
            header.artist = Some(v);
        } else if let Some(v) = field("Type:") {
            header.tab_type = Some(v);
        } else if let Some(v) = field("URL:") {
            header.url = Some(v);
        } else if let Some(v) = field("Backed up:") {
            header.backed_up = Some(v);
        } else if let Some(v) = field("Tuning:") {
            header.tuning = Some(v);
        }
    }
    header
}

/// Read and parse a file's header.
pub fn read_header(path: &Path) -> Result<TabHeader> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(parse_header(&content))
}

/// Split content into (header, body) at the first separator line.
fn split_at_separator(content: &str) -> Option<(&str, &str)> {
    let mut offset = 0;
    for line in content.split_inclusive('\n') {
        if line.trim_end() == SEPARATOR {
            return Some((&content[..offset], &content[offset + line.len()..]));
        }
        offset += line.len();
    }
    None
}

/// Outcome of a structural check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Structure {
    Valid,
    Invalid(String),
}

impl Structure {
    pub fn is_valid(&self) -> bool {
        matches!(self, Structure::Valid)
    }
}

/// Check header fields, the separator line and a non-trivial body.
pub fn validate_content(content: &str) -> Structure {
    let Some((head, body)) = split_at_separator(content) else {
        return Structure::Invalid(format!("Missing separator ({})", SEPARATOR));
    };

    for field in REQUIRED_FIELDS {
        if !head.lines().any(|l| l.starts_with(field)) {
            return Structure::Invalid(format!("Missing required field: {}", field));
        }
    }

    if body.trim().chars().count() < MIN_CONTENT_CHARS {
        return Structure::Invalid("Missing or empty tab content after separator".to_string());
    }

    Structure::Valid
}

/// [`validate_content`] over a file; unreadable files are invalid, not errors.
pub fn validate_structure(path: &Path) -> Structure {
    match std::fs::read_to_string(path) {
        Ok(content) => validate_content(&content),
        Err(e) => Structure::Invalid(format!("Cannot read file: {}", e)),
    }
}
