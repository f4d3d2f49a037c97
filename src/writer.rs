//! Turning fetched content into tab files on disk.
//!
//! Paths are derived from untrusted metadata (artist, song, type), so every
//! component is sanitized and the final path is checked against the output
//! root before anything is written. Files are written to a sibling
//! `*.txt.tmp` and renamed into place.

use anyhow::{Context, Result};
use chrono::Local;
use std::fs::File;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use url::Url;

use crate::config::SourceConfig;
use crate::error::BackupError;
use crate::integrity::{hash_file, SEPARATOR};
use crate::models::{FetchedTab, TabEntry};

const MAX_NAME_CHARS: usize = 100;
const ILLEGAL_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Reduce an arbitrary string to a single safe, lowercase, hyphenated path
/// component.
pub fn sanitize_filename(name: &str) -> String {
    let stripped: String = name
        .chars()
        .filter(|c| !c.is_control() && !ILLEGAL_CHARS.contains(c))
        .collect();
    let mut stripped = stripped;
    while stripped.contains("..") {
        stripped = stripped.replace("..", "");
    }

    let hyphenated = stripped.split_whitespace().collect::<Vec<_>>().join("-");
    let lowered = hyphenated.to_lowercase();
    let trimmed = lowered.trim_matches('-');
    let capped: String = trimmed.chars().take(MAX_NAME_CHARS).collect();
    let capped = capped.trim_end_matches('-');

    if capped.is_empty() || capped.chars().all(|c| c == '.') {
        "unnamed".to_string()
    } else {
        capped.to_string()
    }
}

/// Relative location of a tab: `<artist>/<song>-<type>.txt`.
pub fn relative_tab_path(artist: &str, song: &str, tab_type: &str) -> PathBuf {
    PathBuf::from(sanitize_filename(artist)).join(format!(
        "{}-{}.txt",
        sanitize_filename(song),
        sanitize_filename(tab_type)
    ))
}

/// Fail unless `relative` stays strictly below `root`.
///
/// The lexical check runs before any filesystem access; when the parent
/// directory already exists it is also resolved, so a symlinked directory
/// cannot redirect the write elsewhere.
pub fn ensure_within_root(root: &Path, relative: &Path) -> Result<PathBuf, BackupError> {
    let traversal = || BackupError::PathTraversal {
        path: root.join(relative),
        root: root.to_path_buf(),
    };

    let mut depth = 0usize;
    for component in relative.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(traversal())
            }
        }
    }
    if depth == 0 {
        return Err(traversal());
    }

    let full = root.join(relative);
    if let (Ok(root_real), Some(Ok(parent_real))) = (
        root.canonicalize(),
        full.parent().map(|p| p.canonicalize()),
    ) {
        if !parent_real.starts_with(&root_real) {
            return Err(traversal());
        }
    }
    Ok(full)
}

/// Resolve a manifest `local_path` and require that it stays below `root`.
///
/// Absolute paths are accepted only when they point inside the root. When
/// the file exists its resolved location is checked as well, so a symlink
/// cannot lead outside.
pub fn contained_local_path(root: &Path, local_path: &Path) -> Result<PathBuf, BackupError> {
    let traversal = || BackupError::PathTraversal {
        path: local_path.to_path_buf(),
        root: root.to_path_buf(),
    };

    let root_real = root.canonicalize().ok();
    let relative = if local_path.is_absolute() {
        local_path
            .strip_prefix(root)
            .ok()
            .or_else(|| {
                root_real
                    .as_deref()
                    .and_then(|real| local_path.strip_prefix(real).ok())
            })
            .ok_or_else(traversal)?
    } else {
        local_path
    };

    let full = ensure_within_root(root, relative)?;
    if let (Some(root_real), Ok(file_real)) = (&root_real, full.canonicalize()) {
        if !file_real.starts_with(root_real) {
            return Err(traversal());
        }
    }
    Ok(full)
}

/// Scheme, host and path-prefix allow-list for tab URLs.
#[derive(Debug, Clone)]
pub struct UrlPolicy {
    source: SourceConfig,
}

impl UrlPolicy {
    pub fn new(source: SourceConfig) -> Self {
        Self { source }
    }

    /// Parse and check a URL. Runs before any network access.
    pub fn check(&self, raw: &str) -> Result<Url, BackupError> {
        let rejected = || BackupError::UnsafeUrl(raw.to_string());
        let url = Url::parse(raw).map_err(|_| rejected())?;
        let host_ok = url.host_str() == Some(self.source.host.as_str());
        // Ports, credentials and `..` segments would let a URL pass the
        // prefix test while pointing somewhere else.
        let plain = url.port().is_none()
            && url.username().is_empty()
            && url.password().is_none()
            && !raw.contains("/../")
            && !raw.chars().any(char::is_control);
        if url.scheme() == self.source.scheme
            && host_ok
            && plain
            && url.path().starts_with(&self.source.path_prefix)
        {
            Ok(url)
        } else {
            Err(rejected())
        }
    }

    pub fn is_safe(&self, raw: &str) -> bool {
        self.check(raw).is_ok()
    }
}

/// Result of a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenTab {
    /// Path relative to the output root, as recorded in the manifest.
    pub relative_path: PathBuf,
    pub path: PathBuf,
    pub file_hash: String,
    pub file_size: u64,
}

/// Render the header block, separator and body.
pub fn render_tab_file(fetched: &FetchedTab, entry: &TabEntry, backed_up: &str) -> String {
    let song = non_empty_or(&fetched.title, &entry.song_name);
    let artist = non_empty_or(&fetched.artist, &entry.band_name);

    let mut out = String::with_capacity(fetched.content.len() + 256);
    out.push_str(&format!("Song: {}\n", header_value(song)));
    out.push_str(&format!("Artist: {}\n", header_value(artist)));
    out.push_str(&format!("Type: {}\n", header_value(&entry.tab_type)));
    out.push_str(&format!("URL: {}\n", header_value(&entry.url)));
    out.push_str(&format!("Backed up: {}\n", header_value(backed_up)));
    if let Some(tuning) = fetched.tuning.as_deref().map(header_value) {
        if !tuning.is_empty() {
            out.push_str(&format!("Tuning: {}\n", tuning));
        }
    }
    out.push('\n');
    out.push_str(SEPARATOR);
    out.push_str("\n\n");
    out.push_str(&fetched.content);
    out
}

/// Collapse a value onto one header line: control characters (line breaks
/// included) become spaces, runs of whitespace become one.
fn header_value(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn non_empty_or<'a>(preferred: &'a str, fallback: &'a str) -> &'a str {
    let p = preferred.trim();
    if p.is_empty() {
        fallback.trim()
    } else {
        p
    }
}

/// Writes tab files below a fixed output root.
#[derive(Debug, Clone)]
pub struct TabWriter {
    root: PathBuf,
}

impl TabWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist a fetched tab and return its location, digest and size.
    pub fn write(&self, fetched: &FetchedTab, entry: &TabEntry) -> Result<WrittenTab> {
        let artist = non_empty_or(&fetched.artist, &entry.band_name);
        let song = non_empty_or(&fetched.title, &entry.song_name);
        let relative = relative_tab_path(artist, song, &entry.tab_type);

        let path = ensure_within_root(&self.root, &relative)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        // Re-check now that the directory exists and can be resolved.
        let path = ensure_within_root(&self.root, &relative)?;

        let backed_up = Local::now().format("%Y-%m-%d %H:%M").to_string();
        let content = render_tab_file(fetched, entry, &backed_up);
        write_atomic(&path, content.as_bytes())?;

        let file_hash = hash_file(&path)?;
        let file_size = std::fs::metadata(&path)
            .with_context(|| format!("Failed to stat {}", path.display()))?
            .len();

        Ok(WrittenTab {
            relative_path: relative,
            path,
            file_hash,
            file_size,
        })
    }
}

/// Temp-file-then-rename write. The temp file is removed on any failure.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = temp_sibling(path);
    let result = (|| -> std::io::Result<()> {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        std::fs::rename(&tmp, path)
    })();

    if let Err(e) = result {
        if tmp.exists() {
            let _ = std::fs::remove_file(&tmp);
        }
        return Err(e).with_context(|| format!("Failed to write {}", path.display()));
    }
    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(url: &str, song: &str, band: &str, kind: &str) -> TabEntry {
        TabEntry {
            url: url.to_string(),
            song_name: song.to_string(),
            band_name: band.to_string(),
            tab_type: kind.to_string(),
        }
    }

    fn fetched(title: &str, artist: &str, content: &str) -> FetchedTab {
        FetchedTab {
            title: title.to_string(),
            artist: artist.to_string(),
            content: content.to_string(),
            tuning: None,
        }
    }

    #[test]
    fn test_sanitize_basic() {
        assert_eq!(sanitize_filename("Counting Crows"), "counting-crows");
        assert_eq!(sanitize_filename("  Mr   Jones "), "mr-jones");
        assert_eq!(sanitize_filename("AC/DC"), "acdc");
        assert_eq!(sanitize_filename("What?* <Is> \"This\""), "what-is-this");
    }

    #[test]
    fn test_sanitize_traversal_and_control() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "etcpasswd");
        assert_eq!(sanitize_filename("a\0b\tc"), "abc");
        assert_eq!(sanitize_filename("...."), "unnamed");
        assert_eq!(sanitize_filename("."), "unnamed");
        assert_eq!(sanitize_filename(""), "unnamed");
        assert_eq!(sanitize_filename("---"), "unnamed");
    }

    #[test]
    fn test_sanitize_caps_length() {
        let long = "x".repeat(300);
        assert_eq!(sanitize_filename(&long).chars().count(), MAX_NAME_CHARS);
        let multibyte = "é".repeat(150);
        assert_eq!(sanitize_filename(&multibyte).chars().count(), MAX_NAME_CHARS);
    }

    #[test]
    fn test_type_suffix_disambiguates() {
        let chords = relative_tab_path("Counting Crows", "Mr Jones", "Chords");
        let tab = relative_tab_path("Counting Crows", "Mr Jones", "Tab");
        assert_eq!(chords, PathBuf::from("counting-crows/mr-jones-chords.txt"));
        assert_ne!(chords, tab);
    }

    #[test]
    fn test_ensure_within_root_rejects_traversal() {
        let tmp = TempDir::new().unwrap();
        for bad in ["../escape.txt", "a/../../escape.txt", "/etc/passwd", ""] {
            let err = ensure_within_root(tmp.path(), Path::new(bad)).unwrap_err();
            assert!(matches!(err, BackupError::PathTraversal { .. }), "{}", bad);
        }
        assert!(ensure_within_root(tmp.path(), Path::new("a/b.txt")).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_ensure_within_root_rejects_symlinked_dir() {
        let tmp = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let root = tmp.path().join("tabs");
        std::fs::create_dir_all(&root).unwrap();
        std::os::unix::fs::symlink(outside.path(), root.join("evil")).unwrap();
        assert!(ensure_within_root(&root, Path::new("evil/x.txt")).is_err());
    }

    #[test]
    fn test_malicious_metadata_stays_inside_root() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("tabs");
        let writer = TabWriter::new(&root);
        let written = writer
            .write(
                &fetched("../../etc/passwd", "../../../root", "some tab content here"),
                &entry("https://tabs.ultimate-guitar.com/tab/1", "x", "y", "../Tab"),
            )
            .unwrap();
        let root_real = root.canonicalize().unwrap();
        assert!(written.path.canonicalize().unwrap().starts_with(&root_real));
        assert_eq!(written.relative_path, PathBuf::from("root/etcpasswd-tab.txt"));
    }

    #[test]
    fn test_write_produces_header_and_hash() {
        let tmp = TempDir::new().unwrap();
        let writer = TabWriter::new(tmp.path());
        let e = entry(
            "https://tabs.ultimate-guitar.com/tab/x",
            "Mr Jones",
            "Counting Crows",
            "Chords",
        );
        let mut f = fetched("", "", "chords here");
        f.tuning = Some(" E A D G B E ".to_string());
        let written = writer.write(&f, &e).unwrap();

        assert_eq!(
            written.path,
            tmp.path().join("counting-crows").join("mr-jones-chords.txt")
        );
        let text = std::fs::read_to_string(&written.path).unwrap();
        assert!(text.starts_with("Song: Mr Jones\nArtist: Counting Crows\nType: Chords\n"));
        assert!(text.contains("URL: https://tabs.ultimate-guitar.com/tab/x\n"));
        assert!(text.contains("Tuning: E A D G B E\n\n---\n\nchords here"));
        assert_eq!(written.file_size, text.len() as u64);
        assert_eq!(written.file_hash, crate::integrity::hash_bytes(text.as_bytes()));
        assert!(!temp_sibling(&written.path).exists());
    }

    #[test]
    fn test_write_atomic_cleans_temp_on_failure() {
        let tmp = TempDir::new().unwrap();
        // Renaming a file over a non-empty directory fails.
        let target = tmp.path().join("occupied.txt");
        std::fs::create_dir_all(target.join("child")).unwrap();
        assert!(write_atomic(&target, b"data").is_err());
        assert!(!temp_sibling(&target).exists());
    }

    #[test]
    fn test_url_policy() {
        let policy = UrlPolicy::new(SourceConfig::default());
        assert!(policy.is_safe("https://tabs.ultimate-guitar.com/tab/counting-crows/mr-jones-chords-1"));
        assert!(!policy.is_safe("http://tabs.ultimate-guitar.com/tab/x"));
        assert!(!policy.is_safe("https://evil.example.com/tab/x"));
        assert!(!policy.is_safe("https://tabs.ultimate-guitar.com.evil.com/tab/x"));
        assert!(!policy.is_safe("https://tabs.ultimate-guitar.com/user/x"));
        assert!(!policy.is_safe("https://tabs.ultimate-guitar.com:8443/tab/x"));
        assert!(!policy.is_safe("https://user@tabs.ultimate-guitar.com/tab/x"));
        assert!(!policy.is_safe("not a url"));
    }

    #[test]
    fn test_contained_local_path() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("tabs");
        std::fs::create_dir_all(root.join("a")).unwrap();
        std::fs::write(root.join("a/b.txt"), "x").unwrap();
        std::fs::write(tmp.path().join("outside.txt"), "x").unwrap();

        assert_eq!(
            contained_local_path(&root, Path::new("a/b.txt")).unwrap(),
            root.join("a/b.txt")
        );
        assert_eq!(
            contained_local_path(&root, &root.join("a/b.txt")).unwrap(),
            root.join("a/b.txt")
        );
        for bad in [
            PathBuf::from("../outside.txt"),
            tmp.path().join("outside.txt"),
            PathBuf::from("/etc/passwd"),
        ] {
            let err = contained_local_path(&root, &bad).unwrap_err();
            assert!(matches!(err, BackupError::PathTraversal { .. }), "{}", bad.display());
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_contained_local_path_rejects_symlinked_file() {
        let tmp = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let root = tmp.path().join("tabs");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(outside.path().join("secret.txt"), "x").unwrap();
        std::os::unix::fs::symlink(outside.path().join("secret.txt"), root.join("link.txt")).unwrap();
        assert!(contained_local_path(&root, Path::new("link.txt")).is_err());
    }

    #[test]
    fn test_header_values_stay_on_one_line() {
        let e = entry(
            "https://tabs.ultimate-guitar.com/tab/counting-crows/mr-jones-chords-1",
            "Mr Jones",
            "Counting\r\nCrows",
            "Chords\n---",
        );
        let mut f = fetched("Mr Jones\n---", "", "Am F Dm G chords here");
        f.tuning = Some("Standard\nURL: https://tabs.ultimate-guitar.com/tab/other".to_string());
        let text = render_tab_file(&f, &e, "2024-05-01 12:30");

        let (header, body) = text.split_once("\n---\n").unwrap();
        assert_eq!(
            header.lines().collect::<Vec<_>>(),
            vec![
                "Song: Mr Jones ---",
                "Artist: Counting Crows",
                "Type: Chords ---",
                "URL: https://tabs.ultimate-guitar.com/tab/counting-crows/mr-jones-chords-1",
                "Backed up: 2024-05-01 12:30",
                "Tuning: Standard URL: https://tabs.ultimate-guitar.com/tab/other",
            ]
        );
        assert_eq!(body, "\nAm F Dm G chords here");
    }

    #[test]
    fn test_url_policy_rejects_control_characters() {
        let policy = UrlPolicy::new(SourceConfig::default());
        assert!(!policy.is_safe("https://tabs.ultimate-guitar.com/tab/x\nURL: y"));
        assert!(!policy.is_safe("https://tabs.ultimate-guitar.com/tab/\tx"));
    }
}
