use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file consulted when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "./config/tabvault.toml";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub pacing: PacingConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub source: SourceConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_manifest")]
    pub manifest: PathBuf,
    #[serde(default = "default_urls_file")]
    pub urls_file: PathBuf,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            manifest: default_manifest(),
            urls_file: default_urls_file(),
            log_dir: default_log_dir(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("tabs")
}
fn default_manifest() -> PathBuf {
    PathBuf::from("backup_manifest.json")
}
fn default_urls_file() -> PathBuf {
    PathBuf::from("tab_urls.json")
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

#[derive(Debug, Deserialize, Clone)]
pub struct PacingConfig {
    #[serde(default = "default_min_delay")]
    pub min_delay_secs: f64,
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: f64,
    #[serde(default = "default_jitter")]
    pub jitter_secs: f64,
    #[serde(default = "default_delay_floor")]
    pub delay_floor_secs: f64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_pause")]
    pub batch_pause_secs: f64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            min_delay_secs: default_min_delay(),
            max_delay_secs: default_max_delay(),
            jitter_secs: default_jitter(),
            delay_floor_secs: default_delay_floor(),
            batch_size: default_batch_size(),
            batch_pause_secs: default_batch_pause(),
        }
    }
}

impl PacingConfig {
    pub fn batch_pause(&self) -> Duration {
        Duration::try_from_secs_f64(self.batch_pause_secs).unwrap_or(Duration::MAX)
    }
}

fn default_min_delay() -> f64 {
    5.0
}
fn default_max_delay() -> f64 {
    15.0
}
fn default_jitter() -> f64 {
    2.0
}
fn default_delay_floor() -> f64 {
    1.0
}
fn default_batch_size() -> usize {
    20
}
fn default_batch_pause() -> f64 {
    60.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_secs: default_backoff_base(),
        }
    }
}

impl RetryConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::try_from_secs_f64(self.backoff_base_secs).unwrap_or(Duration::MAX)
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base() -> f64 {
    30.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetcherConfig {
    /// Helper program and arguments. Required only for backup runs.
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default = "default_rotation_size")]
    pub rotation_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_headed")]
    pub headed: bool,
    #[serde(default = "default_user_agents")]
    pub user_agents: Vec<String>,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            rotation_size: default_rotation_size(),
            timeout_secs: default_timeout_secs(),
            headed: default_headed(),
            user_agents: default_user_agents(),
        }
    }
}

fn default_rotation_size() -> usize {
    50
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_headed() -> bool {
    true
}
fn default_user_agents() -> Vec<String> {
    vec![
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15".to_string(),
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0".to_string(),
    ]
}

/// Allow-list applied to every tab URL before it is fetched or recorded.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    #[serde(default = "default_scheme")]
    pub scheme: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            scheme: default_scheme(),
            host: default_host(),
            path_prefix: default_path_prefix(),
        }
    }
}

fn default_scheme() -> String {
    "https".to_string()
}
fn default_host() -> String {
    "tabs.ultimate-guitar.com".to_string()
}
fn default_path_prefix() -> String {
    "/tab/".to_string()
}

/// Load from an explicit path, or fall back to [`DEFAULT_CONFIG_PATH`] and
/// then to built-in defaults.
pub fn resolve_config(explicit: Option<&Path>) -> Result<Config> {
    match explicit {
        Some(path) => load_config(path),
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_PATH);
            if default_path.exists() {
                load_config(default_path)
            } else {
                Ok(Config::default())
            }
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let p = &config.pacing;
    for (name, value) in [
        ("pacing.min_delay_secs", p.min_delay_secs),
        ("pacing.max_delay_secs", p.max_delay_secs),
        ("pacing.jitter_secs", p.jitter_secs),
        ("pacing.delay_floor_secs", p.delay_floor_secs),
        ("pacing.batch_pause_secs", p.batch_pause_secs),
        ("retry.backoff_base_secs", config.retry.backoff_base_secs),
    ] {
        // Rejects NaN, negatives and values too large for a Duration.
        if Duration::try_from_secs_f64(value).is_err() {
            anyhow::bail!("{} must be a non-negative number of seconds", name);
        }
    }

    if p.min_delay_secs > p.max_delay_secs {
        anyhow::bail!("pacing.min_delay_secs must be <= pacing.max_delay_secs");
    }

    if p.batch_size == 0 {
        anyhow::bail!("pacing.batch_size must be > 0");
    }

    if config.fetcher.rotation_size == 0 {
        anyhow::bail!("fetcher.rotation_size must be > 0");
    }

    if config.fetcher.timeout_secs == 0 {
        anyhow::bail!("fetcher.timeout_secs must be > 0");
    }

    if config.source.host.is_empty() {
        anyhow::bail!("source.host must not be empty");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("tabvault.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let tmp = TempDir::new().unwrap();
        let cfg = load_config(&write(&tmp, "")).unwrap();
        assert_eq!(cfg.paths.output_dir, PathBuf::from("tabs"));
        assert_eq!(cfg.retry.max_retries, 3);
        assert_eq!(cfg.retry.backoff_base(), Duration::from_secs(30));
        assert_eq!(cfg.pacing.batch_size, 20);
        assert_eq!(cfg.fetcher.rotation_size, 50);
        assert_eq!(cfg.fetcher.user_agents.len(), 4);
        assert_eq!(cfg.source.host, "tabs.ultimate-guitar.com");
    }

    #[test]
    fn test_overrides() {
        let tmp = TempDir::new().unwrap();
        let cfg = load_config(&write(
            &tmp,
            r#"
[paths]
output_dir = "/srv/tabs"

[retry]
max_retries = 5
backoff_base_secs = 0.5

[fetcher]
command = ["node", "fetch-tab.mjs"]
"#,
        ))
        .unwrap();
        assert_eq!(cfg.paths.output_dir, PathBuf::from("/srv/tabs"));
        assert_eq!(cfg.paths.manifest, PathBuf::from("backup_manifest.json"));
        assert_eq!(cfg.retry.max_retries, 5);
        assert_eq!(cfg.retry.backoff_base(), Duration::from_millis(500));
        assert_eq!(cfg.fetcher.command, vec!["node", "fetch-tab.mjs"]);
    }

    #[test]
    fn test_rejects_inverted_delays() {
        let tmp = TempDir::new().unwrap();
        let err = load_config(&write(
            &tmp,
            "[pacing]\nmin_delay_secs = 10.0\nmax_delay_secs = 2.0\n",
        ))
        .unwrap_err();
        assert!(err.to_string().contains("min_delay_secs"));
    }

    #[test]
    fn test_rejects_delays_beyond_duration_range() {
        let tmp = TempDir::new().unwrap();
        for body in [
            "[retry]\nbackoff_base_secs = 1e30\n",
            "[pacing]\nbatch_pause_secs = 1e20\n",
            "[pacing]\njitter_secs = -0.5\n",
            "[pacing]\nmin_delay_secs = nan\n",
        ] {
            let err = load_config(&write(&tmp, body)).unwrap_err();
            assert!(
                err.to_string().contains("non-negative number of seconds"),
                "{}: {}",
                body,
                err
            );
        }
    }

    #[test]
    fn test_rejects_zero_batch() {
        let tmp = TempDir::new().unwrap();
        assert!(load_config(&write(&tmp, "[pacing]\nbatch_size = 0\n")).is_err());
    }

    #[test]
    fn test_missing_explicit_file_errors() {
        let tmp = TempDir::new().unwrap();
        assert!(resolve_config(Some(&tmp.path().join("absent.toml"))).is_err());
    }
}
