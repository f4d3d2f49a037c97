use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn tabvault_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_tabvault"))
}

/// Helper that answers every request with the same tab.
const HELPER_SCRIPT: &str = r#"while IFS= read -r line; do
  case "$line" in
    *'"op":"close"'*) exit 0 ;;
    *) echo '{"ok":true,"title":"Mr Jones","artist":"Counting Crows","content":"Am F Dm G chords here"}' ;;
  esac
done"#;

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[paths]
output_dir = "{root}/tabs"
manifest = "{root}/backup_manifest.json"
urls_file = "{root}/tab_urls.json"
log_dir = "{root}/logs"

[pacing]
min_delay_secs = 0.0
max_delay_secs = 0.0
jitter_secs = 0.0
delay_floor_secs = 0.0
batch_pause_secs = 0.0

[retry]
backoff_base_secs = 0.0

[fetcher]
command = ["sh", "-c", {script:?}]
timeout_secs = 10
headed = false
"#,
        root = root.display(),
        script = HELPER_SCRIPT,
    );

    let config_path = config_dir.join("tabvault.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn write_urls(root: &Path, body: &str) {
    fs::write(root.join("tab_urls.json"), body).unwrap();
}

const TWO_TABS: &str = r#"[
  {"url": "https://tabs.ultimate-guitar.com/tab/counting-crows/mr-jones-chords-1", "song_name": "Mr Jones", "band_name": "Counting Crows", "type": "Chords"},
  {"url": "https://tabs.ultimate-guitar.com/tab/counting-crows/round-here-tabs-2", "song_name": "Round Here", "band_name": "Counting Crows", "type": "Tab"}
]"#;

fn write_tab_file(root: &Path, rel: &str, url: &str) {
    let path = root.join("tabs").join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(
        &path,
        format!(
            "Song: Song\nArtist: Band\nType: Tab\nURL: {}\nBacked up: 2024-01-01 10:00\n\n---\n\ne|---0---3---|\n",
            url
        ),
    )
    .unwrap();
}

fn run_tabvault(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = tabvault_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .arg("--progress")
        .arg("off")
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run tabvault binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn manifest_json(root: &Path) -> serde_json::Value {
    let raw = fs::read_to_string(root.join("backup_manifest.json")).unwrap();
    serde_json::from_str(&raw).unwrap()
}

#[test]
fn test_status_requires_discovery_list() {
    let (tmp, config_path) = setup_test_env();
    let (_stdout, stderr, success) = run_tabvault(&config_path, &["status"]);
    assert!(!success);
    assert!(stderr.contains("not found"), "stderr: {}", stderr);
    assert!(!tmp.path().join("backup_manifest.json").exists());
}

#[test]
fn test_status_counts_pending() {
    let (tmp, config_path) = setup_test_env();
    write_urls(tmp.path(), TWO_TABS);
    let (stdout, stderr, success) = run_tabvault(&config_path, &["status"]);
    assert!(success, "stderr: {}", stderr);
    assert!(stdout.contains("Total tabs:  2"), "stdout: {}", stdout);
    assert!(stdout.contains("Pending:     2"), "stdout: {}", stdout);
    assert!(stdout.contains("Last sync:   never"), "stdout: {}", stdout);
}

#[cfg(unix)]
#[test]
fn test_backup_through_helper_process() {
    let (tmp, config_path) = setup_test_env();
    write_urls(tmp.path(), TWO_TABS);

    let (stdout, stderr, success) = run_tabvault(&config_path, &["backup"]);
    assert!(success, "stderr: {}", stderr);
    assert!(stdout.contains("Success: 2"), "stdout: {}", stdout);

    let text = fs::read_to_string(tmp.path().join("tabs/counting-crows/mr-jones-chords.txt")).unwrap();
    assert!(text.starts_with("Song: Mr Jones\nArtist: Counting Crows\n"));

    let manifest = manifest_json(tmp.path());
    assert_eq!(manifest["version"], 2);
    for (_url, record) in manifest["tabs"].as_object().unwrap() {
        assert_eq!(record["status"], "completed");
        assert!(record["file_hash"].as_str().unwrap().starts_with("sha256:"));
    }

    let log_dir = tmp.path().join("logs");
    assert_eq!(fs::read_dir(&log_dir).unwrap().count(), 1);

    // Nothing left to do: the helper is not even needed.
    let (stdout, _stderr, success) = run_tabvault(&config_path, &["sync"]);
    assert!(success);
    assert!(stdout.contains("Success: 0"), "stdout: {}", stdout);
}

#[test]
fn test_default_command_is_backup() {
    let (tmp, config_path) = setup_test_env();
    write_urls(tmp.path(), "[]");
    let (stdout, stderr, success) = run_tabvault(&config_path, &[]);
    assert!(success, "stderr: {}", stderr);
    assert!(stdout.contains("BACKUP COMPLETE"), "stdout: {}", stdout);
}

#[test]
fn test_backup_without_helper_fails() {
    let (tmp, config_path) = setup_test_env();
    write_urls(tmp.path(), TWO_TABS);
    let config = fs::read_to_string(&config_path).unwrap();
    let without_helper: String = config
        .lines()
        .filter(|l| !l.starts_with("command ="))
        .map(|l| format!("{}\n", l))
        .collect();
    fs::write(&config_path, without_helper).unwrap();

    let (_stdout, stderr, success) = run_tabvault(&config_path, &["backup"]);
    assert!(!success);
    assert!(stderr.contains("fetcher.command"), "stderr: {}", stderr);
}

#[test]
fn test_verify_empty_manifest() {
    let (tmp, config_path) = setup_test_env();
    let (stdout, stderr, success) = run_tabvault(&config_path, &["verify"]);
    assert!(success, "stderr: {}", stderr);
    assert!(stdout.contains("Total checked:  0"), "stdout: {}", stdout);
    assert!(manifest_json(tmp.path())["last_verify"].is_string());
}

#[test]
fn test_rebuild_then_verify_fix_marks_missing() {
    let (tmp, config_path) = setup_test_env();
    let url_a = "https://tabs.ultimate-guitar.com/tab/band/a-1";
    let url_b = "https://tabs.ultimate-guitar.com/tab/band/b-2";
    write_tab_file(tmp.path(), "band/a-tab.txt", url_a);
    write_tab_file(tmp.path(), "band/b-tab.txt", url_b);

    let (stdout, stderr, success) = run_tabvault(&config_path, &["rebuild-manifest", "--yes"]);
    assert!(success, "stderr: {}", stderr);
    assert!(stdout.contains("Found 2 tabs"), "stdout: {}", stdout);
    let manifest = manifest_json(tmp.path());
    assert_eq!(manifest["tabs"][url_a]["rebuilt"], true);
    assert_eq!(manifest["tabs"][url_a]["local_path"], "band/a-tab.txt");

    fs::remove_file(tmp.path().join("tabs/band/b-tab.txt")).unwrap();
    let (stdout, _stderr, success) = run_tabvault(&config_path, &["verify", "--fix"]);
    assert!(success);
    assert!(stdout.contains("Missing:        1"), "stdout: {}", stdout);

    let manifest = manifest_json(tmp.path());
    assert_eq!(manifest["tabs"][url_a]["status"], "completed");
    assert_eq!(manifest["tabs"][url_b]["status"], "failed");
    assert_eq!(manifest["tabs"][url_b]["needs_redownload"], true);
    assert_eq!(manifest["tabs"][url_b]["error"], "Verification failed: missing");
}

#[test]
fn test_rebuild_declined_keeps_manifest() {
    let (tmp, config_path) = setup_test_env();
    write_tab_file(tmp.path(), "band/a-tab.txt", "https://tabs.ultimate-guitar.com/tab/band/a-1");
    let (_s, _e, ok) = run_tabvault(&config_path, &["rebuild-manifest", "--yes"]);
    assert!(ok);
    let before = fs::read_to_string(tmp.path().join("backup_manifest.json")).unwrap();

    // stdin is empty, so the prompt reads no confirmation.
    let (stdout, _stderr, success) = run_tabvault(&config_path, &["rebuild-manifest"]);
    assert!(success);
    assert!(stdout.contains("Aborted."), "stdout: {}", stdout);
    let after = fs::read_to_string(tmp.path().join("backup_manifest.json")).unwrap();
    assert_eq!(before, after);
}

#[test]
fn test_find_orphans_lists_untracked_files() {
    let (tmp, config_path) = setup_test_env();
    write_tab_file(tmp.path(), "band/a-tab.txt", "https://tabs.ultimate-guitar.com/tab/band/a-1");
    let (_s, _e, ok) = run_tabvault(&config_path, &["rebuild-manifest", "--yes"]);
    assert!(ok);

    let (stdout, _stderr, success) = run_tabvault(&config_path, &["find-orphans"]);
    assert!(success);
    assert!(stdout.contains("No orphan files found"), "stdout: {}", stdout);

    write_tab_file(tmp.path(), "band/copy-tab.txt", "https://tabs.ultimate-guitar.com/tab/band/copy-9");
    let (stdout, _stderr, success) = run_tabvault(&config_path, &["find-orphans"]);
    assert!(success);
    assert!(stdout.contains("Found 1 orphan file(s)"), "stdout: {}", stdout);
    assert!(stdout.contains("copy-tab.txt"), "stdout: {}", stdout);
}

#[test]
fn test_rehash_skips_hashed_entries() {
    let (tmp, config_path) = setup_test_env();
    write_tab_file(tmp.path(), "band/a-tab.txt", "https://tabs.ultimate-guitar.com/tab/band/a-1");
    let (_s, _e, ok) = run_tabvault(&config_path, &["rebuild-manifest", "--yes"]);
    assert!(ok);

    let (stdout, stderr, success) = run_tabvault(&config_path, &["rehash"]);
    assert!(success, "stderr: {}", stderr);
    assert!(stdout.contains("Updated:  0"), "stdout: {}", stdout);
    assert!(stdout.contains("Skipped:  1"), "stdout: {}", stdout);
}

#[test]
fn test_unknown_progress_mode_is_rejected() {
    let (_tmp, config_path) = setup_test_env();
    let output = Command::new(tabvault_binary())
        .arg("--config")
        .arg(&config_path)
        .arg("--progress")
        .arg("loud")
        .arg("status")
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("unknown progress mode"));
}

#[test]
fn test_help_lists_commands() {
    let output = Command::new(tabvault_binary()).arg("--help").output().unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    for cmd in ["backup", "sync", "retry", "status", "verify", "rebuild-manifest", "find-orphans", "rehash"] {
        assert!(stdout.contains(cmd), "missing {} in help", cmd);
    }
}
