//! Logging setup when the process already has a global subscriber.
//!
//! Lives in its own test binary: the global subscriber is process-wide.

use tempfile::TempDir;

#[test]
fn test_init_fails_when_subscriber_already_installed() {
    tracing_subscriber::fmt().with_test_writer().try_init().unwrap();

    let tmp = TempDir::new().unwrap();
    let err = tabvault::logging::init(&tmp.path().join("logs"), false).unwrap_err();
    assert!(err.to_string().contains("already installed"), "{}", err);

    // Nothing was recorded as the active log file, so a later call fails too.
    assert!(tabvault::logging::init(&tmp.path().join("logs"), false).is_err());
}
