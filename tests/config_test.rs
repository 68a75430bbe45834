//! Tests for settings loading and conversion.

use std::time::Duration;

use punchclock::client::{Operation, Tier};
use punchclock::{LockTimeoutPolicy, PunchclockError, Settings};

#[test]
fn empty_file_gives_defaults() {
    let settings = Settings::from_toml_str("").unwrap();
    assert_eq!(settings.api.base_url, punchclock::client::DEFAULT_BASE_URL);
    assert!(settings.cache.enabled);
    assert_eq!(settings.cache.filename, "cache.json");
    assert_eq!(settings.cache.max_entries, 1000);
    assert_eq!(settings.cache.max_file_size_bytes, 5 * 1024 * 1024);
    assert_eq!(settings.cache.reference_ttl_secs, 7 * 24 * 60 * 60);
    assert_eq!(settings.cache.running_ttl_secs, 10);
}

#[test]
fn full_file_parses() {
    let dir = tempfile::tempdir().unwrap();
    let toml = format!(
        r#"
[api]
base_url = "http://localhost:8080/api/v1"

[cache]
filename = "work.json"
dir = "{}"
max_entries = 50
max_file_size_bytes = 4096
default_ttl_secs = 60
reference_ttl_secs = 3600
running_ttl_secs = 5
sync_debounce_ms = 250
lock_timeout_ms = 750
stale_lock_secs = 30
proceed_without_lock = true
"#,
        dir.path().display()
    );
    let settings = Settings::from_toml_str(&toml).unwrap();

    let file = settings.file_cache_config().unwrap().unwrap();
    assert_eq!(file.path, dir.path().join("work.json"));
    assert_eq!(file.max_entries, 50);
    assert_eq!(file.max_file_size_bytes, 4096);
    assert_eq!(file.default_ttl, Duration::from_secs(60));
    assert_eq!(file.sync_debounce, Duration::from_millis(250));
    assert_eq!(file.lock.timeout, Duration::from_millis(750));
    assert_eq!(file.lock.stale_after, Duration::from_secs(30));
    assert_eq!(file.lock.on_timeout, LockTimeoutPolicy::Proceed);

    let policy = settings.cache_policy();
    assert_eq!(policy.lookup(Operation::Projects).ttl, Duration::from_secs(3600));
    assert_eq!(policy.lookup(Operation::RunningEntry).ttl, Duration::from_secs(5));
}

#[test]
fn unknown_keys_are_rejected() {
    let err = Settings::from_toml_str("[cache]\nmax_entires = 5\n").unwrap_err();
    assert!(matches!(err, PunchclockError::Configuration(_)));
}

#[test]
fn zero_max_entries_is_rejected() {
    assert!(Settings::from_toml_str("[cache]\nmax_entries = 0\n").is_err());
}

#[test]
fn unsafe_filename_is_rejected() {
    let settings = Settings::from_toml_str("[cache]\nfilename = \"../../etc/passwd\"\ndir = \"/tmp\"\n").unwrap();
    assert!(settings.file_cache_config().is_err());
}

#[test]
fn disabled_cache_has_no_file_and_no_policy() {
    let settings = Settings::from_toml_str("[cache]\nenabled = false\n").unwrap();
    assert!(settings.file_cache_config().unwrap().is_none());
    let policy = settings.cache_policy();
    assert_eq!(policy.lookup(Operation::Workspaces).tier, Tier::None);
}

#[test]
fn zero_running_ttl_disables_running_cache() {
    let settings = Settings::from_toml_str("[cache]\nrunning_ttl_secs = 0\n").unwrap();
    let policy = settings.cache_policy();
    assert_eq!(policy.lookup(Operation::RunningEntry).tier, Tier::None);
    assert_eq!(policy.lookup(Operation::Tags).tier, Tier::File);
}

#[test]
fn load_reads_explicit_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[cache]\nmax_entries = 7\n").unwrap();

    let settings = Settings::load(Some(&path)).unwrap();
    assert_eq!(settings.cache.max_entries, 7);
}

#[test]
fn load_fails_for_missing_explicit_path() {
    let dir = tempfile::tempdir().unwrap();
    let err = Settings::load(Some(&dir.path().join("missing.toml"))).unwrap_err();
    assert!(err.to_string().contains("not found"));
}
