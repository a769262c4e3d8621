//! Daemon configuration tests: example file, CLI overrides, env precedence.

use clap::Parser;
use serial_test::serial;
use tailguard_core::config::TailguardConfig;
use tailguard_daemon::cli::DaemonCli;
use tailguard_daemon::orchestrator::{session_config, validate_config};
use tempfile::TempDir;

#[tokio::test]
async fn test_example_config_validates() {
    let content = include_str!("../../tailguard.toml.example");
    let config = TailguardConfig::parse(content).unwrap();

    let patterns = validate_config(&config).await.unwrap();
    assert_eq!(patterns, config.monitor.patterns.len());
}

#[tokio::test]
async fn test_example_config_maps_to_session() {
    let content = include_str!("../../tailguard.toml.example");
    let config = TailguardConfig::parse(content).unwrap();

    let session = session_config(&config).await.unwrap();
    assert_eq!(session.sources.len(), 2);
    assert_eq!(session.throttle_window.as_secs(), 60);
    assert_eq!(session.alert_title, "tailguard alert");
    assert_eq!(session.retry.max_attempts, 3);
}

#[tokio::test]
#[serial]
async fn test_cli_overrides_beat_env() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tailguard.toml");
    std::fs::write(&path, "[general]\nlog_level = \"warn\"\n").unwrap();

    // SAFETY: serialised with other env-touching tests
    unsafe { std::env::set_var("TAILGUARD_GENERAL_LOG_LEVEL", "error") };
    let mut config = TailguardConfig::load(&path).await.unwrap();
    unsafe { std::env::remove_var("TAILGUARD_GENERAL_LOG_LEVEL") };
    assert_eq!(config.general.log_level, "error");

    let cli = DaemonCli::parse_from([
        "tailguard-daemon",
        "-c",
        path.to_str().unwrap(),
        "--log-level",
        "debug",
        "--pid-file",
        "/tmp/tailguard-test.pid",
    ]);
    cli.apply_overrides(&mut config);

    assert_eq!(config.general.log_level, "debug");
    assert_eq!(config.general.pid_file, "/tmp/tailguard-test.pid");
    assert_eq!(config.general.log_format, "json");
}

#[tokio::test]
async fn test_patterns_file_missing_is_an_error() {
    let mut config = TailguardConfig::default();
    config.monitor.patterns_file = "/nonexistent/tailguard/patterns.txt".to_owned();

    let err = validate_config(&config).await.unwrap_err();
    assert!(format!("{err:#}").contains("patterns"), "got: {err:#}");
}

#[tokio::test]
async fn test_empty_patterns_validate() {
    let mut config = TailguardConfig::default();
    config.monitor.patterns.clear();
    assert_eq!(validate_config(&config).await.unwrap(), 0);
}
