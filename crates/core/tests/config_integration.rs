//! tailguard.toml 통합 설정 테스트
//!
//! - tailguard.toml.example 파싱 테스트
//! - 부분 설정 (일부 섹션만) 로딩 테스트
//! - 환경변수 우선순위 테스트
//! - 잘못된 형식 에러 테스트

use tailguard_core::config::{DEFAULT_PATTERNS, TailguardConfig};
use tailguard_core::error::{ConfigError, TailguardError};

// =============================================================================
// tailguard.toml.example 파싱 테스트
// =============================================================================

#[test]
fn example_config_parses_successfully() {
    let content = include_str!("../../../tailguard.toml.example");
    let config = TailguardConfig::parse(content).expect("example config should parse");

    assert_eq!(config.general.log_level, "info");
    assert_eq!(config.general.pid_file, "/var/run/tailguard/tailguard.pid");
    assert_eq!(
        config.monitor.sources,
        vec!["/var/log/syslog", "/var/log/auth.log"]
    );
}

#[test]
fn example_config_passes_validation() {
    let content = include_str!("../../../tailguard.toml.example");
    let config = TailguardConfig::parse(content).expect("should parse");
    config
        .validate()
        .expect("example config should pass validation");
}

#[test]
fn example_config_matches_code_defaults() {
    let content = include_str!("../../../tailguard.toml.example");
    let example = TailguardConfig::parse(content).expect("should parse");
    let defaults = TailguardConfig::default();

    assert_eq!(example.monitor.patterns, defaults.monitor.patterns);
    assert_eq!(
        example.monitor.throttle_window_secs,
        defaults.monitor.throttle_window_secs
    );
    assert_eq!(example.monitor.poll_interval_ms, defaults.monitor.poll_interval_ms);
    assert_eq!(
        example.monitor.source_buffer_capacity,
        defaults.monitor.source_buffer_capacity
    );
    assert_eq!(example.monitor.audit_path, defaults.monitor.audit_path);
    assert_eq!(
        example.monitor.retry_backoff.max_attempts,
        defaults.monitor.retry_backoff.max_attempts
    );
    assert_eq!(example.notifier.command, defaults.notifier.command);
    assert_eq!(example.metrics.port, defaults.metrics.port);
}

#[test]
fn default_patterns_cover_common_failures() {
    for expected in ["error", "denied", "segfault", "refused"] {
        assert!(DEFAULT_PATTERNS.contains(&expected), "{expected}");
    }
}

// =============================================================================
// 부분 설정 테스트
// =============================================================================

#[test]
fn partial_config_monitor_only() {
    let toml = r#"
[monitor]
sources = ["/tmp/a.log"]
patterns = ["error", "denied"]
"#;
    let config = TailguardConfig::parse(toml).unwrap();
    config.validate().unwrap();
    assert_eq!(config.monitor.patterns.len(), 2);
    assert_eq!(config.general.log_format, "json");
    assert!(!config.notifier.enabled);
}

#[test]
fn partial_config_retry_backoff_only() {
    let toml = r#"
[monitor.retry_backoff]
initial_ms = 50
max_ms = 200
"#;
    let config = TailguardConfig::parse(toml).unwrap();
    assert_eq!(config.monitor.retry_backoff.initial_ms, 50);
    assert_eq!(config.monitor.retry_backoff.max_attempts, 3);
    assert_eq!(config.monitor.sources, vec!["/var/log/syslog"]);
}

#[test]
fn empty_pattern_list_is_accepted_at_config_level() {
    // 빈 규칙 집합은 "아무것도 매칭하지 않음"으로 동작합니다.
    let config = TailguardConfig::parse("[monitor]\npatterns = []\n").unwrap();
    config.validate().unwrap();
    assert!(config.monitor.patterns.is_empty());
}

// =============================================================================
// 환경변수 우선순위 테스트
// =============================================================================

#[test]
#[serial_test::serial]
fn env_override_takes_precedence_over_toml() {
    let mut config = TailguardConfig::parse("[monitor]\nthrottle_window_secs = 5\n").unwrap();

    // SAFETY: serial 테스트에서만 환경변수를 조작합니다.
    unsafe { std::env::set_var("TAILGUARD_MONITOR_THROTTLE_WINDOW_SECS", "90") };
    config.apply_env_overrides();
    unsafe { std::env::remove_var("TAILGUARD_MONITOR_THROTTLE_WINDOW_SECS") };

    assert_eq!(config.monitor.throttle_window_secs, 90);
}

#[test]
#[serial_test::serial]
fn env_override_patterns_csv() {
    let mut config = TailguardConfig::default();

    // SAFETY: serial 테스트에서만 환경변수를 조작합니다.
    unsafe { std::env::set_var("TAILGUARD_MONITOR_PATTERNS", "oom,kernel panic") };
    config.apply_env_overrides();
    unsafe { std::env::remove_var("TAILGUARD_MONITOR_PATTERNS") };

    assert_eq!(config.monitor.patterns, vec!["oom", "kernel panic"]);
}

#[tokio::test]
#[serial_test::serial]
async fn load_applies_env_and_validates() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tailguard.toml");
    std::fs::write(&path, "[general]\nlog_level = \"debug\"\n").unwrap();

    // SAFETY: serial 테스트에서만 환경변수를 조작합니다.
    unsafe { std::env::set_var("TAILGUARD_GENERAL_LOG_LEVEL", "loud") };
    let result = TailguardConfig::load(&path).await;
    unsafe { std::env::remove_var("TAILGUARD_GENERAL_LOG_LEVEL") };

    let err = result.expect_err("invalid env log level must fail validation");
    assert!(err.to_string().contains("log_level"));
}

// =============================================================================
// 에러 테스트
// =============================================================================

#[test]
fn wrong_type_is_parse_error() {
    let err = TailguardConfig::parse("[monitor]\npoll_interval_ms = \"fast\"\n").unwrap_err();
    assert!(matches!(
        err,
        TailguardError::Config(ConfigError::ParseFailed { .. })
    ));
}
