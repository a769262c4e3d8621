//! 설정 관리 -- tailguard.toml 파싱 및 런타임 설정
//!
//! [`TailguardConfig`]는 모든 섹션의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`TAILGUARD_MONITOR_SOURCES=/var/log/a.log,/var/log/b.log` 형식)
//! 3. 설정 파일 (`tailguard.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! 경로 존재 여부는 여기서 검사하지 않습니다. 소스 파일은 나중에 생길 수 있습니다.
//! 패턴 컴파일 역시 monitor 크레이트가 세션 빌드 시점에 수행합니다.
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), tailguard_core::error::TailguardError> {
//! use tailguard_core::config::TailguardConfig;
//!
//! let config = TailguardConfig::load("tailguard.toml").await?;
//! let config = TailguardConfig::parse("[monitor]\nsources = [\"/tmp/a.log\"]")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, TailguardError};

/// 기본 경보 패턴
pub const DEFAULT_PATTERNS: &[&str] = &[
    "error",
    "fail",
    "failed",
    "denied",
    "critical",
    "panic",
    "segfault",
    "unauthorized",
    "refused",
];

/// tailguard 통합 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TailguardConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 모니터링 세션 설정
    #[serde(default)]
    pub monitor: MonitorConfig,
    /// 알림 전송 설정
    #[serde(default)]
    pub notifier: NotifierConfig,
    /// 메트릭 엔드포인트 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl TailguardConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, TailguardError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, TailguardError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TailguardError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                TailguardError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, TailguardError> {
        toml::from_str(toml_str).map_err(|e| {
            TailguardError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `TAILGUARD_{SECTION}_{FIELD}`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "TAILGUARD_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "TAILGUARD_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.pid_file, "TAILGUARD_GENERAL_PID_FILE");
        override_u64(
            &mut self.general.health_interval_secs,
            "TAILGUARD_GENERAL_HEALTH_INTERVAL_SECS",
        );

        // Monitor
        let m = &mut self.monitor;
        override_csv(&mut m.sources, "TAILGUARD_MONITOR_SOURCES");
        override_csv(&mut m.patterns, "TAILGUARD_MONITOR_PATTERNS");
        override_string(&mut m.patterns_file, "TAILGUARD_MONITOR_PATTERNS_FILE");
        override_u64(
            &mut m.throttle_window_secs,
            "TAILGUARD_MONITOR_THROTTLE_WINDOW_SECS",
        );
        override_u64(&mut m.poll_interval_ms, "TAILGUARD_MONITOR_POLL_INTERVAL_MS");
        override_u64(
            &mut m.source_retry_interval_ms,
            "TAILGUARD_MONITOR_SOURCE_RETRY_INTERVAL_MS",
        );
        override_string(&mut m.audit_path, "TAILGUARD_MONITOR_AUDIT_PATH");
        override_u64(
            &mut m.shutdown_timeout_secs,
            "TAILGUARD_MONITOR_SHUTDOWN_TIMEOUT_SECS",
        );
        override_usize(
            &mut m.source_buffer_capacity,
            "TAILGUARD_MONITOR_SOURCE_BUFFER_CAPACITY",
        );
        override_u64(
            &mut m.retry_backoff.initial_ms,
            "TAILGUARD_MONITOR_RETRY_BACKOFF_INITIAL_MS",
        );
        override_u64(
            &mut m.retry_backoff.max_ms,
            "TAILGUARD_MONITOR_RETRY_BACKOFF_MAX_MS",
        );
        override_u32(
            &mut m.retry_backoff.max_attempts,
            "TAILGUARD_MONITOR_RETRY_BACKOFF_MAX_ATTEMPTS",
        );

        // Notifier
        override_bool(&mut self.notifier.enabled, "TAILGUARD_NOTIFIER_ENABLED");
        override_string(&mut self.notifier.command, "TAILGUARD_NOTIFIER_COMMAND");
        override_string(&mut self.notifier.title, "TAILGUARD_NOTIFIER_TITLE");

        // Metrics
        override_bool(&mut self.metrics.enabled, "TAILGUARD_METRICS_ENABLED");
        override_string(&mut self.metrics.listen_addr, "TAILGUARD_METRICS_LISTEN_ADDR");
        override_u16(&mut self.metrics.port, "TAILGUARD_METRICS_PORT");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), TailguardError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        if self.general.health_interval_secs == 0 {
            return Err(invalid("general.health_interval_secs", "must be greater than 0"));
        }

        self.monitor.validate()?;

        if self.notifier.enabled && self.notifier.command.trim().is_empty() {
            return Err(invalid(
                "notifier.command",
                "command must not be empty when notifier is enabled",
            ));
        }

        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(invalid("metrics.port", "must be greater than 0"));
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> TailguardError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason: reason.into(),
    }
    .into()
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// PID 파일 경로 (빈 문자열이면 사용하지 않음)
    pub pid_file: String,
    /// 상태 보고 주기 (초)
    pub health_interval_secs: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            pid_file: String::new(),
            health_interval_secs: 30,
        }
    }
}

/// 모니터링 세션 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// 감시할 로그 파일 경로
    pub sources: Vec<String>,
    /// 경보 패턴 (대소문자 무시, 정규식 가능)
    pub patterns: Vec<String>,
    /// 추가 패턴 파일 (한 줄에 하나, 빈 문자열이면 사용하지 않음)
    pub patterns_file: String,
    /// 중복 알림 억제 윈도우 (초, 0이면 비활성)
    pub throttle_window_secs: u64,
    /// 파일 폴링 주기 (밀리초)
    pub poll_interval_ms: u64,
    /// 접근 불가 소스 재시도 주기 (밀리초)
    pub source_retry_interval_ms: u64,
    /// 단일 파일 읽기 타임아웃 (밀리초)
    pub read_timeout_ms: u64,
    /// 최대 라인 길이 (바이트)
    pub max_line_length: usize,
    /// 폴링 1회당 최대 읽기 바이트
    pub max_read_bytes: usize,
    /// 병합 라인 채널 용량
    pub line_channel_capacity: usize,
    /// 소스별 대기 버퍼 용량 (초과 시 가장 오래된 라인부터 드롭)
    pub source_buffer_capacity: usize,
    /// 알림 전송 큐 용량
    pub alert_channel_capacity: usize,
    /// 스로틀러가 추적하는 최대 키 수
    pub max_throttle_entries: usize,
    /// 만료 키 정리 주기 (초)
    pub throttle_sweep_secs: u64,
    /// 감사 로그 경로 (빈 문자열이면 메모리 전용)
    pub audit_path: String,
    /// 감사 싱크 저하 모드 백로그 용량
    pub audit_backlog_capacity: usize,
    /// 정상 종료 대기 타임아웃 (초)
    pub shutdown_timeout_secs: u64,
    /// 알림 전송 재시도 정책
    #[serde(default)]
    pub retry_backoff: RetryBackoffConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sources: vec!["/var/log/syslog".to_owned()],
            patterns: DEFAULT_PATTERNS.iter().map(|p| (*p).to_owned()).collect(),
            patterns_file: String::new(),
            throttle_window_secs: 60,
            poll_interval_ms: 500,
            source_retry_interval_ms: 2000,
            read_timeout_ms: 5000,
            max_line_length: 64 * 1024,
            max_read_bytes: 1024 * 1024,
            line_channel_capacity: 1024,
            source_buffer_capacity: 4096,
            alert_channel_capacity: 256,
            max_throttle_entries: 100_000,
            throttle_sweep_secs: 30,
            audit_path: "/var/lib/tailguard/audit.log".to_owned(),
            audit_backlog_capacity: 10_000,
            shutdown_timeout_secs: 10,
            retry_backoff: RetryBackoffConfig::default(),
        }
    }
}

impl MonitorConfig {
    /// 모니터 섹션을 검증합니다.
    ///
    /// 소스 경로는 존재하지 않아도 됩니다 (나중에 생길 수 있음).
    pub fn validate(&self) -> Result<(), TailguardError> {
        let non_zero_u64 = [
            ("monitor.poll_interval_ms", self.poll_interval_ms),
            ("monitor.source_retry_interval_ms", self.source_retry_interval_ms),
            ("monitor.read_timeout_ms", self.read_timeout_ms),
            ("monitor.throttle_sweep_secs", self.throttle_sweep_secs),
            ("monitor.shutdown_timeout_secs", self.shutdown_timeout_secs),
        ];
        for (field, value) in non_zero_u64 {
            if value == 0 {
                return Err(invalid(field, "must be greater than 0"));
            }
        }

        let non_zero_usize = [
            ("monitor.max_line_length", self.max_line_length),
            ("monitor.max_read_bytes", self.max_read_bytes),
            ("monitor.line_channel_capacity", self.line_channel_capacity),
            ("monitor.source_buffer_capacity", self.source_buffer_capacity),
            ("monitor.alert_channel_capacity", self.alert_channel_capacity),
            ("monitor.max_throttle_entries", self.max_throttle_entries),
            ("monitor.audit_backlog_capacity", self.audit_backlog_capacity),
        ];
        for (field, value) in non_zero_usize {
            if value == 0 {
                return Err(invalid(field, "must be greater than 0"));
            }
        }

        if self.sources.iter().any(|s| s.trim().is_empty()) {
            return Err(invalid("monitor.sources", "source path must not be empty"));
        }

        self.retry_backoff.validate()
    }
}

/// 알림 전송 재시도 정책
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryBackoffConfig {
    /// 첫 재시도 대기 (밀리초)
    pub initial_ms: u64,
    /// 최대 재시도 대기 (밀리초)
    pub max_ms: u64,
    /// 최대 시도 횟수 (첫 시도 포함)
    pub max_attempts: u32,
    /// 시도 1회 타임아웃 (밀리초)
    pub delivery_timeout_ms: u64,
}

impl Default for RetryBackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 500,
            max_ms: 5000,
            max_attempts: 3,
            delivery_timeout_ms: 5000,
        }
    }
}

impl RetryBackoffConfig {
    fn validate(&self) -> Result<(), TailguardError> {
        if self.max_attempts == 0 {
            return Err(invalid(
                "monitor.retry_backoff.max_attempts",
                "must be at least 1",
            ));
        }
        if self.initial_ms > self.max_ms {
            return Err(invalid(
                "monitor.retry_backoff.initial_ms",
                format!("must not exceed max_ms ({})", self.max_ms),
            ));
        }
        if self.delivery_timeout_ms == 0 {
            return Err(invalid(
                "monitor.retry_backoff.delivery_timeout_ms",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// 알림 전송 설정
///
/// 외부 명령(기본값 `notify-send`)에 제목과 본문을 인자로 넘겨 실행합니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// 활성화 여부 (비활성 시 감사 기록만 수행)
    pub enabled: bool,
    /// 실행할 명령
    pub command: String,
    /// 제목/본문 앞에 붙일 추가 인자
    pub args: Vec<String>,
    /// 알림 제목
    pub title: String,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            command: "notify-send".to_owned(),
            args: Vec::new(),
            title: "tailguard alert".to_owned(),
        }
    }
}

/// 메트릭 엔드포인트 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 바인드 주소
    pub listen_addr: String,
    /// 포트
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9464,
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_usize(target: &mut usize, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<usize>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse usize from env var, ignoring"
            ),
        }
    }
}

fn override_u16(target: &mut u16, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u16>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u16 from env var, ignoring"
            ),
        }
    }
}

fn override_u32(target: &mut u32, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u32>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u32 from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}

fn override_csv(target: &mut Vec<String>, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val
            .split(',')
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .collect();
    }
}
