//! 모니터링 세션 설정
//!
//! [`SessionConfig`]는 core의 [`MonitorConfig`](tailguard_core::config::MonitorConfig)를
//! 런타임 타입(`Duration`, `PathBuf`)으로 변환한 세션 전용 설정입니다.
//! 패턴 파일은 여기서 읽지 않습니다. 호출자가
//! [`PatternLoader::resolve`](crate::rule::PatternLoader::resolve)로 합친 패턴을 넣어야 합니다.
//!
//! # 사용 예시
//! ```ignore
//! use tailguard_core::config::TailguardConfig;
//! use tailguard_monitor::config::SessionConfig;
//!
//! let core_config = TailguardConfig::default();
//! let config = SessionConfig::from_core(&core_config.monitor);
//! ```

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use tailguard_core::config::MonitorConfig;

use crate::collector::WatcherConfig;
use crate::dispatch::RetryPolicy;
use crate::error::MonitorError;

/// 헬스 이벤트 채널 용량
const HEALTH_CHANNEL_CAPACITY: usize = 256;

/// 모니터링 세션 설정
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// 감시할 소스 경로 (등록 순서)
    pub sources: Vec<PathBuf>,
    /// 경보 패턴 (설정 순서)
    pub patterns: Vec<String>,
    /// 중복 알림 억제 윈도우 (0이면 비활성)
    pub throttle_window: Duration,
    /// 스로틀러 최대 키 수
    pub max_throttle_entries: usize,
    /// 만료 키 정리 주기
    pub throttle_sweep_interval: Duration,
    /// 워처 설정
    pub watcher: WatcherConfig,
    /// 병합 라인 채널 용량
    pub line_channel_capacity: usize,
    /// 헬스 이벤트 채널 용량
    pub health_channel_capacity: usize,
    /// 알림 전송 큐 용량 (구독자 broadcast 용량도 같음)
    pub alert_channel_capacity: usize,
    /// 감사 로그 경로 (None이면 메모리 전용)
    pub audit_path: Option<PathBuf>,
    /// 감사 백로그 용량
    pub audit_backlog_capacity: usize,
    /// 알림 제목 접두어
    pub alert_title: String,
    /// 알림 재시도 정책
    pub retry: RetryPolicy,
    /// 정상 종료 대기 타임아웃
    pub shutdown_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_core(&MonitorConfig::default())
    }
}

impl SessionConfig {
    /// core 설정에서 세션 설정을 생성합니다.
    pub fn from_core(core: &MonitorConfig) -> Self {
        let audit_path = if core.audit_path.trim().is_empty() {
            None
        } else {
            Some(PathBuf::from(&core.audit_path))
        };

        Self {
            sources: core.sources.iter().map(PathBuf::from).collect(),
            patterns: core.patterns.clone(),
            throttle_window: Duration::from_secs(core.throttle_window_secs),
            max_throttle_entries: core.max_throttle_entries,
            throttle_sweep_interval: Duration::from_secs(core.throttle_sweep_secs),
            watcher: WatcherConfig {
                poll_interval: Duration::from_millis(core.poll_interval_ms),
                retry_interval: Duration::from_millis(core.source_retry_interval_ms),
                read_timeout: Duration::from_millis(core.read_timeout_ms),
                max_line_length: core.max_line_length,
                max_read_bytes: core.max_read_bytes,
                buffer_capacity: core.source_buffer_capacity,
            },
            line_channel_capacity: core.line_channel_capacity,
            health_channel_capacity: HEALTH_CHANNEL_CAPACITY,
            alert_channel_capacity: core.alert_channel_capacity,
            audit_path,
            audit_backlog_capacity: core.audit_backlog_capacity,
            alert_title: "tailguard alert".to_owned(),
            retry: RetryPolicy::from_config(&core.retry_backoff),
            shutdown_timeout: Duration::from_secs(core.shutdown_timeout_secs),
        }
    }

    /// 새 빌더를 생성합니다.
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::new()
    }

    /// 설정값의 유효성을 검증합니다.
    ///
    /// 소스가 비어 있는 것은 허용합니다 (시작 시 `NoReadableSources`로 보고).
    pub fn validate(&self) -> Result<(), MonitorError> {
        let durations = [
            ("watcher.poll_interval", self.watcher.poll_interval),
            ("watcher.retry_interval", self.watcher.retry_interval),
            ("watcher.read_timeout", self.watcher.read_timeout),
            ("throttle_sweep_interval", self.throttle_sweep_interval),
            ("retry.attempt_timeout", self.retry.attempt_timeout),
            ("shutdown_timeout", self.shutdown_timeout),
        ];
        for (field, value) in durations {
            if value.is_zero() {
                return Err(invalid(field, "must be greater than 0"));
            }
        }

        let sizes = [
            ("watcher.max_line_length", self.watcher.max_line_length),
            ("watcher.max_read_bytes", self.watcher.max_read_bytes),
            ("watcher.buffer_capacity", self.watcher.buffer_capacity),
            ("line_channel_capacity", self.line_channel_capacity),
            ("health_channel_capacity", self.health_channel_capacity),
            ("alert_channel_capacity", self.alert_channel_capacity),
            ("max_throttle_entries", self.max_throttle_entries),
            ("audit_backlog_capacity", self.audit_backlog_capacity),
        ];
        for (field, value) in sizes {
            if value == 0 {
                return Err(invalid(field, "must be greater than 0"));
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "must be at least 1"));
        }
        if self.retry.initial_backoff > self.retry.max_backoff {
            return Err(invalid(
                "retry.initial_backoff",
                "must not exceed retry.max_backoff",
            ));
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            if source.as_os_str().is_empty() {
                return Err(invalid("sources", "source path must not be empty"));
            }
            if !seen.insert(source) {
                return Err(invalid(
                    "sources",
                    format!("duplicate source '{}'", source.display()),
                ));
            }
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> MonitorError {
    MonitorError::Config {
        field: field.to_owned(),
        reason: reason.into(),
    }
}

/// 세션 설정 빌더
#[derive(Default)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 감시할 소스를 설정합니다.
    pub fn sources<I, P>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.config.sources = sources.into_iter().map(Into::into).collect();
        self
    }

    /// 경보 패턴을 설정합니다.
    pub fn patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// 중복 억제 윈도우를 설정합니다.
    pub fn throttle_window(mut self, window: Duration) -> Self {
        self.config.throttle_window = window;
        self
    }

    /// 폴링 주기를 설정합니다.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.watcher.poll_interval = interval;
        self
    }

    /// 접근 불가 소스 재시도 주기를 설정합니다.
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.config.watcher.retry_interval = interval;
        self
    }

    /// 소스별 버퍼 용량을 설정합니다.
    pub fn source_buffer_capacity(mut self, capacity: usize) -> Self {
        self.config.watcher.buffer_capacity = capacity;
        self
    }

    /// 알림 큐 용량을 설정합니다.
    pub fn alert_channel_capacity(mut self, capacity: usize) -> Self {
        self.config.alert_channel_capacity = capacity;
        self
    }

    /// 감사 로그 경로를 설정합니다. `None`이면 메모리 전용.
    pub fn audit_path(mut self, path: Option<PathBuf>) -> Self {
        self.config.audit_path = path;
        self
    }

    /// 알림 제목 접두어를 설정합니다.
    pub fn alert_title(mut self, title: impl Into<String>) -> Self {
        self.config.alert_title = title.into();
        self
    }

    /// 재시도 정책을 설정합니다.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    /// 정상 종료 타임아웃을 설정합니다.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    /// 설정을 검증하고 반환합니다.
    pub fn build(self) -> Result<SessionConfig, MonitorError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
