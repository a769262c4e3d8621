//! 모니터 에러 타입
//!
//! [`MonitorError`]는 모니터링 세션 내부에서 발생하는 모든 에러를 표현합니다.
//! `From<MonitorError> for TailguardError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 자연스럽게 전파할 수 있습니다.
//!
//! # 전파 정책
//! - `InvalidPattern`, `NoReadableSources`, `Config`만 세션 시작을 중단시킵니다.
//! - 소스/알림 단위 에러(`SourceUnavailable`, `AuditWriteFailed`, `DeliveryFailed`,
//!   `ChannelOverflow`)는 발생 지점에서 처리되고 상태/감사 이벤트로만 드러납니다.

use tailguard_core::error::{ConfigError, PipelineError, TailguardError};

/// 모니터 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// 소스 파일을 열 수 없음 (재시도 대상)
    #[error("source unavailable: {path}: {reason}")]
    SourceUnavailable {
        /// 소스 경로
        path: String,
        /// 실패 사유
        reason: String,
    },

    /// 패턴 컴파일 실패 (설정 로드 시점에만 발생)
    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// 문제가 된 패턴
        pattern: String,
        /// 실패 사유
        reason: String,
    },

    /// 패턴 파일 로딩 실패
    #[error("pattern file load error: {path}: {reason}")]
    PatternLoad {
        /// 패턴 파일 경로
        path: String,
        /// 실패 사유
        reason: String,
    },

    /// 읽을 수 있는 소스가 하나도 없음 (세션 시작 불가)
    #[error("no readable sources: {0}")]
    NoReadableSources(String),

    /// 감사 기록 쓰기 실패 (저하 모드로 전환)
    #[error("audit write failed: {path}: {reason}")]
    AuditWriteFailed {
        /// 감사 로그 경로
        path: String,
        /// 실패 사유
        reason: String,
    },

    /// 알림 전송 실패 (재시도 소진)
    #[error("delivery failed after {attempts} attempt(s): {reason}")]
    DeliveryFailed {
        /// 수행한 시도 횟수
        attempts: u32,
        /// 마지막 실패 사유
        reason: String,
    },

    /// 채널/버퍼 포화로 인한 손실
    #[error("channel overflow: {channel}: dropped {dropped}")]
    ChannelOverflow {
        /// 포화된 채널 이름
        channel: String,
        /// 드롭된 항목 수
        dropped: u64,
    },

    /// 이미 감시 중인 소스
    #[error("source already watched: {0}")]
    SourceExists(String),

    /// 감시 중이 아닌 소스
    #[error("unknown source: {0}")]
    UnknownSource(String),

    /// 세션이 실행 중이 아님
    #[error("session is not running")]
    NotRunning,

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 채널 통신 에러
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// 직렬화 에러
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl From<MonitorError> for TailguardError {
    fn from(err: MonitorError) -> Self {
        match err {
            MonitorError::Config { field, reason } => {
                TailguardError::Config(ConfigError::InvalidValue { field, reason })
            }
            MonitorError::InvalidPattern { .. } | MonitorError::PatternLoad { .. } => {
                TailguardError::Config(ConfigError::InvalidValue {
                    field: "monitor.patterns".to_owned(),
                    reason: err.to_string(),
                })
            }
            MonitorError::NotRunning => TailguardError::Pipeline(PipelineError::NotRunning),
            MonitorError::Io(e) => TailguardError::Io(e),
            other => TailguardError::Pipeline(PipelineError::InitFailed(other.to_string())),
        }
    }
}
