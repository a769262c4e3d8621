//! 로그 수집 모듈 -- 파일 소스에서 라인을 읽어 공유 스트림으로 합칩니다.
//!
//! # 구성
//! - [`FileWatcher`]: 단일 파일 감시 (`tail -F` 방식, 로테이션 추적)
//! - [`Multiplexer`]: 여러 워처를 소유하고 라인/헬스 스트림을 하나로 병합
//!
//! # 아키텍처
//! 각 워처는 자체 tokio 태스크에서 실행되며, 읽은 라인을
//! `tokio::mpsc::Sender<LogLine>` 채널로, 상태 변화를
//! `tokio::mpsc::Sender<HealthEvent>` 채널로 전달합니다.
//! 소스별 최신 상태는 `tokio::sync::watch` 채널로 게시됩니다.

pub mod file;
pub mod multiplexer;

pub use file::{FileIdentity, FileWatcher, PollOutcome, WatcherConfig};
pub use multiplexer::{MuxStreams, Multiplexer};

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// 소스에서 읽은 한 줄
///
/// 줄바꿈 문자는 제거된 상태이며, 잘못된 UTF-8은 대체 문자로 치환됩니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogLine {
    /// 라인을 읽은 소스 경로
    pub source: PathBuf,
    /// 라인 텍스트 (줄바꿈 제외)
    pub text: String,
    /// 읽은 시각
    pub captured_at: DateTime<Utc>,
}

impl LogLine {
    /// 현재 시각으로 새 라인을 생성합니다.
    pub fn new(source: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            text: text.into(),
            captured_at: Utc::now(),
        }
    }
}

/// 워처 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatcherState {
    /// 파일이 없거나 열 수 없어 재시도 대기 중
    Waiting,
    /// 파일이 열려 있고 추가분을 읽는 중
    Open,
    /// 로테이션 감지 후 새 파일을 여는 중
    Reopening,
    /// 정지됨
    Stopped,
}

impl fmt::Display for WatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting => write!(f, "waiting"),
            Self::Open => write!(f, "open"),
            Self::Reopening => write!(f, "reopening"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// 소스별 상태 스냅샷
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceStatus {
    /// 소스 경로
    pub path: PathBuf,
    /// 현재 워처 상태
    pub state: WatcherState,
    /// 지금까지 읽은 라인 수
    pub lines_read: u64,
    /// 감지된 로테이션 수
    pub rotations: u64,
    /// 버퍼 포화로 드롭된 라인 수
    pub dropped: u64,
    /// 헬스 채널 포화로 버려진 이벤트 수
    pub health_events_dropped: u64,
    /// 마지막 에러 (정상 상태로 돌아오면 None)
    pub last_error: Option<String>,
}

impl SourceStatus {
    /// 초기 상태(Waiting)의 스냅샷을 생성합니다.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: WatcherState::Waiting,
            lines_read: 0,
            rotations: 0,
            dropped: 0,
            health_events_dropped: 0,
            last_error: None,
        }
    }
}

/// 로테이션 원인
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationCause {
    /// 같은 파일이 오프셋보다 작아짐
    Truncated,
    /// 경로가 다른 파일을 가리키거나 사라짐
    Replaced,
}

impl RotationCause {
    /// 메트릭 레이블 값
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Truncated => "truncated",
            Self::Replaced => "replaced",
        }
    }
}

impl fmt::Display for RotationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 헬스 이벤트 종류
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HealthKind {
    /// 소스를 열 수 없음 (Waiting 진입 시 한 번만 보고)
    SourceUnavailable {
        /// 실패 사유
        reason: String,
    },
    /// 접근 불가였던 소스가 다시 열림
    SourceAvailable,
    /// 로테이션 감지
    Rotated {
        /// 로테이션 원인
        cause: RotationCause,
    },
    /// 소스 버퍼 포화로 라인 드롭
    Overflow {
        /// 이번에 드롭된 라인 수
        dropped: u64,
    },
    /// 워처 정지
    Stopped,
}

impl fmt::Display for HealthKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SourceUnavailable { reason } => write!(f, "source unavailable: {reason}"),
            Self::SourceAvailable => write!(f, "source available"),
            Self::Rotated { cause } => write!(f, "rotated ({cause})"),
            Self::Overflow { dropped } => write!(f, "overflow: dropped {dropped} line(s)"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// 소스 헬스 이벤트
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthEvent {
    /// 이벤트가 발생한 소스
    pub source: PathBuf,
    /// 이벤트 종류
    pub kind: HealthKind,
    /// 발생 시각
    pub at: DateTime<Utc>,
}

impl HealthEvent {
    /// 현재 시각으로 새 이벤트를 생성합니다.
    pub fn new(source: impl Into<PathBuf>, kind: HealthKind) -> Self {
        Self {
            source: source.into(),
            kind,
            at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_line_keeps_source_and_text() {
        let line = LogLine::new("/var/log/a.log", "hello");
        assert_eq!(line.source, PathBuf::from("/var/log/a.log"));
        assert_eq!(line.text, "hello");
    }

    #[test]
    fn source_status_starts_waiting() {
        let status = SourceStatus::new("/tmp/x.log");
        assert_eq!(status.state, WatcherState::Waiting);
        assert_eq!(status.lines_read, 0);
        assert!(status.last_error.is_none());
    }

    #[test]
    fn watcher_state_display() {
        assert_eq!(WatcherState::Open.to_string(), "open");
        assert_eq!(WatcherState::Reopening.to_string(), "reopening");
    }

    #[test]
    fn health_kind_display() {
        let kind = HealthKind::Rotated {
            cause: RotationCause::Truncated,
        };
        assert_eq!(kind.to_string(), "rotated (truncated)");
        let kind = HealthKind::Overflow { dropped: 3 };
        assert!(kind.to_string().contains('3'));
    }

    #[test]
    fn health_kind_serializes_with_tag() {
        let kind = HealthKind::SourceUnavailable {
            reason: "No such file or directory".to_owned(),
        };
        let json = serde_json::to_string(&kind).unwrap();
        assert!(json.contains("\"kind\":\"source_unavailable\""));
        assert!(json.contains("No such file"));
    }
}
