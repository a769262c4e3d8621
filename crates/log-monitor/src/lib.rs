#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//!
//! - [`collector`]: 파일 워처(`tail -F`)와 멀티플렉서
//! - [`buffer`]: 소스별 drop-oldest 라인 버퍼
//! - [`rule`]: `RegexSet` 기반 패턴 매칭 및 패턴 파일 로더
//! - [`alert`]: 알림 생성 및 중복 억제 (스로틀러)
//! - [`audit`]: JSON Lines 감사 기록 (저하 모드 포함)
//! - [`dispatch`]: 알림 전송 및 지수 백오프 재시도
//! - [`pipeline`]: 모니터링 세션 (Pipeline trait 구현)
//! - [`config`]: 세션 설정 (core 설정 변환)
//! - [`error`]: 도메인 에러 타입
//!
//! # 아키텍처
//!
//! ```text
//! FileWatcher x N -> Multiplexer -> classify -> AlertThrottler -> subscribers
//!                        |                          |
//!                   HealthEvent               AuditSink + Dispatcher
//! ```

pub mod alert;
pub mod audit;
pub mod buffer;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod pipeline;

pub mod collector;
pub mod rule;

// --- 주요 타입 re-export ---

// 세션
pub use pipeline::{MonitorSession, MonitorSessionBuilder, SessionHealth, SessionState};

// 설정
pub use config::{SessionConfig, SessionConfigBuilder};

// 에러
pub use error::MonitorError;

// 수집기
pub use collector::{
    FileWatcher, HealthEvent, HealthKind, LogLine, Multiplexer, RotationCause, SourceStatus,
    WatcherConfig, WatcherState,
};

// 규칙
pub use rule::{MatchedRule, PatternLoader, RuleSet, classify};

// 알림
pub use alert::{Admission, Alert, AlertCandidate, AlertKey, AlertThrottler};

// 감사
pub use audit::{AuditKind, AuditRecord, AuditSink};

// 전송
pub use dispatch::{CommandNotifier, Dispatcher, Notifier, RetryPolicy};

// 버퍼
pub use buffer::{BufferStats, LineBuffer};
