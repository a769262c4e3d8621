//! 파이프라인 trait -- 모니터링 세션 생명주기 정의
//!
//! 데몬은 [`Pipeline`] trait만 알고 있으면 세션을 시작/정지하고
//! 상태를 조회할 수 있습니다.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::Serialize;

use crate::error::TailguardError;

/// `Send` 가능한 boxed future
///
/// dyn 호환이 필요한 trait(예: 알림 전송)에서 사용합니다.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// 모듈 상태
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum HealthStatus {
    /// 정상
    Healthy,
    /// 동작은 하지만 일부 기능이 저하됨
    Degraded(String),
    /// 동작하지 않음
    Unhealthy(String),
}

impl HealthStatus {
    /// 정상 상태인지 확인합니다.
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// 저하 상태인지 확인합니다.
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded(_))
    }

    /// 비정상 상태인지 확인합니다.
    pub fn is_unhealthy(&self) -> bool {
        matches!(self, Self::Unhealthy(_))
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded(reason) => write!(f, "degraded: {reason}"),
            Self::Unhealthy(reason) => write!(f, "unhealthy: {reason}"),
        }
    }
}

/// 생명주기를 가진 처리 모듈
///
/// `start` → (실행) → `stop` 순서로 호출됩니다.
/// `stop`은 버퍼에 남은 데이터를 처리한 뒤 반환해야 합니다.
pub trait Pipeline: Send {
    /// 백그라운드 작업을 시작합니다.
    fn start(&mut self) -> impl Future<Output = Result<(), TailguardError>> + Send;

    /// 백그라운드 작업을 정지하고 남은 데이터를 정리합니다.
    fn stop(&mut self) -> impl Future<Output = Result<(), TailguardError>> + Send;

    /// 현재 상태를 반환합니다.
    fn health_check(&self) -> impl Future<Output = HealthStatus> + Send;
}
