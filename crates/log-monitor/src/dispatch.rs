//! 알림 전송 -- 발행된 알림을 외부 알림 수단으로 전달합니다.
//!
//! [`Dispatcher`]는 bounded 큐에서 알림을 하나씩 꺼내 [`Notifier`]로 보내며,
//! 실패하면 지수 백오프(`initial * 2^(n-1)`, 상한 `max`)로 재시도합니다.
//! 각 시도는 `attempt_timeout`으로 제한됩니다.
//! 재시도를 모두 소진하면 `delivery_failed` 감사 레코드를 남기고 다음 알림으로 넘어갑니다.
//!
//! 세션 정지 신호가 오면 대기 중인 백오프를 중단하고, 남은 알림은 한 번씩만 시도합니다.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use metrics::counter;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tailguard_core::config::{NotifierConfig, RetryBackoffConfig};
use tailguard_core::metrics as m;
use tailguard_core::pipeline::BoxFuture;

use crate::alert::Alert;
use crate::audit::{AuditHandle, AuditRecord};
use crate::error::MonitorError;

/// 외부 알림 수단
///
/// 구현체는 한 번의 전송 시도를 수행합니다. 재시도와 타임아웃은 [`Dispatcher`]가 담당합니다.
pub trait Notifier: Send + Sync + 'static {
    /// 알림 수단 이름 (로그용)
    fn name(&self) -> &str;

    /// 알림을 한 번 보냅니다.
    fn notify<'a>(&'a self, title: &'a str, body: &'a str) -> BoxFuture<'a, Result<(), MonitorError>>;
}

/// 외부 명령을 실행하는 알림 수단 (기본: `notify-send`)
///
/// 제목과 본문은 설정된 인자 뒤에 마지막 두 인자로 전달됩니다.
/// 종료 코드가 0이 아니면 실패입니다.
pub struct CommandNotifier {
    command: String,
    args: Vec<String>,
}

impl CommandNotifier {
    /// 새 명령 알림 수단을 만듭니다.
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    /// 설정에서 생성합니다.
    pub fn from_config(config: &NotifierConfig) -> Self {
        Self::new(config.command.clone(), config.args.clone())
    }
}

impl Notifier for CommandNotifier {
    fn name(&self) -> &str {
        &self.command
    }

    fn notify<'a>(&'a self, title: &'a str, body: &'a str) -> BoxFuture<'a, Result<(), MonitorError>> {
        Box::pin(async move {
            let output = tokio::process::Command::new(&self.command)
                .args(&self.args)
                .arg(title)
                .arg(body)
                .stdin(std::process::Stdio::null())
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|e| MonitorError::DeliveryFailed {
                    attempts: 1,
                    reason: format!("failed to run '{}': {e}", self.command),
                })?;

            if output.status.success() {
                Ok(())
            } else {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(MonitorError::DeliveryFailed {
                    attempts: 1,
                    reason: format!("'{}' exited with {}: {}", self.command, output.status, stderr.trim()),
                })
            }
        })
    }
}

/// 재시도 정책
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 첫 재시도 전 대기
    pub initial_backoff: Duration,
    /// 대기 상한
    pub max_backoff: Duration,
    /// 최대 시도 횟수 (첫 시도 포함)
    pub max_attempts: u32,
    /// 시도당 타임아웃
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryBackoffConfig::default())
    }
}

impl RetryPolicy {
    /// 설정에서 생성합니다.
    pub fn from_config(config: &RetryBackoffConfig) -> Self {
        Self {
            initial_backoff: Duration::from_millis(config.initial_ms),
            max_backoff: Duration::from_millis(config.max_ms),
            max_attempts: config.max_attempts.max(1),
            attempt_timeout: Duration::from_millis(config.delivery_timeout_ms),
        }
    }

    /// `retry`번째 재시도(1부터) 전의 대기 시간
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(20);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

/// 전송 통계
#[derive(Debug, Default)]
pub struct DispatchStats {
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl DispatchStats {
    /// 전송 성공 수
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// 최종 실패 수 (큐 포화 포함)
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub(crate) fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        counter!(m::DELIVERY_FAILURES_TOTAL).increment(1);
    }
}

/// 알림 전송기
pub struct Dispatcher {
    notifier: Arc<dyn Notifier>,
    policy: RetryPolicy,
    title_prefix: String,
    audit: AuditHandle,
    cancel: CancellationToken,
    stats: Arc<DispatchStats>,
}

impl Dispatcher {
    /// 새 전송기를 만듭니다.
    pub fn new(
        notifier: Arc<dyn Notifier>,
        policy: RetryPolicy,
        title_prefix: impl Into<String>,
        audit: AuditHandle,
        cancel: CancellationToken,
        stats: Arc<DispatchStats>,
    ) -> Self {
        Self {
            notifier,
            policy,
            title_prefix: title_prefix.into(),
            audit,
            cancel,
            stats,
        }
    }

    /// 알림 하나를 전송합니다. 성공 시 사용한 시도 횟수를 반환합니다.
    pub async fn deliver(&self, alert: &Alert) -> Result<u32, MonitorError> {
        let title = alert.title(&self.title_prefix);
        let max_attempts = if self.cancel.is_cancelled() {
            1
        } else {
            self.policy.max_attempts
        };
        let mut attempts = 0;
        let mut last_reason = String::from("no attempt made");

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let backoff = self.policy.backoff_for(attempt - 1);
                warn!(
                    seq = alert.seq,
                    attempt,
                    backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                    "retrying alert delivery"
                );
                tokio::select! {
                    () = self.cancel.cancelled() => {
                        last_reason = format!("{last_reason}; retries aborted by shutdown");
                        break;
                    }
                    () = tokio::time::sleep(backoff) => {}
                }
            }

            attempts = attempt;
            match tokio::time::timeout(
                self.policy.attempt_timeout,
                self.notifier.notify(&title, alert.body()),
            )
            .await
            {
                Ok(Ok(())) => {
                    counter!(m::DELIVERY_ATTEMPTS_TOTAL, m::LABEL_RESULT => "success").increment(1);
                    return Ok(attempt);
                }
                Ok(Err(e)) => {
                    counter!(m::DELIVERY_ATTEMPTS_TOTAL, m::LABEL_RESULT => "failure").increment(1);
                    last_reason = match e {
                        MonitorError::DeliveryFailed { reason, .. } => reason,
                        other => other.to_string(),
                    };
                }
                Err(_elapsed) => {
                    counter!(m::DELIVERY_ATTEMPTS_TOTAL, m::LABEL_RESULT => "failure").increment(1);
                    last_reason = format!(
                        "attempt timed out after {}ms",
                        self.policy.attempt_timeout.as_millis()
                    );
                }
            }
        }

        Err(MonitorError::DeliveryFailed {
            attempts,
            reason: last_reason,
        })
    }

    /// 큐가 닫힐 때까지 알림을 전송합니다.
    pub async fn run(self, mut rx: mpsc::Receiver<Alert>) {
        info!(notifier = self.notifier.name(), "dispatcher started");
        while let Some(alert) = rx.recv().await {
            match self.deliver(&alert).await {
                Ok(attempts) => {
                    self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                    debug!(seq = alert.seq, attempts, "alert delivered");
                }
                Err(e) => {
                    self.stats.record_failure();
                    error!(seq = alert.seq, error = %e, "alert delivery failed");
                    self.audit
                        .record(AuditRecord::delivery_failed(&alert, &e.to_string()))
                        .await;
                }
            }
        }
        info!(
            delivered = self.stats.delivered(),
            failed = self.stats.failed(),
            "dispatcher stopped"
        );
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicU32;

    /// 처음 `fail_first`번은 실패하고 이후 성공하는 테스트용 알림 수단
    pub struct MockNotifier {
        pub calls: AtomicU32,
        pub fail_first: u32,
        pub delay: Duration,
        pub sent: Mutex<Vec<(String, String)>>,
    }

    impl MockNotifier {
        pub fn new(fail_first: u32) -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail_first,
                delay: Duration::ZERO,
                sent: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Notifier for MockNotifier {
        fn name(&self) -> &str {
            "mock"
        }

        fn notify<'a>(
            &'a self,
            title: &'a str,
            body: &'a str,
        ) -> BoxFuture<'a, Result<(), MonitorError>> {
            Box::pin(async move {
                let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                if call <= self.fail_first {
                    return Err(MonitorError::DeliveryFailed {
                        attempts: 1,
                        reason: format!("mock failure {call}"),
                    });
                }
                self.sent
                    .lock()
                    .unwrap()
                    .push((title.to_owned(), body.to_owned()));
                Ok(())
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockNotifier;
    use super::*;
    use crate::audit::{AuditKind, AuditSink, spawn_audit_writer};
    use crate::collector::LogLine;
    use crate::rule::MatchedRule;

    fn alert(seq: u64) -> Alert {
        Alert {
            id: format!("id-{seq}"),
            seq,
            line: LogLine::new("/var/log/auth.log", "denied login"),
            rule: MatchedRule {
                index: 0,
                pattern: "denied".to_owned(),
            },
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            max_attempts,
            attempt_timeout: Duration::from_millis(200),
        }
    }

    fn make_dispatcher(
        notifier: Arc<MockNotifier>,
        policy: RetryPolicy,
        cancel: CancellationToken,
    ) -> (Dispatcher, tokio::task::JoinHandle<AuditSink>) {
        let (audit, audit_task) = spawn_audit_writer(AuditSink::new(None, 64), 16);
        let dispatcher = Dispatcher::new(
            notifier,
            policy,
            "tailguard alert",
            audit,
            cancel,
            Arc::new(DispatchStats::default()),
        );
        (dispatcher, audit_task)
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_millis(5000),
            max_attempts: 5,
            attempt_timeout: Duration::from_secs(5),
        };
        assert_eq!(policy.backoff_for(1), Duration::from_millis(500));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(2000));
        assert_eq!(policy.backoff_for(4), Duration::from_millis(4000));
        assert_eq!(policy.backoff_for(5), Duration::from_millis(5000));
        assert_eq!(policy.backoff_for(64), Duration::from_millis(5000));
    }

    #[test]
    fn policy_from_default_config() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_backoff, Duration::from_millis(500));
    }

    #[tokio::test]
    async fn succeeds_after_retries() {
        let notifier = Arc::new(MockNotifier::new(2));
        let (dispatcher, _audit) =
            make_dispatcher(Arc::clone(&notifier), fast_policy(3), CancellationToken::new());

        let attempts = dispatcher.deliver(&alert(1)).await.unwrap();
        assert_eq!(attempts, 3);
        assert_eq!(notifier.calls(), 3);

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent[0].0, "tailguard alert: auth.log");
        assert_eq!(sent[0].1, "denied login");
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let notifier = Arc::new(MockNotifier::new(u32::MAX));
        let (dispatcher, _audit) =
            make_dispatcher(Arc::clone(&notifier), fast_policy(3), CancellationToken::new());

        let err = dispatcher.deliver(&alert(1)).await.unwrap_err();
        assert!(matches!(err, MonitorError::DeliveryFailed { attempts: 3, .. }));
        assert_eq!(notifier.calls(), 3);
    }

    #[tokio::test]
    async fn slow_attempt_times_out() {
        let mut mock = MockNotifier::new(0);
        mock.delay = Duration::from_millis(500);
        let notifier = Arc::new(mock);
        let mut policy = fast_policy(1);
        policy.attempt_timeout = Duration::from_millis(20);
        let (dispatcher, _audit) =
            make_dispatcher(Arc::clone(&notifier), policy, CancellationToken::new());

        let err = dispatcher.deliver(&alert(1)).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn cancelled_dispatcher_tries_once() {
        let notifier = Arc::new(MockNotifier::new(u32::MAX));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (dispatcher, _audit) = make_dispatcher(Arc::clone(&notifier), fast_policy(5), cancel);

        let err = dispatcher.deliver(&alert(1)).await.unwrap_err();
        assert!(matches!(err, MonitorError::DeliveryFailed { attempts: 1, .. }));
        assert_eq!(notifier.calls(), 1);
    }

    #[tokio::test]
    async fn run_records_delivery_failures_in_audit() {
        let notifier = Arc::new(MockNotifier::new(u32::MAX));
        let (dispatcher, audit_task) =
            make_dispatcher(Arc::clone(&notifier), fast_policy(2), CancellationToken::new());
        let stats = Arc::clone(&dispatcher.stats);

        let (tx, rx) = mpsc::channel(4);
        tx.send(alert(1)).await.unwrap();
        tx.send(alert(2)).await.unwrap();
        drop(tx);
        dispatcher.run(rx).await;

        assert_eq!(stats.failed(), 2);
        assert_eq!(stats.delivered(), 0);

        let sink = audit_task.await.unwrap();
        let failed: Vec<u64> = sink
            .backlog()
            .filter(|r| r.kind == AuditKind::DeliveryFailed)
            .filter_map(|r| r.seq)
            .collect();
        assert_eq!(failed, vec![1, 2]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_notifier_reports_exit_status() {
        let ok = CommandNotifier::new("true", Vec::new());
        assert!(ok.notify("t", "b").await.is_ok());

        let failing = CommandNotifier::new("false", Vec::new());
        let err = failing.notify("t", "b").await.unwrap_err();
        assert!(matches!(err, MonitorError::DeliveryFailed { .. }));

        let missing = CommandNotifier::new("/nonexistent/tailguard-notifier", Vec::new());
        assert!(missing.notify("t", "b").await.is_err());
    }
}
