//! 모니터링 세션 -- 워처, 매처, 스로틀러, 감사, 전송기를 하나로 조립합니다.
//!
//! # 데이터 흐름
//! ```text
//! FileWatcher x N --mpsc--> Coordinator --(classify)--> AlertThrottler
//!        |                       |                          |
//!   HealthEvent --mpsc----------+                    Emit / Suppress
//!                                |                          |
//!                           AuditWriter <------------------+---> broadcast (subscribe)
//!                                ^                          |
//!                                +------ Dispatcher <--mpsc-+
//! ```
//!
//! # 종료 순서
//! 세션 토큰을 취소하면 워처가 마지막 폴링 후 라인을 흘려보내고 종료하며,
//! 라인 채널이 닫히면 코디네이터가, 전송 큐가 닫히면 전송기가,
//! 모든 감사 핸들이 해제되면 감사 작성기가 차례로 종료합니다.
//! 전체 과정은 `shutdown_timeout`으로 제한되고, 초과 시 남은 태스크를 중단하고
//! 손실 종료를 로그로 남깁니다.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use metrics::{counter, gauge};
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tailguard_core::error::{PipelineError, TailguardError};
use tailguard_core::metrics as m;
use tailguard_core::pipeline::{HealthStatus, Pipeline};

use crate::alert::{Admission, Alert, AlertCandidate, AlertThrottler};
use crate::audit::{AuditHandle, AuditRecord, AuditSink, AuditStats, spawn_audit_writer};
use crate::collector::{
    HealthEvent, HealthKind, LogLine, Multiplexer, MuxStreams, SourceStatus, WatcherState,
};
use crate::config::SessionConfig;
use crate::dispatch::{DispatchStats, Dispatcher, Notifier};
use crate::error::MonitorError;
use crate::rule::{RuleSet, classify};

/// 세션 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// 생성됨, 아직 시작 전
    Initialized,
    /// 실행 중
    Running,
    /// 정지됨 (다시 시작 가능)
    Stopped,
}

#[derive(Debug, Default)]
struct SessionCounters {
    lines_observed: AtomicU64,
    alerts_emitted: AtomicU64,
    alerts_suppressed: AtomicU64,
    /// 마지막으로 발행된 알림 순번 (재시작 후에도 이어짐)
    last_seq: AtomicU64,
}

/// 세션 상태 스냅샷
#[derive(Debug, Clone, Serialize)]
pub struct SessionHealth {
    /// 세션 ID
    pub session_id: String,
    /// 세션 상태
    pub state: SessionState,
    /// 종합 상태
    pub status: HealthStatus,
    /// 소스별 상태 (등록 순서)
    pub sources: Vec<SourceStatus>,
    /// 활성 패턴 수
    pub patterns: usize,
    /// 관찰된 라인 수
    pub lines_observed: u64,
    /// 발행된 알림 수
    pub alerts_emitted: u64,
    /// 억제된 알림 수
    pub alerts_suppressed: u64,
    /// 전송 성공 수
    pub deliveries_succeeded: u64,
    /// 전송 실패 수
    pub deliveries_failed: u64,
    /// 감사 싱크 저하 여부
    pub audit_degraded: bool,
    /// 감사 메모리 백로그 길이
    pub audit_backlog: u64,
}

/// 모니터링 세션
///
/// # 사용 예시
/// ```ignore
/// let mut session = MonitorSession::builder()
///     .config(config)
///     .notifier(Arc::new(CommandNotifier::from_config(&notifier_config)))
///     .build()?;
/// session.start().await?;
/// let mut alerts = session.subscribe();
/// ```
pub struct MonitorSession {
    id: String,
    config: SessionConfig,
    state: SessionState,
    rules_tx: watch::Sender<Arc<RuleSet>>,
    alert_tx: broadcast::Sender<Alert>,
    notifier: Option<Arc<dyn Notifier>>,
    cancel: CancellationToken,
    mux: Option<Multiplexer>,
    audit_stats: Option<Arc<AuditStats>>,
    dispatch_stats: Arc<DispatchStats>,
    counters: Arc<SessionCounters>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    audit_task: Option<JoinHandle<AuditSink>>,
}

impl MonitorSession {
    /// 새 빌더를 생성합니다.
    pub fn builder() -> MonitorSessionBuilder {
        MonitorSessionBuilder::new()
    }

    /// 세션을 만들고 바로 시작합니다.
    ///
    /// # Errors
    /// - `InvalidPattern`, `Config`: 설정 오류
    /// - `NoReadableSources`: 읽을 수 있는 소스가 없음
    pub async fn launch(
        config: SessionConfig,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> Result<Self, MonitorError> {
        let mut builder = Self::builder().config(config);
        if let Some(notifier) = notifier {
            builder = builder.notifier(notifier);
        }
        let mut session = builder.build()?;
        session.spawn_tasks().await?;
        Ok(session)
    }

    /// 세션 ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// 현재 상태
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// 세션 설정
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// 발행되는 알림을 구독합니다.
    ///
    /// 구독자가 느리면 오래된 알림부터 건너뜁니다 (`RecvError::Lagged`).
    pub fn subscribe(&self) -> broadcast::Receiver<Alert> {
        self.alert_tx.subscribe()
    }

    /// 규칙 세트를 교체합니다. 다음 라인부터 적용됩니다.
    ///
    /// 컴파일에 실패하면 기존 규칙을 유지합니다.
    pub fn reload_rules<I, S>(&self, patterns: I) -> Result<usize, MonitorError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let rules = RuleSet::compile(patterns)?;
        let count = rules.len();
        self.rules_tx.send_replace(Arc::new(rules));
        gauge!(m::PATTERNS_LOADED).set(count as f64);
        info!(session_id = %self.id, patterns = count, "rule set reloaded");
        Ok(count)
    }

    /// 실행 중에 소스를 추가합니다.
    pub fn add_source(&mut self, path: impl AsRef<std::path::Path>) -> Result<(), MonitorError> {
        match (self.state, self.mux.as_mut()) {
            (SessionState::Running, Some(mux)) => mux.add_source(path),
            _ => Err(MonitorError::NotRunning),
        }
    }

    /// 실행 중에 소스를 제거합니다.
    pub async fn remove_source(
        &mut self,
        path: impl AsRef<std::path::Path>,
    ) -> Result<(), MonitorError> {
        match (self.state, self.mux.as_mut()) {
            (SessionState::Running, Some(mux)) => mux.remove_source(path).await,
            _ => Err(MonitorError::NotRunning),
        }
    }

    /// 상태 스냅샷을 반환합니다.
    pub fn health(&self) -> SessionHealth {
        let (audit_degraded, audit_backlog) = self
            .audit_stats
            .as_ref()
            .map(|s| (s.is_degraded(), s.backlog_len()))
            .unwrap_or_default();

        SessionHealth {
            session_id: self.id.clone(),
            state: self.state,
            status: self.status(),
            sources: self.mux.as_ref().map(Multiplexer::statuses).unwrap_or_default(),
            patterns: self.rules_tx.borrow().len(),
            lines_observed: self.counters.lines_observed.load(Ordering::Relaxed),
            alerts_emitted: self.counters.alerts_emitted.load(Ordering::Relaxed),
            alerts_suppressed: self.counters.alerts_suppressed.load(Ordering::Relaxed),
            deliveries_succeeded: self.dispatch_stats.delivered(),
            deliveries_failed: self.dispatch_stats.failed(),
            audit_degraded,
            audit_backlog,
        }
    }

    fn status(&self) -> HealthStatus {
        match self.state {
            SessionState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            SessionState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
            SessionState::Running => {
                let statuses = self.mux.as_ref().map(Multiplexer::statuses).unwrap_or_default();
                let waiting: Vec<String> = statuses
                    .iter()
                    .filter(|s| s.state != WatcherState::Open)
                    .map(|s| s.path.display().to_string())
                    .collect();

                if self.audit_stats.as_ref().is_some_and(|s| s.is_degraded()) {
                    HealthStatus::Degraded("audit sink degraded (memory only)".to_owned())
                } else if !statuses.is_empty() && waiting.len() == statuses.len() {
                    HealthStatus::Degraded("no source currently readable".to_owned())
                } else if !waiting.is_empty() {
                    HealthStatus::Degraded(format!("sources not open: {}", waiting.join(", ")))
                } else {
                    HealthStatus::Healthy
                }
            }
        }
    }

    async fn spawn_tasks(&mut self) -> Result<(), MonitorError> {
        let cancel = CancellationToken::new();
        let (mux, streams) = Multiplexer::start(
            &self.config.sources,
            self.config.watcher.clone(),
            self.config.line_channel_capacity,
            self.config.health_channel_capacity,
            cancel.child_token(),
        )
        .await?;

        let sink = AuditSink::new(
            self.config.audit_path.clone(),
            self.config.audit_backlog_capacity,
        );
        self.audit_stats = Some(sink.stats());
        let (audit, audit_task) = spawn_audit_writer(sink, self.config.line_channel_capacity);

        let (dispatch_tx, dispatcher) = match &self.notifier {
            Some(notifier) => {
                let (tx, rx) = mpsc::channel(self.config.alert_channel_capacity);
                let dispatcher = Dispatcher::new(
                    Arc::clone(notifier),
                    self.config.retry.clone(),
                    self.config.alert_title.clone(),
                    audit.clone(),
                    cancel.child_token(),
                    Arc::clone(&self.dispatch_stats),
                );
                (Some(tx), Some((dispatcher, rx)))
            }
            None => (None, None),
        };

        let coordinator = Coordinator {
            session_id: self.id.clone(),
            rules: self.rules_tx.subscribe(),
            throttler: AlertThrottler::new(
                self.config.throttle_window,
                self.config.max_throttle_entries,
            )
            .resume_after(self.counters.last_seq.load(Ordering::Acquire)),
            audit,
            dispatch_tx,
            alert_tx: self.alert_tx.clone(),
            counters: Arc::clone(&self.counters),
            dispatch_stats: Arc::clone(&self.dispatch_stats),
            sweep_interval: self.config.throttle_sweep_interval,
        };
        self.tasks
            .push(("coordinator", tokio::spawn(coordinator.run(streams))));
        if let Some((dispatcher, rx)) = dispatcher {
            self.tasks.push(("dispatcher", tokio::spawn(dispatcher.run(rx))));
        }

        self.audit_task = Some(audit_task);
        self.mux = Some(mux);
        self.cancel = cancel;
        self.state = SessionState::Running;

        info!(
            session_id = %self.id,
            sources = self.config.sources.len(),
            patterns = self.rules_tx.borrow().len(),
            notifier = self.notifier.as_ref().map(|n| n.name()).unwrap_or("none"),
            "monitor session started"
        );
        Ok(())
    }

    async fn drain_tasks(&mut self) {
        let deadline = Instant::now() + self.config.shutdown_timeout;
        self.cancel.cancel();

        let mut aborted: Vec<&'static str> = Vec::new();
        if let Some(mux) = self.mux.as_mut() {
            for handle in mux.shutdown() {
                if !join_until(handle, deadline).await {
                    aborted.push("watcher");
                }
            }
        }
        for (name, handle) in self.tasks.drain(..) {
            if !join_until(handle, deadline).await {
                aborted.push(name);
            }
        }
        if let Some(mut handle) = self.audit_task.take()
            && tokio::time::timeout_at(deadline, &mut handle).await.is_err()
        {
            handle.abort();
            aborted.push("audit writer");
        }

        gauge!(m::SOURCES_WATCHED).set(0.0);
        if aborted.is_empty() {
            info!(session_id = %self.id, "monitor session stopped");
        } else {
            warn!(
                session_id = %self.id,
                aborted = ?aborted,
                timeout_secs = self.config.shutdown_timeout.as_secs(),
                "lossy shutdown: tasks aborted at shutdown timeout"
            );
        }
    }
}

impl Pipeline for MonitorSession {
    async fn start(&mut self) -> Result<(), TailguardError> {
        if self.state == SessionState::Running {
            return Err(PipelineError::AlreadyRunning.into());
        }
        info!(session_id = %self.id, "starting monitor session");
        self.spawn_tasks().await.map_err(TailguardError::from)
    }

    async fn stop(&mut self) -> Result<(), TailguardError> {
        if self.state != SessionState::Running {
            return Err(PipelineError::NotRunning.into());
        }
        info!(session_id = %self.id, "stopping monitor session");
        self.drain_tasks().await;
        self.state = SessionState::Stopped;
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        self.status()
    }
}

/// 모니터링 세션 빌더
#[derive(Default)]
pub struct MonitorSessionBuilder {
    config: SessionConfig,
    notifier: Option<Arc<dyn Notifier>>,
}

impl MonitorSessionBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 세션 설정을 지정합니다.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// 알림 수단을 지정합니다. 지정하지 않으면 전송기를 만들지 않습니다.
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// 세션을 생성합니다. 패턴은 여기서 컴파일됩니다.
    ///
    /// # Errors
    /// - 설정 검증 실패
    /// - 패턴 컴파일 실패
    pub fn build(self) -> Result<MonitorSession, MonitorError> {
        self.config.validate()?;
        let rules = RuleSet::compile(&self.config.patterns)?;
        gauge!(m::PATTERNS_LOADED).set(rules.len() as f64);

        let (rules_tx, _) = watch::channel(Arc::new(rules));
        let (alert_tx, _) = broadcast::channel(self.config.alert_channel_capacity);

        Ok(MonitorSession {
            id: uuid::Uuid::new_v4().to_string(),
            config: self.config,
            state: SessionState::Initialized,
            rules_tx,
            alert_tx,
            notifier: self.notifier,
            cancel: CancellationToken::new(),
            mux: None,
            audit_stats: None,
            dispatch_stats: Arc::new(DispatchStats::default()),
            counters: Arc::new(SessionCounters::default()),
            tasks: Vec::new(),
            audit_task: None,
        })
    }
}

/// 라인/헬스 스트림을 소비하여 분류, 스로틀링, 감사, 전송을 조율합니다.
struct Coordinator {
    session_id: String,
    rules: watch::Receiver<Arc<RuleSet>>,
    throttler: AlertThrottler,
    audit: AuditHandle,
    dispatch_tx: Option<mpsc::Sender<Alert>>,
    alert_tx: broadcast::Sender<Alert>,
    counters: Arc<SessionCounters>,
    dispatch_stats: Arc<DispatchStats>,
    sweep_interval: Duration,
}

impl Coordinator {
    async fn run(mut self, streams: MuxStreams) {
        let MuxStreams {
            mut lines,
            mut health,
        } = streams;
        let mut sweep = tokio::time::interval_at(
            Instant::now() + self.sweep_interval,
            self.sweep_interval,
        );
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut lines_open = true;
        let mut health_open = true;

        debug!(session_id = %self.session_id, "coordinator started");
        while lines_open || health_open {
            tokio::select! {
                biased;
                event = health.recv(), if health_open => match event {
                    Some(event) => self.process_health(event).await,
                    None => health_open = false,
                },
                line = lines.recv(), if lines_open => match line {
                    Some(line) => self.process_line(line).await,
                    None => lines_open = false,
                },
                _ = sweep.tick() => self.sweep(),
            }
        }

        info!(
            session_id = %self.session_id,
            lines = self.counters.lines_observed.load(Ordering::Relaxed),
            alerts = self.throttler.total_emitted(),
            suppressed = self.throttler.total_suppressed(),
            "coordinator drained"
        );
    }

    async fn process_line(&mut self, line: LogLine) {
        self.counters.lines_observed.fetch_add(1, Ordering::Relaxed);
        counter!(m::LINES_OBSERVED_TOTAL).increment(1);
        self.audit.record(AuditRecord::observation(&line)).await;

        let rules = Arc::clone(&self.rules.borrow());
        let Some(rule) = classify(&line, &rules) else {
            return;
        };

        match self
            .throttler
            .admit(AlertCandidate { line, rule }, std::time::Instant::now())
        {
            Admission::Emit(alert) => self.emit(alert).await,
            Admission::Suppress(candidate) => {
                self.counters.alerts_suppressed.fetch_add(1, Ordering::Relaxed);
                counter!(m::ALERTS_SUPPRESSED_TOTAL).increment(1);
                self.audit.record(AuditRecord::suppressed(&candidate)).await;
            }
        }
    }

    async fn emit(&mut self, alert: Alert) {
        self.counters.alerts_emitted.fetch_add(1, Ordering::Relaxed);
        self.counters.last_seq.store(alert.seq, Ordering::Release);
        counter!(m::ALERTS_EMITTED_TOTAL).increment(1);
        info!(
            seq = alert.seq,
            source = %alert.line.source.display(),
            pattern = %alert.rule.pattern,
            "alert emitted"
        );
        self.audit.record(AuditRecord::alert(&alert)).await;

        // 구독자가 없으면 send가 실패하지만 정상 상황
        let _ = self.alert_tx.send(alert.clone());

        let Some(tx) = &self.dispatch_tx else {
            return;
        };
        let (alert, reason) = match tx.try_send(alert) {
            Ok(()) => return,
            Err(TrySendError::Full(alert)) => {
                let err = MonitorError::ChannelOverflow {
                    channel: "delivery".to_owned(),
                    dropped: 1,
                };
                (alert, err.to_string())
            }
            Err(TrySendError::Closed(alert)) => (alert, "dispatcher stopped".to_owned()),
        };
        self.dispatch_stats.record_failure();
        warn!(seq = alert.seq, reason = %reason, "alert not queued for delivery");
        self.audit
            .record(AuditRecord::delivery_failed(&alert, &reason))
            .await;
    }

    async fn process_health(&mut self, event: HealthEvent) {
        match &event.kind {
            HealthKind::SourceUnavailable { .. } | HealthKind::Overflow { .. } => {
                warn!(source = %event.source.display(), event = %event.kind, "source health event");
            }
            _ => {
                info!(source = %event.source.display(), event = %event.kind, "source health event");
            }
        }
        self.audit.record(AuditRecord::health(&event)).await;
    }

    fn sweep(&mut self) {
        let removed = self.throttler.sweep(std::time::Instant::now());
        gauge!(m::THROTTLE_KEYS).set(self.throttler.tracked_keys() as f64);
        if removed > 0 {
            debug!(removed, remaining = self.throttler.tracked_keys(), "throttle keys swept");
        }
    }
}

async fn join_until(mut handle: JoinHandle<()>, deadline: Instant) -> bool {
    match tokio::time::timeout_at(deadline, &mut handle).await {
        Ok(_) => true,
        Err(_) => {
            handle.abort();
            false
        }
    }
}
