//! 감사 기록 -- 모든 관찰/알림/억제/전송 실패를 JSON Lines로 남깁니다.
//!
//! [`AuditSink`]는 파일에 레코드를 추가(append)만 하며 수정/삭제하지 않습니다.
//! 쓰기가 실패하면 저하(degraded) 모드로 전환해 메모리 백로그에 보관하고,
//! 이후 레코드마다 파일을 다시 열어 백로그를 먼저 기록한 뒤 정상 모드로 돌아옵니다.
//! 백로그가 가득 차면 가장 오래된 레코드부터 버립니다.
//!
//! 감사 경로가 없으면 메모리 전용으로 동작합니다.
//!
//! # 레코드 형식
//! ```json
//! {"timestamp":"2024-05-01T12:00:00Z","source":"/var/log/auth.log","kind":"alert","text":"denied login","matched_rule":"denied","seq":1}
//! ```

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use tailguard_core::metrics as m;

use crate::alert::{Alert, AlertCandidate};
use crate::collector::{HealthEvent, LogLine};
use crate::error::MonitorError;

/// 감사 레코드 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// 관찰된 라인
    Observation,
    /// 발행된 알림
    Alert,
    /// 억제된 알림
    Suppressed,
    /// 전송 실패한 알림
    DeliveryFailed,
    /// 소스 헬스 이벤트
    Health,
}

/// 감사 레코드
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// 기록 시각
    pub timestamp: DateTime<Utc>,
    /// 소스 경로
    pub source: String,
    /// 레코드 종류
    pub kind: AuditKind,
    /// 라인 텍스트 또는 이벤트 설명
    pub text: String,
    /// 매칭된 패턴
    #[serde(default)]
    pub matched_rule: Option<String>,
    /// 알림 순번
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

impl AuditRecord {
    /// 관찰 레코드
    pub fn observation(line: &LogLine) -> Self {
        Self {
            timestamp: line.captured_at,
            source: line.source.display().to_string(),
            kind: AuditKind::Observation,
            text: line.text.clone(),
            matched_rule: None,
            seq: None,
        }
    }

    /// 알림 레코드
    pub fn alert(alert: &Alert) -> Self {
        Self {
            timestamp: Utc::now(),
            source: alert.line.source.display().to_string(),
            kind: AuditKind::Alert,
            text: alert.line.text.clone(),
            matched_rule: Some(alert.rule.pattern.clone()),
            seq: Some(alert.seq),
        }
    }

    /// 억제 레코드
    pub fn suppressed(candidate: &AlertCandidate) -> Self {
        Self {
            timestamp: Utc::now(),
            source: candidate.line.source.display().to_string(),
            kind: AuditKind::Suppressed,
            text: candidate.line.text.clone(),
            matched_rule: Some(candidate.rule.pattern.clone()),
            seq: None,
        }
    }

    /// 전송 실패 레코드. 텍스트는 `<라인> (<사유>)` 형태입니다.
    pub fn delivery_failed(alert: &Alert, reason: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            source: alert.line.source.display().to_string(),
            kind: AuditKind::DeliveryFailed,
            text: format!("{} ({reason})", alert.line.text),
            matched_rule: Some(alert.rule.pattern.clone()),
            seq: Some(alert.seq),
        }
    }

    /// 헬스 이벤트 레코드
    pub fn health(event: &HealthEvent) -> Self {
        Self {
            timestamp: event.at,
            source: event.source.display().to_string(),
            kind: AuditKind::Health,
            text: event.kind.to_string(),
            matched_rule: None,
            seq: None,
        }
    }
}

/// 감사 싱크 통계 (세션 헬스 조회용으로 공유)
#[derive(Debug, Default)]
pub struct AuditStats {
    degraded: AtomicBool,
    written: AtomicU64,
    failures: AtomicU64,
    backlog: AtomicU64,
}

impl AuditStats {
    /// 저하 모드 여부
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// 파일에 기록된 레코드 수
    pub fn records_written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    /// 쓰기 실패 횟수
    pub fn write_failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// 메모리 백로그 길이
    pub fn backlog_len(&self) -> u64 {
        self.backlog.load(Ordering::Relaxed)
    }
}

/// 감사 싱크
pub struct AuditSink {
    path: Option<PathBuf>,
    file: Option<tokio::fs::File>,
    backlog: VecDeque<AuditRecord>,
    backlog_capacity: usize,
    backlog_dropped: u64,
    stats: Arc<AuditStats>,
}

impl AuditSink {
    /// 새 싱크를 만듭니다. 파일은 첫 기록 시 열립니다.
    ///
    /// `path`가 `None`이면 메모리 전용입니다.
    pub fn new(path: Option<PathBuf>, backlog_capacity: usize) -> Self {
        Self {
            path,
            file: None,
            backlog: VecDeque::new(),
            backlog_capacity: backlog_capacity.max(1),
            backlog_dropped: 0,
            stats: Arc::new(AuditStats::default()),
        }
    }

    /// 공유 통계 핸들
    pub fn stats(&self) -> Arc<AuditStats> {
        Arc::clone(&self.stats)
    }

    /// 감사 파일 경로
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// 저하 모드 여부
    pub fn is_degraded(&self) -> bool {
        self.stats.is_degraded()
    }

    /// 메모리에 보관 중인 레코드
    pub fn backlog(&self) -> impl Iterator<Item = &AuditRecord> {
        self.backlog.iter()
    }

    /// 백로그 포화로 버려진 레코드 수
    pub fn backlog_dropped(&self) -> u64 {
        self.backlog_dropped
    }

    /// 레코드를 기록합니다. 실패해도 에러를 반환하지 않습니다.
    pub async fn record(&mut self, record: AuditRecord) {
        counter!(m::AUDIT_RECORDS_TOTAL).increment(1);

        if self.path.is_none() {
            self.push_backlog(record);
            return;
        }

        if (self.file.is_none() || self.is_degraded()) && !self.recover().await {
            self.push_backlog(record);
            return;
        }

        if let Err(e) = self.write(&record).await {
            self.enter_degraded(&e);
            self.push_backlog(record);
        }
    }

    /// 남은 백로그를 기록하고 파일을 닫습니다.
    pub async fn close(&mut self) {
        if self.path.is_some() && !self.backlog.is_empty() {
            self.recover().await;
        }
        if let Some(file) = self.file.as_mut()
            && let Err(e) = file.sync_all().await
        {
            debug!(error = %e, "audit file sync failed on close");
        }
        self.file = None;

        if !self.backlog.is_empty() && self.path.is_some() {
            warn!(
                lost = self.backlog.len(),
                "audit records kept only in memory were not persisted"
            );
        }
    }

    /// 파일을 (다시) 열고 백로그를 먼저 기록합니다.
    async fn recover(&mut self) -> bool {
        if self.file.is_none() {
            match self.open().await {
                Ok(file) => self.file = Some(file),
                Err(e) => {
                    self.enter_degraded(&e);
                    return false;
                }
            }
        }

        while let Some(record) = self.backlog.front().cloned() {
            if let Err(e) = self.write(&record).await {
                self.enter_degraded(&e);
                return false;
            }
            self.backlog.pop_front();
        }
        self.stats
            .backlog
            .store(self.backlog.len() as u64, Ordering::Relaxed);

        if self.stats.degraded.swap(false, Ordering::Relaxed) {
            gauge!(m::AUDIT_DEGRADED).set(0.0);
            info!(path = %self.path_display(), "audit sink recovered");
        }
        true
    }

    async fn open(&self) -> Result<tokio::fs::File, MonitorError> {
        let Some(path) = self.path.as_deref() else {
            return Err(MonitorError::Channel("audit sink has no path".to_owned()));
        };
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(file)
    }

    async fn write(&mut self, record: &AuditRecord) -> Result<(), MonitorError> {
        let Some(file) = self.file.as_mut() else {
            return Err(MonitorError::Channel("audit file not open".to_owned()));
        };
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        file.write_all(&line).await?;
        file.flush().await?;
        self.stats.written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn enter_degraded(&mut self, err: &MonitorError) {
        self.file = None;
        self.stats.failures.fetch_add(1, Ordering::Relaxed);
        counter!(m::AUDIT_WRITE_FAILURES_TOTAL).increment(1);

        if !self.stats.degraded.swap(true, Ordering::Relaxed) {
            gauge!(m::AUDIT_DEGRADED).set(1.0);
            let err = MonitorError::AuditWriteFailed {
                path: self.path_display(),
                reason: err.to_string(),
            };
            warn!(error = %err, "audit sink degraded, keeping records in memory");
        }
    }

    fn push_backlog(&mut self, record: AuditRecord) {
        if self.backlog.len() >= self.backlog_capacity {
            self.backlog.pop_front();
            self.backlog_dropped += 1;
        }
        self.backlog.push_back(record);
        self.stats
            .backlog
            .store(self.backlog.len() as u64, Ordering::Relaxed);
    }

    fn path_display(&self) -> String {
        self.path
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_default()
    }
}

/// 감사 작성기 태스크로 레코드를 보내는 핸들
#[derive(Clone)]
pub struct AuditHandle {
    tx: mpsc::Sender<AuditRecord>,
}

impl AuditHandle {
    /// 레코드를 보냅니다. 작성기가 종료된 경우 경고만 남깁니다.
    pub async fn record(&self, record: AuditRecord) {
        if let Err(e) = self.tx.send(record).await {
            warn!(kind = ?e.0.kind, "audit writer closed, record lost");
        }
    }
}

/// 감사 작성기 태스크를 시작합니다.
///
/// 모든 [`AuditHandle`]이 해제되면 남은 레코드를 기록하고 종료합니다.
pub fn spawn_audit_writer(
    mut sink: AuditSink,
    capacity: usize,
) -> (AuditHandle, JoinHandle<AuditSink>) {
    let (tx, mut rx) = mpsc::channel(capacity.max(1));
    let task = tokio::spawn(async move {
        debug!(path = %sink.path_display(), "audit writer started");
        while let Some(record) = rx.recv().await {
            sink.record(record).await;
        }
        sink.close().await;
        debug!("audit writer stopped");
        sink
    });
    (AuditHandle { tx }, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::MatchedRule;

    fn sample_alert() -> Alert {
        Alert {
            id: "id-1".to_owned(),
            seq: 7,
            line: LogLine::new("/var/log/auth.log", "denied login"),
            rule: MatchedRule {
                index: 0,
                pattern: "denied".to_owned(),
            },
        }
    }

    async fn read_records(path: &Path) -> Vec<AuditRecord> {
        let content = tokio::fs::read_to_string(path).await.unwrap();
        content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn alert_record_carries_rule_and_seq() {
        let record = AuditRecord::alert(&sample_alert());
        assert_eq!(record.kind, AuditKind::Alert);
        assert_eq!(record.matched_rule.as_deref(), Some("denied"));
        assert_eq!(record.seq, Some(7));

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"kind\":\"alert\""));
    }

    #[test]
    fn observation_record_omits_seq() {
        let record = AuditRecord::observation(&LogLine::new("/a", "hello"));
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("\"seq\""));
        assert!(json.contains("\"matched_rule\":null"));
    }

    #[test]
    fn delivery_failed_record_includes_reason() {
        let record = AuditRecord::delivery_failed(&sample_alert(), "exit status 1");
        assert_eq!(record.kind, AuditKind::DeliveryFailed);
        assert!(record.text.contains("exit status 1"));
    }

    #[tokio::test]
    async fn writes_json_lines_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit").join("audit.log");
        let mut sink = AuditSink::new(Some(path.clone()), 16);

        sink.record(AuditRecord::observation(&LogLine::new("/a", "one")))
            .await;
        sink.record(AuditRecord::alert(&sample_alert())).await;
        sink.close().await;

        let records = read_records(&path).await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].kind, AuditKind::Observation);
        assert_eq!(records[0].text, "one");
        assert_eq!(records[1].kind, AuditKind::Alert);
        assert!(!sink.is_degraded());
        assert_eq!(sink.stats().records_written(), 2);
    }

    #[tokio::test]
    async fn same_line_recorded_twice_yields_two_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let mut sink = AuditSink::new(Some(path.clone()), 16);
        let line = LogLine::new("/var/log/auth.log", "denied login");

        sink.record(AuditRecord::observation(&line)).await;
        sink.record(AuditRecord::observation(&line)).await;
        sink.close().await;

        let records = read_records(&path).await;
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.text == "denied login"));
        assert_eq!(records[0].kind, records[1].kind);
    }

    #[tokio::test]
    async fn unwritable_path_degrades_and_keeps_backlog() {
        let dir = tempfile::tempdir().unwrap();
        // 디렉터리 경로에는 파일을 열 수 없음
        let mut sink = AuditSink::new(Some(dir.path().to_path_buf()), 16);

        sink.record(AuditRecord::observation(&LogLine::new("/a", "one")))
            .await;
        sink.record(AuditRecord::observation(&LogLine::new("/a", "two")))
            .await;

        assert!(sink.is_degraded());
        assert_eq!(sink.backlog().count(), 2);
        assert!(sink.stats().write_failures() >= 1);
    }

    #[tokio::test]
    async fn recovers_and_replays_backlog() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("audit");
        // 부모 경로를 파일로 막아 디렉터리 생성을 실패시킴
        tokio::fs::write(&blocker, b"").await.unwrap();
        let path = blocker.join("audit.log");
        let mut sink = AuditSink::new(Some(path.clone()), 16);

        sink.record(AuditRecord::observation(&LogLine::new("/a", "early")))
            .await;
        assert!(sink.is_degraded());

        tokio::fs::remove_file(&blocker).await.unwrap();
        sink.record(AuditRecord::observation(&LogLine::new("/a", "late")))
            .await;
        assert!(!sink.is_degraded());
        sink.close().await;

        let texts: Vec<String> = read_records(&path)
            .await
            .into_iter()
            .map(|r| r.text)
            .collect();
        assert_eq!(texts, vec!["early", "late"]);
    }

    #[tokio::test]
    async fn backlog_drops_oldest_when_full() {
        let mut sink = AuditSink::new(None, 2);
        for text in ["a", "b", "c"] {
            sink.record(AuditRecord::observation(&LogLine::new("/x", text)))
                .await;
        }
        let texts: Vec<&str> = sink.backlog().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["b", "c"]);
        assert_eq!(sink.backlog_dropped(), 1);
        assert!(!sink.is_degraded());
    }

    #[tokio::test]
    async fn writer_task_drains_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let (handle, task) = spawn_audit_writer(AuditSink::new(Some(path.clone()), 16), 4);

        for i in 0..10 {
            handle
                .record(AuditRecord::observation(&LogLine::new("/a", format!("l{i}"))))
                .await;
        }
        drop(handle);
        let sink = task.await.unwrap();

        assert_eq!(sink.stats().records_written(), 10);
        assert_eq!(read_records(&path).await.len(), 10);
    }
}
