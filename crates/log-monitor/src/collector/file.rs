//! 파일 워처 -- 단일 로그 파일을 `tail -F` 방식으로 추적합니다.
//!
//! 워처는 파일의 식별자(dev + inode)와 읽기 오프셋을 추적하며,
//! 폴링마다 현재 상태와 비교하여 다음 중 하나를 수행합니다.
//!
//! - 크기 증가, 식별자 동일: 추가된 바이트를 읽어 라인으로 분리
//! - 크기 감소: `Truncated` 로테이션, 오프셋 0부터 다시 읽음
//! - 식별자 변경 또는 경로 소실: 기존 핸들에 남은 바이트를 먼저 읽고
//!   `Replaced` 로테이션 처리 후 새 파일을 오프셋 0부터 읽음
//! - 변화 없음: 아무것도 하지 않음
//!
//! 최초 열기는 파일 끝으로 이동합니다 (기존 내용은 재생하지 않음).
//!
//! # 상태 전이
//! `Waiting -> Open -> {Open, Reopening -> Open | Waiting}`, 정지 시 `Stopped`.

use std::future::Future;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::BytesMut;
use metrics::counter;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tailguard_core::metrics as m;

use super::{HealthEvent, HealthKind, LogLine, RotationCause, SourceStatus, WatcherState};
use crate::buffer::LineBuffer;
use crate::error::MonitorError;

/// 워처 동작 설정
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// 파일 상태 체크 주기
    pub poll_interval: Duration,
    /// Waiting 상태의 재시도 주기
    pub retry_interval: Duration,
    /// 파일시스템 작업 타임아웃
    pub read_timeout: Duration,
    /// 최대 라인 길이 (바이트, 초과 시 분할)
    pub max_line_length: usize,
    /// 폴링당 최대 읽기 바이트
    pub max_read_bytes: usize,
    /// 소스별 라인 버퍼 용량
    pub buffer_capacity: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            retry_interval: Duration::from_secs(2),
            read_timeout: Duration::from_secs(5),
            max_line_length: 64 * 1024, // 64KB
            max_read_bytes: 1024 * 1024,
            buffer_capacity: 4096,
        }
    }
}

/// 파일 식별자 (device + inode)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileIdentity {
    /// 디바이스 번호
    pub dev: u64,
    /// inode 번호
    pub ino: u64,
}

impl FileIdentity {
    /// 메타데이터에서 식별자를 추출합니다.
    #[cfg(unix)]
    pub fn from_metadata(meta: &std::fs::Metadata) -> Option<Self> {
        use std::os::unix::fs::MetadataExt;
        Some(Self {
            dev: meta.dev(),
            ino: meta.ino(),
        })
    }

    /// 비 Unix 플랫폼에서는 식별자를 사용할 수 없습니다 (크기 비교만 수행).
    #[cfg(not(unix))]
    pub fn from_metadata(_meta: &std::fs::Metadata) -> Option<Self> {
        None
    }
}

/// 한 번의 폴링 결과
#[derive(Debug, Default)]
pub struct PollOutcome {
    /// 읽은 라인 (파일 순서)
    pub lines: Vec<LogLine>,
    /// 발생한 상태 이벤트
    pub events: Vec<HealthKind>,
}

/// 단일 파일 워처
///
/// 파일 핸들과 오프셋은 이 구조체가 독점 소유합니다.
/// [`poll`](Self::poll)은 테스트에서 직접 호출할 수 있고,
/// [`run`](Self::run)은 취소될 때까지 폴링 루프를 실행합니다.
pub struct FileWatcher {
    path: PathBuf,
    config: WatcherConfig,
    file: Option<File>,
    identity: Option<FileIdentity>,
    offset: u64,
    /// 아직 줄바꿈을 만나지 못한 바이트
    pending: BytesMut,
    /// 다음 열기를 오프셋 0부터 읽을지 여부 (로테이션 후)
    read_from_start: bool,
    /// SourceUnavailable을 이미 보고했는지 여부
    unavailable_reported: bool,
    status: SourceStatus,
    status_tx: watch::Sender<SourceStatus>,
}

impl FileWatcher {
    /// 새 워처를 생성합니다. 파일은 첫 [`poll`](Self::poll)에서 열립니다.
    pub fn new(path: impl Into<PathBuf>, config: WatcherConfig) -> Self {
        let path = path.into();
        let status = SourceStatus::new(path.clone());
        let (status_tx, _) = watch::channel(status.clone());
        Self {
            path,
            config,
            file: None,
            identity: None,
            offset: 0,
            pending: BytesMut::new(),
            read_from_start: false,
            unavailable_reported: false,
            status,
            status_tx,
        }
    }

    /// 감시 중인 경로
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 현재 상태
    pub fn state(&self) -> WatcherState {
        self.status.state
    }

    /// 현재 읽기 오프셋
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// 현재 상태 스냅샷
    pub fn status(&self) -> &SourceStatus {
        &self.status
    }

    /// 상태 스냅샷 구독 채널을 반환합니다.
    pub fn subscribe(&self) -> watch::Receiver<SourceStatus> {
        self.status_tx.subscribe()
    }

    /// 한 번 폴링합니다.
    pub async fn poll(&mut self) -> PollOutcome {
        let mut out = PollOutcome::default();
        match self.status.state {
            WatcherState::Waiting | WatcherState::Reopening => self.open_source(&mut out).await,
            WatcherState::Open => self.follow(&mut out).await,
            WatcherState::Stopped => {}
        }
        self.publish();
        out
    }

    /// 워처를 정지하고 핸들을 해제합니다.
    ///
    /// 줄바꿈 없이 남아 있던 부분 라인이 있으면 반환합니다.
    pub fn stop(&mut self) -> Option<LogLine> {
        let partial = self.take_partial();
        self.file = None;
        self.identity = None;
        self.status.state = WatcherState::Stopped;
        self.publish();
        partial
    }

    /// 취소될 때까지 폴링 루프를 실행합니다.
    ///
    /// 읽은 라인은 소스별 [`LineBuffer`]를 거쳐 `line_tx`로 전달됩니다.
    /// 채널이 가득 차면 폴링 주기만큼 기다린 뒤 다시 읽기를 계속하며,
    /// 버퍼가 넘치면 가장 오래된 라인을 드롭하고 `Overflow`를 보고합니다.
    pub async fn run(
        mut self,
        line_tx: mpsc::Sender<LogLine>,
        health_tx: mpsc::Sender<HealthEvent>,
        cancel: CancellationToken,
    ) {
        let mut buffer = LineBuffer::new(self.config.buffer_capacity);
        let mut closed = false;
        info!(source = %self.path.display(), "watcher started");

        loop {
            let outcome = self.poll().await;
            self.absorb(outcome, &mut buffer, &health_tx);

            if !forward(&mut buffer, &line_tx, self.config.poll_interval).await {
                debug!(source = %self.path.display(), "line channel closed, watcher exiting");
                closed = true;
                break;
            }

            let delay = if self.status.state == WatcherState::Waiting {
                self.config.retry_interval
            } else {
                self.config.poll_interval
            };

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        // 마지막 폴링 후 남은 라인을 흘려보냄
        if !closed {
            let outcome = self.poll().await;
            self.absorb(outcome, &mut buffer, &health_tx);
        }
        if let Some(partial) = self.stop()
            && buffer.push(partial).is_some()
        {
            self.status.dropped += 1;
        }
        if !closed {
            forward(&mut buffer, &line_tx, self.config.read_timeout).await;
        }
        if !buffer.is_empty() {
            warn!(
                source = %self.path.display(),
                lost = buffer.len(),
                "lines not delivered before watcher stopped"
            );
        }

        self.emit(&health_tx, HealthKind::Stopped);
        info!(
            source = %self.path.display(),
            lines_read = self.status.lines_read,
            rotations = self.status.rotations,
            "watcher stopped"
        );
    }

    // --- 내부 상태 전이 ---

    async fn open_source(&mut self, out: &mut PollOutcome) {
        match open_file(&self.path, self.config.read_timeout).await {
            Ok((file, meta)) => {
                self.offset = if self.read_from_start { 0 } else { meta.len() };
                self.identity = FileIdentity::from_metadata(&meta);
                self.file = Some(file);
                self.status.state = WatcherState::Open;
                self.status.last_error = None;
                if self.unavailable_reported {
                    self.unavailable_reported = false;
                    out.events.push(HealthKind::SourceAvailable);
                }
                info!(source = %self.path.display(), offset = self.offset, "source opened");

                if self.read_from_start {
                    self.read_from_start = false;
                    self.read_appended(out).await;
                }
            }
            Err(e) => {
                let reason = e.to_string();
                if !self.unavailable_reported {
                    self.unavailable_reported = true;
                    let err = MonitorError::SourceUnavailable {
                        path: self.path.display().to_string(),
                        reason: reason.clone(),
                    };
                    warn!(error = %err, "source unavailable, will retry");
                    counter!(m::SOURCE_UNAVAILABLE_TOTAL, m::LABEL_SOURCE => self.path.display().to_string())
                        .increment(1);
                    out.events.push(HealthKind::SourceUnavailable {
                        reason: reason.clone(),
                    });
                }
                self.status.state = WatcherState::Waiting;
                self.status.last_error = Some(reason);
            }
        }
    }

    async fn follow(&mut self, out: &mut PollOutcome) {
        let meta = match with_timeout(self.config.read_timeout, tokio::fs::metadata(&self.path))
            .await
        {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // 경로가 사라짐: 기존 핸들에 남은 내용부터 읽음
                self.read_appended(out).await;
                self.rotate(RotationCause::Replaced, out);
                self.open_source(out).await;
                return;
            }
            Err(e) => {
                self.record_error(&e);
                return;
            }
        };

        let identity = FileIdentity::from_metadata(&meta);
        if self.identity.is_some() && identity != self.identity {
            self.read_appended(out).await;
            self.rotate(RotationCause::Replaced, out);
            self.open_source(out).await;
            return;
        }

        let size = meta.len();
        if size < self.offset {
            self.rotate(RotationCause::Truncated, out);
            self.open_source(out).await;
            return;
        }

        if size > self.offset {
            self.read_appended(out).await;
        }
    }

    fn rotate(&mut self, cause: RotationCause, out: &mut PollOutcome) {
        if let Some(partial) = self.take_partial() {
            out.lines.push(partial);
        }
        self.file = None;
        self.identity = None;
        self.offset = 0;
        self.read_from_start = true;
        self.status.rotations += 1;
        self.status.state = WatcherState::Reopening;

        counter!(
            m::ROTATIONS_TOTAL,
            m::LABEL_SOURCE => self.path.display().to_string(),
            m::LABEL_CAUSE => cause.as_str()
        )
        .increment(1);
        info!(source = %self.path.display(), cause = %cause, "rotation detected, reopening");
        out.events.push(HealthKind::Rotated { cause });
    }

    async fn read_appended(&mut self, out: &mut PollOutcome) {
        let Some(file) = self.file.as_mut() else {
            return;
        };
        let limit = self.config.max_read_bytes as u64;
        match with_timeout(self.config.read_timeout, read_from(file, self.offset, limit)).await {
            Ok(chunk) => {
                if chunk.is_empty() {
                    return;
                }
                self.offset += chunk.len() as u64;
                self.pending.extend_from_slice(&chunk);
                self.split_lines(out);
            }
            Err(e) => self.record_error(&e),
        }
    }

    /// 버퍼에서 완성된 라인을 잘라냅니다.
    fn split_lines(&mut self, out: &mut PollOutcome) {
        let max = self.config.max_line_length.max(1);
        loop {
            let newline = self.pending.iter().position(|b| *b == b'\n');
            // 최대 길이 직후의 CR은 라인 끝의 일부
            let ends_with_cr = self.pending.get(max) == Some(&b'\r');
            match newline {
                Some(pos) if pos <= max || (pos == max + 1 && ends_with_cr) => {
                    let mut raw = self.pending.split_to(pos + 1);
                    raw.truncate(pos);
                    if raw.last() == Some(&b'\r') {
                        raw.truncate(pos - 1);
                    }
                    let line = self.make_line(&raw);
                    out.lines.push(line);
                }
                None if self.pending.len() == max + 1 && ends_with_cr => break,
                _ if self.pending.len() > max => {
                    let raw = self.pending.split_to(max);
                    debug!(source = %self.path.display(), max, "line exceeds max length, splitting");
                    let line = self.make_line(&raw);
                    out.lines.push(line);
                }
                _ => break,
            }
        }
    }

    fn take_partial(&mut self) -> Option<LogLine> {
        if self.pending.is_empty() {
            return None;
        }
        let raw = self.pending.split();
        Some(self.make_line(&raw))
    }

    fn make_line(&mut self, raw: &[u8]) -> LogLine {
        self.status.lines_read += 1;
        LogLine::new(self.path.clone(), String::from_utf8_lossy(raw).into_owned())
    }

    fn record_error(&mut self, err: &io::Error) {
        warn!(source = %self.path.display(), error = %err, "source read failed");
        self.status.last_error = Some(err.to_string());
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.status.clone());
    }

    fn absorb(
        &mut self,
        outcome: PollOutcome,
        buffer: &mut LineBuffer,
        health_tx: &mpsc::Sender<HealthEvent>,
    ) {
        let dropped = buffer.extend(outcome.lines);
        for kind in outcome.events {
            self.emit(health_tx, kind);
        }

        if dropped > 0 {
            self.status.dropped += dropped;
            counter!(m::LINES_DROPPED_TOTAL, m::LABEL_SOURCE => self.path.display().to_string())
                .increment(dropped);
            warn!(
                source = %self.path.display(),
                dropped,
                capacity = buffer.capacity(),
                "source buffer full, dropped oldest lines"
            );
            self.emit(health_tx, HealthKind::Overflow { dropped });
            self.publish();
        }
    }

    fn emit(&mut self, health_tx: &mpsc::Sender<HealthEvent>, kind: HealthKind) {
        match health_tx.try_send(HealthEvent::new(self.path.clone(), kind)) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                self.status.health_events_dropped += 1;
                counter!(m::HEALTH_EVENTS_DROPPED_TOTAL, m::LABEL_SOURCE => self.path.display().to_string())
                    .increment(1);
                warn!(source = %self.path.display(), event = %event.kind, "health channel full, event dropped");
            }
            Err(TrySendError::Closed(_)) => {
                debug!(source = %self.path.display(), "health channel closed");
            }
        }
    }
}

/// 버퍼의 라인을 채널로 보냅니다.
///
/// 채널이 `wait` 동안 자리를 내주지 않으면 남은 라인을 버퍼에 둔 채 반환합니다.
/// 채널이 닫혔으면 `false`를 반환합니다.
async fn forward(buffer: &mut LineBuffer, line_tx: &mpsc::Sender<LogLine>, wait: Duration) -> bool {
    while !buffer.is_empty() {
        match tokio::time::timeout(wait, line_tx.reserve()).await {
            Ok(Ok(permit)) => {
                if let Some(line) = buffer.pop_front() {
                    permit.send(line);
                }
            }
            Ok(Err(_)) => return false,
            Err(_) => {
                debug!(pending = buffer.len(), "line channel busy");
                break;
            }
        }
    }
    true
}

async fn open_file(path: &Path, limit: Duration) -> io::Result<(File, std::fs::Metadata)> {
    with_timeout(limit, async {
        let file = File::open(path).await?;
        let meta = file.metadata().await?;
        if !meta.is_file() {
            return Err(io::Error::other("not a regular file"));
        }
        Ok((file, meta))
    })
    .await
}

async fn read_from(file: &mut File, offset: u64, limit: u64) -> io::Result<Vec<u8>> {
    file.seek(SeekFrom::Start(offset)).await?;
    let mut chunk = Vec::new();
    file.take(limit).read_to_end(&mut chunk).await?;
    Ok(chunk)
}

async fn with_timeout<T>(
    limit: Duration,
    fut: impl Future<Output = io::Result<T>>,
) -> io::Result<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("filesystem operation timed out after {limit:?}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn append(path: &Path, data: &[u8]) {
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        f.write_all(data).unwrap();
        f.flush().unwrap();
    }

    fn texts(out: &PollOutcome) -> Vec<&str> {
        out.lines.iter().map(|l| l.text.as_str()).collect()
    }

    async fn opened(path: &Path, config: WatcherConfig) -> FileWatcher {
        let mut watcher = FileWatcher::new(path, config);
        watcher.poll().await;
        assert_eq!(watcher.state(), WatcherState::Open);
        watcher
    }

    #[test]
    fn default_config() {
        let config = WatcherConfig::default();
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.max_line_length, 64 * 1024);
    }

    #[tokio::test]
    async fn missing_file_reports_unavailable_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut watcher = FileWatcher::new(dir.path().join("missing.log"), WatcherConfig::default());

        let first = watcher.poll().await;
        assert_eq!(watcher.state(), WatcherState::Waiting);
        assert!(matches!(
            first.events.as_slice(),
            [HealthKind::SourceUnavailable { .. }]
        ));
        assert!(watcher.status().last_error.is_some());

        let second = watcher.poll().await;
        assert!(second.events.is_empty());
        assert_eq!(watcher.state(), WatcherState::Waiting);
    }

    #[tokio::test]
    async fn first_open_seeks_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, b"old line\n");

        let mut watcher = opened(&path, WatcherConfig::default()).await;
        assert_eq!(watcher.offset(), 9);

        append(&path, b"new line\n");
        let out = watcher.poll().await;
        assert_eq!(texts(&out), vec!["new line"]);
    }

    #[tokio::test]
    async fn partial_line_is_carried_to_next_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, b"");
        let mut watcher = opened(&path, WatcherConfig::default()).await;

        append(&path, b"par");
        assert!(watcher.poll().await.lines.is_empty());

        append(&path, b"tial\nnext");
        let out = watcher.poll().await;
        assert_eq!(texts(&out), vec!["partial"]);
    }

    #[tokio::test]
    async fn truncation_restarts_at_offset_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, b"");
        let mut watcher = opened(&path, WatcherConfig::default()).await;

        append(&path, b"aaaa\nbbbb\n");
        assert_eq!(texts(&watcher.poll().await), vec!["aaaa", "bbbb"]);

        std::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(0)
            .unwrap();
        append(&path, b"cc\n");

        let out = watcher.poll().await;
        assert_eq!(
            out.events,
            vec![HealthKind::Rotated {
                cause: RotationCause::Truncated
            }]
        );
        assert_eq!(texts(&out), vec!["cc"]);
        assert_eq!(watcher.state(), WatcherState::Open);
        assert_eq!(watcher.status().rotations, 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn rename_rotation_drains_old_handle_then_reads_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, b"");
        let mut watcher = opened(&path, WatcherConfig::default()).await;

        append(&path, b"last old line\n");
        std::fs::rename(&path, dir.path().join("app.log.1")).unwrap();
        append(&path, b"first new line\n");

        let out = watcher.poll().await;
        assert_eq!(texts(&out), vec!["last old line", "first new line"]);
        assert_eq!(
            out.events,
            vec![HealthKind::Rotated {
                cause: RotationCause::Replaced
            }]
        );
    }

    #[tokio::test]
    async fn removed_path_waits_then_reads_recreated_file_from_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, b"");
        let mut watcher = opened(&path, WatcherConfig::default()).await;

        std::fs::remove_file(&path).unwrap();
        let out = watcher.poll().await;
        assert_eq!(watcher.state(), WatcherState::Waiting);
        assert!(matches!(
            out.events.as_slice(),
            [
                HealthKind::Rotated {
                    cause: RotationCause::Replaced
                },
                HealthKind::SourceUnavailable { .. }
            ]
        ));

        append(&path, b"reborn\n");
        let out = watcher.poll().await;
        assert_eq!(out.events, vec![HealthKind::SourceAvailable]);
        assert_eq!(texts(&out), vec!["reborn"]);
    }

    #[tokio::test]
    async fn partial_line_is_emitted_on_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, b"");
        let mut watcher = opened(&path, WatcherConfig::default()).await;

        append(&path, b"complete\nhalf");
        assert_eq!(texts(&watcher.poll().await), vec!["complete"]);

        std::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(0)
            .unwrap();
        let out = watcher.poll().await;
        assert_eq!(texts(&out), vec!["half"]);
    }

    #[tokio::test]
    async fn long_lines_are_split() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, b"");
        let config = WatcherConfig {
            max_line_length: 4,
            ..WatcherConfig::default()
        };
        let mut watcher = opened(&path, config).await;

        append(&path, b"abcdefghij\n");
        assert_eq!(texts(&watcher.poll().await), vec!["abcd", "efgh", "ij"]);
    }

    #[tokio::test]
    async fn crlf_line_at_max_length_is_not_split() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, b"");
        let config = WatcherConfig {
            max_line_length: 4,
            ..WatcherConfig::default()
        };
        let mut watcher = opened(&path, config).await;

        append(&path, b"abcd\r\nnext\n");
        assert_eq!(texts(&watcher.poll().await), vec!["abcd", "next"]);

        // CR과 LF가 서로 다른 폴링에 도착하는 경우
        append(&path, b"wxyz\r");
        assert!(texts(&watcher.poll().await).is_empty());
        append(&path, b"\nlast\n");
        assert_eq!(texts(&watcher.poll().await), vec!["wxyz", "last"]);
    }

    #[tokio::test]
    async fn crlf_and_invalid_utf8_are_normalized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, b"");
        let mut watcher = opened(&path, WatcherConfig::default()).await;

        append(&path, b"windows\r\n\xffx\n");
        assert_eq!(texts(&watcher.poll().await), vec!["windows", "\u{FFFD}x"]);
    }

    #[tokio::test]
    async fn read_is_bounded_per_poll() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, b"");
        let config = WatcherConfig {
            max_read_bytes: 4,
            ..WatcherConfig::default()
        };
        let mut watcher = opened(&path, config).await;

        append(&path, b"aa\nbb\ncc\n");
        assert_eq!(texts(&watcher.poll().await), vec!["aa"]);
        assert_eq!(texts(&watcher.poll().await), vec!["bb"]);
        assert_eq!(texts(&watcher.poll().await), vec!["cc"]);
    }

    #[tokio::test]
    async fn stop_returns_partial_line_and_publishes_status() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, b"");
        let mut watcher = opened(&path, WatcherConfig::default()).await;
        let status_rx = watcher.subscribe();

        append(&path, b"one\ntwo");
        watcher.poll().await;
        assert_eq!(status_rx.borrow().lines_read, 1);

        let partial = watcher.stop();
        assert_eq!(partial.map(|l| l.text), Some("two".to_owned()));
        assert_eq!(status_rx.borrow().state, WatcherState::Stopped);
    }

    #[tokio::test]
    async fn run_forwards_lines_and_reports_stop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, b"");
        let config = WatcherConfig {
            poll_interval: Duration::from_millis(10),
            ..WatcherConfig::default()
        };
        let watcher = FileWatcher::new(&path, config);
        let status_rx = watcher.subscribe();
        let (line_tx, mut line_rx) = mpsc::channel(16);
        let (health_tx, mut health_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(watcher.run(line_tx, health_tx, cancel.clone()));

        tokio::time::timeout(Duration::from_secs(5), async {
            let mut rx = status_rx.clone();
            while rx.borrow_and_update().state != WatcherState::Open {
                rx.changed().await.unwrap();
            }
        })
        .await
        .unwrap();

        append(&path, b"hello\n");
        let line = tokio::time::timeout(Duration::from_secs(5), line_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line.text, "hello");

        cancel.cancel();
        task.await.unwrap();

        let mut saw_stop = false;
        while let Ok(event) = health_rx.try_recv() {
            if event.kind == HealthKind::Stopped {
                saw_stop = true;
            }
        }
        assert!(saw_stop);
    }

    #[tokio::test]
    async fn full_buffer_reports_overflow() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, b"");
        let config = WatcherConfig {
            buffer_capacity: 2,
            ..WatcherConfig::default()
        };
        let mut watcher = opened(&path, config).await;
        let (health_tx, mut health_rx) = mpsc::channel(16);
        let mut buffer = LineBuffer::new(2);

        append(&path, b"1\n2\n3\n4\n");
        let out = watcher.poll().await;
        watcher.absorb(out, &mut buffer, &health_tx);

        assert_eq!(buffer.len(), 2);
        assert_eq!(watcher.status().dropped, 2);
        let event = health_rx.try_recv().unwrap();
        assert_eq!(event.kind, HealthKind::Overflow { dropped: 2 });
    }

    #[tokio::test]
    async fn full_health_channel_counts_dropped_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, b"");
        let config = WatcherConfig {
            buffer_capacity: 1,
            ..WatcherConfig::default()
        };
        let mut watcher = opened(&path, config).await;
        let (health_tx, mut health_rx) = mpsc::channel(1);
        let mut buffer = LineBuffer::new(1);

        append(&path, b"1\n2\n");
        let out = watcher.poll().await;
        watcher.absorb(out, &mut buffer, &health_tx);
        append(&path, b"3\n");
        let out = watcher.poll().await;
        watcher.absorb(out, &mut buffer, &health_tx);

        // 첫 Overflow만 채널에 들어가고 두 번째는 버려짐
        assert_eq!(
            health_rx.try_recv().unwrap().kind,
            HealthKind::Overflow { dropped: 1 }
        );
        assert!(health_rx.try_recv().is_err());
        assert_eq!(watcher.status().health_events_dropped, 1);
        assert_eq!(watcher.status().dropped, 2);
    }
}
