//! 멀티플렉서 -- 여러 파일 워처를 하나의 라인 스트림으로 병합합니다.
//!
//! 모든 워처는 같은 bounded `mpsc` 채널에 라인을 보내므로
//! 수신 측은 먼저 관찰된 라인을 먼저 받습니다. 워처는 등록 순서대로 생성됩니다.
//! 헬스 이벤트는 별도 채널로 흐릅니다.

use std::path::{Path, PathBuf};
use std::time::Duration;

use metrics::gauge;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tailguard_core::metrics as m;

use super::{FileWatcher, HealthEvent, LogLine, SourceStatus, WatcherConfig};
use crate::error::MonitorError;

/// 병합된 출력 스트림
pub struct MuxStreams {
    /// 모든 소스의 라인
    pub lines: mpsc::Receiver<LogLine>,
    /// 모든 소스의 헬스 이벤트
    pub health: mpsc::Receiver<HealthEvent>,
}

struct WatcherEntry {
    path: PathBuf,
    status: watch::Receiver<SourceStatus>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

/// 워처 집합 관리자
pub struct Multiplexer {
    config: WatcherConfig,
    line_tx: Option<mpsc::Sender<LogLine>>,
    health_tx: Option<mpsc::Sender<HealthEvent>>,
    cancel: CancellationToken,
    watchers: Vec<WatcherEntry>,
}

impl Multiplexer {
    /// 소스 목록으로 멀티플렉서를 시작합니다.
    ///
    /// 소스가 비어 있거나 모든 소스를 읽을 수 없으면 `NoReadableSources`를 반환하고
    /// 아무 워처도 시작하지 않습니다. 일부만 읽을 수 있으면 나머지는
    /// Waiting 상태로 시작하여 재시도합니다.
    pub async fn start(
        sources: &[PathBuf],
        config: WatcherConfig,
        line_capacity: usize,
        health_capacity: usize,
        cancel: CancellationToken,
    ) -> Result<(Self, MuxStreams), MonitorError> {
        if sources.is_empty() {
            return Err(MonitorError::NoReadableSources(
                "no sources configured".to_owned(),
            ));
        }

        let mut readable = 0usize;
        for path in sources {
            if is_readable(path, config.read_timeout).await {
                readable += 1;
            } else {
                warn!(source = %path.display(), "source not readable at startup");
            }
        }
        if readable == 0 {
            return Err(MonitorError::NoReadableSources(format!(
                "none of {} configured source(s) can be opened",
                sources.len()
            )));
        }

        let (line_tx, lines) = mpsc::channel(line_capacity.max(1));
        let (health_tx, health) = mpsc::channel(health_capacity.max(1));
        let mut mux = Self {
            config,
            line_tx: Some(line_tx),
            health_tx: Some(health_tx),
            cancel,
            watchers: Vec::with_capacity(sources.len()),
        };

        for path in sources {
            match mux.add_source(path) {
                Ok(()) => {}
                Err(MonitorError::SourceExists(dup)) => {
                    warn!(source = %dup, "duplicate source ignored");
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            sources = mux.watchers.len(),
            readable, "multiplexer started"
        );
        Ok((mux, MuxStreams { lines, health }))
    }

    /// 소스를 추가합니다. 실행 중인 다른 워처에는 영향이 없습니다.
    pub fn add_source(&mut self, path: impl AsRef<Path>) -> Result<(), MonitorError> {
        let path = path.as_ref();
        if self.watchers.iter().any(|w| w.path == path) {
            return Err(MonitorError::SourceExists(path.display().to_string()));
        }
        let (Some(line_tx), Some(health_tx)) = (&self.line_tx, &self.health_tx) else {
            return Err(MonitorError::NotRunning);
        };

        let watcher = FileWatcher::new(path, self.config.clone());
        let status = watcher.subscribe();
        let cancel = self.cancel.child_token();
        let task = tokio::spawn(watcher.run(line_tx.clone(), health_tx.clone(), cancel.clone()));

        self.watchers.push(WatcherEntry {
            path: path.to_path_buf(),
            status,
            cancel,
            task: Some(task),
        });
        gauge!(m::SOURCES_WATCHED).set(self.watchers.len() as f64);
        info!(source = %path.display(), "source added");
        Ok(())
    }

    /// 소스를 제거하고 해당 워처가 남은 라인을 흘려보낼 때까지 기다립니다.
    pub async fn remove_source(&mut self, path: impl AsRef<Path>) -> Result<(), MonitorError> {
        let path = path.as_ref();
        let Some(index) = self.watchers.iter().position(|w| w.path == path) else {
            return Err(MonitorError::UnknownSource(path.display().to_string()));
        };

        let mut entry = self.watchers.remove(index);
        entry.cancel.cancel();
        if let Some(task) = entry.task.take() {
            join_bounded(task, self.stop_grace(), &entry.path).await;
        }
        gauge!(m::SOURCES_WATCHED).set(self.watchers.len() as f64);
        info!(source = %path.display(), "source removed");
        Ok(())
    }

    /// 소스별 상태를 등록 순서대로 반환합니다.
    pub fn statuses(&self) -> Vec<SourceStatus> {
        self.watchers
            .iter()
            .map(|w| w.status.borrow().clone())
            .collect()
    }

    /// 감시 중인 소스 경로 목록 (등록 순서)
    pub fn sources(&self) -> Vec<PathBuf> {
        self.watchers.iter().map(|w| w.path.clone()).collect()
    }

    /// 감시 중인 소스 수
    pub fn len(&self) -> usize {
        self.watchers.len()
    }

    /// 감시 중인 소스가 없는지 여부
    pub fn is_empty(&self) -> bool {
        self.watchers.is_empty()
    }

    /// 모든 워처를 취소하고 자체 송신자를 해제합니다.
    ///
    /// 반환된 핸들이 모두 끝나면 병합 스트림이 닫힙니다.
    /// 상태 스냅샷은 계속 조회할 수 있습니다.
    pub fn shutdown(&mut self) -> Vec<JoinHandle<()>> {
        self.cancel.cancel();
        self.line_tx = None;
        self.health_tx = None;
        self.watchers
            .iter_mut()
            .filter_map(|w| w.task.take())
            .collect()
    }

    fn stop_grace(&self) -> Duration {
        self.config.read_timeout * 2 + self.config.poll_interval
    }
}

async fn is_readable(path: &Path, limit: Duration) -> bool {
    let probe = async {
        let file = tokio::fs::File::open(path).await?;
        let meta = file.metadata().await?;
        Ok::<bool, std::io::Error>(meta.is_file())
    };
    matches!(tokio::time::timeout(limit, probe).await, Ok(Ok(true)))
}

async fn join_bounded(mut task: JoinHandle<()>, grace: Duration, path: &Path) {
    if tokio::time::timeout(grace, &mut task).await.is_err() {
        warn!(source = %path.display(), "watcher did not stop in time, aborting");
        task.abort();
    }
}
