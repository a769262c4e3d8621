//! 알림 생성 및 중복 억제 -- 매칭된 라인을 Alert로 변환합니다.
//!
//! [`AlertThrottler`]는 (소스, 정규화된 라인 텍스트)를 키로 마지막 발행 시각을 추적하여
//! 윈도우 안에서 반복되는 알림을 억제합니다.
//!
//! # 윈도우 의미
//! 윈도우는 마지막 *발행* 시점부터 고정 길이입니다. 억제된 반복은 윈도우를 연장하지 않습니다.
//! 윈도우가 0이면 중복 제거를 하지 않습니다.
//!
//! # 메모리
//! 만료된 키는 조회 시 지연 제거되고 [`sweep`](AlertThrottler::sweep)으로 일괄 정리됩니다.
//! 키 수가 `max_entries`에 도달하면 가장 오래된 키를 제거합니다.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::collector::LogLine;
use crate::rule::MatchedRule;

/// 중복 제거 키
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AlertKey {
    source: PathBuf,
    text: String,
}

impl AlertKey {
    /// 소스와 라인 텍스트로 키를 만듭니다. 텍스트는 정규화됩니다.
    pub fn new(source: &Path, text: &str) -> Self {
        Self {
            source: source.to_path_buf(),
            text: Self::normalize(text),
        }
    }

    /// 앞뒤 공백을 제거하고 연속 공백을 하나로 줄입니다.
    pub fn normalize(text: &str) -> String {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// 정규화된 텍스트
    pub fn text(&self) -> &str {
        &self.text
    }
}

/// 알림 후보 (매칭됐지만 아직 스로틀링 전)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertCandidate {
    /// 매칭된 라인
    pub line: LogLine,
    /// 매칭된 규칙
    pub rule: MatchedRule,
}

/// 발행된 알림
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    /// 고유 ID (UUID v4)
    pub id: String,
    /// 세션 내 발행 순번 (1부터)
    pub seq: u64,
    /// 알림을 유발한 라인
    pub line: LogLine,
    /// 매칭된 규칙
    pub rule: MatchedRule,
}

impl Alert {
    /// 알림 제목 (`<prefix>: <파일명>`)
    pub fn title(&self, prefix: &str) -> String {
        let name = self
            .line
            .source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.line.source.display().to_string());
        format!("{prefix}: {name}")
    }

    /// 알림 본문 (라인 텍스트)
    pub fn body(&self) -> &str {
        &self.line.text
    }
}

/// 스로틀링 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// 발행
    Emit(Alert),
    /// 윈도우 내 반복으로 억제
    Suppress(AlertCandidate),
}

/// 알림 스로틀러
pub struct AlertThrottler {
    /// 중복 제거 윈도우
    window: Duration,
    /// 추적 키 최대 수
    max_entries: usize,
    /// 키 -> 마지막 발행 시각
    last_emitted: HashMap<AlertKey, Instant>,
    /// 마지막으로 부여한 순번
    last_seq: u64,
    /// 발행된 총 알림 수
    total_emitted: u64,
    /// 억제된 총 알림 수
    total_suppressed: u64,
    /// 만료/용량 초과로 제거된 키 수
    total_evicted: u64,
}

impl AlertThrottler {
    /// 새 스로틀러를 만듭니다.
    pub fn new(window: Duration, max_entries: usize) -> Self {
        Self {
            window,
            max_entries: max_entries.max(1),
            last_emitted: HashMap::new(),
            last_seq: 0,
            total_emitted: 0,
            total_suppressed: 0,
            total_evicted: 0,
        }
    }

    /// 순번을 `last_seq` 다음부터 부여하도록 설정합니다.
    ///
    /// 재시작된 세션이 이전 실행의 순번을 이어 가는 데 씁니다.
    pub fn resume_after(mut self, last_seq: u64) -> Self {
        self.last_seq = last_seq;
        self
    }

    /// 후보를 평가합니다.
    ///
    /// 처음 보는 키는 항상 발행되고, 윈도우 안의 반복은 억제됩니다.
    pub fn admit(&mut self, candidate: AlertCandidate, now: Instant) -> Admission {
        let key = AlertKey::new(&candidate.line.source, &candidate.line.text);

        if self.is_duplicate(&key, now) {
            self.total_suppressed += 1;
            tracing::debug!(
                source = %candidate.line.source.display(),
                pattern = %candidate.rule.pattern,
                "alert suppressed by throttle window"
            );
            return Admission::Suppress(candidate);
        }

        if !self.window.is_zero() {
            if !self.last_emitted.contains_key(&key) && self.last_emitted.len() >= self.max_entries
            {
                self.sweep(now);
                if self.last_emitted.len() >= self.max_entries {
                    self.evict_oldest();
                }
            }
            self.last_emitted.insert(key, now);
        }

        self.last_seq += 1;
        self.total_emitted += 1;
        Admission::Emit(Alert {
            id: uuid::Uuid::new_v4().to_string(),
            seq: self.last_seq,
            line: candidate.line,
            rule: candidate.rule,
        })
    }

    /// 윈도우 내 반복인지 확인하고, 만료된 키는 제거합니다.
    fn is_duplicate(&mut self, key: &AlertKey, now: Instant) -> bool {
        match self.last_emitted.get(key) {
            Some(last) if now.saturating_duration_since(*last) < self.window => true,
            Some(_) => {
                self.last_emitted.remove(key);
                self.total_evicted += 1;
                false
            }
            None => false,
        }
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .last_emitted
            .iter()
            .min_by_key(|(_, at)| **at)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            self.last_emitted.remove(&key);
            self.total_evicted += 1;
            tracing::debug!(
                max_entries = self.max_entries,
                "throttle table full, evicted oldest key"
            );
        }
    }

    /// 만료된 키를 정리하고 제거된 수를 반환합니다.
    ///
    /// 주기적으로 호출하여 메모리 성장을 방지합니다.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let window = self.window;
        let before = self.last_emitted.len();
        self.last_emitted
            .retain(|_, last| now.saturating_duration_since(*last) < window);
        let removed = before - self.last_emitted.len();
        self.total_evicted += removed as u64;
        removed
    }

    /// 현재 추적 중인 키 수
    pub fn tracked_keys(&self) -> usize {
        self.last_emitted.len()
    }

    /// 중복 제거 윈도우
    pub fn window(&self) -> Duration {
        self.window
    }

    /// 마지막으로 부여한 순번
    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    /// 발행된 총 알림 수
    pub fn total_emitted(&self) -> u64 {
        self.total_emitted
    }

    /// 억제된 총 알림 수
    pub fn total_suppressed(&self) -> u64 {
        self.total_suppressed
    }

    /// 제거된 총 키 수
    pub fn total_evicted(&self) -> u64 {
        self.total_evicted
    }
}
