//! 소스별 대기 라인 큐
//!
//! 워처는 공유 라인 채널이 자리를 내줄 때까지 읽은 라인을 [`LineBuffer`]에 쌓아 둡니다.
//! 채널이 막혀 있어도 파일 읽기는 계속되므로, 큐가 가득 차면 가장 오래된 라인을
//! 밀어내고 그 수를 워처가 `Overflow` 헬스 이벤트로 보고합니다.

use std::collections::VecDeque;

use crate::collector::LogLine;

/// 누적 통계
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    /// 받아들인 라인 수
    pub accepted: u64,
    /// 밀려나 버려진 라인 수
    pub dropped: u64,
}

/// 용량 제한 라인 큐. 가득 차면 가장 오래된 라인을 밀어냅니다.
#[derive(Debug)]
pub struct LineBuffer {
    lines: VecDeque<LogLine>,
    capacity: usize,
    stats: BufferStats,
}

impl LineBuffer {
    /// 용량 `capacity`(최소 1)의 큐를 만듭니다.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            // 큰 용량이라도 처음부터 전부 할당하지 않음
            lines: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            stats: BufferStats::default(),
        }
    }

    /// 라인을 뒤에 넣습니다. 밀려난 라인이 있으면 돌려줍니다.
    pub fn push(&mut self, line: LogLine) -> Option<LogLine> {
        self.stats.accepted += 1;
        let evicted = if self.lines.len() == self.capacity {
            self.stats.dropped += 1;
            self.lines.pop_front()
        } else {
            None
        };
        self.lines.push_back(line);
        evicted
    }

    /// 여러 라인을 넣고, 이번에 밀려난 라인 수를 반환합니다.
    pub fn extend(&mut self, lines: impl IntoIterator<Item = LogLine>) -> u64 {
        lines
            .into_iter()
            .filter_map(|line| self.push(line))
            .fold(0, |n, _| n + 1)
    }

    /// 가장 오래된 라인을 꺼냅니다.
    pub fn pop_front(&mut self) -> Option<LogLine> {
        self.lines.pop_front()
    }

    /// 대기 중인 라인 수
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// 대기 라인이 없는지 여부
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// 용량까지 찼는지 여부
    pub fn is_full(&self) -> bool {
        self.lines.len() == self.capacity
    }

    /// 최대 보관 라인 수
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 생성 이후 누적 통계
    pub fn stats(&self) -> BufferStats {
        self.stats
    }
}
