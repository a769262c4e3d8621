//! 규칙 세트 -- 패턴 목록을 하나의 `RegexSet`으로 컴파일합니다.
//!
//! [`RuleSet`]은 모든 패턴을 대소문자 구분 없이 한 번에 평가합니다.
//! 패턴은 로딩 시 한 번만 컴파일되며, 라인 처리 중에는 실패하지 않습니다.

use regex::{RegexBuilder, RegexSet, RegexSetBuilder};
use serde::Serialize;

use crate::error::MonitorError;

/// 컴파일된 정규식 크기 제한 (바이트)
const REGEX_SIZE_LIMIT: usize = 10 * 1024 * 1024; // 10MB

/// 매칭된 규칙
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchedRule {
    /// 설정 순서상의 패턴 인덱스
    pub index: usize,
    /// 패턴 원문
    pub pattern: String,
}

/// 컴파일된 패턴 집합
///
/// 여러 패턴이 동시에 매칭되면 설정 순서상 가장 앞선 패턴을 보고합니다.
#[derive(Debug, Clone)]
pub struct RuleSet {
    patterns: Vec<String>,
    set: RegexSet,
}

impl RuleSet {
    /// 패턴 목록을 컴파일합니다.
    ///
    /// # Errors
    /// - 정규식 문법 오류
    /// - 빈 문자열에 매칭되는 패턴 (모든 라인에 매칭되므로 거부)
    pub fn compile<I, S>(patterns: I) -> Result<Self, MonitorError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns: Vec<String> = patterns
            .into_iter()
            .map(|p| p.as_ref().to_owned())
            .collect();

        for pattern in &patterns {
            let regex = RegexBuilder::new(pattern)
                .case_insensitive(true)
                .size_limit(REGEX_SIZE_LIMIT)
                .build()
                .map_err(|e| MonitorError::InvalidPattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })?;
            if regex.is_match("") {
                return Err(MonitorError::InvalidPattern {
                    pattern: pattern.clone(),
                    reason: "pattern matches the empty string".to_owned(),
                });
            }
        }

        let set = RegexSetBuilder::new(&patterns)
            .case_insensitive(true)
            .size_limit(REGEX_SIZE_LIMIT)
            .build()
            .map_err(|e| MonitorError::InvalidPattern {
                pattern: patterns.join(" | "),
                reason: e.to_string(),
            })?;

        Ok(Self { patterns, set })
    }

    /// 아무것도 매칭하지 않는 빈 규칙 세트
    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
            set: RegexSet::empty(),
        }
    }

    /// 텍스트를 분류합니다. 매칭되는 패턴이 없으면 `None`.
    pub fn classify(&self, text: &str) -> Option<MatchedRule> {
        if self.patterns.is_empty() {
            return None;
        }
        self.set.matches(text).iter().next().map(|index| MatchedRule {
            index,
            pattern: self.patterns[index].clone(),
        })
    }

    /// 패턴 목록 (설정 순서)
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// 패턴 수
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// 패턴이 없는지 여부
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::empty()
    }
}
