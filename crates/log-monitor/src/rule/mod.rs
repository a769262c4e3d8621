//! 패턴 매칭 -- 라인을 규칙 세트에 대해 분류합니다.
//!
//! # 아키텍처
//! - [`RuleSet`]: 패턴 목록을 `RegexSet` 하나로 컴파일 (대소문자 무시)
//! - [`loader`]: 패턴 파일 로딩
//!
//! 분류는 순수 함수이며 블로킹하지 않습니다.
//! 실행 중 규칙 교체는 세션이 `watch` 채널로 `Arc<RuleSet>`을 바꿔 끼우는 방식입니다.

pub mod loader;
pub mod matcher;

pub use loader::PatternLoader;
pub use matcher::{MatchedRule, RuleSet};

use crate::collector::LogLine;

/// 라인을 분류합니다. 빈 규칙 세트는 아무것도 매칭하지 않습니다.
pub fn classify(line: &LogLine, rules: &RuleSet) -> Option<MatchedRule> {
    rules.classify(&line.text)
}
