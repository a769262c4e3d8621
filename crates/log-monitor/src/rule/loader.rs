//! 패턴 파일 로더 -- 한 줄에 하나씩 적힌 패턴을 디스크에서 로드합니다.
//!
//! 빈 줄과 `#`으로 시작하는 주석 줄은 무시합니다.
//! 파일 패턴은 인라인 패턴 뒤에 이어 붙습니다.

use std::path::Path;

use crate::error::MonitorError;

/// 패턴 파일 크기 제한
const MAX_PATTERN_FILE_SIZE: u64 = 1024 * 1024; // 1MB
/// 전체 패턴 수 제한
const MAX_PATTERNS_COUNT: usize = 10_000;

/// 패턴 파일 로더
pub struct PatternLoader;

impl PatternLoader {
    /// 인라인 패턴과 패턴 파일(있으면)을 합쳐 최종 패턴 목록을 만듭니다.
    ///
    /// # Errors
    /// - 패턴 파일을 읽을 수 없는 경우
    /// - 패턴 수가 `MAX_PATTERNS_COUNT`를 초과하는 경우
    pub async fn resolve(
        inline: &[String],
        file: Option<&Path>,
    ) -> Result<Vec<String>, MonitorError> {
        let mut patterns = inline.to_vec();
        if let Some(path) = file {
            let loaded = Self::load_file(path).await?;
            tracing::info!(
                path = %path.display(),
                count = loaded.len(),
                "loaded patterns from file"
            );
            patterns.extend(loaded);
        }

        if patterns.len() > MAX_PATTERNS_COUNT {
            return Err(MonitorError::PatternLoad {
                path: file.map(|p| p.display().to_string()).unwrap_or_default(),
                reason: format!("too many patterns: max {MAX_PATTERNS_COUNT}"),
            });
        }
        Ok(patterns)
    }

    /// 단일 패턴 파일을 로드합니다.
    pub async fn load_file(path: impl AsRef<Path>) -> Result<Vec<String>, MonitorError> {
        let path = path.as_ref();

        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| MonitorError::PatternLoad {
                path: path.display().to_string(),
                reason: format!("failed to read file metadata: {e}"),
            })?;

        if metadata.len() > MAX_PATTERN_FILE_SIZE {
            return Err(MonitorError::PatternLoad {
                path: path.display().to_string(),
                reason: format!(
                    "file too large: {} bytes (max {MAX_PATTERN_FILE_SIZE})",
                    metadata.len()
                ),
            });
        }

        let content =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|e| MonitorError::PatternLoad {
                    path: path.display().to_string(),
                    reason: format!("failed to read file: {e}"),
                })?;

        Ok(Self::parse_patterns(&content))
    }

    /// 패턴 파일 내용을 파싱합니다.
    pub fn parse_patterns(content: &str) -> Vec<String> {
        content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_owned)
            .collect()
    }
}
