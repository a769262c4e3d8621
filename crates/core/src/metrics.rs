//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`
//! 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `tailguard_`
//! - 접미어: `_total` (counter), `_seconds` (gauge/latency), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(tailguard_core::metrics::LINES_OBSERVED_TOTAL).increment(1);
//! ```

use metrics::{Unit, describe_counter, describe_gauge};

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 소스 경로 레이블 키
pub const LABEL_SOURCE: &str = "source";

/// 결과 레이블 키 (success, failure)
pub const LABEL_RESULT: &str = "result";

/// 로테이션 원인 레이블 키 (truncated, replaced)
pub const LABEL_CAUSE: &str = "cause";

// ─── File Watcher / Multiplexer 메트릭 ─────────────────────────────

/// 관찰된 전체 로그 라인 수 (counter)
pub const LINES_OBSERVED_TOTAL: &str = "tailguard_lines_observed_total";

/// 백프레셔로 드롭된 라인 수 (counter, label: source)
pub const LINES_DROPPED_TOTAL: &str = "tailguard_lines_dropped_total";

/// 헬스 채널 포화로 버려진 헬스 이벤트 수 (counter, label: source)
pub const HEALTH_EVENTS_DROPPED_TOTAL: &str = "tailguard_health_events_dropped_total";

/// 감지된 로테이션 수 (counter, labels: source, cause)
pub const ROTATIONS_TOTAL: &str = "tailguard_rotations_total";

/// 소스 접근 불가 보고 수 (counter, label: source)
pub const SOURCE_UNAVAILABLE_TOTAL: &str = "tailguard_source_unavailable_total";

/// 감시 중인 소스 수 (gauge)
pub const SOURCES_WATCHED: &str = "tailguard_sources_watched";

// ─── Matcher / Throttler 메트릭 ────────────────────────────────────

/// 발행된 알림 수 (counter)
pub const ALERTS_EMITTED_TOTAL: &str = "tailguard_alerts_emitted_total";

/// 중복 제거로 억제된 알림 수 (counter)
pub const ALERTS_SUPPRESSED_TOTAL: &str = "tailguard_alerts_suppressed_total";

/// 스로틀러가 추적 중인 키 수 (gauge)
pub const THROTTLE_KEYS: &str = "tailguard_throttle_keys";

/// 로드된 패턴 수 (gauge)
pub const PATTERNS_LOADED: &str = "tailguard_patterns_loaded";

// ─── Audit / Delivery 메트릭 ───────────────────────────────────────

/// 기록된 감사 레코드 수 (counter)
pub const AUDIT_RECORDS_TOTAL: &str = "tailguard_audit_records_total";

/// 감사 기록 쓰기 실패 수 (counter)
pub const AUDIT_WRITE_FAILURES_TOTAL: &str = "tailguard_audit_write_failures_total";

/// 감사 싱크 저하 모드 여부 (gauge, 0 또는 1)
pub const AUDIT_DEGRADED: &str = "tailguard_audit_degraded";

/// 알림 전송 시도 수 (counter, label: result)
pub const DELIVERY_ATTEMPTS_TOTAL: &str = "tailguard_delivery_attempts_total";

/// 재시도 후 최종 전송 실패 수 (counter)
pub const DELIVERY_FAILURES_TOTAL: &str = "tailguard_delivery_failures_total";

// ─── Daemon 메트릭 ──────────────────────────────────────────────────

/// Daemon: 가동 시간 (gauge, 초)
pub const DAEMON_UPTIME_SECONDS: &str = "tailguard_daemon_uptime_seconds";

/// Daemon: 빌드 정보 (gauge, 항상 1, label: version)
pub const DAEMON_BUILD_INFO: &str = "tailguard_daemon_build_info";

/// 모든 메트릭의 설명을 등록합니다.
///
/// 메트릭 레코더 설치 직후 한 번 호출합니다.
pub fn describe_all() {
    describe_counter!(LINES_OBSERVED_TOTAL, Unit::Count, "Log lines read from all sources");
    describe_counter!(
        LINES_DROPPED_TOTAL,
        Unit::Count,
        "Log lines dropped because the per-source buffer overflowed"
    );
    describe_counter!(
        HEALTH_EVENTS_DROPPED_TOTAL,
        Unit::Count,
        "Source health events dropped because the health channel was full"
    );
    describe_counter!(ROTATIONS_TOTAL, Unit::Count, "Detected source rotations");
    describe_counter!(
        SOURCE_UNAVAILABLE_TOTAL,
        Unit::Count,
        "Times a source was reported unavailable"
    );
    describe_gauge!(SOURCES_WATCHED, Unit::Count, "Number of watched sources");

    describe_counter!(ALERTS_EMITTED_TOTAL, Unit::Count, "Alerts admitted by the throttler");
    describe_counter!(
        ALERTS_SUPPRESSED_TOTAL,
        Unit::Count,
        "Alerts suppressed as repeats within the throttle window"
    );
    describe_gauge!(THROTTLE_KEYS, Unit::Count, "Alert keys tracked by the throttler");
    describe_gauge!(PATTERNS_LOADED, Unit::Count, "Patterns in the active rule set");

    describe_counter!(AUDIT_RECORDS_TOTAL, Unit::Count, "Audit records accepted");
    describe_counter!(AUDIT_WRITE_FAILURES_TOTAL, Unit::Count, "Failed audit writes");
    describe_gauge!(AUDIT_DEGRADED, "1 while the audit sink runs in memory-only mode");
    describe_counter!(DELIVERY_ATTEMPTS_TOTAL, Unit::Count, "Notification attempts");
    describe_counter!(
        DELIVERY_FAILURES_TOTAL,
        Unit::Count,
        "Alerts whose delivery failed after all retries"
    );

    describe_gauge!(DAEMON_UPTIME_SECONDS, Unit::Seconds, "Daemon uptime");
    describe_gauge!(DAEMON_BUILD_INFO, "Build information, always 1");
}
