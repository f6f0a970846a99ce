//! 메트릭 상수
//!
//! 모든 메트릭의 이름을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`
//! 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `vendorscope_`
//! - 모듈명: `detector_`, `session_`, `daemon_`
//! - 접미어: `_total` (counter), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(vendorscope_core::metrics::DETECTOR_EVALUATIONS_TOTAL).increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 규칙 출처 레이블 키 (builtin, override, custom)
pub const LABEL_PROVENANCE: &str = "provenance";

/// 캡처 종료 상태 레이블 키 (completed, expired, cancelled)
pub const LABEL_CAPTURE_END: &str = "state";

/// 결과 레이블 키 (success, failure)
pub const LABEL_RESULT: &str = "result";

/// 호스트 요청 종류 레이블 키 (getRules, submitSignals, ...)
pub const LABEL_REQUEST: &str = "request";

// ─── Detector 메트릭 ───────────────────────────────────────────────

/// Detector: 분석 패스 수 (counter)
pub const DETECTOR_EVALUATIONS_TOTAL: &str = "vendorscope_detector_evaluations_total";

/// Detector: 탐지된 벤더 수 (counter, label: provenance)
pub const DETECTOR_DETECTIONS_TOTAL: &str = "vendorscope_detector_detections_total";

/// Detector: 충돌 해소 병합 수 (counter)
pub const DETECTOR_CONFLICTS_MERGED_TOTAL: &str = "vendorscope_detector_conflicts_merged_total";

/// Detector: 해석된 규칙 수 (gauge)
pub const DETECTOR_RULES_RESOLVED: &str = "vendorscope_detector_rules_resolved";

/// Detector: 규칙 재구성 수 (counter, label: result)
pub const DETECTOR_RULE_REBUILDS_TOTAL: &str = "vendorscope_detector_rule_rebuilds_total";

/// Detector: 로딩 중 건너뛴 규칙 문서 수 (counter)
pub const DETECTOR_RULES_SKIPPED_TOTAL: &str = "vendorscope_detector_rules_skipped_total";

/// Detector: 손상되어 폐기된 영속 규칙 캐시 수 (counter)
pub const DETECTOR_RULE_CACHE_CORRUPTED_TOTAL: &str =
    "vendorscope_detector_rule_cache_corrupted_total";

// ─── Session 메트릭 ────────────────────────────────────────────────

/// Session: 활성 탭 세션 수 (gauge)
pub const SESSION_ACTIVE_TABS: &str = "vendorscope_session_active_tabs";

/// Session: 캡처 세션 시작 수 (counter)
pub const SESSION_CAPTURES_ARMED_TOTAL: &str = "vendorscope_session_captures_armed_total";

/// Session: 캡처 세션 종료 수 (counter, label: state)
pub const SESSION_CAPTURES_FINISHED_TOTAL: &str = "vendorscope_session_captures_finished_total";

/// Session: 영속화 실패 수 (counter)
pub const SESSION_PERSIST_FAILURES_TOTAL: &str = "vendorscope_session_persist_failures_total";

/// Session: 손상된 스냅샷 수 (counter)
pub const SESSION_CORRUPTED_SNAPSHOTS_TOTAL: &str =
    "vendorscope_session_corrupted_snapshots_total";

/// Session: 무시된 지연 타이머 콜백 수 (counter)
pub const SESSION_STALE_CALLBACKS_TOTAL: &str = "vendorscope_session_stale_callbacks_total";

// ─── Daemon 메트릭 ─────────────────────────────────────────────────

/// Daemon: 처리한 호스트 요청 수 (counter)
pub const DAEMON_REQUESTS_TOTAL: &str = "vendorscope_daemon_requests_total";

/// Daemon: 파싱할 수 없는 요청 줄 수 (counter)
pub const DAEMON_MALFORMED_REQUESTS_TOTAL: &str = "vendorscope_daemon_malformed_requests_total";

/// Daemon: 디바운스 후 실행된 분석 수 (counter)
pub const DAEMON_DEBOUNCED_ANALYSES_TOTAL: &str = "vendorscope_daemon_debounced_analyses_total";

/// 모든 메트릭의 설명을 등록합니다.
///
/// 레코더 설치 직후 한 번 호출합니다.
/// 레코더가 없으면 아무 일도 하지 않습니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge};

    describe_counter!(DETECTOR_EVALUATIONS_TOTAL, "Number of detection passes");
    describe_counter!(DETECTOR_DETECTIONS_TOTAL, "Number of vendor detections");
    describe_counter!(
        DETECTOR_CONFLICTS_MERGED_TOTAL,
        "Number of same-name results merged by conflict resolution"
    );
    describe_gauge!(DETECTOR_RULES_RESOLVED, "Rules in the resolved rule set");
    describe_counter!(DETECTOR_RULE_REBUILDS_TOTAL, "Rule set rebuilds");
    describe_counter!(
        DETECTOR_RULES_SKIPPED_TOTAL,
        "Rule documents skipped while loading"
    );
    describe_counter!(
        DETECTOR_RULE_CACHE_CORRUPTED_TOTAL,
        "Persisted rule caches discarded after failing schema validation"
    );
    describe_gauge!(SESSION_ACTIVE_TABS, "Tabs with a live session");
    describe_counter!(SESSION_CAPTURES_ARMED_TOTAL, "Capture sessions armed");
    describe_counter!(SESSION_CAPTURES_FINISHED_TOTAL, "Capture sessions finished");
    describe_counter!(
        SESSION_PERSIST_FAILURES_TOTAL,
        "Failed best-effort persistence writes"
    );
    describe_counter!(
        SESSION_CORRUPTED_SNAPSHOTS_TOTAL,
        "Persisted payloads that failed schema validation"
    );
    describe_counter!(
        SESSION_STALE_CALLBACKS_TOTAL,
        "Timer deliveries dropped for superseded sessions"
    );
    describe_counter!(DAEMON_REQUESTS_TOTAL, "Host requests handled");
    describe_counter!(
        DAEMON_MALFORMED_REQUESTS_TOTAL,
        "Host request lines that failed to parse"
    );
    describe_counter!(
        DAEMON_DEBOUNCED_ANALYSES_TOTAL,
        "Mutation-triggered analyses run after the debounce window"
    );
}
