//! 캡처 이력 링 버퍼
//!
//! 캡처를 남기고 종료된 세션(Completed, Expired)을 최근 순으로 보관합니다.
//! 용량을 넘으면 가장 오래된 항목을 버리고, 항목마다 TTL이 지나면 만료됩니다.
//! 상태 저장소의 `capture_history` 키에 항목 배열로 영속화됩니다.

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use vendorscope_core::error::CorruptedStateError;
use vendorscope_core::event::CaptureEnd;
use vendorscope_core::store::json_kind;
use vendorscope_core::types::TabId;

use crate::capture::{CapturedParameterSet, FinishedCapture};

/// 캡처 이력 상태 저장소 키
pub const CAPTURE_HISTORY_KEY: &str = "capture_history";

/// 이력 항목
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureHistoryEntry {
    /// 캡처 세션 ID
    pub session_id: String,
    /// 탭 ID
    pub tab_id: TabId,
    /// 캡처 도메인
    pub domain: String,
    /// 종료 상태
    pub state: CaptureEnd,
    /// 수집된 파라미터
    pub captures: Vec<CapturedParameterSet>,
    /// 종료 시각 (Unix epoch 밀리초)
    pub finished_at: u64,
}

impl CaptureHistoryEntry {
    /// 종료된 캡처로 항목을 만듭니다.
    pub fn from_finished(finished: &FinishedCapture, finished_at: u64) -> Self {
        Self {
            session_id: finished.session.id.clone(),
            tab_id: finished.session.tab_id,
            domain: finished.session.domain.clone(),
            state: finished.state,
            captures: finished.session.captures.clone(),
            finished_at,
        }
    }
}

/// 용량과 TTL이 있는 캡처 이력
#[derive(Debug, Clone)]
pub struct CaptureHistory {
    entries: VecDeque<CaptureHistoryEntry>,
    capacity: usize,
    ttl: Duration,
}

impl CaptureHistory {
    /// 빈 이력을 생성합니다.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1_000)),
            capacity: capacity.max(1),
            ttl,
        }
    }

    /// 항목을 추가합니다. 만료 항목을 먼저 정리하고, 가득 차면 가장 오래된 항목을 버립니다.
    ///
    /// 버려진 항목이 있으면 `true`.
    pub fn push(&mut self, entry: CaptureHistoryEntry, now_ms: u64) -> bool {
        self.prune(now_ms);
        let mut evicted = false;
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
            evicted = true;
        }
        self.entries.push_back(entry);
        evicted
    }

    /// 만료된 항목을 제거하고 제거한 수를 반환합니다.
    pub fn prune(&mut self, now_ms: u64) -> usize {
        let before = self.entries.len();
        let ttl_ms = u64::try_from(self.ttl.as_millis()).unwrap_or(u64::MAX);
        self.entries
            .retain(|e| now_ms.saturating_sub(e.finished_at) < ttl_ms);
        before - self.entries.len()
    }

    /// 만료되지 않은 항목 (최근 순)
    pub fn entries(&self, now_ms: u64) -> Vec<CaptureHistoryEntry> {
        let ttl_ms = u64::try_from(self.ttl.as_millis()).unwrap_or(u64::MAX);
        self.entries
            .iter()
            .rev()
            .filter(|e| now_ms.saturating_sub(e.finished_at) < ttl_ms)
            .cloned()
            .collect()
    }

    /// 보관 중인 항목 수 (만료 포함)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 비어 있는지
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 영속화용 값 (오래된 순)
    pub fn to_value(&self) -> Value {
        Value::Array(
            self.entries
                .iter()
                .filter_map(|e| serde_json::to_value(e).ok())
                .collect(),
        )
    }

    /// 저장소 값을 스키마 검증과 함께 디코딩합니다.
    pub fn decode(
        value: Value,
        capacity: usize,
        ttl: Duration,
    ) -> Result<Self, CorruptedStateError> {
        if !value.is_array() {
            return Err(CorruptedStateError::new(
                CAPTURE_HISTORY_KEY,
                format!("expected array, found {}", json_kind(&value)),
            ));
        }
        let entries: Vec<CaptureHistoryEntry> = serde_json::from_value(value)
            .map_err(|e| CorruptedStateError::new(CAPTURE_HISTORY_KEY, e.to_string()))?;

        let mut history = Self::new(capacity, ttl);
        let skip = entries.len().saturating_sub(history.capacity);
        history.entries.extend(entries.into_iter().skip(skip));
        Ok(history)
    }
}
