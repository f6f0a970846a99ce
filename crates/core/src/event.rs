//! 호스트 이벤트 -- 코어가 외부 협력자에게 알리는 부수 효과
//!
//! 뱃지 갱신, 캡처 종료, 규칙 재구성 요청은 코어가 직접 수행하지 않고
//! [`HostEvent`]로 방출하여 데몬이 호스트(브라우저 확장 등)로 전달합니다.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::TabId;

/// 캡처 세션 종료 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureEnd {
    /// 사용자 정지 (캡처 보존)
    Completed,
    /// 시간 초과
    Expired,
    /// 도메인 변경 또는 탭 전환으로 취소 (캡처 폐기)
    Cancelled,
}

impl fmt::Display for CaptureEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Expired => write!(f, "expired"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// 코어가 방출하는 호스트 이벤트
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum HostEvent {
    /// 탭의 탐지 개수 뱃지 갱신
    #[serde(rename_all = "camelCase")]
    BadgeUpdate {
        /// 대상 탭
        tab_id: TabId,
        /// 병합된 결과 수
        count: usize,
    },

    /// 캡처 세션이 종료 상태에 도달
    #[serde(rename_all = "camelCase")]
    CaptureFinished {
        /// 대상 탭
        tab_id: TabId,
        /// 종료 상태
        state: CaptureEnd,
        /// 남은 캡처 수
        capture_count: usize,
        /// 만료 시 아무것도 수집하지 못했는지
        no_captures: bool,
    },

    /// 영속 상태 손상으로 규칙 카탈로그 재구성이 필요함
    #[serde(rename_all = "camelCase")]
    RebuildRequested {
        /// 요청 사유
        reason: String,
    },
}

impl HostEvent {
    /// 로깅용 이벤트 타입명
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::BadgeUpdate { .. } => "badge_update",
            Self::CaptureFinished { .. } => "capture_finished",
            Self::RebuildRequested { .. } => "rebuild_requested",
        }
    }
}
