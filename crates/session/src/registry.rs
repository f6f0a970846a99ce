//! 탭 세션 레지스트리
//!
//! 탭 세션의 생명주기 `Uninitialized → Active → (Active | Reset) → Closed`를
//! 명시적인 소유 맵으로 관리합니다.
//! 레지스트리에 없는 탭은 Uninitialized, 제거된 탭은 Closed입니다.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use vendorscope_core::metrics as m;
use vendorscope_core::types::{DetectionResult, TabId, now_millis};

use crate::capture::CaptureMachine;
use crate::merge::merge_for_display;

/// 세션 단계
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    /// 결과가 있거나 받을 준비가 됨
    #[default]
    Active,
    /// 내비게이션으로 결과가 비워짐
    Reset,
}

/// 탭 하나의 탐지 세션
#[derive(Debug, Clone)]
pub struct TabSession {
    /// 탭 ID
    pub tab_id: TabId,
    /// 현재 URL
    pub url: String,
    /// 단계
    pub phase: SessionPhase,
    /// 최근 분석의 탐지 결과
    pub detection_results: Vec<DetectionResult>,
    /// 누적된 고급 결과
    pub advanced_results: Vec<DetectionResult>,
    /// 캡처 상태 머신
    pub capture: CaptureMachine,
    /// 마지막 갱신 시각 (Unix epoch 밀리초)
    pub last_updated_at: u64,
}

impl TabSession {
    /// 빈 세션을 생성합니다.
    pub fn new(tab_id: TabId, url: impl Into<String>) -> Self {
        Self {
            tab_id,
            url: url.into(),
            phase: SessionPhase::Active,
            detection_results: Vec::new(),
            advanced_results: Vec::new(),
            capture: CaptureMachine::new(tab_id),
            last_updated_at: now_millis(),
        }
    }

    /// 표시용 병합 결과
    pub fn merged_results(&self) -> Vec<DetectionResult> {
        merge_for_display(&self.detection_results, &self.advanced_results)
    }

    /// 탐지/고급 결과를 비우고 Reset 단계로 전환합니다.
    pub fn reset(&mut self, url: impl Into<String>) {
        self.url = url.into();
        self.detection_results.clear();
        self.advanced_results.clear();
        self.phase = SessionPhase::Reset;
        self.touch();
    }

    /// 갱신 시각을 현재로 맞춥니다.
    pub fn touch(&mut self) {
        self.last_updated_at = now_millis();
    }
}

/// 탭 세션 소유 맵
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<TabId, TabSession>,
}

impl SessionRegistry {
    /// 빈 레지스트리를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 세션이 없으면 생성하고, 있으면 기존 세션을 반환합니다.
    pub fn create(&mut self, tab_id: TabId, url: &str) -> &mut TabSession {
        if !self.sessions.contains_key(&tab_id) {
            self.sessions.insert(tab_id, TabSession::new(tab_id, url));
            self.record_gauge();
        }
        self.sessions
            .entry(tab_id)
            .or_insert_with(|| TabSession::new(tab_id, url))
    }

    /// 복원된 세션을 넣습니다. 같은 탭의 기존 세션은 교체됩니다.
    pub fn insert(&mut self, session: TabSession) {
        self.sessions.insert(session.tab_id, session);
        self.record_gauge();
    }

    /// 세션을 조회합니다.
    pub fn get(&self, tab_id: TabId) -> Option<&TabSession> {
        self.sessions.get(&tab_id)
    }

    /// 세션을 변경 가능하게 조회합니다.
    pub fn get_mut(&mut self, tab_id: TabId) -> Option<&mut TabSession> {
        self.sessions.get_mut(&tab_id)
    }

    /// 세션의 결과를 비웁니다 (Reset). 세션이 없으면 만들어 둡니다.
    ///
    /// 캡처 상태는 건드리지 않습니다.
    pub fn clear(&mut self, tab_id: TabId, url: &str) -> &mut TabSession {
        let session = self.create(tab_id, url);
        session.reset(url);
        session
    }

    /// 세션을 제거합니다 (Closed).
    pub fn destroy(&mut self, tab_id: TabId) -> Option<TabSession> {
        let removed = self.sessions.remove(&tab_id);
        self.record_gauge();
        removed
    }

    /// 모든 세션을 변경 가능하게 순회합니다.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut TabSession> {
        self.sessions.values_mut()
    }

    /// 세션 수
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// 세션이 없는지
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn record_gauge(&self) {
        metrics::gauge!(m::SESSION_ACTIVE_TABS).set(self.sessions.len() as f64);
    }
}
