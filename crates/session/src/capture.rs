//! 캡처 모드 상태 머신
//!
//! 탭마다 하나의 [`CaptureMachine`]이 CAPTCHA 챌린지 파라미터를 수집하는
//! 시간 제한 서브 세션을 관리합니다.
//!
//! # 상태 전이
//! ```text
//! Idle ──arm──▶ Armed ──collect──▶ Collecting ──┬─stop──────▶ Completed
//!                 │                    │         ├─expire────▶ Expired
//!                 └────────────────────┴─────────┴─cancel────▶ Cancelled
//! (Completed | Expired | Cancelled) ──arm──▶ Armed
//! ```
//!
//! 무장할 때마다 프로세스 전역에서 유일한 epoch가 할당됩니다.
//! 만료 타이머는 epoch를 싣고 오며, 현재 epoch와 다르면 무시됩니다.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use vendorscope_core::event::{CaptureEnd, HostEvent};
use vendorscope_core::types::TabId;

use crate::config::clamp_window;
use crate::error::CaptureError;

static NEXT_EPOCH: AtomicU64 = AtomicU64::new(1);

/// 캡처 세션 상태
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureState {
    /// 캡처 없음
    #[default]
    Idle,
    /// 무장됨, 아직 수집 없음
    Armed,
    /// 하나 이상 수집됨
    Collecting,
    /// 사용자 정지 (캡처 보존)
    Completed,
    /// 시간 초과
    Expired,
    /// 도메인 변경 또는 탭 전환 (캡처 폐기)
    Cancelled,
}

impl CaptureState {
    /// 수집 중인 상태인지 (Armed, Collecting)
    pub fn is_live(self) -> bool {
        matches!(self, Self::Armed | Self::Collecting)
    }

    /// 종료 상태인지
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Expired | Self::Cancelled)
    }

    /// 고정 이름
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Armed => "armed",
            Self::Collecting => "collecting",
            Self::Completed => "completed",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }
}

impl From<CaptureEnd> for CaptureState {
    fn from(end: CaptureEnd) -> Self {
        match end {
            CaptureEnd::Completed => Self::Completed,
            CaptureEnd::Expired => Self::Expired,
            CaptureEnd::Cancelled => Self::Cancelled,
        }
    }
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 한 번 수집된 챌린지 파라미터
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedParameterSet {
    /// 캡처 대상 (예: "recaptcha", "hcaptcha")
    pub target: String,
    /// 수집된 페이지 URL
    pub url: String,
    /// 파라미터
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    /// 수집 시각 (Unix epoch 밀리초)
    pub captured_at: u64,
}

/// 무장된 캡처 서브 세션
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSession {
    /// 세션 ID (uuid v4)
    pub id: String,
    /// 무장 epoch
    pub epoch: u64,
    /// 대상 탭
    pub tab_id: TabId,
    /// 허용 대상 목록. 비어 있으면 모두 허용
    pub targets: Vec<String>,
    /// 무장 시점의 도메인
    pub domain: String,
    /// 무장 시각 (Unix epoch 밀리초)
    pub armed_at: u64,
    /// 만료 시각 (Unix epoch 밀리초)
    pub expires_at: u64,
    /// 수집된 파라미터
    pub captures: Vec<CapturedParameterSet>,
}

impl CaptureSession {
    fn accepts(&self, target: &str) -> bool {
        self.targets.is_empty() || self.targets.iter().any(|t| t.eq_ignore_ascii_case(target))
    }
}

/// 무장 결과. 코디네이터가 만료 타이머를 예약하는 데 사용합니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArmTicket {
    /// 대상 탭
    pub tab_id: TabId,
    /// 무장 epoch
    pub epoch: u64,
    /// 세션 ID
    pub session_id: String,
    /// 제한된 캡처 윈도우
    pub window: Duration,
    /// 만료 시각 (Unix epoch 밀리초)
    pub expires_at: u64,
}

/// 종료 상태에 도달한 캡처
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedCapture {
    /// 종료 상태
    pub state: CaptureEnd,
    /// 종료 시점의 세션 (취소면 캡처 비어 있음)
    pub session: CaptureSession,
    /// 만료되었고 수집된 것이 없음
    pub no_captures: bool,
}

impl FinishedCapture {
    /// 남은 캡처 수
    pub fn capture_count(&self) -> usize {
        self.session.captures.len()
    }

    /// 호스트 이벤트로 변환합니다.
    pub fn to_event(&self) -> HostEvent {
        HostEvent::CaptureFinished {
            tab_id: self.session.tab_id,
            state: self.state,
            capture_count: self.capture_count(),
            no_captures: self.no_captures,
        }
    }
}

/// `getCaptureStatus` 응답
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureStatus {
    /// 수집 중인지
    pub active: bool,
    /// 현재 상태
    pub state: CaptureState,
    /// 세션 ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// 만료 시각
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    /// 수집된 파라미터
    pub captures: Vec<CapturedParameterSet>,
}

impl CaptureStatus {
    /// 캡처가 없는 탭의 상태
    pub fn idle() -> Self {
        Self {
            active: false,
            state: CaptureState::Idle,
            session_id: None,
            expires_at: None,
            captures: Vec::new(),
        }
    }
}

/// 탭 하나의 캡처 상태 머신
#[derive(Debug, Clone)]
pub struct CaptureMachine {
    tab_id: TabId,
    state: CaptureState,
    session: Option<CaptureSession>,
}

impl CaptureMachine {
    /// Idle 상태의 머신을 생성합니다.
    pub fn new(tab_id: TabId) -> Self {
        Self {
            tab_id,
            state: CaptureState::Idle,
            session: None,
        }
    }

    /// 현재 상태
    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// 현재 (또는 마지막) 세션
    pub fn session(&self) -> Option<&CaptureSession> {
        self.session.as_ref()
    }

    /// 현재 세션의 epoch. 무장한 적이 없으면 `None`.
    pub fn epoch(&self) -> Option<u64> {
        self.session.as_ref().map(|s| s.epoch)
    }

    /// 수집 중인지
    pub fn is_live(&self) -> bool {
        self.state.is_live()
    }

    /// 캡처를 무장합니다. Idle 또는 종료 상태에서만 가능합니다.
    ///
    /// 윈도우는 `[1s, 5min]`으로 제한됩니다.
    pub fn arm(
        &mut self,
        targets: Vec<String>,
        domain: impl Into<String>,
        window: Duration,
        now_ms: u64,
    ) -> Result<ArmTicket, CaptureError> {
        if self.state.is_live() {
            return Err(self.invalid("arm"));
        }

        let window = clamp_window(window);
        let epoch = NEXT_EPOCH.fetch_add(1, Ordering::Relaxed);
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        let session = CaptureSession {
            id: Uuid::new_v4().to_string(),
            epoch,
            tab_id: self.tab_id,
            targets: targets
                .into_iter()
                .map(|t| t.trim().to_owned())
                .filter(|t| !t.is_empty())
                .collect(),
            domain: domain.into(),
            armed_at: now_ms,
            expires_at: now_ms.saturating_add(window_ms),
            captures: Vec::new(),
        };

        let ticket = ArmTicket {
            tab_id: self.tab_id,
            epoch,
            session_id: session.id.clone(),
            window,
            expires_at: session.expires_at,
        };
        self.session = Some(session);
        self.state = CaptureState::Armed;
        Ok(ticket)
    }

    /// 파라미터 집합을 수집합니다. 수집된 총 개수를 반환합니다.
    pub fn collect(&mut self, params: CapturedParameterSet) -> Result<usize, CaptureError> {
        if !self.state.is_live() {
            return Err(self.invalid("collect"));
        }
        let Some(session) = self.session.as_mut() else {
            return Err(self.invalid("collect"));
        };
        if !session.accepts(&params.target) {
            return Err(CaptureError::TargetNotArmed {
                target: params.target,
            });
        }
        session.captures.push(params);
        self.state = CaptureState::Collecting;
        Ok(session.captures.len())
    }

    /// 만료 타이머 도착. 현재 epoch의 수집 중인 세션만 만료시킵니다.
    ///
    /// 늦게 도착한 타이머는 `None`을 반환합니다.
    pub fn expire(&mut self, epoch: u64) -> Option<FinishedCapture> {
        if !self.state.is_live() || self.epoch() != Some(epoch) {
            return None;
        }
        self.finish(CaptureEnd::Expired)
    }

    /// 새 도메인이 캡처 도메인과 다르면 취소합니다.
    ///
    /// 수집 중이 아니거나 같은 도메인이면 `None`.
    pub fn cancel_on_domain_change(&mut self, new_domain: &str) -> Option<FinishedCapture> {
        if !self.state.is_live() {
            return None;
        }
        let same = self
            .session
            .as_ref()
            .is_some_and(|s| s.domain.eq_ignore_ascii_case(new_domain));
        if same {
            return None;
        }
        self.finish(CaptureEnd::Cancelled)
    }

    /// 명시적 취소 (탭 전환). 캡처는 폐기됩니다.
    pub fn cancel(&mut self) -> Result<FinishedCapture, CaptureError> {
        if !self.state.is_live() {
            return Err(self.invalid("cancel"));
        }
        self.finish(CaptureEnd::Cancelled)
            .ok_or_else(|| self.invalid("cancel"))
    }

    /// 사용자 정지. 캡처는 보존됩니다.
    pub fn stop(&mut self) -> Result<FinishedCapture, CaptureError> {
        if !self.state.is_live() {
            return Err(self.invalid("stop"));
        }
        self.finish(CaptureEnd::Completed)
            .ok_or_else(|| self.invalid("stop"))
    }

    /// 현재 상태 요약
    pub fn status(&self) -> CaptureStatus {
        match &self.session {
            Some(session) => CaptureStatus {
                active: self.state.is_live(),
                state: self.state,
                session_id: Some(session.id.clone()),
                expires_at: Some(session.expires_at),
                captures: session.captures.clone(),
            },
            None => CaptureStatus::idle(),
        }
    }

    fn finish(&mut self, end: CaptureEnd) -> Option<FinishedCapture> {
        let session = self.session.as_mut()?;
        if end == CaptureEnd::Cancelled {
            session.captures.clear();
        }
        self.state = end.into();
        Some(FinishedCapture {
            state: end,
            no_captures: end == CaptureEnd::Expired && session.captures.is_empty(),
            session: session.clone(),
        })
    }

    fn invalid(&self, action: &'static str) -> CaptureError {
        CaptureError::InvalidTransition {
            from: self.state,
            action,
        }
    }
}
