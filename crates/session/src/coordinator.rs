//! 탭 세션 코디네이터
//!
//! [`TabSessionCoordinator`]는 탭별 탐지 세션과 캡처 서브 세션을 관리합니다.
//!
//! # 동작
//! - 모든 호출은 하나의 태스크에서 순차적으로 처리된다고 가정합니다 (`&mut self`).
//! - 결과 변경은 스냅샷을 저장하고 `BadgeUpdate` 이벤트를 방출합니다.
//! - 캡처 만료는 [`Scheduler`]가 [`SessionTimer`]를 채널로 보내면
//!   [`handle_timer`](TabSessionCoordinator::handle_timer)로 처리합니다.
//! - 영속화 실패는 로그만 남기고 호출자에게 전파하지 않습니다.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use vendorscope_core::error::StorageError;
use vendorscope_core::event::{CaptureEnd, HostEvent};
use vendorscope_core::metrics as m;
use vendorscope_core::store::StateStore;
use vendorscope_core::types::{DetectionResult, TabId, now_millis};

use crate::capture::{ArmTicket, CaptureStatus, CapturedParameterSet, FinishedCapture};
use crate::config::SessionSettings;
use crate::error::SessionError;
use crate::history::{CAPTURE_HISTORY_KEY, CaptureHistory, CaptureHistoryEntry};
use crate::merge::merge_advanced;
use crate::registry::{SessionPhase, SessionRegistry};
use crate::scheduler::Scheduler;
use crate::storage::SnapshotStore;

/// 타이머 채널 용량
const TIMER_CHANNEL_CAPACITY: usize = 256;

/// 코디네이터가 예약하는 지연 메시지
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTimer {
    /// 캡처 윈도우 만료
    CaptureExpired {
        /// 대상 탭
        tab_id: TabId,
        /// 무장 epoch
        epoch: u64,
    },
}

/// [`TabSessionCoordinator::get_merged`] 조회 결과
#[derive(Debug, Clone, Default)]
pub struct MergedLookup {
    /// 병합된 탐지 결과
    pub results: Vec<DetectionResult>,
    /// 손상된 스냅샷을 폐기했으므로 규칙 재구성이 필요함
    pub rebuild_required: bool,
}

impl MergedLookup {
    fn found(results: Vec<DetectionResult>) -> Self {
        Self {
            results,
            rebuild_required: false,
        }
    }
}

/// 탭 세션 코디네이터
pub struct TabSessionCoordinator<S: StateStore> {
    registry: SessionRegistry,
    snapshots: SnapshotStore<S>,
    state: Arc<S>,
    settings: SessionSettings,
    history: Option<CaptureHistory>,
    scheduler: Scheduler<TabId, SessionTimer>,
    events: mpsc::Sender<HostEvent>,
}

impl<S: StateStore> TabSessionCoordinator<S> {
    /// 코디네이터를 생성합니다.
    ///
    /// 반환된 수신자로 들어오는 [`SessionTimer`]를 [`handle_timer`](Self::handle_timer)에
    /// 넘겨야 캡처 만료가 동작합니다.
    pub fn new(
        state: Arc<S>,
        settings: SessionSettings,
        events: mpsc::Sender<HostEvent>,
    ) -> (Self, mpsc::Receiver<SessionTimer>) {
        let (timer_tx, timer_rx) = mpsc::channel(TIMER_CHANNEL_CAPACITY);
        let coordinator = Self {
            registry: SessionRegistry::new(),
            snapshots: SnapshotStore::new(Arc::clone(&state)),
            state,
            settings,
            history: None,
            scheduler: Scheduler::new(timer_tx),
            events,
        };
        (coordinator, timer_rx)
    }

    /// 세션 레지스트리
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// 런타임 설정
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// 새 분석 결과. 탐지 결과를 덮어씁니다.
    pub async fn on_signal_ready(&mut self, tab_id: TabId, url: &str, results: Vec<DetectionResult>) {
        let session = self.registry.create(tab_id, url);
        session.url = url.to_owned();
        session.detection_results = results;
        session.phase = SessionPhase::Active;
        session.touch();
        let count = session.merged_results().len();

        debug!(tab_id, count, "detection results updated");
        self.persist(tab_id).await;
        self.emit(HostEvent::BadgeUpdate { tab_id, count });
    }

    /// 고급 결과. 기존 고급 결과에 누적합니다.
    ///
    /// 신뢰도가 0-100을 벗어난 결과가 하나라도 있으면 아무것도 반영하지 않습니다.
    pub async fn on_advanced_results(
        &mut self,
        tab_id: TabId,
        url: &str,
        results: Vec<DetectionResult>,
    ) -> Result<(), SessionError> {
        if let Some(bad) = results.iter().find(|r| !r.confidence_in_range()) {
            return Err(SessionError::ConfidenceOutOfRange {
                rule_id: bad.merge_key().to_owned(),
            });
        }

        let session = self.registry.create(tab_id, url);
        session.url = url.to_owned();
        merge_advanced(&mut session.advanced_results, results);
        session.phase = SessionPhase::Active;
        session.touch();
        let count = session.merged_results().len();

        debug!(tab_id, count, "advanced results merged");
        self.persist(tab_id).await;
        self.emit(HostEvent::BadgeUpdate { tab_id, count });
        Ok(())
    }

    /// 내비게이션 시작. 결과를 비우고, 도메인이 바뀌면 캡처를 취소합니다.
    pub async fn on_navigation_start(&mut self, tab_id: TabId, url: &str) {
        let new_domain = domain_of(url).unwrap_or_default();
        let session = self.registry.clear(tab_id, url);
        let cancelled = session.capture.cancel_on_domain_change(&new_domain);

        if let Some(finished) = cancelled {
            info!(tab_id, domain = %new_domain, "capture cancelled by domain change");
            self.finish_capture(finished).await;
        }
        self.persist(tab_id).await;
        self.emit(HostEvent::BadgeUpdate { tab_id, count: 0 });
    }

    /// 탭 닫힘. 세션과 캡처, 타이머, 스냅샷을 모두 제거합니다.
    pub async fn on_tab_closed(&mut self, tab_id: TabId) {
        self.scheduler.cancel(&tab_id);
        if self.registry.destroy(tab_id).is_some() {
            debug!(tab_id, "session destroyed");
        }
        if let Err(e) = self.snapshots.remove(tab_id).await {
            warn!(tab_id, error = %e, "failed to remove tab snapshot");
            metrics::counter!(m::SESSION_PERSIST_FAILURES_TOTAL).increment(1);
        }
    }

    /// 탭 활성화. 다른 탭의 진행 중인 캡처를 모두 취소합니다.
    pub async fn on_tab_activated(&mut self, tab_id: TabId) {
        let mut finished = Vec::new();
        for session in self.registry.iter_mut() {
            if session.tab_id != tab_id
                && session.capture.is_live()
                && let Ok(f) = session.capture.cancel()
            {
                finished.push(f);
            }
        }
        for f in finished {
            info!(tab_id = f.session.tab_id, active_tab = tab_id, "capture cancelled by tab switch");
            self.finish_capture(f).await;
        }
    }

    /// 탭의 표시용 병합 결과
    ///
    /// 메모리에 세션이 없으면 스냅샷에서 복원합니다. 스냅샷이 손상되었으면
    /// 삭제하고 `RebuildRequested`를 방출한 뒤 빈 목록과 함께
    /// `rebuild_required`를 설정합니다. 규칙 재구성은 호출자가 수행합니다.
    pub async fn get_merged(&mut self, tab_id: TabId) -> MergedLookup {
        if let Some(session) = self.registry.get(tab_id) {
            return MergedLookup::found(session.merged_results());
        }
        if !self.settings.persist {
            return MergedLookup::default();
        }

        match self.snapshots.load(tab_id).await {
            Ok(Some(snapshot)) => {
                let session = snapshot.into_session(tab_id);
                let merged = session.merged_results();
                debug!(tab_id, count = merged.len(), "session restored from snapshot");
                self.registry.insert(session);
                MergedLookup::found(merged)
            }
            Ok(None) => MergedLookup::default(),
            Err(StorageError::Corrupted(e)) => {
                warn!(tab_id, error = %e, "tab snapshot corrupted, discarding");
                metrics::counter!(m::SESSION_CORRUPTED_SNAPSHOTS_TOTAL).increment(1);
                if let Err(e) = self.snapshots.remove(tab_id).await {
                    warn!(tab_id, error = %e, "failed to remove corrupted snapshot");
                }
                self.emit(HostEvent::RebuildRequested {
                    reason: e.to_string(),
                });
                MergedLookup {
                    results: Vec::new(),
                    rebuild_required: true,
                }
            }
            Err(e) => {
                warn!(tab_id, error = %e, "failed to read tab snapshot, treating as miss");
                MergedLookup::default()
            }
        }
    }

    /// 캡처를 무장하고 만료 타이머를 예약합니다.
    pub fn arm_capture(
        &mut self,
        tab_id: TabId,
        targets: Vec<String>,
        window_ms: Option<u64>,
    ) -> Result<ArmTicket, SessionError> {
        let window = self.settings.capture_window(window_ms);
        let session = self
            .registry
            .get_mut(tab_id)
            .ok_or(SessionError::UnknownTab(tab_id))?;
        let domain = domain_of(&session.url).unwrap_or_default();
        let ticket = session.capture.arm(targets, domain, window, now_millis())?;

        self.scheduler.schedule(
            tab_id,
            ticket.window,
            SessionTimer::CaptureExpired {
                tab_id,
                epoch: ticket.epoch,
            },
        );
        metrics::counter!(m::SESSION_CAPTURES_ARMED_TOTAL).increment(1);
        info!(
            tab_id,
            epoch = ticket.epoch,
            window_ms = ticket.window.as_millis() as u64,
            "capture armed"
        );
        Ok(ticket)
    }

    /// 수집된 파라미터를 캡처에 추가합니다. 수집된 총 개수를 반환합니다.
    pub fn submit_capture(
        &mut self,
        tab_id: TabId,
        target: &str,
        url: &str,
        parameters: BTreeMap<String, String>,
    ) -> Result<usize, SessionError> {
        let session = self
            .registry
            .get_mut(tab_id)
            .ok_or(SessionError::UnknownTab(tab_id))?;
        let count = session.capture.collect(CapturedParameterSet {
            target: target.to_owned(),
            url: url.to_owned(),
            parameters,
            captured_at: now_millis(),
        })?;
        debug!(tab_id, target, count, "capture collected");
        Ok(count)
    }

    /// 사용자 정지. 캡처를 보존하고 이력에 남깁니다.
    pub async fn stop_capture(&mut self, tab_id: TabId) -> Result<CaptureStatus, SessionError> {
        let session = self
            .registry
            .get_mut(tab_id)
            .ok_or(SessionError::UnknownTab(tab_id))?;
        let finished = session.capture.stop()?;
        self.finish_capture(finished).await;
        Ok(self.capture_status(tab_id))
    }

    /// 탭의 캡처 상태. 세션이 없으면 Idle.
    pub fn capture_status(&self, tab_id: TabId) -> CaptureStatus {
        self.registry
            .get(tab_id)
            .map(|s| s.capture.status())
            .unwrap_or_else(CaptureStatus::idle)
    }

    /// 만료되지 않은 캡처 이력 (최근 순)
    pub async fn capture_history(&mut self) -> Vec<CaptureHistoryEntry> {
        let now = now_millis();
        self.history_mut().await.entries(now)
    }

    /// 예약된 타이머 메시지를 처리합니다.
    pub async fn handle_timer(&mut self, timer: SessionTimer) {
        match timer {
            SessionTimer::CaptureExpired { tab_id, epoch } => {
                let finished = self
                    .registry
                    .get_mut(tab_id)
                    .and_then(|s| s.capture.expire(epoch));
                match finished {
                    Some(finished) => {
                        info!(
                            tab_id,
                            epoch,
                            captures = finished.capture_count(),
                            "capture window expired"
                        );
                        self.finish_capture(finished).await;
                    }
                    None => {
                        debug!(tab_id, epoch, "stale capture expiry ignored");
                        metrics::counter!(m::SESSION_STALE_CALLBACKS_TOTAL).increment(1);
                    }
                }
            }
        }
    }

    /// 대기 중인 모든 타이머를 취소합니다.
    pub fn shutdown(&mut self) {
        self.scheduler.cancel_all();
    }

    async fn finish_capture(&mut self, finished: FinishedCapture) {
        let tab_id = finished.session.tab_id;
        self.scheduler.cancel(&tab_id);
        metrics::counter!(
            m::SESSION_CAPTURES_FINISHED_TOTAL,
            m::LABEL_CAPTURE_END => finished.state.to_string()
        )
        .increment(1);

        if finished.state != CaptureEnd::Cancelled && finished.capture_count() > 0 {
            let now = now_millis();
            let entry = CaptureHistoryEntry::from_finished(&finished, now);
            let history = self.history_mut().await;
            history.push(entry, now);
            let value = history.to_value();
            if self.settings.persist
                && let Err(e) = self.state.put(CAPTURE_HISTORY_KEY, value).await
            {
                warn!(error = %e, "failed to persist capture history");
                metrics::counter!(m::SESSION_PERSIST_FAILURES_TOTAL).increment(1);
            }
        }
        self.emit(finished.to_event());
    }

    async fn history_mut(&mut self) -> &mut CaptureHistory {
        if self.history.is_none() {
            let loaded = self.load_history().await;
            self.history = Some(loaded);
        }
        let capacity = self.settings.history_capacity;
        let ttl = self.settings.history_ttl;
        self.history
            .get_or_insert_with(|| CaptureHistory::new(capacity, ttl))
    }

    async fn load_history(&self) -> CaptureHistory {
        let capacity = self.settings.history_capacity;
        let ttl = self.settings.history_ttl;
        if !self.settings.persist {
            return CaptureHistory::new(capacity, ttl);
        }

        let decoded = match self.state.get(CAPTURE_HISTORY_KEY).await {
            Ok(Some(value)) => CaptureHistory::decode(value, capacity, ttl).map_err(Into::into),
            Ok(None) => Ok(CaptureHistory::new(capacity, ttl)),
            Err(e) => Err(e),
        };
        match decoded {
            Ok(history) => history,
            Err(StorageError::Corrupted(e)) => {
                warn!(error = %e, "capture history corrupted, starting empty");
                metrics::counter!(m::SESSION_CORRUPTED_SNAPSHOTS_TOTAL).increment(1);
                if let Err(e) = self.state.remove(CAPTURE_HISTORY_KEY).await {
                    warn!(error = %e, "failed to remove corrupted capture history");
                }
                CaptureHistory::new(capacity, ttl)
            }
            Err(e) => {
                warn!(error = %e, "failed to read capture history, starting empty");
                CaptureHistory::new(capacity, ttl)
            }
        }
    }

    async fn persist(&self, tab_id: TabId) {
        if !self.settings.persist {
            return;
        }
        let Some(session) = self.registry.get(tab_id) else {
            return;
        };
        if let Err(e) = self.snapshots.save(session).await {
            warn!(tab_id, error = %e, "failed to persist tab snapshot");
            metrics::counter!(m::SESSION_PERSIST_FAILURES_TOTAL).increment(1);
        }
    }

    fn emit(&self, event: HostEvent) {
        let event_type = event.event_type();
        if let Err(e) = self.events.try_send(event) {
            warn!(event_type, error = %e, "failed to emit host event");
        }
    }
}

/// URL의 호스트를 소문자로 반환합니다. 호스트가 없거나 파싱에 실패하면 `None`.
pub fn domain_of(raw: &str) -> Option<String> {
    url::Url::parse(raw)
        .ok()?
        .host_str()
        .map(|h| h.to_ascii_lowercase())
}
