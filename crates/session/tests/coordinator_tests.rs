//! 통합 테스트 -- 탭 세션 코디네이터와 캡처 모드

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;

use vendorscope_core::event::{CaptureEnd, HostEvent};
use vendorscope_core::store::{MemoryStateStore, StateStore};
use vendorscope_core::types::{DetectionResult, Match, Provenance, SignalKind};
use vendorscope_session::{
    CaptureState, SessionError, SessionSettings, SessionTimer, TabSessionCoordinator,
};

type Coordinator = TabSessionCoordinator<MemoryStateStore>;

struct Harness {
    coordinator: Coordinator,
    timers: mpsc::Receiver<SessionTimer>,
    events: mpsc::Receiver<HostEvent>,
    state: Arc<MemoryStateStore>,
}

impl Harness {
    fn new() -> Self {
        Self::with_state(Arc::new(MemoryStateStore::new()))
    }

    fn with_state(state: Arc<MemoryStateStore>) -> Self {
        let (event_tx, events) = mpsc::channel(64);
        let (coordinator, timers) =
            TabSessionCoordinator::new(Arc::clone(&state), SessionSettings::default(), event_tx);
        Self {
            coordinator,
            timers,
            events,
            state,
        }
    }

    fn drain_events(&mut self) -> Vec<HostEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    /// 다음 타이머를 받아 처리합니다.
    async fn fire_next_timer(&mut self) {
        let timer = self.timers.recv().await.expect("timer");
        self.coordinator.handle_timer(timer).await;
    }
}

fn result(rule_id: &str, name: &str, confidence: u8) -> DetectionResult {
    DetectionResult {
        rule_id: rule_id.to_owned(),
        display_name: name.to_owned(),
        category: "CAPTCHA".to_owned(),
        color: "#10B981".to_owned(),
        provenance: Provenance::Builtin,
        confidence,
        matches: vec![Match::new(SignalKind::Script, "api.js", "", confidence)],
        trigger: None,
        parameters: BTreeMap::new(),
    }
}

fn params(sitekey: &str) -> BTreeMap<String, String> {
    let mut p = BTreeMap::new();
    p.insert("sitekey".to_owned(), sitekey.to_owned());
    p
}

#[tokio::test]
async fn signal_ready_persists_and_updates_badge() {
    let mut h = Harness::new();
    h.coordinator
        .on_signal_ready(1, "https://shop.test/", vec![result("recaptcha", "reCAPTCHA", 90)])
        .await;

    assert_eq!(
        h.drain_events(),
        vec![HostEvent::BadgeUpdate { tab_id: 1, count: 1 }]
    );
    let snapshot = h.state.get("tab_1").await.unwrap().unwrap();
    assert_eq!(snapshot["url"], "https://shop.test/");
    assert_eq!(snapshot["results"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn advanced_results_merge_into_display_list() {
    let mut h = Harness::new();
    h.coordinator
        .on_signal_ready(1, "https://shop.test/", vec![result("recaptcha", "reCAPTCHA", 90)])
        .await;

    let mut advanced = result("recaptcha", "reCAPTCHA", 70);
    advanced.trigger = Some("click".to_owned());
    advanced.parameters = params("6Le-abc");
    h.coordinator
        .on_advanced_results(1, "https://shop.test/", vec![advanced.clone()])
        .await
        .unwrap();
    h.coordinator
        .on_advanced_results(1, "https://shop.test/", vec![advanced])
        .await
        .unwrap();

    let merged = h.coordinator.get_merged(1).await.results;
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].confidence, 90);
    assert_eq!(merged[0].parameters["sitekey"], "6Le-abc");
    assert_eq!(
        h.coordinator.registry().get(1).unwrap().advanced_results.len(),
        1
    );
}

#[tokio::test]
async fn advanced_results_with_invalid_confidence_are_rejected() {
    let mut h = Harness::new();
    h.coordinator
        .on_signal_ready(1, "https://shop.test/", vec![result("recaptcha", "reCAPTCHA", 90)])
        .await;
    h.drain_events();

    let err = h
        .coordinator
        .on_advanced_results(
            1,
            "https://shop.test/",
            vec![result("akamai", "Akamai", 50), result("hcaptcha", "hCaptcha", 250)],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::ConfidenceOutOfRange { ref rule_id } if rule_id == "hcaptcha"));

    assert!(h.coordinator.registry().get(1).unwrap().advanced_results.is_empty());
    assert!(h.drain_events().is_empty());
    assert_eq!(h.coordinator.get_merged(1).await.results.len(), 1);
}

#[tokio::test]
async fn navigation_wipes_results() {
    let mut h = Harness::new();
    h.coordinator
        .on_signal_ready(1, "https://shop.test/", vec![result("recaptcha", "reCAPTCHA", 90)])
        .await;
    h.drain_events();

    h.coordinator.on_navigation_start(1, "https://shop.test/next").await;

    assert!(h.coordinator.get_merged(1).await.results.is_empty());
    assert_eq!(
        h.drain_events(),
        vec![HostEvent::BadgeUpdate { tab_id: 1, count: 0 }]
    );
}

#[tokio::test(start_paused = true)]
async fn capture_expires_with_no_captures() {
    let mut h = Harness::new();
    h.coordinator.on_signal_ready(3, "https://shop.test/", vec![]).await;
    h.drain_events();

    let ticket = h
        .coordinator
        .arm_capture(3, vec!["recaptcha".to_owned()], Some(1_000))
        .unwrap();
    assert_eq!(ticket.window, Duration::from_secs(1));
    assert_eq!(h.coordinator.capture_status(3).state, CaptureState::Armed);

    tokio::time::advance(Duration::from_millis(1_001)).await;
    h.fire_next_timer().await;

    assert_eq!(h.coordinator.capture_status(3).state, CaptureState::Expired);
    assert_eq!(
        h.drain_events(),
        vec![HostEvent::CaptureFinished {
            tab_id: 3,
            state: CaptureEnd::Expired,
            capture_count: 0,
            no_captures: true,
        }]
    );
    assert!(h.coordinator.capture_history().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn capture_survives_same_domain_reload_and_cancels_on_domain_change() {
    let mut h = Harness::new();
    h.coordinator.on_signal_ready(5, "https://shop.test/login", vec![]).await;
    h.coordinator.arm_capture(5, vec![], Some(15_000)).unwrap();
    h.coordinator
        .submit_capture(5, "recaptcha", "https://shop.test/login", params("k1"))
        .unwrap();
    h.drain_events();

    // 같은 도메인 재로드는 캡처를 유지
    h.coordinator.on_navigation_start(5, "https://SHOP.test/login?r=1").await;
    let status = h.coordinator.capture_status(5);
    assert!(status.active);
    assert_eq!(status.captures.len(), 1);

    h.coordinator.on_navigation_start(5, "https://elsewhere.test/").await;
    let status = h.coordinator.capture_status(5);
    assert_eq!(status.state, CaptureState::Cancelled);
    assert!(status.captures.is_empty());

    let events = h.drain_events();
    assert!(events.contains(&HostEvent::CaptureFinished {
        tab_id: 5,
        state: CaptureEnd::Cancelled,
        capture_count: 0,
        no_captures: false,
    }));

    // 취소된 세션의 타이머는 더 이상 도착하지 않음
    tokio::time::advance(Duration::from_secs(20)).await;
    tokio::task::yield_now().await;
    assert!(h.timers.try_recv().is_err());
}

#[tokio::test]
async fn tab_activation_cancels_other_tabs() {
    let mut h = Harness::new();
    h.coordinator.on_signal_ready(1, "https://a.test/", vec![]).await;
    h.coordinator.on_signal_ready(2, "https://b.test/", vec![]).await;
    h.coordinator.arm_capture(1, vec![], None).unwrap();
    h.coordinator.arm_capture(2, vec![], None).unwrap();
    h.drain_events();

    h.coordinator.on_tab_activated(2).await;

    assert_eq!(h.coordinator.capture_status(1).state, CaptureState::Cancelled);
    assert_eq!(h.coordinator.capture_status(2).state, CaptureState::Armed);
    assert_eq!(h.drain_events().len(), 1);
}

#[tokio::test]
async fn stale_expiry_is_ignored() {
    let mut h = Harness::new();
    h.coordinator.on_signal_ready(1, "https://a.test/", vec![]).await;
    let first = h.coordinator.arm_capture(1, vec![], None).unwrap();
    h.coordinator.stop_capture(1).await.unwrap();
    h.coordinator.arm_capture(1, vec![], None).unwrap();
    h.drain_events();

    h.coordinator
        .handle_timer(SessionTimer::CaptureExpired {
            tab_id: 1,
            epoch: first.epoch,
        })
        .await;

    assert_eq!(h.coordinator.capture_status(1).state, CaptureState::Armed);
    assert!(h.drain_events().is_empty());
}

#[tokio::test]
async fn stop_keeps_captures_and_records_history() {
    let state = Arc::new(MemoryStateStore::new());
    let mut h = Harness::with_state(Arc::clone(&state));
    h.coordinator.on_signal_ready(1, "https://shop.test/", vec![]).await;
    h.coordinator
        .arm_capture(1, vec!["hcaptcha".to_owned()], None)
        .unwrap();

    let rejected = h
        .coordinator
        .submit_capture(1, "recaptcha", "https://shop.test/", params("x"));
    assert!(matches!(rejected, Err(SessionError::Capture(_))));
    h.coordinator
        .submit_capture(1, "hcaptcha", "https://shop.test/", params("k"))
        .unwrap();

    let status = h.coordinator.stop_capture(1).await.unwrap();
    assert_eq!(status.state, CaptureState::Completed);
    assert_eq!(status.captures.len(), 1);

    let history = h.coordinator.capture_history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].domain, "shop.test");
    assert_eq!(history[0].state, CaptureEnd::Completed);

    // 새 코디네이터가 영속화된 이력을 읽음
    let mut restarted = Harness::with_state(state);
    assert_eq!(restarted.coordinator.capture_history().await.len(), 1);
}

#[tokio::test]
async fn arm_on_unknown_tab_fails() {
    let mut h = Harness::new();
    assert!(matches!(
        h.coordinator.arm_capture(99, vec![], None),
        Err(SessionError::UnknownTab(99))
    ));
    assert!(matches!(
        h.coordinator.stop_capture(99).await,
        Err(SessionError::UnknownTab(99))
    ));
    assert_eq!(h.coordinator.capture_status(99).state, CaptureState::Idle);
}

#[tokio::test]
async fn get_merged_restores_from_snapshot() {
    let state = Arc::new(MemoryStateStore::new());
    {
        let mut h = Harness::with_state(Arc::clone(&state));
        h.coordinator
            .on_signal_ready(4, "https://shop.test/", vec![result("recaptcha", "reCAPTCHA", 90)])
            .await;
    }

    let mut h = Harness::with_state(state);
    assert!(h.coordinator.registry().get(4).is_none());
    let merged = h.coordinator.get_merged(4).await.results;
    assert_eq!(merged.len(), 1);
    assert!(h.coordinator.registry().get(4).is_some());
}

#[tokio::test]
async fn corrupted_snapshot_requests_rebuild() {
    let state = Arc::new(MemoryStateStore::new());
    state
        .put("tab_8", json!({"results": "not-an-array", "url": "x", "timestamp": 0}))
        .await
        .unwrap();
    let mut h = Harness::with_state(Arc::clone(&state));

    let lookup = h.coordinator.get_merged(8).await;
    assert!(lookup.results.is_empty());
    assert!(lookup.rebuild_required);
    let events = h.drain_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type(), "rebuild_requested");
    assert!(state.get("tab_8").await.unwrap().is_none());
}

#[tokio::test]
async fn persistence_failures_are_not_fatal() {
    let mut h = Harness::new();
    h.state.set_fail_writes(true);
    h.coordinator
        .on_signal_ready(1, "https://shop.test/", vec![result("recaptcha", "reCAPTCHA", 90)])
        .await;

    assert_eq!(h.coordinator.get_merged(1).await.results.len(), 1);
    assert_eq!(
        h.drain_events(),
        vec![HostEvent::BadgeUpdate { tab_id: 1, count: 1 }]
    );
}

#[tokio::test(start_paused = true)]
async fn tab_close_removes_everything() {
    let mut h = Harness::new();
    h.coordinator.on_signal_ready(6, "https://shop.test/", vec![]).await;
    h.coordinator.arm_capture(6, vec![], Some(2_000)).unwrap();

    h.coordinator.on_tab_closed(6).await;

    assert!(h.coordinator.registry().get(6).is_none());
    assert!(h.state.get("tab_6").await.unwrap().is_none());
    tokio::time::advance(Duration::from_secs(3)).await;
    tokio::task::yield_now().await;
    assert!(h.timers.try_recv().is_err());
}
