//! Request routing -- maps host requests onto the rule store, the
//! detection engine and the tab session coordinator.
//!
//! The router is owned by a single task. Every method takes `&mut self`,
//! so requests, capture timers and debounce timers are applied in the
//! order the orchestrator receives them.

use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use vendorscope_core::config::VendorscopeConfig;
use vendorscope_core::error::VendorscopeError;
use vendorscope_core::event::HostEvent;
use vendorscope_core::metrics as m;
use vendorscope_core::pipeline::Detector;
use vendorscope_core::store::StateStore;
use vendorscope_core::types::{SignalBundle, TabId};
use vendorscope_detector::{DetectionEngine, DetectorConfig, RuleSource, RuleStore};
use vendorscope_session::{SessionSettings, SessionTimer, TabSessionCoordinator};

use crate::analysis::{AnalysisDebouncer, DebouncedAnalysis, Submission};
use crate::protocol::{Request, RequestEnvelope, Response, bundle};

/// Host event channel capacity.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Receivers the orchestrator selects on alongside host input.
pub struct RouterChannels {
    /// Capture expiry timers.
    pub timers: mpsc::Receiver<SessionTimer>,
    /// Debounced analysis timers.
    pub debounced: mpsc::Receiver<DebouncedAnalysis>,
    /// Events to forward to the host.
    pub events: mpsc::Receiver<HostEvent>,
}

/// Routes host requests to the detection and session layers.
pub struct Router<R: RuleSource, S: StateStore> {
    rules: RuleStore<R, S>,
    coordinator: TabSessionCoordinator<S>,
    debouncer: AnalysisDebouncer,
}

impl<R: RuleSource, S: StateStore> Router<R, S> {
    /// Assemble a router from a rule source, a shared state store and the
    /// loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the rules or session sections fail validation.
    pub fn assemble(
        source: R,
        state: Arc<S>,
        config: &VendorscopeConfig,
    ) -> Result<(Self, RouterChannels), VendorscopeError> {
        let detector_config = DetectorConfig::from_core(&config.rules);
        detector_config.validate()?;
        let settings = SessionSettings::from_core(&config.session);
        settings.validate()?;

        let (events_tx, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (debouncer, debounced) = AnalysisDebouncer::new(settings.debounce);
        let (coordinator, timers) =
            TabSessionCoordinator::new(Arc::clone(&state), settings, events_tx);
        let rules = RuleStore::new(source, state, detector_config);

        let router = Self {
            rules,
            coordinator,
            debouncer,
        };
        let channels = RouterChannels {
            timers,
            debounced,
            events,
        };
        Ok((router, channels))
    }

    /// The tab session coordinator.
    pub fn coordinator(&self) -> &TabSessionCoordinator<S> {
        &self.coordinator
    }

    /// The rule store.
    pub fn rules(&self) -> &RuleStore<R, S> {
        &self.rules
    }

    /// Resolve rules ahead of the first request.
    ///
    /// Failures are logged; the next request retries the build.
    pub async fn warm_up(&self) {
        match self.rules.rules().await {
            Ok(set) => info!(
                rules = set.len(),
                catalog_version = %set.catalog_version,
                "rule set ready"
            ),
            Err(e) => warn!(error = %e, "initial rule build failed, retrying on demand"),
        }
    }

    /// Force a rule reload after persisted state was found corrupted.
    ///
    /// Failures are logged; the cached set stays in place.
    async fn rebuild_rules(&self) {
        match self.rules.refresh().await {
            Ok(set) => info!(rules = set.len(), "rule set rebuilt after corrupted state"),
            Err(e) => warn!(error = %e, "rule rebuild after corrupted state failed"),
        }
    }

    /// Handle one request and build its response.
    pub async fn handle(&mut self, envelope: RequestEnvelope) -> Response {
        let RequestEnvelope { id, request } = envelope;
        let kind = request.kind();
        let outcome = self.dispatch(request).await;
        let result = if outcome.is_ok() { "success" } else { "failure" };
        metrics::counter!(
            m::DAEMON_REQUESTS_TOTAL,
            m::LABEL_REQUEST => kind,
            m::LABEL_RESULT => result
        )
        .increment(1);

        match outcome {
            Ok(payload) => Response::ok(id, payload),
            Err(e) => {
                debug!(id, request = kind, error = %e, "request failed");
                Response::error(id, e.to_string())
            }
        }
    }

    /// Handle a capture expiry timer.
    pub async fn handle_timer(&mut self, timer: SessionTimer) {
        self.coordinator.handle_timer(timer).await;
    }

    /// Run a debounced analysis if it is still current.
    pub async fn handle_debounced(&mut self, timer: DebouncedAnalysis) {
        let Some(pending) = self.debouncer.fire(timer) else {
            return;
        };
        metrics::counter!(m::DAEMON_DEBOUNCED_ANALYSES_TOTAL).increment(1);
        if let Err(e) = self
            .analyze(timer.tab_id, &pending.url, &pending.bundle)
            .await
        {
            warn!(tab_id = timer.tab_id, error = %e, "debounced analysis failed");
        }
    }

    /// Cancel every pending timer.
    pub fn shutdown(&mut self) {
        self.debouncer.shutdown();
        self.coordinator.shutdown();
    }

    async fn dispatch(&mut self, request: Request) -> Result<Value, VendorscopeError> {
        match request {
            Request::GetRules => {
                let set = self.rules.rules().await?;
                Ok(json!({ "rules": &*set }))
            }
            Request::RefreshRules => {
                let set = self.rules.refresh().await?;
                info!(rules = set.len(), "rule set refreshed");
                Ok(json!({ "ack": true, "ruleCount": set.len() }))
            }
            Request::SubmitSignals {
                tab_id,
                url,
                signals,
                unavailable,
                trigger,
            } => {
                let submission =
                    self.debouncer
                        .submit(tab_id, url, bundle(signals, unavailable), trigger);
                match submission {
                    Submission::Immediate(pending) => {
                        let count = self.analyze(tab_id, &pending.url, &pending.bundle).await?;
                        Ok(json!({ "ack": true, "count": count }))
                    }
                    Submission::Deferred => Ok(json!({ "ack": true, "deferred": true })),
                }
            }
            Request::SubmitAdvancedResults {
                tab_id,
                url,
                results,
            } => {
                self.coordinator
                    .on_advanced_results(tab_id, &url, results)
                    .await?;
                Ok(ack())
            }
            Request::GetSessionResults { tab_id } => {
                let lookup = self.coordinator.get_merged(tab_id).await;
                if lookup.rebuild_required {
                    self.rebuild_rules().await;
                }
                Ok(json!({ "results": lookup.results }))
            }
            Request::ArmCapture {
                tab_id,
                targets,
                window_ms,
            } => {
                let ticket = self.coordinator.arm_capture(tab_id, targets, window_ms)?;
                Ok(json!({
                    "ack": true,
                    "sessionId": ticket.session_id,
                    "expiresAt": ticket.expires_at,
                }))
            }
            Request::StopCapture { tab_id } => {
                let status = self.coordinator.stop_capture(tab_id).await?;
                Ok(to_value(&status))
            }
            Request::SubmitCapture {
                tab_id,
                target,
                url,
                parameters,
            } => {
                let count = self
                    .coordinator
                    .submit_capture(tab_id, &target, &url, parameters)?;
                Ok(json!({ "ack": true, "captureCount": count }))
            }
            Request::GetCaptureStatus { tab_id } => {
                Ok(to_value(&self.coordinator.capture_status(tab_id)))
            }
            Request::GetCaptureHistory => {
                let history = self.coordinator.capture_history().await;
                Ok(json!({ "history": history }))
            }
            Request::NavigationStarted { tab_id, url } => {
                self.debouncer.forget(tab_id);
                self.coordinator.on_navigation_start(tab_id, &url).await;
                Ok(ack())
            }
            Request::TabClosed { tab_id } => {
                self.debouncer.forget(tab_id);
                self.coordinator.on_tab_closed(tab_id).await;
                Ok(ack())
            }
            Request::TabActivated { tab_id } => {
                self.coordinator.on_tab_activated(tab_id).await;
                Ok(ack())
            }
        }
    }

    async fn analyze(
        &mut self,
        tab_id: TabId,
        url: &str,
        bundle: &SignalBundle,
    ) -> Result<usize, VendorscopeError> {
        let rules = self.rules.rules().await?;
        let engine = DetectionEngine::new(rules);
        let results = engine.detect(bundle)?;
        let count = results.len();
        debug!(
            tab_id,
            signals = bundle.len(),
            detections = count,
            detector = engine.name(),
            "analysis complete"
        );
        self.coordinator.on_signal_ready(tab_id, url, results).await;
        Ok(count)
    }
}

fn ack() -> Value {
    json!({ "ack": true })
}

fn to_value<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}
