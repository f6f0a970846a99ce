//! Host messaging protocol -- newline-delimited JSON on stdin/stdout.
//!
//! Every request line is `{ "id": <u64>, "type": <camelCase>, ...fields }`.
//! Every response line is `{ "id", "ok": true, ...payload }` or
//! `{ "id", "ok": false, "error" }`. Host events are written as
//! `{ "event": <camelCase>, ... }` lines between responses.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use vendorscope_core::event::HostEvent;
use vendorscope_core::types::{DetectionResult, Signal, SignalBundle, SignalKind, TabId};

/// What caused a `submitSignals` request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    /// Initial page load, analysed immediately.
    #[default]
    Load,
    /// DOM mutation, debounced per tab.
    Mutation,
}

/// A request envelope: correlation id plus the typed request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RequestEnvelope {
    /// Correlation id echoed in the response.
    pub id: u64,
    /// The request body.
    #[serde(flatten)]
    pub request: Request,
}

/// Host requests.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Request {
    /// Return the resolved rule set.
    GetRules,
    /// Force a rule rebuild.
    RefreshRules,
    /// Submit observed page signals for analysis.
    #[serde(rename_all = "camelCase")]
    SubmitSignals {
        tab_id: TabId,
        url: String,
        #[serde(default)]
        signals: Vec<Signal>,
        #[serde(default)]
        unavailable: Vec<SignalKind>,
        #[serde(default)]
        trigger: Trigger,
    },
    /// Submit results from an advanced (interaction) detector.
    #[serde(rename_all = "camelCase")]
    SubmitAdvancedResults {
        tab_id: TabId,
        url: String,
        #[serde(default)]
        results: Vec<DetectionResult>,
    },
    /// Merged results for a tab.
    #[serde(rename_all = "camelCase")]
    GetSessionResults { tab_id: TabId },
    /// Arm a capture session.
    #[serde(rename_all = "camelCase")]
    ArmCapture {
        tab_id: TabId,
        #[serde(default)]
        targets: Vec<String>,
        #[serde(default)]
        window_ms: Option<u64>,
    },
    /// Stop the capture session, keeping captures.
    #[serde(rename_all = "camelCase")]
    StopCapture { tab_id: TabId },
    /// Submit captured challenge parameters.
    #[serde(rename_all = "camelCase")]
    SubmitCapture {
        tab_id: TabId,
        target: String,
        url: String,
        #[serde(default)]
        parameters: BTreeMap<String, String>,
    },
    /// Current capture status for a tab.
    #[serde(rename_all = "camelCase")]
    GetCaptureStatus { tab_id: TabId },
    /// Recent capture history.
    GetCaptureHistory,
    /// Navigation started in a tab.
    #[serde(rename_all = "camelCase")]
    NavigationStarted { tab_id: TabId, url: String },
    /// A tab was closed.
    #[serde(rename_all = "camelCase")]
    TabClosed { tab_id: TabId },
    /// A tab became active.
    #[serde(rename_all = "camelCase")]
    TabActivated { tab_id: TabId },
}

impl Request {
    /// Stable request name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::GetRules => "getRules",
            Self::RefreshRules => "refreshRules",
            Self::SubmitSignals { .. } => "submitSignals",
            Self::SubmitAdvancedResults { .. } => "submitAdvancedResults",
            Self::GetSessionResults { .. } => "getSessionResults",
            Self::ArmCapture { .. } => "armCapture",
            Self::StopCapture { .. } => "stopCapture",
            Self::SubmitCapture { .. } => "submitCapture",
            Self::GetCaptureStatus { .. } => "getCaptureStatus",
            Self::GetCaptureHistory => "getCaptureHistory",
            Self::NavigationStarted { .. } => "navigationStarted",
            Self::TabClosed { .. } => "tabClosed",
            Self::TabActivated { .. } => "tabActivated",
        }
    }
}

/// Build a signal bundle from the `submitSignals` fields.
pub fn bundle(signals: Vec<Signal>, unavailable: Vec<SignalKind>) -> SignalBundle {
    SignalBundle {
        signals,
        unavailable,
    }
}

/// A response line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    /// Correlation id (0 when the request id could not be read).
    pub id: u64,
    /// Whether the request succeeded.
    pub ok: bool,
    /// Error message when `ok` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Payload fields, flattened into the response object.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Response {
    /// Successful response. Non-object payloads are wrapped under `result`.
    pub fn ok(id: u64, payload: Value) -> Self {
        let payload = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("result".to_owned(), other);
                map
            }
        };
        Self {
            id,
            ok: true,
            error: None,
            payload,
        }
    }

    /// Plain acknowledgement.
    pub fn ack(id: u64) -> Self {
        Self::ok(id, serde_json::json!({ "ack": true }))
    }

    /// Failed response.
    pub fn error(id: u64, message: impl Into<String>) -> Self {
        Self {
            id,
            ok: false,
            error: Some(message.into()),
            payload: Map::new(),
        }
    }
}

/// Parse one request line.
///
/// On failure returns an error response carrying the request id when it
/// could be read.
pub fn parse_line(line: &str) -> Result<RequestEnvelope, Response> {
    let value: Value = serde_json::from_str(line)
        .map_err(|e| Response::error(0, format!("invalid JSON: {e}")))?;
    let id = value.get("id").and_then(Value::as_u64).unwrap_or(0);
    serde_json::from_value(value).map_err(|e| Response::error(id, format!("invalid request: {e}")))
}

/// Serialize a response as one line (without the trailing newline).
pub fn encode_response(response: &Response) -> String {
    serde_json::to_string(response).unwrap_or_else(|e| {
        format!(
            r#"{{"id":{},"ok":false,"error":"failed to encode response: {}"}}"#,
            response.id,
            e.to_string().replace('"', "'")
        )
    })
}

/// Serialize a host event as one line (without the trailing newline).
pub fn encode_event(event: &HostEvent) -> Option<String> {
    serde_json::to_string(event).ok()
}
