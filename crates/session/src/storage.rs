//! 탭 스냅샷 영속화
//!
//! 탭 세션은 상태 저장소의 `tab_<id>` 키에
//! `{ results, advanced, url, timestamp }` 형태로 저장됩니다.
//! 읽을 때 스키마를 검증하고, 맞지 않으면
//! [`CorruptedStateError`]를 반환합니다.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use vendorscope_core::error::{CorruptedStateError, StorageError};
use vendorscope_core::store::{StateStore, json_kind};
use vendorscope_core::types::{DetectionResult, TabId};

use crate::registry::{SessionPhase, TabSession};

/// 탭 스냅샷 키 접두사
pub const TAB_KEY_PREFIX: &str = "tab_";

/// 탭의 스냅샷 키
pub fn tab_key(tab_id: TabId) -> String {
    format!("{TAB_KEY_PREFIX}{tab_id}")
}

/// 영속화된 탭 세션
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// 탐지 결과
    pub results: Vec<DetectionResult>,
    /// 고급 결과
    #[serde(default)]
    pub advanced: Vec<DetectionResult>,
    /// 탭 URL
    pub url: String,
    /// 저장 시각 (Unix epoch 밀리초)
    pub timestamp: u64,
}

impl SessionSnapshot {
    /// 세션에서 스냅샷을 만듭니다.
    pub fn from_session(session: &TabSession) -> Self {
        Self {
            results: session.detection_results.clone(),
            advanced: session.advanced_results.clone(),
            url: session.url.clone(),
            timestamp: session.last_updated_at,
        }
    }

    /// 저장소 값을 스키마 검증과 함께 디코딩합니다.
    pub fn decode(key: &str, value: Value) -> Result<Self, CorruptedStateError> {
        let Some(object) = value.as_object() else {
            return Err(CorruptedStateError::new(
                key,
                format!("expected object, found {}", json_kind(&value)),
            ));
        };
        for field in ["results", "advanced"] {
            if let Some(v) = object.get(field)
                && !v.is_array()
            {
                return Err(CorruptedStateError::new(
                    key,
                    format!("expected array at {field}, found {}", json_kind(v)),
                ));
            }
        }
        if !object.contains_key("results") {
            return Err(CorruptedStateError::new(key, "missing results"));
        }
        let snapshot: Self = serde_json::from_value(value)
            .map_err(|e| CorruptedStateError::new(key, e.to_string()))?;
        if let Some(bad) = snapshot
            .results
            .iter()
            .chain(&snapshot.advanced)
            .find(|r| !r.confidence_in_range())
        {
            return Err(CorruptedStateError::new(
                key,
                format!("confidence out of range for {}", bad.merge_key()),
            ));
        }
        Ok(snapshot)
    }

    /// 스냅샷으로 세션을 복원합니다. 캡처 상태는 복원하지 않습니다.
    pub fn into_session(self, tab_id: TabId) -> TabSession {
        let mut session = TabSession::new(tab_id, self.url);
        session.detection_results = self.results;
        session.advanced_results = self.advanced;
        session.last_updated_at = self.timestamp;
        session.phase = SessionPhase::Active;
        session
    }
}

/// 탭 스냅샷 저장소
pub struct SnapshotStore<S: StateStore> {
    state: Arc<S>,
}

impl<S: StateStore> SnapshotStore<S> {
    /// 상태 저장소 위에 스냅샷 저장소를 생성합니다.
    pub fn new(state: Arc<S>) -> Self {
        Self { state }
    }

    /// 세션을 저장합니다.
    pub async fn save(&self, session: &TabSession) -> Result<(), StorageError> {
        let key = tab_key(session.tab_id);
        let value =
            serde_json::to_value(SessionSnapshot::from_session(session)).map_err(|e| {
                StorageError::Write {
                    key: key.clone(),
                    reason: e.to_string(),
                }
            })?;
        self.state.put(&key, value).await
    }

    /// 스냅샷을 읽습니다. 없으면 `None`, 스키마가 틀리면 `Corrupted`.
    pub async fn load(&self, tab_id: TabId) -> Result<Option<SessionSnapshot>, StorageError> {
        let key = tab_key(tab_id);
        match self.state.get(&key).await? {
            Some(value) => Ok(Some(SessionSnapshot::decode(&key, value)?)),
            None => Ok(None),
        }
    }

    /// 스냅샷을 삭제합니다.
    pub async fn remove(&self, tab_id: TabId) -> Result<(), StorageError> {
        self.state.remove(&tab_key(tab_id)).await
    }
}
