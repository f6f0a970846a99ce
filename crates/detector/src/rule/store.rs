//! 규칙 저장소 -- 규칙 소스, TTL 캐시, 영속 규칙 캐시
//!
//! [`RuleStore`]는 [`RuleSource`]에서 세 계층을 읽어 [`resolve`]로 해석하고,
//! 결과를 `Arc<ResolvedRuleSet>`으로 캐싱합니다.
//!
//! # 캐시 동작
//! - `rules()`: 캐시가 TTL 안이면 그대로, 아니면 재구성
//! - 콜드 스타트: 상태 저장소의 `rule_cache` 블롭이 신선하면 그것을 사용
//! - `refresh()`: 강제 재구성, `invalidate()`: 캐시 폐기
//! - 재구성은 잠금 밖에서 수행하고 포인터만 교체합니다.
//!   읽는 쪽은 새 집합이 완성될 때까지 이전 집합을 계속 사용합니다.
//! - 규칙 편집 연산은 즉시 캐시를 무효화합니다.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use vendorscope_core::error::{CorruptedStateError, StorageError};
use vendorscope_core::metrics as m;
use vendorscope_core::store::{StateStore, json_kind};
use vendorscope_core::types::now_millis;

use super::loader::RuleLoader;
use super::resolve::resolve;
use super::types::{ResolvedRuleSet, RuleCatalog, RuleDefinition, RuleDocument};
use crate::config::{ColorPalette, DetectorConfig};
use crate::error::DetectorError;

/// 규칙 캐시 상태 저장소 키
pub const RULE_CACHE_KEY: &str = "rule_cache";

/// 규칙 계층 공급자
///
/// 기본 카탈로그를 읽지 못하면 `RuleLoad` 에러를 반환해야 합니다.
pub trait RuleSource: Send + Sync + 'static {
    /// 기본 카탈로그를 읽습니다.
    fn load_base(&self) -> impl Future<Output = Result<RuleCatalog, DetectorError>> + Send;

    /// 오버라이드 계층을 읽습니다.
    fn load_overrides(
        &self,
    ) -> impl Future<Output = Result<Vec<RuleDefinition>, DetectorError>> + Send;

    /// 사용자 정의 계층을 읽습니다.
    fn load_custom(&self) -> impl Future<Output = Result<Vec<RuleDefinition>, DetectorError>> + Send;

    /// 오버라이드를 추가하거나 같은 ID를 교체합니다.
    fn put_override(
        &self,
        doc: RuleDocument,
    ) -> impl Future<Output = Result<(), DetectorError>> + Send;

    /// 사용자 정의 규칙을 추가하거나 같은 ID를 교체합니다.
    fn put_custom(&self, doc: RuleDocument) -> impl Future<Output = Result<(), DetectorError>> + Send;

    /// 사용자 정의 규칙을 삭제합니다. 삭제했으면 `true`.
    fn remove_custom(&self, id: &str) -> impl Future<Output = Result<bool, DetectorError>> + Send;
}

/// 파일 기반 규칙 소스
///
/// 카탈로그(파일 또는 디렉토리) + 오버라이드 YAML + 사용자 정의 YAML
pub struct FileRuleSource {
    catalog_path: String,
    overrides_path: String,
    custom_path: String,
    /// 편집 연산 직렬화
    edit_lock: tokio::sync::Mutex<()>,
}

impl FileRuleSource {
    /// 경로로 파일 소스를 생성합니다.
    pub fn new(
        catalog_path: impl Into<String>,
        overrides_path: impl Into<String>,
        custom_path: impl Into<String>,
    ) -> Self {
        Self {
            catalog_path: catalog_path.into(),
            overrides_path: overrides_path.into(),
            custom_path: custom_path.into(),
            edit_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// 설정의 경로로 파일 소스를 생성합니다.
    pub fn from_config(config: &DetectorConfig) -> Self {
        Self::new(
            config.catalog_path.clone(),
            config.overrides_path.clone(),
            config.custom_path.clone(),
        )
    }

    async fn upsert(&self, path: &str, doc: RuleDocument) -> Result<(), DetectorError> {
        let compiled = doc.compile()?;
        let entry = serde_yaml::to_value(&doc)
            .map_err(|e| DetectorError::Source(format!("failed to serialize rule: {e}")))?;
        let _guard = self.edit_lock.lock().await;
        let mut entries = RuleLoader::read_entries(path).await?;
        let mut replaced = false;
        for existing in entries.iter_mut() {
            if entry_rule_id(existing).is_some_and(|id| id == compiled.id) {
                *existing = entry.clone();
                replaced = true;
            }
        }
        if !replaced {
            entries.push(entry);
        }
        RuleLoader::write_entries(path, &entries).await?;
        info!(path, rule_id = %compiled.id, replaced, "rule document saved");
        Ok(())
    }
}

/// 계층 파일 항목의 규칙 ID. 해석할 수 없는 항목은 `None`.
fn entry_rule_id(entry: &serde_yaml::Value) -> Option<String> {
    let doc: RuleDocument = serde_yaml::from_value(entry.clone()).ok()?;
    doc.compile().ok().map(|rule| rule.id)
}

impl RuleSource for FileRuleSource {
    async fn load_base(&self) -> Result<RuleCatalog, DetectorError> {
        RuleLoader::load_catalog(&self.catalog_path).await
    }

    async fn load_overrides(&self) -> Result<Vec<RuleDefinition>, DetectorError> {
        RuleLoader::load_layer(&self.overrides_path).await
    }

    async fn load_custom(&self) -> Result<Vec<RuleDefinition>, DetectorError> {
        RuleLoader::load_layer(&self.custom_path).await
    }

    async fn put_override(&self, doc: RuleDocument) -> Result<(), DetectorError> {
        self.upsert(&self.overrides_path, doc).await
    }

    async fn put_custom(&self, doc: RuleDocument) -> Result<(), DetectorError> {
        self.upsert(&self.custom_path, doc).await
    }

    async fn remove_custom(&self, id: &str) -> Result<bool, DetectorError> {
        let _guard = self.edit_lock.lock().await;
        let mut entries = RuleLoader::read_entries(&self.custom_path).await?;
        let before = entries.len();
        entries.retain(|entry| entry_rule_id(entry).is_none_or(|rule_id| rule_id != id));
        if entries.len() == before {
            return Ok(false);
        }
        RuleLoader::write_entries(&self.custom_path, &entries).await?;
        info!(rule_id = id, "custom rule removed");
        Ok(true)
    }
}

/// 메모리 규칙 소스 (테스트, 임베딩)
#[derive(Default)]
pub struct MemoryRuleSource {
    inner: Mutex<MemoryLayers>,
}

#[derive(Default)]
struct MemoryLayers {
    base: Option<RuleCatalog>,
    overrides: Vec<RuleDefinition>,
    custom: Vec<RuleDefinition>,
    base_loads: usize,
}

impl MemoryRuleSource {
    /// 기본 카탈로그로 소스를 생성합니다.
    pub fn new(base: RuleCatalog) -> Self {
        Self {
            inner: Mutex::new(MemoryLayers {
                base: Some(base),
                ..MemoryLayers::default()
            }),
        }
    }

    /// 기본 카탈로그를 읽을 수 없는 소스를 생성합니다.
    pub fn unreadable() -> Self {
        Self::default()
    }

    /// 기본 카탈로그를 교체합니다. `None`이면 읽기 실패를 재현합니다.
    pub fn set_base(&self, base: Option<RuleCatalog>) {
        self.lock().base = base;
    }

    /// `load_base` 호출 횟수
    pub fn base_loads(&self) -> usize {
        self.lock().base_loads
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryLayers> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn upsert(layer: &mut Vec<RuleDefinition>, rule: RuleDefinition) {
        match layer.iter_mut().find(|r| r.id == rule.id) {
            Some(existing) => *existing = rule,
            None => layer.push(rule),
        }
    }
}

impl RuleSource for MemoryRuleSource {
    async fn load_base(&self) -> Result<RuleCatalog, DetectorError> {
        let mut inner = self.lock();
        inner.base_loads += 1;
        inner.base.clone().ok_or_else(|| DetectorError::RuleLoad {
            path: "memory".to_owned(),
            reason: "base catalog unavailable".to_owned(),
        })
    }

    async fn load_overrides(&self) -> Result<Vec<RuleDefinition>, DetectorError> {
        Ok(self.lock().overrides.clone())
    }

    async fn load_custom(&self) -> Result<Vec<RuleDefinition>, DetectorError> {
        Ok(self.lock().custom.clone())
    }

    async fn put_override(&self, doc: RuleDocument) -> Result<(), DetectorError> {
        let rule = doc.compile()?;
        Self::upsert(&mut self.lock().overrides, rule);
        Ok(())
    }

    async fn put_custom(&self, doc: RuleDocument) -> Result<(), DetectorError> {
        let rule = doc.compile()?;
        Self::upsert(&mut self.lock().custom, rule);
        Ok(())
    }

    async fn remove_custom(&self, id: &str) -> Result<bool, DetectorError> {
        let mut inner = self.lock();
        let before = inner.custom.len();
        inner.custom.retain(|r| r.id != id);
        Ok(inner.custom.len() != before)
    }
}

/// 영속 규칙 캐시 블롭 `{ resolved_rules, timestamp }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleCacheBlob {
    /// 해석된 규칙 집합
    pub resolved_rules: ResolvedRuleSet,
    /// 저장 시각 (Unix epoch 밀리초)
    pub timestamp: u64,
}

impl RuleCacheBlob {
    /// 저장소 값을 스키마 검증과 함께 디코딩합니다.
    pub fn decode(value: Value) -> Result<Self, CorruptedStateError> {
        let rules = value
            .get("resolved_rules")
            .and_then(|v| v.get("rules"))
            .ok_or_else(|| CorruptedStateError::new(RULE_CACHE_KEY, "missing resolved_rules.rules"))?;
        if !rules.is_array() {
            return Err(CorruptedStateError::new(
                RULE_CACHE_KEY,
                format!("expected array at resolved_rules.rules, found {}", json_kind(rules)),
            ));
        }
        let blob: Self = serde_json::from_value(value)
            .map_err(|e| CorruptedStateError::new(RULE_CACHE_KEY, e.to_string()))?;
        if let Some(rule) = blob.resolved_rules.rules.iter().find(|r| r.id.is_empty()) {
            return Err(CorruptedStateError::new(
                RULE_CACHE_KEY,
                format!("rule '{}' has an empty id", rule.display_name),
            ));
        }
        Ok(blob)
    }

    /// 저장 후 경과 시간. 시계가 뒤로 가면 0입니다.
    fn age(&self) -> Duration {
        Duration::from_millis(now_millis().saturating_sub(self.timestamp))
    }
}

struct CachedRules {
    rules: Arc<ResolvedRuleSet>,
    loaded_at: Instant,
}

/// 규칙 저장소
///
/// # 사용 예시
/// ```ignore
/// let source = FileRuleSource::from_config(&config);
/// let store = RuleStore::new(source, Arc::new(MemoryStateStore::new()), config);
/// let rules = store.rules().await?;
/// ```
pub struct RuleStore<R: RuleSource, S: StateStore> {
    source: R,
    state: Arc<S>,
    ttl: Duration,
    palette: ColorPalette,
    cache: RwLock<Option<CachedRules>>,
}

impl<R: RuleSource, S: StateStore> RuleStore<R, S> {
    /// 새 규칙 저장소를 생성합니다. 캐시는 비어 있습니다.
    pub fn new(source: R, state: Arc<S>, config: DetectorConfig) -> Self {
        Self {
            source,
            state,
            ttl: config.cache_ttl,
            palette: config.palette,
            cache: RwLock::new(None),
        }
    }

    /// 규칙 소스
    pub fn source(&self) -> &R {
        &self.source
    }

    /// 해석된 규칙 집합을 반환합니다.
    ///
    /// 캐시가 신선하면 재사용하고, 비어 있으면 영속 캐시를, 그 외에는 재구성합니다.
    pub async fn rules(&self) -> Result<Arc<ResolvedRuleSet>, DetectorError> {
        let cold = {
            let cache = self.cache.read().await;
            match cache.as_ref() {
                Some(cached) if cached.loaded_at.elapsed() < self.ttl => {
                    return Ok(Arc::clone(&cached.rules));
                }
                Some(_) => false,
                None => true,
            }
        };

        if cold && let Some((rules, loaded_at)) = self.load_persisted().await {
            let rules = Arc::new(rules);
            self.swap(Arc::clone(&rules), loaded_at).await;
            return Ok(rules);
        }

        self.rebuild().await
    }

    /// 캐시를 무시하고 재구성합니다.
    pub async fn refresh(&self) -> Result<Arc<ResolvedRuleSet>, DetectorError> {
        self.rebuild().await
    }

    /// 메모리 캐시를 폐기합니다. 다음 `rules()`가 재구성합니다.
    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
        // 영속 캐시가 콜드 스타트에서 다시 쓰이지 않도록 함께 지웁니다.
        if let Err(e) = self.state.remove(RULE_CACHE_KEY).await {
            warn!(error = %e, "failed to remove persisted rule cache");
        }
        debug!("rule cache invalidated");
    }

    /// 오버라이드를 저장하고 캐시를 무효화합니다.
    pub async fn put_override(&self, doc: RuleDocument) -> Result<(), DetectorError> {
        self.source.put_override(doc).await?;
        self.invalidate().await;
        Ok(())
    }

    /// 사용자 정의 규칙을 저장하고 캐시를 무효화합니다.
    pub async fn put_custom(&self, doc: RuleDocument) -> Result<(), DetectorError> {
        self.source.put_custom(doc).await?;
        self.invalidate().await;
        Ok(())
    }

    /// 사용자 정의 규칙을 삭제하고 캐시를 무효화합니다.
    pub async fn remove_custom(&self, id: &str) -> Result<bool, DetectorError> {
        let removed = self.source.remove_custom(id).await?;
        if removed {
            self.invalidate().await;
        }
        Ok(removed)
    }

    async fn rebuild(&self) -> Result<Arc<ResolvedRuleSet>, DetectorError> {
        let base = match self.source.load_base().await {
            Ok(base) => base,
            Err(e) => {
                metrics::counter!(m::DETECTOR_RULE_REBUILDS_TOTAL, m::LABEL_RESULT => "failure")
                    .increment(1);
                return Err(e);
            }
        };
        let overrides = self.load_layer("overrides", self.source.load_overrides()).await;
        let custom = self.load_layer("custom", self.source.load_custom()).await;

        let rules = Arc::new(resolve(&base, &overrides, &custom, &self.palette));
        self.persist(&rules).await;
        self.swap(Arc::clone(&rules), Instant::now()).await;

        metrics::counter!(m::DETECTOR_RULE_REBUILDS_TOTAL, m::LABEL_RESULT => "success")
            .increment(1);
        info!(
            version = %rules.catalog_version,
            rules = rules.len(),
            overrides = overrides.len(),
            custom = custom.len(),
            "rule set resolved"
        );
        Ok(rules)
    }

    async fn load_layer(
        &self,
        layer: &'static str,
        fut: impl Future<Output = Result<Vec<RuleDefinition>, DetectorError>>,
    ) -> Vec<RuleDefinition> {
        match fut.await {
            Ok(rules) => rules,
            Err(e) => {
                warn!(layer, error = %e, "failed to load rule layer, continuing without it");
                Vec::new()
            }
        }
    }

    async fn swap(&self, rules: Arc<ResolvedRuleSet>, loaded_at: Instant) {
        metrics::gauge!(m::DETECTOR_RULES_RESOLVED).set(rules.len() as f64);
        *self.cache.write().await = Some(CachedRules { rules, loaded_at });
    }

    async fn persist(&self, rules: &ResolvedRuleSet) {
        let blob = RuleCacheBlob {
            resolved_rules: rules.clone(),
            timestamp: now_millis(),
        };
        let value = match serde_json::to_value(&blob) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "failed to serialize rule cache");
                return;
            }
        };
        if let Err(e) = self.state.put(RULE_CACHE_KEY, value).await {
            warn!(error = %e, "failed to persist rule cache");
        }
    }

    /// 영속 캐시를 읽습니다. 없거나, 오래되었거나, 손상되었으면 `None`.
    ///
    /// 함께 반환하는 적재 시각은 블롭의 저장 시각이므로 TTL은 저장 시점부터 흐릅니다.
    /// 손상된 블롭은 삭제합니다.
    async fn load_persisted(&self) -> Option<(ResolvedRuleSet, Instant)> {
        let value = match self.state.get(RULE_CACHE_KEY).await {
            Ok(Some(value)) => value,
            Ok(None) => return None,
            Err(StorageError::Corrupted(e)) => {
                self.discard_corrupted(&e).await;
                return None;
            }
            Err(e) => {
                warn!(error = %e, "failed to read persisted rule cache, treating as miss");
                return None;
            }
        };

        match RuleCacheBlob::decode(value) {
            Ok(blob) => {
                let age = blob.age();
                let loaded_at = Instant::now().checked_sub(age).filter(|_| age < self.ttl);
                match loaded_at {
                    Some(loaded_at) => {
                        debug!(
                            rules = blob.resolved_rules.len(),
                            age_ms = age.as_millis() as u64,
                            "using persisted rule cache"
                        );
                        Some((blob.resolved_rules, loaded_at))
                    }
                    None => {
                        debug!("persisted rule cache is stale");
                        None
                    }
                }
            }
            Err(e) => {
                self.discard_corrupted(&e).await;
                None
            }
        }
    }

    async fn discard_corrupted(&self, e: &CorruptedStateError) {
        warn!(error = %e, "persisted rule cache corrupted, rebuilding from source");
        metrics::counter!(m::DETECTOR_RULE_CACHE_CORRUPTED_TOTAL).increment(1);
        if let Err(e) = self.state.remove(RULE_CACHE_KEY).await {
            warn!(error = %e, "failed to remove corrupted rule cache");
        }
    }
}
