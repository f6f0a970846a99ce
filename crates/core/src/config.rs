//! 설정 관리 -- vendorscope.toml 파싱 및 런타임 설정
//!
//! [`VendorscopeConfig`]는 모든 모듈의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`VENDORSCOPE_RULES_CACHE_TTL_SECS=3600` 형식)
//! 3. 설정 파일 (`vendorscope.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), vendorscope_core::error::VendorscopeError> {
//! use vendorscope_core::config::VendorscopeConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = VendorscopeConfig::load("vendorscope.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = VendorscopeConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, VendorscopeError};

/// 캡처 윈도우 하한 (밀리초)
pub const MIN_CAPTURE_WINDOW_MS: u64 = 1_000;
/// 캡처 윈도우 상한 (밀리초)
pub const MAX_CAPTURE_WINDOW_MS: u64 = 5 * 60 * 1_000;

/// Vendorscope 통합 설정
///
/// `vendorscope.toml` 파일의 최상위 구조를 나타냅니다.
/// 각 모듈은 자기 섹션만 읽어 사용합니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VendorscopeConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 규칙 저장소 설정
    #[serde(default)]
    pub rules: RulesConfig,
    /// 탭 세션 설정
    #[serde(default)]
    pub session: SessionConfig,
}

impl VendorscopeConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, VendorscopeError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, VendorscopeError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                VendorscopeError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                VendorscopeError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, VendorscopeError> {
        toml::from_str(toml_str).map_err(|e| {
            VendorscopeError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `VENDORSCOPE_{SECTION}_{FIELD}`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "VENDORSCOPE_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "VENDORSCOPE_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.data_dir, "VENDORSCOPE_GENERAL_DATA_DIR");

        // Rules
        override_string(
            &mut self.rules.catalog_path,
            "VENDORSCOPE_RULES_CATALOG_PATH",
        );
        override_string(
            &mut self.rules.overrides_path,
            "VENDORSCOPE_RULES_OVERRIDES_PATH",
        );
        override_string(&mut self.rules.custom_path, "VENDORSCOPE_RULES_CUSTOM_PATH");
        override_u64(
            &mut self.rules.cache_ttl_secs,
            "VENDORSCOPE_RULES_CACHE_TTL_SECS",
        );
        override_string(
            &mut self.rules.default_color,
            "VENDORSCOPE_RULES_DEFAULT_COLOR",
        );

        // Session
        override_bool(&mut self.session.persist, "VENDORSCOPE_SESSION_PERSIST");
        override_u64(
            &mut self.session.debounce_ms,
            "VENDORSCOPE_SESSION_DEBOUNCE_MS",
        );
        override_u64(
            &mut self.session.default_capture_window_ms,
            "VENDORSCOPE_SESSION_DEFAULT_CAPTURE_WINDOW_MS",
        );
        override_usize(
            &mut self.session.history_capacity,
            "VENDORSCOPE_SESSION_HISTORY_CAPACITY",
        );
        override_u64(
            &mut self.session.history_ttl_secs,
            "VENDORSCOPE_SESSION_HISTORY_TTL_SECS",
        );
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), VendorscopeError> {
        // log_level 검증
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_level".to_owned(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            }
            .into());
        }

        // log_format 검증
        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_format".to_owned(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            }
            .into());
        }

        if self.rules.catalog_path.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "rules.catalog_path".to_owned(),
                reason: "catalog path must not be empty".to_owned(),
            }
            .into());
        }

        if self.rules.cache_ttl_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "rules.cache_ttl_secs".to_owned(),
                reason: "must be greater than 0".to_owned(),
            }
            .into());
        }

        if !is_hex_color(&self.rules.default_color) {
            return Err(ConfigError::InvalidValue {
                field: "rules.default_color".to_owned(),
                reason: "must be a #RRGGBB color".to_owned(),
            }
            .into());
        }

        for (category, color) in &self.rules.category_colors {
            if !is_hex_color(color) {
                return Err(ConfigError::InvalidValue {
                    field: format!("rules.category_colors.{category}"),
                    reason: "must be a #RRGGBB color".to_owned(),
                }
                .into());
            }
        }

        if self.session.debounce_ms == 0 || self.session.debounce_ms > 10_000 {
            return Err(ConfigError::InvalidValue {
                field: "session.debounce_ms".to_owned(),
                reason: "must be 1-10000".to_owned(),
            }
            .into());
        }

        let window = self.session.default_capture_window_ms;
        if !(MIN_CAPTURE_WINDOW_MS..=MAX_CAPTURE_WINDOW_MS).contains(&window) {
            return Err(ConfigError::InvalidValue {
                field: "session.default_capture_window_ms".to_owned(),
                reason: format!("must be {MIN_CAPTURE_WINDOW_MS}-{MAX_CAPTURE_WINDOW_MS}"),
            }
            .into());
        }

        if self.session.history_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "session.history_capacity".to_owned(),
                reason: "must be greater than 0".to_owned(),
            }
            .into());
        }

        Ok(())
    }
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// 영속 상태 디렉토리
    pub data_dir: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            data_dir: "/var/lib/vendorscope".to_owned(),
        }
    }
}

/// 규칙 저장소 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// 기본 카탈로그 경로 (파일 또는 디렉토리)
    pub catalog_path: String,
    /// 사용자 오버라이드 파일 경로
    pub overrides_path: String,
    /// 사용자 정의 규칙 파일 경로
    pub custom_path: String,
    /// 해석된 규칙 캐시 TTL (초)
    pub cache_ttl_secs: u64,
    /// 전역 기본 색상
    pub default_color: String,
    /// 분류별 기본 색상 (내장 기본값 위에 병합)
    pub category_colors: BTreeMap<String, String>,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            catalog_path: "/etc/vendorscope/catalog.yml".to_owned(),
            overrides_path: "/etc/vendorscope/overrides.yml".to_owned(),
            custom_path: "/etc/vendorscope/custom.yml".to_owned(),
            cache_ttl_secs: 24 * 60 * 60,
            default_color: "#6B7280".to_owned(),
            category_colors: BTreeMap::new(),
        }
    }
}

/// 탭 세션 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// 탭 스냅샷 영속화 여부
    pub persist: bool,
    /// DOM 변경 재분석 디바운스 (밀리초)
    pub debounce_ms: u64,
    /// 요청에 윈도우가 없을 때의 캡처 윈도우 (밀리초)
    pub default_capture_window_ms: u64,
    /// 캡처 이력 링 버퍼 용량
    pub history_capacity: usize,
    /// 캡처 이력 항목 만료 (초)
    pub history_ttl_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            persist: true,
            debounce_ms: 500,
            default_capture_window_ms: 15_000,
            history_capacity: 100,
            history_ttl_secs: 30 * 60,
        }
    }
}

/// `#RRGGBB` 형식인지 확인합니다.
pub fn is_hex_color(value: &str) -> bool {
    value.len() == 7
        && value.starts_with('#')
        && value[1..].chars().all(|c| c.is_ascii_hexdigit())
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_usize(target: &mut usize, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<usize>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse usize from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}
