//! 탐지기 설정
//!
//! [`DetectorConfig`]는 core의 [`RulesConfig`](vendorscope_core::config::RulesConfig)를
//! 기반으로 규칙 저장소가 쓰는 설정을 제공합니다.
//!
//! # 사용 예시
//! ```ignore
//! use vendorscope_core::config::VendorscopeConfig;
//! use vendorscope_detector::config::DetectorConfig;
//!
//! let core_config = VendorscopeConfig::default();
//! let config = DetectorConfig::from_core(&core_config.rules);
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use vendorscope_core::config::{RulesConfig, is_hex_color};

use crate::error::DetectorError;

/// 내장 분류별 기본 색상
const BUILTIN_CATEGORY_COLORS: &[(&str, &str)] = &[
    ("Anti-Bot", "#EF4444"),
    ("CAPTCHA", "#10B981"),
    ("WAF", "#F59E0B"),
    ("CDN", "#3B82F6"),
    ("Fingerprinting", "#8B5CF6"),
];

/// 규칙 색상 결정 테이블
///
/// 규칙 색상 → 분류 기본 색상 → 전역 기본 색상 순으로 결정합니다.
/// 분류 이름은 대소문자를 구분하지 않습니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorPalette {
    default_color: String,
    /// 소문자 분류명 -> 색상
    categories: BTreeMap<String, String>,
}

impl ColorPalette {
    /// 내장 분류 색상 위에 사용자 분류 색상을 병합합니다.
    pub fn new(default_color: impl Into<String>, overrides: &BTreeMap<String, String>) -> Self {
        let mut categories: BTreeMap<String, String> = BUILTIN_CATEGORY_COLORS
            .iter()
            .map(|(name, color)| (name.to_lowercase(), (*color).to_owned()))
            .collect();
        for (name, color) in overrides {
            categories.insert(name.to_lowercase(), color.clone());
        }
        Self {
            default_color: default_color.into(),
            categories,
        }
    }

    /// 분류의 기본 색상
    pub fn category_color(&self, category: &str) -> Option<&str> {
        self.categories
            .get(&category.to_lowercase())
            .map(String::as_str)
    }

    /// 최종 색상을 결정합니다.
    pub fn resolve(&self, rule_color: Option<&str>, category: &str) -> String {
        rule_color
            .or_else(|| self.category_color(category))
            .unwrap_or(&self.default_color)
            .to_owned()
    }

    /// 전역 기본 색상
    pub fn default_color(&self) -> &str {
        &self.default_color
    }
}

impl Default for ColorPalette {
    fn default() -> Self {
        Self::new(RulesConfig::default().default_color, &BTreeMap::new())
    }
}

/// 규칙 저장소 설정
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectorConfig {
    /// 기본 카탈로그 경로
    pub catalog_path: String,
    /// 오버라이드 파일 경로
    pub overrides_path: String,
    /// 사용자 정의 규칙 파일 경로
    pub custom_path: String,
    /// 해석된 규칙 캐시 TTL
    pub cache_ttl: Duration,
    /// 색상 결정 테이블
    pub palette: ColorPalette,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self::from_core(&RulesConfig::default())
    }
}

impl DetectorConfig {
    /// core의 `RulesConfig`에서 탐지기 설정을 생성합니다.
    pub fn from_core(core: &RulesConfig) -> Self {
        Self {
            catalog_path: core.catalog_path.clone(),
            overrides_path: core.overrides_path.clone(),
            custom_path: core.custom_path.clone(),
            cache_ttl: Duration::from_secs(core.cache_ttl_secs),
            palette: ColorPalette::new(core.default_color.clone(), &core.category_colors),
        }
    }

    /// 캐시 TTL을 변경합니다.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), DetectorError> {
        if self.catalog_path.is_empty() {
            return Err(DetectorError::Config {
                field: "catalog_path".to_owned(),
                reason: "must not be empty".to_owned(),
            });
        }
        if self.cache_ttl.is_zero() {
            return Err(DetectorError::Config {
                field: "cache_ttl".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        if !is_hex_color(self.palette.default_color()) {
            return Err(DetectorError::Config {
                field: "default_color".to_owned(),
                reason: "must be a #RRGGBB color".to_owned(),
            });
        }
        Ok(())
    }
}
