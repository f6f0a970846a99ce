//! 탐지기 에러 타입
//!
//! [`DetectorError`]는 규칙 로딩, 검증, 규칙 소스 편집, 규칙 캐시 영속화 중
//! 발생하는 에러를 표현합니다.
//! `From<DetectorError> for VendorscopeError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 자연스럽게 전파할 수 있습니다.

use vendorscope_core::error::{DetectionError, StorageError, VendorscopeError};

/// 탐지기 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    /// 규칙 카탈로그 로딩 실패
    #[error("rule load error: {path}: {reason}")]
    RuleLoad {
        /// 카탈로그 경로
        path: String,
        /// 로딩 실패 사유
        reason: String,
    },

    /// 규칙 유효성 검증 실패
    #[error("rule validation error: rule '{rule_id}': {reason}")]
    RuleValidation {
        /// 문제가 된 규칙 ID
        rule_id: String,
        /// 검증 실패 사유
        reason: String,
    },

    /// 규칙 소스 편집 실패
    #[error("rule source error: {0}")]
    Source(String),

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 규칙 캐시 저장소 에러
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl DetectorError {
    /// 검증 에러를 생성합니다.
    pub(crate) fn validation(rule_id: &str, reason: impl Into<String>) -> Self {
        let rule_id = if rule_id.is_empty() {
            "(empty)".to_owned()
        } else {
            rule_id.to_owned()
        };
        Self::RuleValidation {
            rule_id,
            reason: reason.into(),
        }
    }
}

impl From<DetectorError> for VendorscopeError {
    fn from(err: DetectorError) -> Self {
        match err {
            DetectorError::Storage(e) => VendorscopeError::Storage(e),
            DetectorError::RuleLoad { .. } => {
                VendorscopeError::Detection(DetectionError::RuleLoad(err.to_string()))
            }
            other => VendorscopeError::Detection(DetectionError::Rule(other.to_string())),
        }
    }
}
