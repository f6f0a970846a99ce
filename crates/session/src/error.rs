//! 세션 코디네이터 에러 타입
//!
//! [`SessionError`]는 세션 크레이트 내부의 모든 에러를 표현합니다.
//! `From<SessionError> for VendorscopeError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 전파할 수 있습니다.

use vendorscope_core::error::{
    ConfigError, SessionError as CoreSessionError, StorageError, VendorscopeError,
};
use vendorscope_core::types::TabId;

use crate::capture::CaptureState;

/// 캡처 상태 머신 에러
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    /// 현재 상태에서 허용되지 않는 전이
    #[error("invalid capture transition: cannot {action} from {from}")]
    InvalidTransition {
        /// 전이 시도 시점의 상태
        from: CaptureState,
        /// 시도한 동작
        action: &'static str,
    },

    /// 무장 대상에 없는 캡처 대상
    #[error("capture target '{target}' was not armed")]
    TargetNotArmed {
        /// 거부된 대상
        target: String,
    },
}

/// 세션 코디네이터 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// 세션이 없는 탭
    #[error("unknown tab: {0}")]
    UnknownTab(TabId),

    /// 캡처 상태 머신 에러
    #[error(transparent)]
    Capture(#[from] CaptureError),

    /// 신뢰도가 0-100 범위를 벗어난 결과
    #[error("result '{rule_id}' has confidence outside 0-100")]
    ConfidenceOutOfRange {
        /// 결과의 병합 키
        rule_id: String,
    },

    /// 영속 상태 에러
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },
}

impl From<SessionError> for VendorscopeError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::UnknownTab(tab_id) => {
                VendorscopeError::Session(CoreSessionError::UnknownTab(tab_id))
            }
            SessionError::Capture(e) => {
                VendorscopeError::Session(CoreSessionError::Capture(e.to_string()))
            }
            e @ SessionError::ConfidenceOutOfRange { .. } => {
                VendorscopeError::Session(CoreSessionError::InvalidResult(e.to_string()))
            }
            SessionError::Storage(e) => VendorscopeError::Storage(e),
            SessionError::Config { field, reason } => {
                VendorscopeError::Config(ConfigError::InvalidValue { field, reason })
            }
        }
    }
}
