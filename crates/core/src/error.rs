//! 에러 타입 -- 도메인별 에러 정의

/// Vendorscope 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum VendorscopeError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 탐지 엔진 에러
    #[error("detection error: {0}")]
    Detection(#[from] DetectionError),

    /// 세션 코디네이터 에러
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// 스토리지 에러
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 탐지 엔진 에러
#[derive(Debug, thiserror::Error)]
pub enum DetectionError {
    /// 규칙 카탈로그 로딩 실패
    #[error("rule load failed: {0}")]
    RuleLoad(String),

    /// 탐지 규칙 에러
    #[error("rule error: {0}")]
    Rule(String),
}

/// 세션 코디네이터 에러
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// 알 수 없는 탭
    #[error("unknown tab: {0}")]
    UnknownTab(u64),

    /// 캡처 상태 전이 실패
    #[error("capture error: {0}")]
    Capture(String),

    /// 외부에서 전달된 결과가 유효하지 않음
    #[error("invalid result: {0}")]
    InvalidResult(String),
}

/// 스토리지 에러
///
/// 영속 상태의 읽기/쓰기 실패와 스키마 검증 실패를 구분합니다.
/// `Corrupted`는 호출자가 원본에서 재구성해야 함을 뜻합니다.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// 읽기 실패
    #[error("read failed for '{key}': {reason}")]
    Read { key: String, reason: String },

    /// 쓰기 실패
    #[error("write failed for '{key}': {reason}")]
    Write { key: String, reason: String },

    /// 저장된 값이 기대한 스키마와 맞지 않음
    #[error(transparent)]
    Corrupted(#[from] CorruptedStateError),
}

/// 영속 상태 스키마 검증 실패
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("corrupted state under '{key}': {reason}")]
pub struct CorruptedStateError {
    /// 손상된 값의 스토어 키
    pub key: String,
    /// 검증 실패 사유
    pub reason: String,
}

impl CorruptedStateError {
    /// 새 손상 에러를 생성합니다.
    pub fn new(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupted_state_display_includes_key() {
        let err = CorruptedStateError::new("tab_7", "expected array at results");
        let msg = err.to_string();
        assert!(msg.contains("tab_7"));
        assert!(msg.contains("expected array"));
    }

    #[test]
    fn corrupted_converts_through_storage_error() {
        let err: StorageError = CorruptedStateError::new("rule_cache", "bad").into();
        let top: VendorscopeError = err.into();
        assert!(matches!(
            top,
            VendorscopeError::Storage(StorageError::Corrupted(_))
        ));
    }

    #[test]
    fn config_error_display() {
        let err = ConfigError::InvalidValue {
            field: "general.log_level".to_owned(),
            reason: "must be one of: info".to_owned(),
        };
        assert!(err.to_string().contains("general.log_level"));
    }
}
