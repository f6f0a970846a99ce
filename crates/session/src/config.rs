//! 세션 코디네이터 설정
//!
//! core의 [`SessionConfig`]를 `Duration` 기반 런타임 설정으로 변환합니다.

use std::time::Duration;

use vendorscope_core::config::{MAX_CAPTURE_WINDOW_MS, MIN_CAPTURE_WINDOW_MS, SessionConfig};

use crate::error::SessionError;

/// 세션 코디네이터 런타임 설정
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// 탭 스냅샷 영속화 여부
    pub persist: bool,
    /// DOM 변경 재분석 디바운스
    pub debounce: Duration,
    /// 요청에 윈도우가 없을 때의 캡처 윈도우
    pub default_capture_window: Duration,
    /// 캡처 이력 링 버퍼 용량
    pub history_capacity: usize,
    /// 캡처 이력 항목 만료
    pub history_ttl: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_core(&SessionConfig::default())
    }
}

impl SessionSettings {
    /// core의 `SessionConfig`에서 런타임 설정을 생성합니다.
    pub fn from_core(core: &SessionConfig) -> Self {
        Self {
            persist: core.persist,
            debounce: Duration::from_millis(core.debounce_ms),
            default_capture_window: Duration::from_millis(core.default_capture_window_ms),
            history_capacity: core.history_capacity,
            history_ttl: Duration::from_secs(core.history_ttl_secs),
        }
    }

    /// 영속화를 켜거나 끕니다.
    pub fn with_persist(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    /// 요청된 캡처 윈도우를 결정합니다.
    ///
    /// 값이 없으면 기본 윈도우를 쓰고, 어느 쪽이든 `[1s, 5min]`으로 제한합니다.
    pub fn capture_window(&self, requested_ms: Option<u64>) -> Duration {
        match requested_ms {
            Some(ms) => clamp_window(Duration::from_millis(ms)),
            None => clamp_window(self.default_capture_window),
        }
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.history_capacity == 0 {
            return Err(SessionError::Config {
                field: "history_capacity".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        if self.history_ttl.is_zero() {
            return Err(SessionError::Config {
                field: "history_ttl".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        Ok(())
    }
}

/// 캡처 윈도우를 `[1s, 5min]`으로 제한합니다.
pub fn clamp_window(window: Duration) -> Duration {
    window.clamp(
        Duration::from_millis(MIN_CAPTURE_WINDOW_MS),
        Duration::from_millis(MAX_CAPTURE_WINDOW_MS),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_core() {
        let settings = SessionSettings::default();
        settings.validate().unwrap();
        assert!(settings.persist);
        assert_eq!(settings.debounce, Duration::from_millis(500));
        assert_eq!(settings.default_capture_window, Duration::from_secs(15));
        assert_eq!(settings.history_capacity, 100);
        assert_eq!(settings.history_ttl, Duration::from_secs(1800));
    }

    #[test]
    fn capture_window_is_clamped() {
        let settings = SessionSettings::default();
        assert_eq!(settings.capture_window(Some(10)), Duration::from_secs(1));
        assert_eq!(settings.capture_window(Some(600_000)), Duration::from_secs(300));
        assert_eq!(settings.capture_window(Some(20_000)), Duration::from_secs(20));
        assert_eq!(settings.capture_window(None), Duration::from_secs(15));
    }

    #[test]
    fn zero_history_capacity_is_rejected() {
        let settings = SessionSettings {
            history_capacity: 0,
            ..SessionSettings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(SessionError::Config { .. })
        ));
    }
}
