//! 파이프라인 trait -- 모듈 확장 포인트 정의

use crate::error::VendorscopeError;
use crate::types::{DetectionResult, SignalBundle};

/// 탐지 로직을 구현하는 trait
///
/// 신호 묶음을 분석하여 벤더별 판정 목록을 만듭니다.
pub trait Detector: Send + Sync {
    /// 탐지기 이름
    fn name(&self) -> &str;

    /// 신호 묶음을 분석하여 탐지 결과를 반환
    fn detect(&self, bundle: &SignalBundle) -> Result<Vec<DetectionResult>, VendorscopeError>;
}
