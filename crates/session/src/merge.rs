//! 탭 결과 병합
//!
//! - 고급 결과 누적: (규칙 ID 또는 표시 이름, 트리거) 키로 합칩니다.
//! - 표시용 병합: 탐지 결과와 고급 결과를 규칙 ID로 합칩니다.
//!
//! 두 경우 모두 매칭은 합집합, 신뢰도는 최댓값이며
//! 고급 결과의 파라미터가 기존 파라미터를 덮어씁니다.

use vendorscope_core::types::{DetectionResult, sort_results};

/// 고급 결과를 기존 목록에 누적합니다.
///
/// 같은 (병합 키, 트리거)는 하나로 합치고, 다른 키는 뒤에 추가합니다.
pub fn merge_advanced(existing: &mut Vec<DetectionResult>, incoming: Vec<DetectionResult>) {
    for result in incoming {
        let slot = existing
            .iter_mut()
            .find(|e| e.merge_key() == result.merge_key() && e.trigger == result.trigger);
        match slot {
            Some(current) => overlay(current, result),
            None => existing.push(result),
        }
    }
}

/// 탐지 결과와 고급 결과를 규칙 ID 기준으로 합친 표시용 목록을 만듭니다.
///
/// 결과는 신뢰도 내림차순, 표시 이름 오름차순입니다.
pub fn merge_for_display(
    detection: &[DetectionResult],
    advanced: &[DetectionResult],
) -> Vec<DetectionResult> {
    let mut merged: Vec<DetectionResult> = detection.to_vec();
    for result in advanced {
        match merged.iter_mut().find(|e| e.merge_key() == result.merge_key()) {
            Some(current) => overlay(current, result.clone()),
            None => merged.push(result.clone()),
        }
    }
    sort_results(&mut merged);
    merged
}

fn overlay(current: &mut DetectionResult, incoming: DetectionResult) {
    current.absorb_evidence(&incoming);
    current.parameters.extend(incoming.parameters);
    if current.trigger.is_none() {
        current.trigger = incoming.trigger;
    }
}
