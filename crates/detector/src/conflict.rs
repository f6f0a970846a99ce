//! 같은 표시 이름 결과의 충돌 해소
//!
//! 한 분석 패스에서 표시 이름이 같은 결과는 하나로 합칩니다.
//! - 매칭 증거는 (종류, 이름, 값) 기준 합집합
//! - 신뢰도는 최댓값
//! - 메타데이터(규칙 ID, 분류, 색상, 출처)는 `custom > override > builtin` 우선.
//!   같은 계층이면 먼저 평가된 결과를 유지합니다.

use std::collections::HashMap;

pub use vendorscope_core::types::sort_results;
use vendorscope_core::types::DetectionResult;

/// 충돌 해소 누적기
///
/// 결과를 평가 순서대로 넣고 [`finish`](Self::finish)로 정렬된 목록을 얻습니다.
#[derive(Debug, Default)]
pub struct ConflictResolver {
    results: Vec<DetectionResult>,
    /// 소문자 표시 이름 -> `results` 인덱스
    index: HashMap<String, usize>,
    merged: usize,
}

impl ConflictResolver {
    /// 빈 누적기를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 결과를 추가합니다. 같은 표시 이름이 있으면 병합합니다.
    pub fn push(&mut self, incoming: DetectionResult) {
        let key = incoming.display_name.to_lowercase();
        match self.index.get(&key) {
            Some(&idx) => {
                merge_into(&mut self.results[idx], incoming);
                self.merged += 1;
            }
            None => {
                self.index.insert(key, self.results.len());
                self.results.push(incoming);
            }
        }
    }

    /// 지금까지 병합된 횟수
    pub fn merged(&self) -> usize {
        self.merged
    }

    /// 신뢰도 내림차순, 표시 이름 오름차순으로 정렬된 결과를 반환합니다.
    pub fn finish(self) -> Vec<DetectionResult> {
        let mut results = self.results;
        sort_results(&mut results);
        results
    }
}

/// 결과 목록에서 표시 이름 충돌을 해소합니다.
pub fn resolve_conflicts(results: impl IntoIterator<Item = DetectionResult>) -> Vec<DetectionResult> {
    let mut resolver = ConflictResolver::new();
    for result in results {
        resolver.push(result);
    }
    resolver.finish()
}

fn merge_into(existing: &mut DetectionResult, incoming: DetectionResult) {
    if incoming.provenance > existing.provenance {
        // 더 높은 계층의 메타데이터로 교체하고 증거는 합칩니다.
        let mut winner = incoming;
        winner.absorb_evidence(existing);
        // 기존 매칭을 앞에 둡니다.
        let mut matches = std::mem::take(&mut existing.matches);
        for m in winner.matches.drain(..) {
            if !matches.iter().any(|e| e.dedup_key() == m.dedup_key()) {
                matches.push(m);
            }
        }
        winner.matches = matches;
        *existing = winner;
    } else {
        existing.absorb_evidence(&incoming);
    }
}
