//! 탐지 엔진 -- 규칙 평가, 신뢰도 집계, 충돌 해소
//!
//! [`DetectionEngine`]은 해석된 규칙 집합을 신호 묶음에 대해 평가합니다.
//!
//! # 평가 규칙
//! - 비활성 규칙은 평가하지 않습니다.
//! - 각 절은 같은 종류의 모든 신호와 비교하며, 처음 일치한 신호 하나로
//!   최대 한 번 발화합니다.
//! - `confidence = round(min(100, Σweight / matchCount))`
//! - 발화한 절이 없는 규칙은 결과를 만들지 않습니다.
//! - 같은 표시 이름은 [`conflict`](crate::conflict) 규칙으로 하나가 됩니다.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use vendorscope_core::error::VendorscopeError;
use vendorscope_core::metrics as m;
use vendorscope_core::pipeline::Detector;
use vendorscope_core::types::{DetectionResult, Match, SignalBundle};

use crate::conflict::ConflictResolver;
use crate::rule::{DetectorRule, ResolvedRuleSet};

/// 해석된 규칙 집합 하나에 묶인 탐지 엔진
///
/// 규칙 집합은 `Arc`로 공유되므로 엔진 생성 비용은 작습니다.
#[derive(Debug, Clone)]
pub struct DetectionEngine {
    rules: Arc<ResolvedRuleSet>,
}

impl DetectionEngine {
    /// 규칙 집합으로 엔진을 생성합니다.
    pub fn new(rules: Arc<ResolvedRuleSet>) -> Self {
        Self { rules }
    }

    /// 엔진이 사용하는 규칙 집합
    pub fn rules(&self) -> &ResolvedRuleSet {
        &self.rules
    }

    /// 신호 묶음을 평가합니다.
    pub fn evaluate(&self, bundle: &SignalBundle) -> Vec<DetectionResult> {
        evaluate(&self.rules, bundle)
    }
}

/// 규칙 집합 전체를 평가하고 충돌을 해소한 결과를 반환합니다.
///
/// 결과는 신뢰도 내림차순, 표시 이름 오름차순입니다.
pub fn evaluate(rule_set: &ResolvedRuleSet, bundle: &SignalBundle) -> Vec<DetectionResult> {
    let mut resolver = ConflictResolver::new();

    for rule in rule_set.rules.iter().filter(|r| r.enabled) {
        if let Some(result) = evaluate_rule(rule, bundle) {
            metrics::counter!(
                m::DETECTOR_DETECTIONS_TOTAL,
                m::LABEL_PROVENANCE => rule.provenance.to_string()
            )
            .increment(1);
            resolver.push(result);
        }
    }

    let merged = resolver.merged();
    if merged > 0 {
        metrics::counter!(m::DETECTOR_CONFLICTS_MERGED_TOTAL).increment(merged as u64);
    }
    metrics::counter!(m::DETECTOR_EVALUATIONS_TOTAL).increment(1);

    let results = resolver.finish();
    debug!(
        rules = rule_set.len(),
        signals = bundle.len(),
        detected = results.len(),
        merged,
        "detection pass complete"
    );
    results
}

/// 규칙 하나를 평가합니다. 발화한 절이 없으면 `None`.
pub fn evaluate_rule(rule: &DetectorRule, bundle: &SignalBundle) -> Option<DetectionResult> {
    if !rule.enabled {
        return None;
    }

    let matches: Vec<Match> = rule
        .clauses
        .iter()
        .filter_map(|clause| {
            clause
                .first_match(bundle)
                .map(|signal| Match::new(clause.kind, signal.name.as_str(), &signal.value, clause.weight))
        })
        .collect();

    let confidence = aggregate_confidence(&matches)?;

    Some(DetectionResult {
        rule_id: rule.id.clone(),
        display_name: rule.display_name.clone(),
        category: rule.category.clone(),
        color: rule.color.clone(),
        provenance: rule.provenance,
        confidence,
        matches,
        trigger: None,
        parameters: BTreeMap::new(),
    })
}

/// `round(min(100, Σweight / count))`. 매칭이 없으면 `None`.
pub fn aggregate_confidence(matches: &[Match]) -> Option<u8> {
    if matches.is_empty() {
        return None;
    }
    let sum: u32 = matches.iter().map(|m| u32::from(m.confidence)).sum();
    let avg = (f64::from(sum) / matches.len() as f64).min(100.0).round();
    // 0 <= avg <= 100
    Some(avg as u8)
}

/// core의 `Detector` trait을 DetectionEngine에 대해 구현합니다.
///
/// 데몬이나 CLI에서 다른 `Detector` 구현체와 같은 인터페이스로 사용할 수 있습니다.
impl Detector for DetectionEngine {
    fn name(&self) -> &str {
        "vendor-detection-engine"
    }

    fn detect(&self, bundle: &SignalBundle) -> Result<Vec<DetectionResult>, VendorscopeError> {
        Ok(self.evaluate(bundle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{Clause, Pattern};
    use semver::Version;
    use vendorscope_core::types::{Provenance, Signal, SignalKind};

    fn clause(kind: SignalKind, target: &str, weight: u8) -> Clause {
        Clause {
            kind,
            target: Pattern::classify(target),
            value: None,
            weight,
        }
    }

    fn rule(id: &str, name: &str, clauses: Vec<Clause>) -> DetectorRule {
        DetectorRule {
            id: id.to_owned(),
            display_name: name.to_owned(),
            category: "CDN".to_owned(),
            color: "#F38020".to_owned(),
            base_confidence: 100,
            enabled: true,
            provenance: Provenance::Builtin,
            clauses,
        }
    }

    fn set(rules: Vec<DetectorRule>) -> ResolvedRuleSet {
        ResolvedRuleSet {
            catalog_version: Version::new(1, 0, 0),
            rules,
            resolved_at_ms: 0,
        }
    }

    #[test]
    fn single_cookie_clause_yields_its_weight() {
        let rules = set(vec![rule(
            "cloudflare",
            "Cloudflare",
            vec![clause(SignalKind::Cookie, "__cf_bm", 95)],
        )]);
        let bundle = SignalBundle::new(vec![Signal::cookie("__cf_bm", "abc")]);

        let out = evaluate(&rules, &bundle);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].confidence, 95);
        assert_eq!(out[0].matches.len(), 1);
        assert_eq!(out[0].matches[0].clause_kind, SignalKind::Cookie);
        assert_eq!(out[0].matches[0].matched_value, "abc");
    }

    #[test]
    fn confidence_is_rounded_average() {
        let r = rule(
            "x",
            "X",
            vec![
                clause(SignalKind::Cookie, "a", 90),
                clause(SignalKind::Header, "b", 71),
                clause(SignalKind::Url, "never", 10),
            ],
        );
        let bundle = SignalBundle::new(vec![Signal::cookie("a", ""), Signal::header("b", "")]);
        // (90 + 71) / 2 = 80.5 -> 81
        assert_eq!(evaluate_rule(&r, &bundle).unwrap().confidence, 81);
    }

    #[test]
    fn clause_fires_once_even_with_many_matching_signals() {
        let r = rule("x", "X", vec![clause(SignalKind::Cookie, "_px*", 80)]);
        let bundle = SignalBundle::new(vec![
            Signal::cookie("_px2", "1"),
            Signal::cookie("_px3", "2"),
        ]);
        let result = evaluate_rule(&r, &bundle).unwrap();
        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].matched_name, "_px2");
    }

    #[test]
    fn no_firing_clause_means_no_result() {
        let r = rule("x", "X", vec![clause(SignalKind::Cookie, "a", 90)]);
        assert!(evaluate_rule(&r, &SignalBundle::default()).is_none());
    }

    #[test]
    fn disabled_rule_is_skipped() {
        let mut r = rule("x", "X", vec![clause(SignalKind::Cookie, "a", 90)]);
        r.enabled = false;
        let bundle = SignalBundle::new(vec![Signal::cookie("a", "")]);
        assert!(evaluate(&set(vec![r]), &bundle).is_empty());
    }

    #[test]
    fn unavailable_kind_is_treated_as_empty() {
        let r = rule("x", "X", vec![clause(SignalKind::Header, "server", 90)]);
        let bundle = SignalBundle {
            signals: vec![Signal::header("server", "cloudflare")],
            unavailable: vec![SignalKind::Header],
        };
        assert!(evaluate_rule(&r, &bundle).is_none());
    }

    #[test]
    fn aggregate_confidence_bounds() {
        assert_eq!(aggregate_confidence(&[]), None);
        let m = Match::new(SignalKind::Dom, "#x", "", 100);
        assert_eq!(aggregate_confidence(&[m.clone(), m]), Some(100));
    }

    #[test]
    fn engine_implements_detector() {
        let rules = Arc::new(set(vec![rule(
            "cloudflare",
            "Cloudflare",
            vec![clause(SignalKind::Cookie, "__cf_bm", 95)],
        )]));
        let engine = DetectionEngine::new(rules);
        let detector: &dyn Detector = &engine;
        assert_eq!(detector.name(), "vendor-detection-engine");
        let out = detector
            .detect(&SignalBundle::new(vec![Signal::cookie("__cf_bm", "")]))
            .unwrap();
        assert_eq!(out.len(), 1);
    }
}
