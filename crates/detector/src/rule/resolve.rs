//! 규칙 계층 해석 -- 기본 카탈로그 + 오버라이드 + 사용자 정의 규칙
//!
//! 순수 함수입니다. 같은 입력은 항상 같은 규칙 목록을 만듭니다.
//!
//! 1. 기본 카탈로그에서 시작합니다.
//! 2. 기본 규칙 ID를 가리키는 오버라이드는 `enabled: false`면 규칙을 제거하고,
//!    그 외에는 규칙 전체를 교체합니다 (ID 유지, 출처 `override`).
//!    기본 규칙이 없는 오버라이드는 무시합니다.
//! 3. 사용자 정의 규칙은 출처 `custom`으로 추가합니다.
//!    기본 규칙 ID와 같으면 그 규칙의 오버라이드로 취급합니다.
//!    사용자 색상이 있으면 같은 표시 이름의 다른 규칙 색상도 덮어씁니다.

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, warn};

use vendorscope_core::types::{Provenance, now_millis};

use super::types::{DetectorRule, ResolvedRuleSet, RuleCatalog, RuleDefinition};
use crate::config::ColorPalette;

/// 세 계층을 해석하여 규칙 집합을 만듭니다.
pub fn resolve(
    base: &RuleCatalog,
    overrides: &[RuleDefinition],
    custom: &[RuleDefinition],
    palette: &ColorPalette,
) -> ResolvedRuleSet {
    let base_ids: HashSet<&str> = base.rules.iter().map(|r| r.id.as_str()).collect();

    // ID 순 정렬을 BTreeMap으로 보장합니다.
    let mut layered: BTreeMap<String, (RuleDefinition, Provenance)> = base
        .rules
        .iter()
        .map(|r| (r.id.clone(), (r.clone(), Provenance::Builtin)))
        .collect();

    for ov in overrides {
        if !base_ids.contains(ov.id.as_str()) {
            warn!(rule_id = %ov.id, "override does not match any base rule, ignoring");
            continue;
        }
        apply_override(&mut layered, ov);
    }

    let mut custom_colors: Vec<(&str, &str, &str)> = Vec::new();
    for rule in custom {
        if base_ids.contains(rule.id.as_str()) {
            debug!(rule_id = %rule.id, "custom rule shares a base id, treating as override");
            apply_override(&mut layered, rule);
            continue;
        }
        if layered.contains_key(&rule.id) {
            warn!(rule_id = %rule.id, "duplicate custom rule id, skipping");
            continue;
        }
        if !rule.enabled {
            continue;
        }
        if let Some(color) = &rule.color {
            custom_colors.push((rule.id.as_str(), rule.name.as_str(), color.as_str()));
        }
        layered.insert(rule.id.clone(), (rule.clone(), Provenance::Custom));
    }

    // 사용자 색상은 같은 표시 이름의 다른 규칙에도 적용됩니다 (매칭에는 영향 없음).
    for (custom_id, name, color) in custom_colors {
        for (id, (rule, _)) in layered.iter_mut() {
            if id != custom_id && rule.name.eq_ignore_ascii_case(name) {
                rule.color = Some(color.to_owned());
            }
        }
    }

    let rules = layered
        .into_values()
        .map(|(rule, provenance)| {
            let color = palette.resolve(rule.color.as_deref(), &rule.category);
            DetectorRule {
                id: rule.id,
                display_name: rule.name,
                category: rule.category,
                color,
                base_confidence: rule.base_confidence,
                enabled: rule.enabled,
                provenance,
                clauses: rule.clauses,
            }
        })
        .collect();

    ResolvedRuleSet {
        catalog_version: base.version.clone(),
        rules,
        resolved_at_ms: now_millis(),
    }
}

fn apply_override(
    layered: &mut BTreeMap<String, (RuleDefinition, Provenance)>,
    rule: &RuleDefinition,
) {
    if rule.enabled {
        layered.insert(rule.id.clone(), (rule.clone(), Provenance::Override));
    } else {
        debug!(rule_id = %rule.id, "override disables base rule");
        layered.remove(&rule.id);
    }
}
