//! 통합 테스트 -- 규칙 문서에서 탐지 결과까지의 전체 흐름 검증

use std::sync::Arc;

use proptest::prelude::*;

use vendorscope_core::store::MemoryStateStore;
use vendorscope_core::types::{Provenance, Signal, SignalBundle, SignalKind};
use vendorscope_detector::rule::{RuleCatalog, RuleLoader};
use vendorscope_detector::{
    DetectorConfig, FileRuleSource, MemoryRuleSource, RuleDocument, RuleStore, evaluate,
};

fn doc(yaml: &str) -> RuleDocument {
    serde_yaml::from_str(yaml).expect("valid yaml")
}

fn catalog(yaml: &str) -> RuleCatalog {
    let parsed = RuleLoader::parse_documents(yaml, "test").expect("parse");
    RuleCatalog {
        version: semver::Version::new(1, 0, 0),
        rules: RuleLoader::compile_documents(&parsed.documents, "test").expect("compile"),
    }
}

fn memory_store(
    source: MemoryRuleSource,
) -> RuleStore<MemoryRuleSource, MemoryStateStore> {
    RuleStore::new(
        source,
        Arc::new(MemoryStateStore::new()),
        DetectorConfig::default(),
    )
}

const BASE: &str = r##"
rules:
  - id: cloudflare
    name: Cloudflare
    category: CDN
    detection:
      cookies:
        - name: __cf_bm
          confidence: 95
  - id: akamai
    name: Akamai Bot Manager
    category: Anti-Bot
    detection:
      cookies:
        - name: _abck
          confidence: 90
        - name: bm_sz
          confidence: 80
  - id: recaptcha
    name: reCAPTCHA
    category: CAPTCHA
    detection:
      scripts:
        - pattern: "*google.com/recaptcha/*"
          confidence: 90
      dom:
        - selector: ".g-recaptcha"
          confidence: 85
"##;

/// 쿠키 하나로 Cloudflare를 탐지
#[tokio::test]
async fn test_cloudflare_cookie_detection() {
    let store = memory_store(MemoryRuleSource::new(catalog(BASE)));
    let rules = store.rules().await.unwrap();

    let bundle = SignalBundle::new(vec![Signal::cookie("__cf_bm", "abc")]);
    let results = evaluate(&rules, &bundle);

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].display_name, "Cloudflare");
    assert_eq!(results[0].confidence, 95);
    assert_eq!(results[0].matches.len(), 1);
    assert_eq!(results[0].matches[0].clause_kind, SignalKind::Cookie);
    assert_eq!(results[0].color, "#3B82F6");
}

/// 기본 규칙(90, A)과 사용자 정의 규칙(70, B)이 같은 이름으로 동시에 발화
#[tokio::test]
async fn test_builtin_and_custom_same_name_merge() {
    let source = MemoryRuleSource::new(catalog(
        "rules:\n  - id: cloudflare\n    name: Cloudflare\n    category: CDN\n    detection:\n      cookies:\n        - name: __cf_bm\n          confidence: 90\n",
    ));
    let store = memory_store(source);
    store
        .put_custom(doc(
            "id: my-cloudflare\nname: Cloudflare\ncolor: \"#222222\"\ndetection:\n  headers:\n    - name: cf-ray\n      confidence: 70\n",
        ))
        .await
        .unwrap();

    let rules = store.rules().await.unwrap();
    let bundle = SignalBundle::new(vec![
        Signal::cookie("__cf_bm", "abc"),
        Signal::header("cf-ray", "8a1b"),
    ]);
    let results = evaluate(&rules, &bundle);

    assert_eq!(results.len(), 1);
    let r = &results[0];
    assert_eq!(r.provenance, Provenance::Custom);
    assert_eq!(r.confidence, 90);
    assert_eq!(r.color, "#222222");
    let kinds: Vec<_> = r.matches.iter().map(|m| m.clause_kind).collect();
    assert!(kinds.contains(&SignalKind::Cookie));
    assert!(kinds.contains(&SignalKind::Header));
}

/// `enabled: false` 오버라이드는 일치하는 신호가 있어도 탐지되지 않게 함
#[tokio::test]
async fn test_disabled_override_prevents_detection() {
    let store = memory_store(MemoryRuleSource::new(catalog(BASE)));
    store
        .put_override(doc("id: akamai\nenabled: false\n"))
        .await
        .unwrap();

    let rules = store.rules().await.unwrap();
    assert!(rules.get("akamai").is_none());

    let bundle = SignalBundle::new(vec![Signal::cookie("_abck", "x"), Signal::cookie("bm_sz", "y")]);
    assert!(evaluate(&rules, &bundle).is_empty());
}

/// 파일 카탈로그 + 파일 오버라이드 + 잘못된 문서 건너뛰기
#[tokio::test]
async fn test_file_catalog_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let catalog_dir = dir.path().join("catalog");
    tokio::fs::create_dir_all(&catalog_dir).await.unwrap();
    tokio::fs::write(catalog_dir.join("base.yml"), BASE).await.unwrap();
    tokio::fs::write(catalog_dir.join("broken.yml"), "rules: 7").await.unwrap();

    let config = DetectorConfig {
        catalog_path: catalog_dir.display().to_string(),
        overrides_path: dir.path().join("overrides.yml").display().to_string(),
        custom_path: dir.path().join("custom.yml").display().to_string(),
        ..DetectorConfig::default()
    };
    let store = RuleStore::new(
        FileRuleSource::from_config(&config),
        Arc::new(MemoryStateStore::new()),
        config,
    );

    let rules = store.rules().await.unwrap();
    assert_eq!(rules.len(), 3);

    let bundle = SignalBundle::new(vec![
        Signal::script("https://www.google.com/recaptcha/api.js", ""),
        Signal::dom(".g-recaptcha", "<div class=\"g-recaptcha\">"),
        Signal::cookie("_abck", "x"),
    ]);
    let results = evaluate(&rules, &bundle);
    let names: Vec<_> = results.iter().map(|r| r.display_name.as_str()).collect();
    // reCAPTCHA (90+85)/2 = 87.5 -> 88, Akamai 90
    assert_eq!(names, vec!["Akamai Bot Manager", "reCAPTCHA"]);
    assert_eq!(results[1].confidence, 88);
}

/// 같은 입력으로 두 번 해석하면 규칙이 바이트 단위로 같음
#[tokio::test]
async fn test_resolve_is_deterministic() {
    let store = memory_store(MemoryRuleSource::new(catalog(BASE)));
    let a = store.refresh().await.unwrap();
    let b = store.refresh().await.unwrap();
    assert_eq!(
        serde_json::to_vec(&a.rules).unwrap(),
        serde_json::to_vec(&b.rules).unwrap()
    );
}

/// 잘못된 정규식은 부분 문자열 매칭으로 동작
#[tokio::test]
async fn test_invalid_regex_falls_back_to_substring() {
    let store = memory_store(MemoryRuleSource::new(catalog(
        "rules:\n  - name: Kasada\n    detection:\n      scripts:\n        - content: { pattern: \"ips.js(\", type: regex }\n",
    )));
    let rules = store.rules().await.unwrap();
    let bundle = SignalBundle::new(vec![Signal::script("", "load('/149e9513/IPS.JS(')")]);
    assert_eq!(evaluate(&rules, &bundle).len(), 1);
}

fn arb_provenance() -> impl Strategy<Value = Provenance> {
    prop_oneof![
        Just(Provenance::Builtin),
        Just(Provenance::Override),
        Just(Provenance::Custom),
    ]
}

fn arb_rule_set() -> impl Strategy<Value = vendorscope_detector::ResolvedRuleSet> {
    let rule = (
        0usize..4,
        arb_provenance(),
        prop::collection::vec((0usize..5, 1u8..=100), 1..4),
    );
    prop::collection::vec(rule, 0..10).prop_map(|rules| {
        let names = ["Cloudflare", "Akamai", "DataDome", "hCaptcha"];
        let cookies = ["a", "b", "c", "d", "e"];
        let mut out: Vec<_> = rules
            .into_iter()
            .enumerate()
            .map(|(i, (name, provenance, clauses))| vendorscope_detector::DetectorRule {
                id: format!("rule-{i:02}"),
                display_name: names[name].to_owned(),
                category: "CDN".to_owned(),
                color: "#000000".to_owned(),
                base_confidence: 100,
                enabled: true,
                provenance,
                clauses: clauses
                    .into_iter()
                    .map(|(c, w)| vendorscope_detector::rule::Clause {
                        kind: SignalKind::Cookie,
                        target: vendorscope_detector::Pattern::compile(
                            vendorscope_detector::rule::PatternKind::Wildcard,
                            cookies[c],
                            "",
                        ),
                        value: None,
                        weight: w,
                    })
                    .collect(),
            })
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        vendorscope_detector::ResolvedRuleSet {
            catalog_version: semver::Version::new(1, 0, 0),
            rules: out,
            resolved_at_ms: 0,
        }
    })
}

fn arb_bundle() -> impl Strategy<Value = SignalBundle> {
    prop::collection::vec(prop::sample::select(vec!["a", "b", "c", "d", "e", "z"]), 0..6)
        .prop_map(|names| {
            SignalBundle::new(names.into_iter().map(|n| Signal::cookie(n, "v")).collect())
        })
}

proptest! {
    #[test]
    fn display_names_are_unique_and_confidence_bounded(
        rules in arb_rule_set(),
        bundle in arb_bundle(),
    ) {
        let results = evaluate(&rules, &bundle);
        let mut seen = std::collections::HashSet::new();
        for r in &results {
            prop_assert!(seen.insert(r.display_name.to_lowercase()));
            prop_assert!(r.confidence >= 1 && r.confidence <= 100);
            prop_assert!(!r.matches.is_empty());
        }
    }

    #[test]
    fn same_tier_merge_is_order_independent(
        rules in arb_rule_set(),
        bundle in arb_bundle(),
    ) {
        let mut reversed = rules.clone();
        for r in reversed.rules.iter_mut() {
            r.provenance = Provenance::Builtin;
        }
        let mut forward = reversed.clone();
        reversed.rules.reverse();
        forward.rules.sort_by(|a, b| a.id.cmp(&b.id));

        let a = evaluate(&forward, &bundle);
        let b = evaluate(&reversed, &bundle);
        prop_assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            prop_assert_eq!(&x.display_name, &y.display_name);
            prop_assert_eq!(x.confidence, y.confidence);
            let mut mx: Vec<_> = x.matches.iter().map(|m| m.matched_name.clone()).collect();
            let mut my: Vec<_> = y.matches.iter().map(|m| m.matched_name.clone()).collect();
            mx.sort();
            my.sort();
            prop_assert_eq!(mx, my);
        }
    }

    #[test]
    fn custom_metadata_always_wins(
        rules in arb_rule_set(),
        bundle in arb_bundle(),
    ) {
        let results = evaluate(&rules, &bundle);
        for r in &results {
            let has_custom_firing = rules.rules.iter().any(|rule| {
                rule.provenance == Provenance::Custom
                    && rule.display_name.eq_ignore_ascii_case(&r.display_name)
                    && vendorscope_detector::engine::evaluate_rule(rule, &bundle).is_some()
            });
            if has_custom_firing {
                prop_assert_eq!(r.provenance, Provenance::Custom);
            }
        }
    }
}
