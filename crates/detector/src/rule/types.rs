//! 규칙 데이터 타입
//!
//! 두 계층으로 나뉩니다.
//! - 문서 타입 ([`RuleDocument`], [`ClauseDocument`], [`PatternSpec`]):
//!   YAML/JSON 규칙 파일에서 역직렬화되는 사용자 작성 형태
//! - 규칙 타입 ([`RuleDefinition`], [`DetectorRule`], [`ResolvedRuleSet`]):
//!   검증과 패턴 컴파일이 끝난 평가용 형태

use semver::Version;
use serde::{Deserialize, Serialize};
use tracing::warn;

use vendorscope_core::config::is_hex_color;
use vendorscope_core::types::{Provenance, Signal, SignalBundle, SignalKind};

use super::matcher::{Pattern, PatternKind};
use crate::error::DetectorError;

/// 규칙 ID 최대 길이
pub const MAX_RULE_ID_LEN: usize = 256;

/// 규칙 기본 신뢰도
pub const DEFAULT_CONFIDENCE: u8 = 100;

/// 벤더 규칙 문서
///
/// # YAML 스키마
/// ```yaml
/// id: cloudflare
/// name: Cloudflare
/// category: CDN
/// color: "#F38020"
/// confidence: 90
/// detection:
///   cookies:
///     - name: __cf_bm
///       confidence: 95
///   headers:
///     - name: server
///       value: cloudflare
///   urls:
///     - pattern: "*/cdn-cgi/challenge-platform/*"
///   scripts:
///     - content: { pattern: "cf-chl-opt", type: literal }
///   dom:
///     - selector: "#challenge-form"
/// ```
///
/// 비활성화 오버라이드는 `id`와 `enabled: false`만으로 충분합니다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleDocument {
    /// 규칙 ID (비어 있으면 이름에서 유도)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// 표시 이름
    #[serde(default)]
    pub name: String,
    /// 분류
    #[serde(default)]
    pub category: String,
    /// 사용자 색상
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// 기본 신뢰도 (1-100)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<u32>,
    /// 활성화 여부 (기본 true)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// 탐지 절
    #[serde(default)]
    pub detection: DetectionBlock,
}

/// 종류별 절 목록
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionBlock {
    /// 쿠키 절
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cookies: Vec<ClauseDocument>,
    /// 헤더 절
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<ClauseDocument>,
    /// URL 절
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<ClauseDocument>,
    /// 스크립트 절
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scripts: Vec<ClauseDocument>,
    /// DOM 절
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dom: Vec<ClauseDocument>,
}

impl DetectionBlock {
    /// (종류, 절 목록) 쌍을 평가 순서대로 순회합니다.
    pub fn by_kind(&self) -> [(SignalKind, &[ClauseDocument]); 5] {
        [
            (SignalKind::Cookie, &self.cookies),
            (SignalKind::Header, &self.headers),
            (SignalKind::Url, &self.urls),
            (SignalKind::Script, &self.scripts),
            (SignalKind::Dom, &self.dom),
        ]
    }

    /// 절이 하나도 없는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.by_kind().iter().all(|(_, clauses)| clauses.is_empty())
    }
}

/// 절 문서
///
/// 매칭 대상은 `name`, `pattern`, `content`, `selector` 중 처음 나타나는 것입니다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClauseDocument {
    /// 쿠키/헤더 이름
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<PatternSpec>,
    /// URL 또는 스크립트 src 패턴
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<PatternSpec>,
    /// 스크립트 내용 패턴
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<PatternSpec>,
    /// DOM 셀렉터
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<PatternSpec>,
    /// 쿠키/헤더 값 패턴
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<PatternSpec>,
    /// 절 가중치 (1-100, 없으면 규칙 기본 신뢰도)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<u32>,
}

impl ClauseDocument {
    fn target(&self) -> Option<&PatternSpec> {
        self.name
            .as_ref()
            .or(self.pattern.as_ref())
            .or(self.content.as_ref())
            .or(self.selector.as_ref())
    }
}

/// 문서 안의 패턴 표기
///
/// 문자열이면 로딩 시 한 번 분류하고, 객체면 명시된 타입을 따릅니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PatternSpec {
    /// 분류가 필요한 원시 문자열
    Raw(String),
    /// 타입이 명시된 패턴
    Typed {
        /// 패턴 본문
        pattern: String,
        /// 패턴 종류
        #[serde(rename = "type")]
        kind: PatternKind,
        /// 정규식 플래그 (생략 시 regex는 `i`)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        flags: Option<String>,
    },
}

impl PatternSpec {
    /// 패턴으로 컴파일합니다.
    pub fn compile(&self) -> Pattern {
        match self {
            Self::Raw(raw) => Pattern::classify(raw),
            Self::Typed {
                pattern,
                kind,
                flags,
            } => {
                let flags = match (kind, flags) {
                    (PatternKind::Regex, None) => "i".to_owned(),
                    (_, Some(flags)) => flags.clone(),
                    (_, None) => String::new(),
                };
                Pattern::compile(*kind, pattern.as_str(), flags)
            }
        }
    }
}

/// 검증이 끝난 단일 절
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Clause {
    /// 절 종류
    pub kind: SignalKind,
    /// 이름/URL/src/셀렉터 패턴
    pub target: Pattern,
    /// 값 패턴 (쿠키/헤더)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Pattern>,
    /// 가중치 (1-100)
    pub weight: u8,
}

impl Clause {
    /// 신호 하나가 절을 만족하는지 확인합니다.
    ///
    /// | 종류 | 검사 |
    /// |------|------|
    /// | cookie, header | 이름, 값 패턴이 있으면 값도 |
    /// | url | URL |
    /// | script | src 또는 내용 |
    /// | dom | 셀렉터 |
    pub fn test(&self, signal: &Signal) -> bool {
        if signal.kind != self.kind {
            return false;
        }
        match self.kind {
            SignalKind::Cookie | SignalKind::Header => {
                self.target.matches(&signal.name)
                    && self
                        .value
                        .as_ref()
                        .is_none_or(|value| value.matches(&signal.value))
            }
            SignalKind::Url | SignalKind::Dom => self.target.matches(&signal.name),
            SignalKind::Script => {
                (!signal.name.is_empty() && self.target.matches(&signal.name))
                    || self.target.matches(&signal.value)
            }
        }
    }

    /// 묶음에서 절을 만족하는 첫 신호를 찾습니다.
    pub fn first_match<'a>(&self, bundle: &'a SignalBundle) -> Option<&'a Signal> {
        bundle.of_kind(self.kind).find(|signal| self.test(signal))
    }
}

/// 한 계층(기본/오버라이드/사용자 정의)에서 읽은 검증된 규칙
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDefinition {
    /// 규칙 ID
    pub id: String,
    /// 표시 이름
    pub name: String,
    /// 분류
    pub category: String,
    /// 사용자 색상
    pub color: Option<String>,
    /// 기본 신뢰도
    pub base_confidence: u8,
    /// 활성화 여부
    pub enabled: bool,
    /// 절 목록
    pub clauses: Vec<Clause>,
}

impl RuleDocument {
    /// 문서를 검증하고 패턴을 컴파일합니다.
    ///
    /// 잘못된 정규식은 에러가 아니며 경고 로그만 남깁니다.
    pub fn compile(&self) -> Result<RuleDefinition, DetectorError> {
        let id = if self.id.is_empty() {
            derive_id(&self.name)
        } else {
            self.id.clone()
        };

        if id.is_empty() {
            return Err(DetectorError::validation(
                "",
                "rule id must not be empty (and no name to derive it from)",
            ));
        }
        if id.chars().count() > MAX_RULE_ID_LEN {
            return Err(DetectorError::validation(
                &id,
                format!("rule id must not exceed {MAX_RULE_ID_LEN} characters"),
            ));
        }

        let enabled = self.enabled.unwrap_or(true);
        if enabled && self.name.trim().is_empty() {
            return Err(DetectorError::validation(&id, "rule name must not be empty"));
        }
        if enabled && self.detection.is_empty() {
            return Err(DetectorError::validation(
                &id,
                "enabled rule must have at least one detection clause",
            ));
        }

        let base_confidence = match self.confidence {
            Some(c) => weight_in_range(&id, "confidence", c)?,
            None => DEFAULT_CONFIDENCE,
        };

        if let Some(color) = &self.color
            && !is_hex_color(color)
        {
            return Err(DetectorError::validation(
                &id,
                format!("color '{color}' must be of the form #RRGGBB"),
            ));
        }

        let mut clauses = Vec::new();
        for (kind, docs) in self.detection.by_kind() {
            for (idx, doc) in docs.iter().enumerate() {
                clauses.push(compile_clause(&id, kind, idx, doc, base_confidence)?);
            }
        }

        Ok(RuleDefinition {
            id,
            name: self.name.trim().to_owned(),
            category: self.category.trim().to_owned(),
            color: self.color.clone(),
            base_confidence,
            enabled,
            clauses,
        })
    }
}

fn compile_clause(
    rule_id: &str,
    kind: SignalKind,
    idx: usize,
    doc: &ClauseDocument,
    base_confidence: u8,
) -> Result<Clause, DetectorError> {
    let Some(target) = doc.target() else {
        return Err(DetectorError::validation(
            rule_id,
            format!("{kind}[{idx}] needs one of name, pattern, content, selector"),
        ));
    };

    let weight = match doc.confidence {
        Some(c) => weight_in_range(rule_id, &format!("{kind}[{idx}].confidence"), c)?,
        None => base_confidence,
    };

    let target = target.compile();
    let value = doc.value.as_ref().map(PatternSpec::compile);

    for pattern in std::iter::once(&target).chain(value.as_ref()) {
        if pattern.is_degraded() {
            warn!(
                rule_id,
                clause = %format!("{kind}[{idx}]"),
                pattern = pattern.source(),
                "invalid regex, falling back to substring match"
            );
        }
    }

    Ok(Clause {
        kind,
        target,
        value,
        weight,
    })
}

fn weight_in_range(rule_id: &str, field: &str, value: u32) -> Result<u8, DetectorError> {
    match u8::try_from(value) {
        Ok(w) if (1..=100).contains(&w) => Ok(w),
        _ => Err(DetectorError::validation(
            rule_id,
            format!("{field} must be 1-100, got {value}"),
        )),
    }
}

/// 이름에서 규칙 ID를 유도합니다 (`"Akamai Bot Manager"` → `"akamai-bot-manager"`).
pub fn derive_id(name: &str) -> String {
    let mut id = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_alphanumeric() {
            id.extend(c.to_lowercase());
        } else if !id.is_empty() && !id.ends_with('-') {
            id.push('-');
        }
    }
    while id.ends_with('-') {
        id.pop();
    }
    id
}

/// 계층 해석이 끝난 평가용 규칙
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectorRule {
    /// 규칙 ID
    pub id: String,
    /// 표시 이름
    pub display_name: String,
    /// 분류
    pub category: String,
    /// 표시 색상 (항상 존재)
    pub color: String,
    /// 기본 신뢰도
    pub base_confidence: u8,
    /// 활성화 여부
    pub enabled: bool,
    /// 출처 계층
    pub provenance: Provenance,
    /// 절 목록
    pub clauses: Vec<Clause>,
}

/// 기본 카탈로그 (버전 + 규칙)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleCatalog {
    /// 카탈로그 버전
    pub version: Version,
    /// 기본 규칙
    pub rules: Vec<RuleDefinition>,
}

impl Default for RuleCatalog {
    fn default() -> Self {
        Self {
            version: Version::new(0, 0, 0),
            rules: Vec::new(),
        }
    }
}

/// 해석된 규칙 집합
///
/// 규칙은 ID 순으로 정렬되어 있습니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedRuleSet {
    /// 기본 카탈로그 버전
    pub catalog_version: Version,
    /// 해석된 규칙
    pub rules: Vec<DetectorRule>,
    /// 해석 시각 (Unix epoch 밀리초)
    pub resolved_at_ms: u64,
}

impl ResolvedRuleSet {
    /// 빈 규칙 집합
    pub fn empty() -> Self {
        Self {
            catalog_version: Version::new(0, 0, 0),
            rules: Vec::new(),
            resolved_at_ms: 0,
        }
    }

    /// 규칙 수
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// 규칙이 없는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// ID로 규칙을 찾습니다.
    pub fn get(&self, id: &str) -> Option<&DetectorRule> {
        self.rules
            .binary_search_by(|r| r.id.as_str().cmp(id))
            .ok()
            .map(|idx| &self.rules[idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cloudflare_yaml() -> &'static str {
        r##"
id: cloudflare
name: Cloudflare
category: CDN
color: "#F38020"
confidence: 90
detection:
  cookies:
    - name: __cf_bm
      confidence: 95
  headers:
    - name: server
      value: cloudflare
  scripts:
    - content: { pattern: "cf-chl-opt", type: literal }
"##
    }

    #[test]
    fn document_compiles_into_clauses() {
        let doc: RuleDocument = serde_yaml::from_str(cloudflare_yaml()).unwrap();
        let rule = doc.compile().unwrap();
        assert_eq!(rule.id, "cloudflare");
        assert_eq!(rule.clauses.len(), 3);
        assert_eq!(rule.clauses[0].kind, SignalKind::Cookie);
        assert_eq!(rule.clauses[0].weight, 95);
        // 가중치가 없으면 기본 신뢰도
        assert_eq!(rule.clauses[1].weight, 90);
        assert!(rule.clauses[1].value.is_some());
        assert_eq!(rule.clauses[2].target.kind(), PatternKind::Literal);
    }

    #[test]
    fn missing_confidence_defaults_to_100() {
        let doc = RuleDocument {
            name: "DataDome".to_owned(),
            detection: DetectionBlock {
                cookies: vec![ClauseDocument {
                    name: Some(PatternSpec::Raw("datadome".to_owned())),
                    ..Default::default()
                }],
                ..Default::default()
            },
            ..Default::default()
        };
        let rule = doc.compile().unwrap();
        assert_eq!(rule.id, "datadome");
        assert_eq!(rule.base_confidence, 100);
        assert_eq!(rule.clauses[0].weight, 100);
    }

    #[test]
    fn out_of_range_weight_fails() {
        let yaml = r#"
name: Broken
detection:
  cookies:
    - name: x
      confidence: 0
"#;
        let doc: RuleDocument = serde_yaml::from_str(yaml).unwrap();
        let err = doc.compile().unwrap_err();
        assert!(err.to_string().contains("cookie[0].confidence"));
    }

    #[test]
    fn enabled_rule_without_clauses_fails() {
        let doc = RuleDocument {
            name: "Empty".to_owned(),
            ..Default::default()
        };
        assert!(doc.compile().is_err());
    }

    #[test]
    fn disabled_override_needs_only_id() {
        let doc: RuleDocument = serde_yaml::from_str("id: akamai\nenabled: false").unwrap();
        let rule = doc.compile().unwrap();
        assert!(!rule.enabled);
        assert!(rule.clauses.is_empty());
    }

    #[test]
    fn bad_color_fails() {
        let mut doc: RuleDocument = serde_yaml::from_str(cloudflare_yaml()).unwrap();
        doc.color = Some("orange".to_owned());
        assert!(doc.compile().is_err());
    }

    #[test]
    fn clause_without_target_fails() {
        let yaml = r#"
name: NoTarget
detection:
  headers:
    - value: x
"#;
        let doc: RuleDocument = serde_yaml::from_str(yaml).unwrap();
        assert!(doc.compile().is_err());
    }

    #[test]
    fn invalid_regex_is_not_a_load_error() {
        let yaml = r#"
name: PerimeterX
detection:
  scripts:
    - pattern: { pattern: "px(", type: regex }
"#;
        let doc: RuleDocument = serde_yaml::from_str(yaml).unwrap();
        let rule = doc.compile().unwrap();
        assert!(rule.clauses[0].target.is_degraded());
    }

    #[test]
    fn typed_regex_without_flags_is_case_insensitive() {
        let spec = PatternSpec::Typed {
            pattern: "^_px".to_owned(),
            kind: PatternKind::Regex,
            flags: None,
        };
        assert!(spec.compile().matches("_PX3"));

        let explicit = PatternSpec::Typed {
            pattern: "^_px".to_owned(),
            kind: PatternKind::Regex,
            flags: Some(String::new()),
        };
        assert!(!explicit.compile().matches("_PX3"));
    }

    #[test]
    fn script_clause_matches_src_or_content() {
        let clause = Clause {
            kind: SignalKind::Script,
            target: Pattern::classify("hcaptcha"),
            value: None,
            weight: 80,
        };
        assert!(clause.test(&Signal::script("https://js.hcaptcha.com/1/api.js", "")));
        assert!(clause.test(&Signal::script("", "window.hcaptcha.render()")));
        assert!(!clause.test(&Signal::script("https://a.test/app.js", "render()")));
        assert!(!clause.test(&Signal::dom("hcaptcha", "")));
    }

    #[test]
    fn header_clause_checks_value_when_present() {
        let clause = Clause {
            kind: SignalKind::Header,
            target: Pattern::classify("server"),
            value: Some(Pattern::classify("cloudflare")),
            weight: 70,
        };
        assert!(clause.test(&Signal::header("Server", "cloudflare")));
        assert!(!clause.test(&Signal::header("Server", "nginx")));
    }

    #[test]
    fn derive_id_slugifies() {
        assert_eq!(derive_id("Akamai Bot Manager"), "akamai-bot-manager");
        assert_eq!(derive_id("  reCAPTCHA (v3) "), "recaptcha-v3");
        assert_eq!(derive_id("!!!"), "");
    }

    #[test]
    fn document_yaml_roundtrip_keeps_pattern_forms() {
        let doc: RuleDocument = serde_yaml::from_str(cloudflare_yaml()).unwrap();
        let yaml = serde_yaml::to_string(&doc).unwrap();
        let back: RuleDocument = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, doc);
    }
}
