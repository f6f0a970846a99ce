//! 도메인 타입 -- 시스템 전역에서 사용되는 공통 타입
//!
//! 신호(Signal), 매칭 증거(Match), 탐지 결과(DetectionResult) 등
//! 탐지 엔진과 세션 코디네이터가 공유하는 데이터 구조를 정의합니다.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// 브라우저 탭 식별자
pub type TabId = u64;

/// 매칭 증거 값의 최대 길이 (문자 수)
pub const MAX_MATCHED_VALUE_CHARS: usize = 256;

/// 신뢰도 상한
pub const MAX_CONFIDENCE: u8 = 100;

/// 신호 종류
///
/// 규칙 절(clause)의 종류와 1:1로 대응합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    /// 쿠키 (name=value)
    Cookie,
    /// HTTP 응답 헤더
    Header,
    /// 페이지 또는 하위 리소스 URL
    Url,
    /// 인라인/외부 스크립트
    Script,
    /// DOM 요소
    Dom,
}

impl SignalKind {
    /// 모든 신호 종류 (평가 순서)
    pub const ALL: [SignalKind; 5] = [
        SignalKind::Cookie,
        SignalKind::Header,
        SignalKind::Url,
        SignalKind::Script,
        SignalKind::Dom,
    ];

    /// 메트릭/로그용 고정 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cookie => "cookie",
            Self::Header => "header",
            Self::Url => "url",
            Self::Script => "script",
            Self::Dom => "dom",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 관측된 페이지 사실
///
/// 외부 수집기가 공급하며 코어는 신호를 만들지 않습니다.
///
/// | kind | name | value |
/// |------|------|-------|
/// | cookie | 쿠키 이름 | 쿠키 값 |
/// | header | 헤더 이름 | 헤더 값 |
/// | url | URL | (비어 있음) |
/// | script | `src` (인라인이면 비어 있음) | 스크립트 내용 |
/// | dom | 존재가 확인된 셀렉터 | 요소 발췌 |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    /// 신호 종류
    pub kind: SignalKind,
    /// 이름 또는 셀렉터
    #[serde(default)]
    pub name: String,
    /// 값
    #[serde(default)]
    pub value: String,
}

impl Signal {
    /// 새 신호를 생성합니다.
    pub fn new(kind: SignalKind, name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            value: value.into(),
        }
    }

    /// 쿠키 신호를 생성합니다.
    pub fn cookie(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(SignalKind::Cookie, name, value)
    }

    /// 헤더 신호를 생성합니다.
    pub fn header(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(SignalKind::Header, name, value)
    }

    /// URL 신호를 생성합니다.
    pub fn url(url: impl Into<String>) -> Self {
        Self::new(SignalKind::Url, url, "")
    }

    /// 스크립트 신호를 생성합니다.
    pub fn script(src: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(SignalKind::Script, src, content)
    }

    /// DOM 신호를 생성합니다.
    pub fn dom(selector: impl Into<String>, excerpt: impl Into<String>) -> Self {
        Self::new(SignalKind::Dom, selector, excerpt)
    }
}

/// 한 번의 분석에 사용되는 신호 묶음
///
/// `unavailable`에 포함된 종류는 수집기가 가져오지 못한 것으로,
/// 해당 종류는 빈 목록으로 취급됩니다.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalBundle {
    /// 관측된 신호 목록
    #[serde(default)]
    pub signals: Vec<Signal>,
    /// 수집 실패한 신호 종류
    #[serde(default)]
    pub unavailable: Vec<SignalKind>,
}

impl SignalBundle {
    /// 신호 목록으로 묶음을 생성합니다.
    pub fn new(signals: Vec<Signal>) -> Self {
        Self {
            signals,
            unavailable: Vec::new(),
        }
    }

    /// 특정 종류의 신호만 순회합니다.
    ///
    /// 수집 불가로 표시된 종류는 신호가 있더라도 비어 있는 것으로 봅니다.
    pub fn of_kind(&self, kind: SignalKind) -> impl Iterator<Item = &Signal> {
        let available = !self.unavailable.contains(&kind);
        self.signals
            .iter()
            .filter(move |s| available && s.kind == kind)
    }

    /// 수집 가능한 신호 수를 반환합니다.
    pub fn len(&self) -> usize {
        SignalKind::ALL
            .iter()
            .map(|kind| self.of_kind(*kind).count())
            .sum()
    }

    /// 수집 가능한 신호가 없는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 규칙이 어느 카탈로그 계층에서 왔는지
///
/// 순서(`Ord`)가 곧 메타데이터 우선순위입니다: `Custom > Override > Builtin`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// 벤더 제공 기본 카탈로그
    #[default]
    Builtin,
    /// 사용자 오버라이드
    Override,
    /// 사용자 정의 규칙
    Custom,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Builtin => write!(f, "builtin"),
            Self::Override => write!(f, "override"),
            Self::Custom => write!(f, "custom"),
        }
    }
}

/// 절이 발화했다는 증거
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    /// 발화한 절의 종류
    pub clause_kind: SignalKind,
    /// 매칭된 신호 이름
    pub matched_name: String,
    /// 매칭된 신호 값 (최대 [`MAX_MATCHED_VALUE_CHARS`]자)
    pub matched_value: String,
    /// 절 가중치 (1-100)
    pub confidence: u8,
}

impl Match {
    /// 새 매칭 증거를 생성합니다. 긴 값은 잘라냅니다.
    pub fn new(
        clause_kind: SignalKind,
        matched_name: impl Into<String>,
        matched_value: &str,
        confidence: u8,
    ) -> Self {
        Self {
            clause_kind,
            matched_name: matched_name.into(),
            matched_value: truncate_chars(matched_value, MAX_MATCHED_VALUE_CHARS),
            confidence,
        }
    }

    /// 중복 제거용 키 (종류, 이름, 값)
    pub fn dedup_key(&self) -> (SignalKind, &str, &str) {
        (self.clause_kind, &self.matched_name, &self.matched_value)
    }
}

/// 한 페이지 로드에서 한 벤더에 대한 판정
///
/// 분석 패스마다 새로 생성되며, 같은 패스의 충돌 해소 병합 외에는
/// 변경되지 않습니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    /// 규칙 ID
    pub rule_id: String,
    /// 표시 이름 (벤더명)
    pub display_name: String,
    /// 분류 (Anti-Bot, CAPTCHA, WAF, CDN, Fingerprinting 등)
    pub category: String,
    /// 표시 색상 (`#RRGGBB`)
    pub color: String,
    /// 규칙 출처 계층
    #[serde(default)]
    pub provenance: Provenance,
    /// 집계 신뢰도 (0-100)
    pub confidence: u8,
    /// 매칭 증거
    #[serde(default)]
    pub matches: Vec<Match>,
    /// 고급 결과의 트리거 유형 (예: "click", "challenge")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
    /// 고급 결과가 전달한 파라미터
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
}

impl DetectionResult {
    /// 결과 병합 키 (rule_id, 비어 있으면 display_name)
    pub fn merge_key(&self) -> &str {
        if self.rule_id.is_empty() {
            &self.display_name
        } else {
            &self.rule_id
        }
    }

    /// 결과와 모든 매칭 증거의 신뢰도가 0-100 범위인지 확인합니다.
    pub fn confidence_in_range(&self) -> bool {
        self.confidence <= MAX_CONFIDENCE
            && self.matches.iter().all(|m| m.confidence <= MAX_CONFIDENCE)
    }

    /// 다른 결과의 매칭을 합집합으로 흡수하고 최대 신뢰도를 취합니다.
    ///
    /// 메타데이터는 변경하지 않습니다.
    pub fn absorb_evidence(&mut self, other: &DetectionResult) {
        for m in &other.matches {
            if !self.matches.iter().any(|e| e.dedup_key() == m.dedup_key()) {
                self.matches.push(m.clone());
            }
        }
        self.confidence = self.confidence.max(other.confidence);
    }
}

/// 신뢰도 내림차순, 표시 이름 오름차순으로 정렬합니다.
pub fn sort_results(results: &mut [DetectionResult]) {
    results.sort_by(|a, b| {
        b.confidence
            .cmp(&a.confidence)
            .then_with(|| a.display_name.cmp(&b.display_name))
    });
}

/// 현재 시각 (Unix epoch 밀리초)
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// 문자 경계를 지키며 문자열을 자릅니다.
pub fn truncate_chars(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((idx, _)) => value[..idx].to_owned(),
        None => value.to_owned(),
    }
}
