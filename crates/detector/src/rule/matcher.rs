//! 패턴 매칭 -- literal / wildcard / regex 패턴의 컴파일과 평가
//!
//! [`Pattern`]은 규칙 로딩 시 한 번 분류되고 컴파일됩니다.
//! 매칭 시점에는 문자열을 다시 해석하지 않습니다.
//!
//! # 패턴 종류
//! - `regex`: `/…/flags` 형식이거나 명시적으로 regex 타입인 패턴.
//!   `i m s x` 플래그를 반영하고 `g y u d v`는 무시합니다.
//! - `wildcard`: `*`를 포함하는 패턴. 전체 문자열 일치, 대소문자 무시.
//! - `literal`: 그 외. 대소문자 무시 부분 문자열 포함.
//!
//! 잘못된 정규식은 에러가 아니라 대소문자 무시 부분 문자열 매칭으로 격하됩니다.

use std::fmt;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

/// 정규식 컴파일 크기 제한 (바이트)
const REGEX_SIZE_LIMIT: usize = 2 * 1024 * 1024;

/// `/…/flags` 형식에서 허용되는 플래그 문자
const REGEX_LITERAL_FLAGS: &str = "dgimsuvy";

/// 패턴 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternKind {
    /// 부분 문자열 포함
    Literal,
    /// `*` 글롭
    Wildcard,
    /// 정규식
    Regex,
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal => write!(f, "literal"),
            Self::Wildcard => write!(f, "wildcard"),
            Self::Regex => write!(f, "regex"),
        }
    }
}

/// 직렬화 형태 `{ type, pattern, flags }`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PatternRepr {
    #[serde(rename = "type")]
    kind: PatternKind,
    pattern: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    flags: String,
}

/// 컴파일된 매칭 방식
#[derive(Debug, Clone)]
enum Compiled {
    /// 소문자로 정규화된 부분 문자열
    Contains(String),
    /// 컴파일된 정규식
    Regex(Regex),
}

/// 분류와 컴파일이 끝난 패턴
///
/// 같은 (kind, source, flags)로 만든 패턴은 동등합니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "PatternRepr", into = "PatternRepr")]
pub struct Pattern {
    kind: PatternKind,
    source: String,
    flags: String,
    compiled: Compiled,
    degraded: bool,
}

impl Pattern {
    /// 종류를 명시하여 패턴을 컴파일합니다. 실패하지 않습니다.
    pub fn compile(kind: PatternKind, source: impl Into<String>, flags: impl Into<String>) -> Self {
        let source = source.into();
        let flags = flags.into();
        let (compiled, degraded) = match kind {
            PatternKind::Literal => (Compiled::Contains(source.to_lowercase()), false),
            PatternKind::Wildcard => match build_wildcard(&source) {
                Ok(re) => (Compiled::Regex(re), false),
                Err(_) => (Compiled::Contains(source.replace('*', "").to_lowercase()), true),
            },
            PatternKind::Regex => match build_regex(&source, &flags) {
                Ok(re) => (Compiled::Regex(re), false),
                Err(_) => (Compiled::Contains(source.to_lowercase()), true),
            },
        };
        Self {
            kind,
            source,
            flags,
            compiled,
            degraded,
        }
    }

    /// 원시 문자열을 분류하여 패턴을 컴파일합니다.
    ///
    /// `/…/flags` → regex, `*` 포함 → wildcard, 그 외 → literal
    pub fn classify(raw: &str) -> Self {
        if let Some((body, flags)) = split_regex_literal(raw) {
            return Self::compile(PatternKind::Regex, body, flags);
        }
        if raw.contains('*') {
            return Self::compile(PatternKind::Wildcard, raw, "");
        }
        Self::compile(PatternKind::Literal, raw, "")
    }

    /// 값이 패턴과 일치하는지 확인합니다.
    pub fn matches(&self, value: &str) -> bool {
        match &self.compiled {
            Compiled::Contains(needle) => value.to_lowercase().contains(needle.as_str()),
            Compiled::Regex(re) => re.is_match(value),
        }
    }

    /// 패턴 종류
    pub fn kind(&self) -> PatternKind {
        self.kind
    }

    /// 원본 패턴 문자열
    pub fn source(&self) -> &str {
        &self.source
    }

    /// 정규식 플래그
    pub fn flags(&self) -> &str {
        &self.flags
    }

    /// 정규식 컴파일 실패로 부분 문자열 매칭으로 격하되었는지
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.source == other.source && self.flags == other.flags
    }
}

impl Eq for Pattern {}

impl From<PatternRepr> for Pattern {
    fn from(repr: PatternRepr) -> Self {
        Self::compile(repr.kind, repr.pattern, repr.flags)
    }
}

impl From<Pattern> for PatternRepr {
    fn from(pattern: Pattern) -> Self {
        Self {
            kind: pattern.kind,
            pattern: pattern.source,
            flags: pattern.flags,
        }
    }
}

/// 패턴 매처
///
/// 규칙 평가에서 쓰는 매칭 진입점입니다. 입력이 무엇이든 패닉하지 않습니다.
pub struct PatternMatcher;

impl PatternMatcher {
    /// 컴파일된 패턴으로 매칭합니다.
    pub fn matches(value: &str, pattern: &Pattern) -> bool {
        pattern.matches(value)
    }

    /// 원시 패턴 문자열을 분류한 뒤 매칭합니다.
    ///
    /// 반복 호출 시 매번 컴파일하므로 규칙 평가 경로에서는 쓰지 않습니다.
    pub fn matches_str(value: &str, raw: &str) -> bool {
        Pattern::classify(raw).matches(value)
    }
}

/// `/body/flags` 형식이면 (body, flags)를 반환합니다.
fn split_regex_literal(raw: &str) -> Option<(&str, &str)> {
    let rest = raw.strip_prefix('/')?;
    let end = rest.rfind('/')?;
    let (body, flags) = (&rest[..end], &rest[end + 1..]);
    if body.is_empty() || !flags.chars().all(|c| REGEX_LITERAL_FLAGS.contains(c)) {
        return None;
    }
    Some((body, flags))
}

fn build_regex(source: &str, flags: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(source)
        .case_insensitive(flags.contains('i'))
        .multi_line(flags.contains('m'))
        .dot_matches_new_line(flags.contains('s'))
        .ignore_whitespace(flags.contains('x'))
        .size_limit(REGEX_SIZE_LIMIT)
        .build()
}

fn build_wildcard(source: &str) -> Result<Regex, regex::Error> {
    let body = source
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    RegexBuilder::new(&format!("^{body}$"))
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .size_limit(REGEX_SIZE_LIMIT)
        .build()
}
