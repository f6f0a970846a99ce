//! 벤더 규칙 -- 문서 로딩, 패턴 컴파일, 계층 해석, 캐싱
//!
//! # 아키텍처
//! - [`types`]: 규칙 문서와 평가용 규칙 구조
//! - [`matcher`]: literal / wildcard / regex 패턴 매칭
//! - [`loader`]: YAML/JSON 파일 로딩 및 유효성 검증
//! - [`resolve`]: 기본 + 오버라이드 + 사용자 정의 계층 해석
//! - [`store`]: 규칙 소스, TTL 캐시, 영속 규칙 캐시

pub mod loader;
pub mod matcher;
pub mod resolve;
pub mod store;
pub mod types;

pub use loader::{ParsedDocuments, RuleLoader};
pub use matcher::{Pattern, PatternKind, PatternMatcher};
pub use resolve::resolve;
pub use store::{FileRuleSource, MemoryRuleSource, RULE_CACHE_KEY, RuleCacheBlob, RuleSource, RuleStore};
pub use types::{
    Clause, ClauseDocument, DetectionBlock, DetectorRule, PatternSpec, ResolvedRuleSet,
    RuleCatalog, RuleDefinition, RuleDocument,
};
