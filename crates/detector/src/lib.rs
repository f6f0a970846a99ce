//! Vendorscope 탐지기 -- 벤더 규칙 저장소와 탐지 엔진
//!
//! # 모듈 구성
//!
//! - [`rule`]: 규칙 문서 로딩, 패턴 매칭, 계층 해석, 규칙 캐시
//! - [`engine`]: 규칙 평가와 신뢰도 집계
//! - [`conflict`]: 같은 표시 이름 결과의 충돌 해소
//! - [`config`]: 탐지기 설정 (core 설정 확장)
//! - [`error`]: 도메인 에러 타입
//!
//! # 아키텍처
//!
//! ```text
//! RuleSource -> RuleLoader -> resolve -> RuleStore (Arc 캐시)
//!                                            |
//!                     SignalBundle -> DetectionEngine -> ConflictResolver -> DetectionResult[]
//! ```

pub mod config;
pub mod conflict;
pub mod engine;
pub mod error;
pub mod rule;

// --- 주요 타입 re-export ---

// 엔진
pub use engine::{DetectionEngine, evaluate};

// 충돌 해소
pub use conflict::{ConflictResolver, resolve_conflicts};

// 설정
pub use config::{ColorPalette, DetectorConfig};

// 에러
pub use error::DetectorError;

// 규칙
pub use rule::{
    DetectorRule, FileRuleSource, MemoryRuleSource, Pattern, PatternMatcher, ResolvedRuleSet,
    RuleDocument, RuleLoader, RuleSource, RuleStore,
};
