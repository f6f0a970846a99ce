//! Vendorscope 코어 -- 공통 타입, 에러, 설정, 저장소 경계
//!
//! 탐지 엔진(`vendorscope-detector`)과 세션 코디네이터(`vendorscope-session`)가
//! 공유하는 타입과 trait을 정의합니다.

pub mod config;
pub mod error;
pub mod event;
pub mod metrics;
pub mod pipeline;
pub mod store;
pub mod types;

// --- 주요 타입 re-export ---
// 각 모듈의 핵심 타입을 크레이트 루트에서 바로 사용할 수 있도록 합니다.

// 에러
pub use error::{
    ConfigError, CorruptedStateError, DetectionError, SessionError, StorageError,
    VendorscopeError,
};

// 설정
pub use config::VendorscopeConfig;

// 이벤트
pub use event::{CaptureEnd, HostEvent};

// 파이프라인 trait
pub use pipeline::Detector;

// 저장소
pub use store::{FileStateStore, MemoryStateStore, StateStore};

// 도메인 타입
pub use types::{DetectionResult, Match, Provenance, Signal, SignalBundle, SignalKind, TabId};
