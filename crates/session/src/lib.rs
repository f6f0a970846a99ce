//! Vendorscope 세션 -- 탭 세션 코디네이터와 캡처 모드 상태 머신
//!
//! 브라우저 탭마다 하나의 탐지 세션을 유지하고, 여러 신호 소스의 결과를
//! 병합하여 영속화합니다. 탭마다 CAPTCHA 파라미터를 수집하는
//! 시간 제한 캡처 서브 세션을 실행합니다.
//!
//! # 모듈
//! - [`coordinator`]: 호스트 메시지를 세션 변경으로 바꾸는 코디네이터
//! - [`registry`]: 탭 세션 소유 맵
//! - [`capture`]: 캡처 모드 상태 머신
//! - [`scheduler`]: 키 기반 취소 가능 지연 전달
//! - [`storage`], [`history`]: 스냅샷/캡처 이력 영속화

pub mod capture;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod history;
pub mod merge;
pub mod registry;
pub mod scheduler;
pub mod storage;

pub use capture::{
    ArmTicket, CaptureMachine, CaptureSession, CaptureState, CaptureStatus,
    CapturedParameterSet, FinishedCapture,
};
pub use config::SessionSettings;
pub use coordinator::{MergedLookup, SessionTimer, TabSessionCoordinator, domain_of};
pub use error::{CaptureError, SessionError};
pub use history::{CaptureHistory, CaptureHistoryEntry};
pub use registry::{SessionPhase, SessionRegistry, TabSession};
pub use scheduler::Scheduler;
pub use storage::{SessionSnapshot, SnapshotStore};
