//! Vendorscope daemon library.
//!
//! Exposes the host protocol, the request router and the message loop so
//! integration tests can drive them over in-memory pipes.

pub mod analysis;
pub mod orchestrator;
pub mod protocol;
pub mod router;

pub use orchestrator::{Orchestrator, ServeSummary, serve};
pub use router::{Router, RouterChannels};
