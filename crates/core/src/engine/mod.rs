//! Generic work-item processing engine.
//!
//! Handlers are registered up front through [`HandlerRegistryBuilder`]; the
//! [`ProcessingEngine`] then runs bounded fetch-then-process cycles over them,
//! either on demand or from its own hosting loop.

mod config;
mod queue;
mod registry;
mod runner;
mod traits;
mod types;

pub use config::{EngineConfig, HandlerLimits};
pub use queue::Envelope;
pub use registry::{HandlerRegistry, HandlerRegistryBuilder};
pub use runner::ProcessingEngine;
pub use traits::{HandlerError, Purpose, WorkHandler, WorkItem};
pub use types::{CycleReport, EngineError, EngineStatus, HandlerInfo, Truncation};
