//! A just-in-time compiler from a typed, scoped intermediate representation
//! to native x86-64 machine code.
//!
//! Build a function with [`ir::FunctionBuilder`], rectify it into an
//! [`ir::RectifiedFunction`], hand it to an [`Orchestrator`] for one of
//! three concurrency policies, and call the returned [`Instance`].

pub mod agent;
pub mod codegen;
pub mod error;
pub mod ir;
pub mod orchestrator;
pub mod plan;
pub mod runtime;
pub mod types;

pub use error::JitError;
pub use orchestrator::{Callable, Instance, Orchestrator, OrchestratorConfig, Pod};
