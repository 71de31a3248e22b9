//! Compilation agents: the concurrency policy wrapped around a
//! [`crate::runtime::code_cache::CodeCache`] (spec §4.9, §5).
//!
//! Grounded on `original_source/src/microjit/compilation_agent.h`'s
//! `CompilationHandler` interface and its three implementations
//! (`SingleUnsafeCompilationHandler`, `CommandQueueCompilationHandler`,
//! `ThreadPoolCompilationHandler`) — the cache itself already serializes
//! publication under a lock (see `DESIGN.md`'s "Open Question decisions"),
//! so what differs between the three Rust agents below is only *where*
//! the actual compilation work runs: the caller's own thread, one
//! dedicated worker thread, or a sized pool.

pub mod pooled;
pub mod priority_queue;
pub mod serialized;
pub mod single;

use std::sync::Arc;

use crate::error::JitError;
use crate::ir::{FunctionId, RectifiedFunction};

pub use pooled::PooledAgent;
pub use priority_queue::Priority;
pub use serialized::SerializedAgent;
pub use single::SingleAgent;

/// Common surface every concurrency policy exposes to
/// [`crate::orchestrator::Orchestrator`]. Mirrors the original's
/// `CompilationHandler` virtual interface one-for-one.
pub trait CompilationAgent: Send + Sync {
    fn is_compiled(&self, func: &Arc<RectifiedFunction>) -> bool;
    fn get_or_create(&self, func: &Arc<RectifiedFunction>) -> Result<*const u8, JitError>;
    fn recompile(&self, func: &Arc<RectifiedFunction>) -> Result<*const u8, JitError>;
    fn remove_function(&self, id: FunctionId) -> bool;
}
