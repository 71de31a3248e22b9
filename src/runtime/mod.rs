//! Everything emitted code and the orchestrator touch after compilation:
//! the virtual stack, trampolines, and the compilation cache.

pub mod code_cache;
pub mod trampoline;
pub mod vstack;

pub use code_cache::CodeCache;
pub use trampoline::{EntryFn, JitTrampoline, NativeTrampoline, RecompileFn};
pub use vstack::VirtualStack;
