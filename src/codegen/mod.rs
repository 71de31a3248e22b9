//! Code generation: frame/branch planning feed [`lower::Lowerer`], which
//! emits raw x86-64 bytes into an [`memory::ExecutableMemory`] page.
//!
//! Grounded on `raya-engine/src/jit/backend/mod.rs`'s top-level
//! `compile_function` (plan, lower, finalize, wrap in a `CompiledCode`) for
//! the overall shape of this module; the encoder/executable-memory pieces
//! are grounded per-file in `DESIGN.md`.

pub mod assembler;
pub mod buffer;
pub mod call_abi;
pub mod lower;
pub mod memory;
pub mod regs;

use crate::error::JitError;
use crate::ir::RectifiedFunction;
use crate::plan::{plan_branches, plan_frame};

pub use lower::CalleeResolver;
pub use memory::ExecutableMemory;

/// One function's finished machine code: an executable page plus the
/// entry-point address emitted code elsewhere can call through.
pub struct CompiledCode {
    memory: ExecutableMemory,
}

impl CompiledCode {
    /// The function's entry point. Callers cast this to the appropriate
    /// `extern "C" fn(*mut VirtualStack)` signature before invoking it —
    /// see [`crate::runtime::trampoline`].
    pub fn entry_point(&self) -> *const u8 {
        self.memory.as_ptr()
    }
}

// Safety: same argument as `ExecutableMemory` — the region is read+execute
// only once construction finishes, and `CompiledCode` exposes no interior
// mutability, so sharing a compiled function across the threads that call
// into it is sound.
unsafe impl Send for CompiledCode {}
unsafe impl Sync for CompiledCode {}

/// A bare entry-point pointer, carried across the channel/queue boundary
/// the [`crate::agent`] policies use to hand a finished compile back to
/// its caller. Sound for the same reason `CompiledCode` is `Send`: the
/// pointee is read+execute-only, process-lifetime, and never mutated
/// through this pointer.
#[derive(Debug, Clone, Copy)]
pub struct EntryPoint(pub *const u8);
unsafe impl Send for EntryPoint {}

/// Plans and lowers one rectified function into a page of executable
/// machine code. `resolver` supplies the trampoline handle and dispatcher
/// address for every callee the function invokes.
pub fn compile_function(func: &RectifiedFunction, resolver: &dyn CalleeResolver) -> Result<CompiledCode, JitError> {
    let frame = plan_frame(func);
    let branches = plan_branches(func);
    let code = lower::Lowerer::new(func, &frame, &branches, resolver).lower()?;

    let mut memory = ExecutableMemory::new(code.len())?;
    memory.write(0, &code);
    memory.make_executable()?;
    Ok(CompiledCode { memory })
}
