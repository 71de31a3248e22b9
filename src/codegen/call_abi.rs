//! The nested-invocation ABI (spec §4.7): how one compiled function calls
//! another over the virtual stack, and how a native (non-JIT) function is
//! wrapped so it can be called the same way.
//!
//! Grounded on `examples/original_source/src/microjit/jit.h`'s call-site
//! emission (cache the caller's virtual base pointer, grow the callee's
//! frame, marshal arguments, dispatch through the trampoline, collapse the
//! frame, sweep destructors) and on
//! `examples/original_source/src/microjit/trampoline.h`'s
//! `NativeFunctionTrampoline` for the native-marshaling stub — reimagined
//! here as a small piece of *generated* machine code rather than a C++
//! variadic template, since Rust has no per-signature template generation
//! to reach for.

use crate::codegen::assembler::{self, FpWidth};
use crate::codegen::buffer::CodeBuffer;
use crate::codegen::memory::ExecutableMemory;
use crate::codegen::regs::{self, Reg, VRBP_CACHE_SLOT, VSTACK_HANDLE_SLOT};
use crate::error::JitError;
use crate::runtime::vstack::{vstack_create_stack_frame, vstack_get_rbp, vstack_leave_stack_frame};
use crate::types::TypeDescriptor;

/// Where one call argument's (or the call's own current-value, for a
/// destructor sweep) bytes live in the *caller's* frame: `[base + disp]`.
/// `base` is `Reg::Rbp` for a local variable or the register the lowerer
/// has just loaded the caller's own cached virtual base pointer into, for
/// an argument forwarded unchanged.
#[derive(Debug, Clone, Copy)]
pub struct ArgOperand {
    pub ty: TypeDescriptor,
    pub base: Reg,
    pub disp: i32,
}

/// Everything the lowerer has already resolved about one call site.
pub struct InvokePlan {
    pub args: Vec<ArgOperand>,
    pub return_ty: TypeDescriptor,
    /// `[Rbp + disp]` of the destination variable, if the call's result is
    /// kept; `None` if the callee's return value is discarded.
    pub ret_dest: Option<i32>,
    /// The trampoline's address, embedded as an immediate — this crate
    /// never resolves call targets at emission time through anything but a
    /// fixed pointer value (spec §4.7 step 5).
    pub trampoline_handle: usize,
    /// `jit_trampoline_call_final` or `native_trampoline_call`'s address.
    pub dispatcher: usize,
}

/// Emits the full call sequence for one `InvokeJit`/`InvokeNative`
/// instruction (spec §4.7 steps 1-8). `buf` already holds the caller's
/// function body up to this instruction.
pub fn emit_invoke(buf: &mut CodeBuffer, plan: &InvokePlan) {
    let return_size = plan.return_ty.size;
    let args_size: usize = plan.args.iter().map(|a| a.ty.size).sum();
    let frame_size = return_size + args_size;

    // Step 1: cache the caller's vrbp. It was loaded into the native
    // frame's cache slot at prologue time and never mutated since, so a
    // plain reload is always correct regardless of how many nested calls
    // preceded this one.
    assembler::load_int_zx(buf, 8, regs::CALLER_VRBP, Reg::Rbp, VRBP_CACHE_SLOT);

    // Step 2: grow the callee's frame on the virtual stack.
    load_vstack_ptr(buf, regs::CTOR_ARG0);
    assembler::mov_ri64(buf, regs::CTOR_ARG1, frame_size as i64);
    call_fixed(buf, vstack_create_stack_frame as usize);
    load_vstack_ptr(buf, regs::CTOR_ARG0);
    call_fixed(buf, vstack_get_rbp as usize);
    assembler::mov_rr(buf, regs::CALLEE_VRBP, Reg::Rax);

    // Step 3: copy each argument into the callee frame. Layout mirrors
    // `plan_argument_offsets` exactly: the return slot sits immediately
    // below the callee's vrbp, then arguments in declaration order, each
    // one farther below than the last.
    let mut cursor = return_size as i64;
    for arg in &plan.args {
        cursor += arg.ty.size as i64;
        let dest_disp = -(cursor as i32);
        copy_into_callee_slot(buf, arg.ty, arg.base, arg.disp, dest_disp);
    }

    // Step 4: the return slot was already reserved as part of `frame_size`;
    // nothing to copy here, the callee writes into it before returning.
    let return_slot_disp = -(return_size as i32);

    // Stash `r10` (the callee vrbp) across the call on the *native* stack:
    // the callee is free to clobber r10/r11 for its own nested calls, but
    // a plain push/pop nests correctly around `call`'s own return-address
    // push/pop.
    assembler::push_reg(buf, regs::CALLEE_VRBP);

    // Step 5: dispatch through the trampoline.
    assembler::mov_ri64(buf, Reg::Rdi, plan.trampoline_handle as i64);
    load_vstack_ptr(buf, Reg::Rsi);
    call_fixed(buf, plan.dispatcher);

    assembler::pop_reg(buf, regs::CALLEE_VRBP);

    // Step 6: collapse the callee's frame.
    load_vstack_ptr(buf, regs::CTOR_ARG0);
    call_fixed(buf, vstack_leave_stack_frame as usize);

    // Step 7: destructor sweep over non-primitive arguments, reverse
    // order, using the same callee-relative offsets computed in step 3 —
    // the bytes are still sitting in the (now logically collapsed, but not
    // yet overwritten) virtual stack region.
    let mut cursor = return_size as i64;
    let mut sweep = Vec::with_capacity(plan.args.len());
    for arg in &plan.args {
        cursor += arg.ty.size as i64;
        sweep.push((arg.ty, -(cursor as i32)));
    }
    for (ty, disp) in sweep.into_iter().rev() {
        if ty.is_primitive {
            continue;
        }
        // `r10` holds the (popped, now stale relative to the collapsed
        // frame) callee vrbp; it is still a valid pointer into the virtual
        // stack's backing allocation, which is exactly what the sweep
        // needs.
        assembler::lea(buf, regs::CTOR_ARG0, regs::CALLEE_VRBP, disp);
        call_dtor(buf, ty);
    }

    // Step 8: retrieve the return value, if kept.
    if let Some(dest_disp) = plan.ret_dest {
        if plan.return_ty.is_primitive {
            if plan.return_ty.is_floating_point() {
                let width = fp_width(plan.return_ty.size);
                assembler::movs_load(buf, width, regs::xmm::LEFT, regs::CALLEE_VRBP, return_slot_disp);
                assembler::movs_store(buf, width, Reg::Rbp, dest_disp, regs::xmm::LEFT);
            } else {
                assembler::load_int_zx(buf, plan.return_ty.size as u8, regs::SCRATCH_A, regs::CALLEE_VRBP, return_slot_disp);
                assembler::store_int(buf, plan.return_ty.size as u8, Reg::Rbp, dest_disp, regs::SCRATCH_A);
            }
        } else {
            assembler::lea(buf, regs::CTOR_ARG0, Reg::Rbp, dest_disp);
            assembler::lea(buf, regs::CTOR_ARG1, regs::CALLEE_VRBP, return_slot_disp);
            call_copy_ctor(buf, plan.return_ty);
            // The callee's copy left behind a live object in the collapsed
            // region; it must still be destructed once the copy out is
            // done, same as any other swept slot.
            assembler::lea(buf, regs::CTOR_ARG0, regs::CALLEE_VRBP, return_slot_disp);
            call_dtor(buf, plan.return_ty);
        }
    } else if !plan.return_ty.is_primitive && !plan.return_ty.is_void() {
        assembler::lea(buf, regs::CTOR_ARG0, regs::CALLEE_VRBP, return_slot_disp);
        call_dtor(buf, plan.return_ty);
    }
}

fn fp_width(size: usize) -> FpWidth {
    if size == 4 {
        FpWidth::F32
    } else {
        FpWidth::F64
    }
}

fn load_vstack_ptr(buf: &mut CodeBuffer, dst: Reg) {
    assembler::load_int_zx(buf, 8, dst, Reg::Rbp, VSTACK_HANDLE_SLOT);
}

fn call_fixed(buf: &mut CodeBuffer, addr: usize) {
    assembler::mov_ri64(buf, regs::SCRATCH_C, addr as i64);
    assembler::call_reg(buf, regs::SCRATCH_C);
}

fn call_copy_ctor(buf: &mut CodeBuffer, ty: TypeDescriptor) {
    assembler::mov_ri64(buf, regs::SCRATCH_C, ty.copy_ctor as usize as i64);
    assembler::call_reg(buf, regs::SCRATCH_C);
}

fn call_dtor(buf: &mut CodeBuffer, ty: TypeDescriptor) {
    assembler::mov_ri64(buf, regs::SCRATCH_C, ty.dtor as usize as i64);
    assembler::call_reg(buf, regs::SCRATCH_C);
}

/// Copies one argument's value from `[src_base + src_disp]` (in the
/// caller's frame) to `[CALLEE_VRBP + dest_disp]` (in the callee's,
/// already-grown, frame) — width-keyed move for primitives, a copy
/// constructor call for composites.
fn copy_into_callee_slot(buf: &mut CodeBuffer, ty: TypeDescriptor, src_base: Reg, src_disp: i32, dest_disp: i32) {
    if ty.is_primitive {
        if ty.is_floating_point() {
            let width = fp_width(ty.size);
            assembler::movs_load(buf, width, regs::xmm::LEFT, src_base, src_disp);
            assembler::movs_store(buf, width, regs::CALLEE_VRBP, dest_disp, regs::xmm::LEFT);
        } else {
            assembler::load_int_zx(buf, ty.size as u8, regs::SCRATCH_A, src_base, src_disp);
            assembler::store_int(buf, ty.size as u8, regs::CALLEE_VRBP, dest_disp, regs::SCRATCH_A);
        }
    } else {
        assembler::lea(buf, regs::CTOR_ARG0, regs::CALLEE_VRBP, dest_disp);
        assembler::lea(buf, regs::CTOR_ARG1, src_base, src_disp);
        call_copy_ctor(buf, ty);
    }
}

/// Generates the tiny marshaling stub a [`crate::runtime::trampoline::NativeTrampoline`]
/// uses as its entry point: unpack each parameter from the virtual stack
/// (which the call site above already populated exactly like a JIT callee's
/// frame) into the host System V integer/SSE argument registers, call
/// `native_fn` directly, then write its return value back into the
/// reserved return slot.
///
/// Only the common case — up to 6 integer/pointer-class and 8 SSE
/// arguments, no struct-by-value parameters — is supported; anything wider
/// is a target the orchestrator should reject at registration time rather
/// than one this stub can marshal.
pub fn compile_native_trampoline(
    param_tys: &[TypeDescriptor],
    return_ty: TypeDescriptor,
    native_fn: *const (),
) -> Result<ExecutableMemory, JitError> {
    let int_regs = [Reg::Rdi, Reg::Rsi, Reg::Rdx, Reg::Rcx, Reg::R8, Reg::R9];
    let mut int_used = 0usize;
    let mut xmm_used = 0u8;

    let mut buf = CodeBuffer::new();
    assembler::push_reg(&mut buf, Reg::Rbp);
    assembler::mov_rr(&mut buf, Reg::Rbp, Reg::Rsp);
    // `rdi` on entry is the vstack pointer (the stub is itself reached via
    // `native_trampoline_call`, which forwards its own `rsi` unchanged —
    // see spec §4.7's "native-function path").
    assembler::push_reg(&mut buf, Reg::Rdi);

    // Read the callee's vrbp once; arguments were written at fixed
    // negative offsets from it by `copy_into_callee_slot` above, in the
    // same order the call site emitted them.
    call_fixed(&mut buf, vstack_get_rbp as usize);
    assembler::mov_rr(&mut buf, regs::SCRATCH_A, Reg::Rax);

    // Mirrors `emit_invoke`'s argument layout exactly: the return slot sits
    // closest to the callee's vrbp, arguments progressively farther.
    let mut cursor = return_ty.size as i64;
    for ty in param_tys {
        cursor += ty.size as i64;
        let disp = -(cursor as i32);
        if ty.is_floating_point() {
            if (xmm_used as usize) >= 8 {
                return Err(JitError::UnsupportedTarget("native trampoline: too many floating-point arguments".into()));
            }
            assembler::movs_load(&mut buf, fp_width(ty.size), xmm_used, regs::SCRATCH_A, disp);
            xmm_used += 1;
        } else {
            if int_used >= int_regs.len() {
                return Err(JitError::UnsupportedTarget("native trampoline: too many integer arguments".into()));
            }
            assembler::load_int_zx(&mut buf, ty.size as u8, int_regs[int_used], regs::SCRATCH_A, disp);
            int_used += 1;
        }
    }

    assembler::mov_ri64(&mut buf, regs::SCRATCH_C, native_fn as usize as i64);
    assembler::call_reg(&mut buf, regs::SCRATCH_C);

    if !return_ty.is_void() {
        // `rdi` no longer holds the vstack pointer here: the argument-loading
        // loop above may have overwritten it with the first integer-class
        // parameter, and `native_fn` is free to clobber it regardless (it's
        // caller-saved under the host ABI). Reload it from the slot pushed
        // at entry before asking for the vrbp again.
        assembler::load_int_zx(&mut buf, 8, Reg::Rdi, Reg::Rbp, -8);
        call_fixed(&mut buf, vstack_get_rbp as usize);
        assembler::mov_rr(&mut buf, regs::SCRATCH_A, Reg::Rax);
        let ret_disp = -(return_ty.size as i32);
        let _ = cursor;
        if return_ty.is_floating_point() {
            assembler::movs_store(&mut buf, fp_width(return_ty.size), regs::SCRATCH_A, ret_disp, regs::xmm::LEFT);
        } else {
            assembler::store_int(&mut buf, return_ty.size as u8, regs::SCRATCH_A, ret_disp, Reg::Rax);
        }
    }

    assembler::pop_reg(&mut buf, Reg::Rdi);
    assembler::leave(&mut buf);
    assembler::ret(&mut buf);

    let bytes = buf.into_bytes();
    let mut mem = ExecutableMemory::new(bytes.len())?;
    mem.write(0, &bytes);
    mem.make_executable()?;
    Ok(mem)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_trampoline_for_int_identity_compiles() {
        unsafe extern "C" fn identity(x: i64) -> i64 {
            x
        }
        let mem = compile_native_trampoline(&[TypeDescriptor::i64()], TypeDescriptor::i64(), identity as *const ())
            .unwrap();
        assert!(!mem.as_ptr().is_null());
    }

    #[test]
    fn too_many_float_args_is_rejected() {
        let floats = vec![TypeDescriptor::f64(); 9];
        unsafe extern "C" fn noop() {}
        let result = compile_native_trampoline(&floats, TypeDescriptor::void(), noop as *const ());
        assert!(result.is_err());
    }
}
