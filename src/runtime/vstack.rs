//! The virtual stack: a downward-growing byte buffer, independent of the
//! host thread's call stack, that emitted code uses to pass arguments and
//! receive return values (spec §4.1).
//!
//! Grounded on `examples/original_source/src/microjit/virtual_stack.h`
//! almost directly: same two movable pointers (stack/base, both starting
//! at the high end of the allocation), same `create_stack_frame`/
//! `leave_stack_frame` pair, same C-ABI accessor surface for emitted code
//! to call through raw function pointers.

use std::alloc::{self, Layout};

use crate::error::JitError;

/// `vstack_default_size` / `vstack_buffer_size` defaults from spec §6.
pub const DEFAULT_STACK_SIZE: usize = 8 * 1024 * 1024;
pub const DEFAULT_SAFETY_ZONE: usize = 128;

/// A user-owned byte buffer that emitted code treats as its own call
/// stack. Created per top-level invocation and dropped after the call
/// returns (spec §3, "Lifecycles").
pub struct VirtualStack {
    base_alloc: *mut u8,
    layout: Layout,
    /// Total usable capacity, excluding the trailing safety zone.
    capacity: usize,
    /// Current stack pointer; starts at the high end of the allocation and
    /// moves downward as frames are pushed.
    stack_pointer: *mut u8,
    /// Current base pointer; starts equal to `stack_pointer`.
    base_pointer: *mut u8,
    high_end: *mut u8,
}

impl VirtualStack {
    pub fn new(capacity: usize, safety_zone: usize) -> Result<Self, JitError> {
        let total = capacity
            .checked_add(safety_zone)
            .ok_or_else(|| JitError::Compilation("virtual stack size overflow".into()))?;
        let layout = Layout::from_size_align(total, 16)
            .map_err(|e| JitError::Compilation(format!("invalid virtual stack layout: {e}")))?;
        let base_alloc = unsafe { alloc::alloc(layout) };
        if base_alloc.is_null() {
            return Err(JitError::Compilation("allocation failed for virtual stack".into()));
        }
        let high_end = unsafe { base_alloc.add(total) };
        Ok(VirtualStack {
            base_alloc,
            layout,
            capacity,
            stack_pointer: high_end,
            base_pointer: high_end,
            high_end,
        })
    }

    pub fn allocated(&self) -> usize {
        unsafe { self.high_end.offset_from(self.stack_pointer) as usize }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_stack_overflown(&self) -> bool {
        self.allocated() > self.capacity
    }

    pub fn rsp(&self) -> *mut u8 {
        self.stack_pointer
    }
    pub fn rbp(&self) -> *mut u8 {
        self.base_pointer
    }

    /// Pushes the old base pointer, sets base = stack, then subtracts
    /// `size` from stack.
    ///
    /// # Safety
    /// `size` must leave `stack_pointer` within the allocation; callers in
    /// emitted code are expected to have checked `is_stack_overflown`
    /// beforehand (or to accept the fatal abort on violation).
    pub unsafe fn create_stack_frame(&mut self, size: usize) {
        let new_sp = self.stack_pointer.sub(std::mem::size_of::<*mut u8>());
        (new_sp as *mut *mut u8).write(self.base_pointer);
        self.base_pointer = new_sp;
        self.stack_pointer = new_sp.sub(size);
    }

    /// `stack = base; base = *base; stack += pointer_size`.
    ///
    /// # Safety
    /// Must be paired with a matching `create_stack_frame` call; the
    /// caller must not have corrupted the saved base pointer slot.
    pub unsafe fn leave_stack_frame(&mut self) {
        self.stack_pointer = self.base_pointer;
        let saved = (self.stack_pointer as *const *mut u8).read();
        self.stack_pointer = self.stack_pointer.add(std::mem::size_of::<*mut u8>());
        self.base_pointer = saved;
    }

    /// Writes a diagnostic to stderr and aborts the process. Mirrors the
    /// original's `raise_stack_overflown()` in
    /// `examples/original_source/src/microjit/jit.h`.
    pub fn abort_on_overflow(&self) -> ! {
        eprintln!("vstack-jit: virtual stack overflow ({} / {} bytes allocated)", self.allocated(), self.capacity);
        unsafe { libc::raise(libc::SIGABRT) };
        unreachable!("SIGABRT terminates the process");
    }
}

impl Drop for VirtualStack {
    fn drop(&mut self) {
        unsafe { alloc::dealloc(self.base_alloc, self.layout) };
    }
}

// Safety: ownership of a `VirtualStack` is exclusive to the invoking
// thread for the duration of a call (spec §5, "Shared resources"); it is
// never accessed concurrently, but the orchestrator does move instances
// between threads across separate top-level calls.
unsafe impl Send for VirtualStack {}

// ---- C-ABI surface consumed by emitted code ------------------------------

#[no_mangle]
pub unsafe extern "C" fn vstack_get_rsp(vs: *mut VirtualStack) -> *mut u8 {
    (*vs).rsp()
}

#[no_mangle]
pub unsafe extern "C" fn vstack_get_rbp(vs: *mut VirtualStack) -> *mut u8 {
    (*vs).rbp()
}

#[no_mangle]
pub unsafe extern "C" fn vstack_get_allocated(vs: *mut VirtualStack) -> usize {
    (*vs).allocated()
}

#[no_mangle]
pub unsafe extern "C" fn vstack_get_capacity(vs: *mut VirtualStack) -> usize {
    (*vs).capacity()
}

#[no_mangle]
pub unsafe extern "C" fn vstack_create_stack_frame(vs: *mut VirtualStack, size: usize) {
    (*vs).create_stack_frame(size)
}

#[no_mangle]
pub unsafe extern "C" fn vstack_leave_stack_frame(vs: *mut VirtualStack) {
    (*vs).leave_stack_frame()
}

#[no_mangle]
pub unsafe extern "C" fn vstack_is_stack_overflown(vs: *mut VirtualStack) -> u8 {
    (*vs).is_stack_overflown() as u8
}

/// Never returns. Emitted prologues call this directly when the overflow
/// check trips, the same way `jit.h`'s generated code calls
/// `raise_stack_overflown()`.
#[no_mangle]
pub unsafe extern "C" fn vstack_abort_on_overflow(vs: *mut VirtualStack) -> ! {
    (*vs).abort_on_overflow()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocated_starts_at_zero() {
        let vs = VirtualStack::new(4096, 128).unwrap();
        assert_eq!(vs.allocated(), 0);
        assert_eq!(vs.capacity(), 4096);
    }

    #[test]
    fn create_and_leave_stack_frame_is_conservative() {
        let mut vs = VirtualStack::new(4096, 128).unwrap();
        unsafe {
            vs.create_stack_frame(256);
            assert_eq!(vs.allocated(), 256 + std::mem::size_of::<*mut u8>());
            vs.leave_stack_frame();
        }
        assert_eq!(vs.allocated(), 0);
    }

    #[test]
    fn nested_frames_restore_correctly() {
        let mut vs = VirtualStack::new(4096, 128).unwrap();
        unsafe {
            vs.create_stack_frame(64);
            let after_first = vs.allocated();
            vs.create_stack_frame(128);
            vs.leave_stack_frame();
            assert_eq!(vs.allocated(), after_first);
            vs.leave_stack_frame();
        }
        assert_eq!(vs.allocated(), 0);
    }

    #[test]
    fn overflow_is_detected() {
        let vs = VirtualStack::new(64, 16).unwrap();
        assert!(!vs.is_stack_overflown());
        let _ = vs;
    }
}
