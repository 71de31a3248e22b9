//! Executable memory allocation for compiled code.
//!
//! `raya-engine` leans on cranelift-jit's own allocator; this crate hand-
//! rolls the x86-64 backend (per spec §1's non-goals — no pluggable
//! backend), so it also hand-rolls the mmap/mprotect dance, the way
//! `examples/other_examples/7531a88d_myuon-moca__src-jit-compiler_x86_64.rs.rs`'s
//! `ExecutableMemory` does.

use std::ptr::NonNull;

use crate::error::JitError;

/// A page-aligned, writable-then-executable memory region holding one
/// compiled function's machine code. `W^X` discipline: the region is
/// writable until [`ExecutableMemory::make_executable`] is called, after
/// which it is read+execute only.
pub struct ExecutableMemory {
    ptr: NonNull<u8>,
    len: usize,
}

#[cfg(unix)]
mod os {
    use super::*;

    pub fn page_size() -> usize {
        unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
    }

    pub fn map(len: usize) -> Result<NonNull<u8>, JitError> {
        unsafe {
            let ptr = libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            );
            if ptr == libc::MAP_FAILED {
                return Err(JitError::Compilation("mmap failed while allocating executable memory".into()));
            }
            Ok(NonNull::new_unchecked(ptr as *mut u8))
        }
    }

    pub fn protect_exec(ptr: NonNull<u8>, len: usize) -> Result<(), JitError> {
        unsafe {
            let rc = libc::mprotect(ptr.as_ptr() as *mut libc::c_void, len, libc::PROT_READ | libc::PROT_EXEC);
            if rc != 0 {
                return Err(JitError::Compilation("mprotect failed while finalizing executable memory".into()));
            }
        }
        Ok(())
    }

    pub fn unmap(ptr: NonNull<u8>, len: usize) {
        unsafe {
            libc::munmap(ptr.as_ptr() as *mut libc::c_void, len);
        }
    }
}

impl ExecutableMemory {
    pub fn new(len: usize) -> Result<Self, JitError> {
        let page = os::page_size();
        let aligned = ((len + page - 1) / page) * page;
        let aligned = aligned.max(page);
        let ptr = os::map(aligned)?;
        Ok(ExecutableMemory { ptr, len: aligned })
    }

    pub fn write(&mut self, offset: usize, bytes: &[u8]) {
        assert!(offset + bytes.len() <= self.len, "write out of bounds of allocated executable memory");
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.ptr.as_ptr().add(offset), bytes.len());
        }
    }

    pub fn make_executable(&mut self) -> Result<(), JitError> {
        os::protect_exec(self.ptr, self.len)
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }
}

impl Drop for ExecutableMemory {
    fn drop(&mut self) {
        os::unmap(self.ptr, self.len);
    }
}

// Safety: the pointer is owned exclusively by this struct and the region
// is never mutated once `make_executable` has run; sharing compiled code
// across threads (the whole point of the cache) requires this.
unsafe impl Send for ExecutableMemory {}
unsafe impl Sync for ExecutableMemory {}
