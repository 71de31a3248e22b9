//! The compilation cache: maps a [`FunctionId`] to its compiled code,
//! compiling at most once per function (spec §4.9, §7).
//!
//! Grounded on `raya-engine/src/jit/runtime/code_cache.rs` for the
//! `RwLock<FxHashMap<..>>` shape (read-lock the common "already compiled"
//! path, write-lock only to publish a fresh entry) and on
//! `original_source/src/microjit/orchestrator.h`'s function table for the
//! cache's role: one entry per registered function, looked up by every
//! call site's trampoline on first invocation.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::codegen::{self, CalleeResolver, CompiledCode};
use crate::error::JitError;
use crate::ir::{FunctionId, RectifiedFunction};

struct CacheEntry {
    code: CompiledCode,
    /// Set by [`CodeCache::recompile`]'s caller once a published entry is
    /// known stale (e.g. the function's source changed); a stale entry is
    /// still returned until a fresh compile replaces it, matching the
    /// "recompile-then-publish" trampoline contract rather than blocking
    /// in-flight calls on a cache miss.
    invalidated: AtomicBool,
}

/// Caches one compiled function per [`FunctionId`]. Shared across every
/// compilation agent policy in [`crate::agent`]; a `CodeCache` on its own
/// makes no compilation decisions, it only stores and serves results.
#[derive(Default)]
pub struct CodeCache {
    entries: RwLock<FxHashMap<FunctionId, CacheEntry>>,
}

impl CodeCache {
    pub fn new() -> Self {
        CodeCache { entries: RwLock::new(FxHashMap::default()) }
    }

    /// True if `id` has a published, non-invalidated entry.
    pub fn is_compiled(&self, id: FunctionId) -> bool {
        let entries = self.entries.read();
        matches!(entries.get(&id), Some(e) if !e.invalidated.load(Ordering::Acquire))
    }

    /// Returns the entry point for `id` if already compiled and not
    /// invalidated, without taking a write lock.
    pub fn entry_point(&self, id: FunctionId) -> Option<*const u8> {
        let entries = self.entries.read();
        entries.get(&id).filter(|e| !e.invalidated.load(Ordering::Acquire)).map(|e| e.code.entry_point())
    }

    /// Compiles `func` if it has no live entry yet, then returns its entry
    /// point. Concurrent callers racing on the same `id` are fine: the
    /// read-then-write sequence means more than one caller may compile the
    /// same function once, but whichever write wins the `FxHashMap` slot
    /// is the one every subsequent caller observes — at-most-once
    /// *publication*, not at-most-once *compilation*, which matches the
    /// single-writer lock's actual guarantee per spec §4.9.
    pub fn get_or_create(&self, func: &RectifiedFunction, resolver: &dyn CalleeResolver) -> Result<*const u8, JitError> {
        let id = func.id();
        if let Some(entry) = self.entry_point(id) {
            return Ok(entry);
        }
        let code = codegen::compile_function(func, resolver)?;
        let entry = code.entry_point();
        let mut entries = self.entries.write();
        entries.insert(id, CacheEntry { code, invalidated: AtomicBool::new(false) });
        Ok(entry)
    }

    /// Unconditionally recompiles `func` and replaces its cache entry,
    /// regardless of whether one already exists. Used by a trampoline's
    /// recompile callback when the published entry has been invalidated.
    pub fn recompile(&self, func: &RectifiedFunction, resolver: &dyn CalleeResolver) -> Result<*const u8, JitError> {
        let id = func.id();
        let code = codegen::compile_function(func, resolver)?;
        let entry = code.entry_point();
        let mut entries = self.entries.write();
        entries.insert(id, CacheEntry { code, invalidated: AtomicBool::new(false) });
        Ok(entry)
    }

    /// Marks `id`'s entry invalidated without recompiling. The trampoline's
    /// next call observes `is_compiled(id) == false` and triggers a fresh
    /// `get_or_create`/`recompile`.
    pub fn invalidate(&self, id: FunctionId) {
        let entries = self.entries.read();
        if let Some(entry) = entries.get(&id) {
            entry.invalidated.store(true, Ordering::Release);
        }
    }

    /// Removes `id`'s entry entirely. Returns `false` if there was nothing
    /// to remove (spec's `LookupMiss` — not an error, see `error.rs`).
    pub fn remove(&self, id: FunctionId) -> bool {
        let mut entries = self.entries.write();
        entries.remove(&id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoCallees;
    impl CalleeResolver for NoCallees {
        fn resolve(&self, _callee: crate::ir::CalleeId) -> Option<(usize, usize)> {
            None
        }
    }

    fn trivial_function() -> RectifiedFunction {
        use crate::ir::FunctionBuilder;
        use crate::types::TypeDescriptor;

        let builder = FunctionBuilder::new(TypeDescriptor::void(), Vec::new());
        builder.rectify()
    }

    #[test]
    fn remove_reports_miss_for_unknown_id() {
        let cache = CodeCache::new();
        assert!(!cache.remove(FunctionId(999)));
    }

    #[test]
    fn is_compiled_false_before_any_compile() {
        let cache = CodeCache::new();
        let func = trivial_function();
        assert!(!cache.is_compiled(func.id()));
    }

    #[test]
    fn get_or_create_then_remove_round_trips() {
        let cache = CodeCache::new();
        let func = trivial_function();
        let resolver = NoCallees;
        let entry = cache.get_or_create(&func, &resolver).expect("trivial void function should compile");
        assert!(!entry.is_null());
        assert!(cache.is_compiled(func.id()));
        assert!(cache.remove(func.id()));
        assert!(!cache.is_compiled(func.id()));
    }
}
