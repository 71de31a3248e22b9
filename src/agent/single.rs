//! The single-threaded policy: compiles on the calling thread, with no
//! dedicated worker of its own.
//!
//! Grounded on `original_source/src/microjit/compilation_agent.h`'s
//! `SingleUnsafeCompilationHandler`. The original's `function_map` is a
//! plain `std::unordered_map` with no locking at all — safe there only
//! because its caller promises single-threaded use. This port keeps the
//! "no dedicated worker" policy but drops the "unsafe" half of the name:
//! it shares the same `RwLock`-guarded [`CodeCache`] every other agent
//! uses, so concurrent callers still publish at most one winning entry
//! per function, they just each do the compilation work themselves
//! instead of handing it to a queue or pool.

use std::sync::Arc;

use crate::agent::CompilationAgent;
use crate::codegen::CalleeResolver;
use crate::error::JitError;
use crate::ir::{FunctionId, RectifiedFunction};
use crate::runtime::code_cache::CodeCache;

pub struct SingleAgent<R> {
    cache: CodeCache,
    resolver: R,
}

impl<R: CalleeResolver> SingleAgent<R> {
    pub fn new(resolver: R) -> Self {
        SingleAgent { cache: CodeCache::new(), resolver }
    }
}

impl<R: CalleeResolver + Send + Sync> CompilationAgent for SingleAgent<R> {
    fn is_compiled(&self, func: &Arc<RectifiedFunction>) -> bool {
        self.cache.is_compiled(func.id())
    }

    fn get_or_create(&self, func: &Arc<RectifiedFunction>) -> Result<*const u8, JitError> {
        self.cache.get_or_create(func, &self.resolver)
    }

    fn recompile(&self, func: &Arc<RectifiedFunction>) -> Result<*const u8, JitError> {
        self.cache.recompile(func, &self.resolver)
    }

    fn remove_function(&self, id: FunctionId) -> bool {
        self.cache.remove(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{CalleeId, FunctionBuilder};
    use crate::types::TypeDescriptor;

    struct NoCallees;
    impl CalleeResolver for NoCallees {
        fn resolve(&self, _callee: CalleeId) -> Option<(usize, usize)> {
            None
        }
    }

    #[test]
    fn compiles_a_trivial_void_function() {
        let agent = SingleAgent::new(NoCallees);
        let func = Arc::new(FunctionBuilder::new(TypeDescriptor::void(), Vec::new()).rectify());
        assert!(!agent.is_compiled(&func));
        agent.get_or_create(&func).expect("trivial void function should compile");
        assert!(agent.is_compiled(&func));
        assert!(agent.remove_function(func.id()));
    }
}
