//! The public façade: register a rectified function, get back a callable
//! [`Instance`] backed by whichever concurrency policy the caller picked.
//!
//! Grounded on `original_source/src/microjit/orchestrator.h`'s
//! `OrchestratorComponent`/`FunctionInstance`/`InstanceWrapper` (one
//! compilation agent shared by every instance, each instance a thin
//! wrapper around a function plus a reference back to the agent) and
//! `VirtualStackSettings` (`vstack_default_size`, `vstack_buffer_size`,
//! `starting_pool_size` defaults); `raya-engine/src/jit/engine.rs`'s
//! `JitEngine`/`JitConfig` for the config-struct-with-`Default`-impl idiom
//! this crate's `OrchestratorConfig` follows.

use std::sync::Arc;

use crate::agent::{CompilationAgent, PooledAgent, SerializedAgent, SingleAgent};
use crate::codegen::CalleeResolver;
use crate::error::JitError;
use crate::ir::{FunctionId, RectifiedFunction};
use crate::runtime::trampoline::EntryFn;
use crate::runtime::vstack::{DEFAULT_SAFETY_ZONE, DEFAULT_STACK_SIZE};
use crate::runtime::VirtualStack;

/// Per-orchestrator tuning, passed once at construction. Mirrors the
/// original's `VirtualStackSettings`.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    pub vstack_default_size: usize,
    pub vstack_buffer_size: usize,
    pub starting_pool_size: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig {
            vstack_default_size: DEFAULT_STACK_SIZE,
            vstack_buffer_size: DEFAULT_SAFETY_ZONE,
            starting_pool_size: 4,
        }
    }
}

/// Shared state every [`Instance`] created from one [`Orchestrator`]
/// refers back to: the compilation agent and the virtual-stack settings
/// new top-level calls allocate with.
pub struct Orchestrator {
    agent: Arc<dyn CompilationAgent>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    fn new(agent: Arc<dyn CompilationAgent>, config: OrchestratorConfig) -> Result<Self, JitError> {
        if !cfg!(target_arch = "x86_64") {
            return Err(JitError::UnsupportedTarget("vstack-jit only targets x86-64".into()));
        }
        Ok(Orchestrator { agent, config })
    }

    /// Compiles on whichever thread calls `Instance::call`/`get_or_create`,
    /// no dedicated worker. Grounded on `SingleUnsafeCompilationHandler`.
    pub fn with_single_agent<R>(resolver: R, config: OrchestratorConfig) -> Result<Self, JitError>
    where
        R: CalleeResolver + Send + Sync + 'static,
    {
        Self::new(Arc::new(SingleAgent::new(resolver)), config)
    }

    /// One dedicated worker thread drains every compile request in FIFO
    /// order. Grounded on `CommandQueueCompilationHandler`.
    pub fn with_serialized_agent<R>(resolver: R, config: OrchestratorConfig) -> Result<Self, JitError>
    where
        R: CalleeResolver + Send + 'static,
    {
        Self::new(Arc::new(SerializedAgent::new(resolver)), config)
    }

    /// A fixed worker pool, `worker_count` threads (default
    /// [`num_cpus::get`]), each with its own resolver clone. Grounded on
    /// `ThreadPoolCompilationHandler`.
    pub fn with_pooled_agent<R>(resolver: R, worker_count: Option<usize>, config: OrchestratorConfig) -> Result<Self, JitError>
    where
        R: CalleeResolver + Clone + Send + 'static,
    {
        Self::new(Arc::new(PooledAgent::new(resolver, worker_count)), config)
    }

    /// Registers `func` and returns a handle callers can invoke,
    /// recompile, or detach. Mirrors `OrchestratorComponent::create_instance`.
    pub fn create_instance(&self, func: RectifiedFunction) -> Instance {
        Instance { func: Arc::new(func), agent: Arc::clone(&self.agent), config: self.config }
    }
}

/// A registered function plus everything needed to call it. Mirrors
/// `InstanceWrapper`/`FunctionInstance`: a thin handle, cheap to clone,
/// that always goes back through the shared agent for compilation state.
#[derive(Clone)]
pub struct Instance {
    func: Arc<RectifiedFunction>,
    agent: Arc<dyn CompilationAgent>,
    config: OrchestratorConfig,
}

impl Instance {
    pub fn function_id(&self) -> FunctionId {
        self.func.id()
    }

    pub fn is_compiled(&self) -> bool {
        self.agent.is_compiled(&self.func)
    }

    /// Forces a fresh compile, replacing whatever entry point is currently
    /// published.
    pub fn recompile(&self) -> Result<(), JitError> {
        self.agent.recompile(&self.func).map(|_| ())
    }

    /// Removes this function from the cache. Returns `false` if it was
    /// never compiled (spec's non-error `LookupMiss`).
    pub fn detach(&self) -> bool {
        self.agent.remove_function(self.func.id())
    }

    /// Allocates a fresh [`VirtualStack`] (sized per [`OrchestratorConfig`])
    /// and calls through it. `args` holds each argument's raw byte image,
    /// in declaration order; returns the callee's raw return-value bytes
    /// (empty for a void function).
    pub fn call(&self, args: &[&[u8]]) -> Result<Vec<u8>, JitError> {
        let mut vstack = VirtualStack::new(self.config.vstack_default_size, self.config.vstack_buffer_size)?;
        unsafe { self.call_with_vstack(&mut vstack as *mut VirtualStack, args) }
    }

    /// Calls through a caller-owned virtual stack, the way a nested
    /// invocation from emitted code would (see `codegen::call_abi`), but
    /// driven from the host side: creates a new frame sized for this
    /// function's arguments and return slot, writes each argument at the
    /// same vrbp-relative displacement the frame planner would, invokes
    /// the entry point, reads the return slot back, and tears the frame
    /// down.
    ///
    /// # Safety
    /// `vstack` must point to a live, exclusively-owned `VirtualStack`.
    pub unsafe fn call_with_vstack(&self, vstack: *mut VirtualStack, args: &[&[u8]]) -> Result<Vec<u8>, JitError> {
        let entry = self.agent.get_or_create(&self.func)?;
        let arguments = self.func.arguments();
        if args.len() != arguments.len() {
            return Err(JitError::Compilation(format!("expected {} arguments, got {}", arguments.len(), args.len())));
        }

        let return_size = self.func.return_ty().size;
        let mut offset = return_size;
        let mut arg_offsets = Vec::with_capacity(arguments.len());
        for arg in arguments {
            arg_offsets.push(offset);
            offset += arg.ty.size;
        }
        let total_size = offset;

        (*vstack).create_stack_frame(total_size);
        let vrbp = (*vstack).rbp();
        for (i, arg) in arguments.iter().enumerate() {
            let bytes = args[i];
            if bytes.len() != arg.ty.size {
                (*vstack).leave_stack_frame();
                return Err(JitError::Compilation(format!(
                    "argument {i} is {} bytes, expected {}",
                    bytes.len(),
                    arg.ty.size
                )));
            }
            let disp = -((arg_offsets[i] + arg.ty.size) as isize);
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), vrbp.offset(disp), bytes.len());
        }

        let entry_fn: EntryFn = std::mem::transmute(entry);
        entry_fn(vstack);

        let mut ret = vec![0u8; return_size];
        if return_size > 0 {
            let src = (*vstack).rbp().offset(-(return_size as isize));
            std::ptr::copy_nonoverlapping(src, ret.as_mut_ptr(), return_size);
        }
        (*vstack).leave_stack_frame();
        Ok(ret)
    }
}

/// A primitive type the generated code already knows how to load into a
/// register, safe to marshal to and from raw bytes by `memcpy`. Implemented
/// only for the scalar types [`TypeDescriptor`]'s primitive constructors
/// cover; composite arguments still go through [`Instance::call`]'s `&[u8]`
/// form, same as the original's non-template byte-buffer escape hatch.
///
/// # Safety
/// Implementors must be `Copy` types whose bit pattern is exactly the
/// function's calling-convention image of the value (no padding, no
/// pointers that need their own lifetime tracking).
pub unsafe trait Pod: Copy + Sized {}

macro_rules! impl_pod {
    ($($t:ty),* $(,)?) => {
        $( unsafe impl Pod for $t {} )*
    };
}
impl_pod!(bool, i8, i16, i32, i64, u8, u16, u32, u64, f32, f64);
unsafe impl Pod for () {}

fn pod_bytes<T: Pod>(value: &T) -> &[u8] {
    unsafe { std::slice::from_raw_parts((value as *const T).cast::<u8>(), std::mem::size_of::<T>()) }
}

fn pod_from_bytes<T: Pod>(bytes: &[u8]) -> Result<T, JitError> {
    if bytes.len() != std::mem::size_of::<T>() {
        return Err(JitError::Compilation(format!(
            "return value is {} bytes, expected {}",
            bytes.len(),
            std::mem::size_of::<T>()
        )));
    }
    if std::mem::size_of::<T>() == 0 {
        return Ok(unsafe { std::mem::zeroed() });
    }
    Ok(unsafe { std::ptr::read_unaligned(bytes.as_ptr().cast::<T>()) })
}

/// A typed convenience call, skipping the `&[&[u8]]` marshaling
/// [`Instance::call`] otherwise requires callers to do by hand. Implemented
/// for tuples of up to four [`Pod`] arguments, the way the original's
/// `FunctionInstance<R, Args...>` template parameter pack would be spelled
/// for each concrete arity, since Rust has no variadic generics.
pub trait Callable<Args> {
    type Output: Pod;

    fn invoke(&self, args: Args) -> Result<Self::Output, JitError>;
}

macro_rules! impl_callable {
    ($($arg:ident),*) => {
        impl<$($arg: Pod,)* R: Pod> Callable<($($arg,)*)> for Instance {
            type Output = R;

            #[allow(non_snake_case)]
            fn invoke(&self, args: ($($arg,)*)) -> Result<R, JitError> {
                let ($($arg,)*) = args;
                $( let $arg = pod_bytes(&$arg); )*
                let arg_slices: &[&[u8]] = &[$($arg),*];
                let result = self.call(arg_slices)?;
                pod_from_bytes(&result)
            }
        }
    };
}

impl_callable!();
impl_callable!(A);
impl_callable!(A, B);
impl_callable!(A, B, C);
impl_callable!(A, B, C, D);

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
    fn create_instance_reports_not_compiled_until_called() {
        let orchestrator = Orchestrator::with_single_agent(NoCallees, OrchestratorConfig::default())
            .expect("x86-64 host should construct an orchestrator");
        let func = FunctionBuilder::new(TypeDescriptor::void(), Vec::new()).rectify();
        let instance = orchestrator.create_instance(func);
        assert!(!instance.is_compiled());
        instance.call(&[]).expect("trivial void function should run");
        assert!(instance.is_compiled());
        assert!(instance.detach());
    }

    #[test]
    fn callable_marshals_typed_arguments_and_return() {
        let ty = TypeDescriptor::i32();
        let mut builder = FunctionBuilder::new(ty, vec![ty, ty]);
        let scope = builder.main_scope();
        let a = builder.argument_value(0).unwrap();
        let b = builder.argument_value(1).unwrap();
        let parser = builder.create_primitive_binary_expression_parser(crate::ir::BinaryOperator::Add);
        let sum = parser.var_var(a, b).unwrap();
        let y = builder.create_variable(scope, ty);
        builder.copy_construct_from_immediate(scope, y, sum).unwrap();
        builder.function_return(scope, Some(y)).unwrap();
        let func = builder.rectify();

        let orchestrator = Orchestrator::with_single_agent(NoCallees, OrchestratorConfig::default()).unwrap();
        let instance = orchestrator.create_instance(func);
        let result: i32 = instance.invoke((1000i32, 337i32)).unwrap();
        assert_eq!(result, 1337);
    }
}
