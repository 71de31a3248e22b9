//! End-to-end scenarios: build a function with the IR builder, compile it
//! through an [`Orchestrator`], and call it.

use std::sync::atomic::{AtomicU64, Ordering};

use vstack_jit::codegen::call_abi;
use vstack_jit::codegen::CalleeResolver;
use vstack_jit::ir::{BinaryOperator, CalleeId, FunctionBuilder, Immediate, Value};
use vstack_jit::runtime::trampoline::{native_trampoline_call, EntryFn, NativeTrampoline};
use vstack_jit::runtime::VirtualStack;
use vstack_jit::types::TypeDescriptor;
use vstack_jit::{Instance, Orchestrator, OrchestratorConfig};

struct NoCallees;
impl CalleeResolver for NoCallees {
    fn resolve(&self, _callee: CalleeId) -> Option<(usize, usize)> {
        None
    }
}

fn single_orchestrator() -> Orchestrator {
    Orchestrator::with_single_agent(NoCallees, OrchestratorConfig::default()).expect("x86-64 host")
}

fn call_i32(instance: &Instance, args: &[i32]) -> i32 {
    let arg_bytes: Vec<[u8; 4]> = args.iter().map(|a| a.to_ne_bytes()).collect();
    let arg_slices: Vec<&[u8]> = arg_bytes.iter().map(|b| b.as_slice()).collect();
    let result = instance.call(&arg_slices).expect("call should succeed");
    i32::from_ne_bytes(result.try_into().expect("i32 return is 4 bytes"))
}

#[test]
fn identity_on_i32() {
    let ty = TypeDescriptor::i32();
    let mut builder = FunctionBuilder::new(ty, vec![ty]);
    let scope = builder.main_scope();
    let x = builder.create_variable(scope, ty);
    builder.copy_construct_from_argument(scope, x, 0).unwrap();
    builder.function_return(scope, Some(x)).unwrap();
    let func = builder.rectify();

    let orchestrator = single_orchestrator();
    let instance = orchestrator.create_instance(func);

    let mut vstack = VirtualStack::new(
        OrchestratorConfig::default().vstack_default_size,
        OrchestratorConfig::default().vstack_buffer_size,
    )
    .unwrap();
    let allocated_before = vstack.allocated();
    let args = 42i32.to_ne_bytes();
    let result = unsafe { instance.call_with_vstack(&mut vstack as *mut VirtualStack, &[&args]) }.unwrap();
    assert_eq!(i32::from_ne_bytes(result.try_into().unwrap()), 42);
    assert_eq!(vstack.allocated(), allocated_before);
}

#[test]
fn primitive_add() {
    let ty = TypeDescriptor::i32();
    let mut builder = FunctionBuilder::new(ty, vec![ty, ty]);
    let scope = builder.main_scope();
    let a = builder.argument_value(0).unwrap();
    let b = builder.argument_value(1).unwrap();
    let parser = builder.create_primitive_binary_expression_parser(BinaryOperator::Add);
    let sum = parser.var_var(a, b).unwrap();
    let y = builder.create_variable(scope, ty);
    builder.copy_construct_from_immediate(scope, y, sum).unwrap();
    builder.function_return(scope, Some(y)).unwrap();
    let func = builder.rectify();

    let orchestrator = single_orchestrator();
    let instance = orchestrator.create_instance(func);
    assert_eq!(call_i32(&instance, &[1000, 337]), 1337);
}

#[test]
fn nested_native_call_balances_construction_and_destruction() {
    static CTOR_COUNT: AtomicU64 = AtomicU64::new(0);
    static DTOR_COUNT: AtomicU64 = AtomicU64::new(0);
    CTOR_COUNT.store(0, Ordering::SeqCst);
    DTOR_COUNT.store(0, Ordering::SeqCst);

    unsafe extern "C" fn counted_copy_ctor(dst: *mut u8, src: *const u8) {
        CTOR_COUNT.fetch_add(1, Ordering::SeqCst);
        std::ptr::copy_nonoverlapping(src, dst, 8);
    }
    unsafe extern "C" fn counted_dtor(_obj: *mut u8) {
        DTOR_COUNT.fetch_add(1, Ordering::SeqCst);
    }
    unsafe extern "C" fn native_len(value: u64) -> u64 {
        value
    }

    const LEN_CALLEE: CalleeId = CalleeId(1);
    let string_ty = TypeDescriptor::composite(9001, 8, counted_copy_ctor, counted_dtor);
    let u64_ty = TypeDescriptor::u64();

    struct LenResolver {
        trampoline: NativeTrampoline,
        // Keeps the generated marshaling stub's executable page alive for
        // as long as the resolver (and anything compiled against it) is.
        _stub: vstack_jit::codegen::ExecutableMemory,
    }
    impl LenResolver {
        fn new(string_ty: TypeDescriptor) -> Self {
            let stub = call_abi::compile_native_trampoline(&[string_ty], TypeDescriptor::u64(), native_len as *const ())
                .expect("native trampoline for a single 8-byte argument should compile");
            let stub_entry: EntryFn = unsafe { std::mem::transmute(stub.as_ptr()) };
            let trampoline = NativeTrampoline::new(native_len as *const (), stub_entry);
            LenResolver { trampoline, _stub: stub }
        }
    }
    impl CalleeResolver for LenResolver {
        fn resolve(&self, callee: CalleeId) -> Option<(usize, usize)> {
            if callee == LEN_CALLEE {
                Some((&self.trampoline as *const NativeTrampoline as usize, native_trampoline_call as usize))
            } else {
                None
            }
        }
    }

    let mut builder = FunctionBuilder::new(u64_ty, vec![string_ty]);
    let scope = builder.main_scope();

    let s1 = builder.argument_value(0).unwrap();
    let y1 = builder.create_variable(scope, u64_ty);
    builder
        .invoke_native(scope, LEN_CALLEE, &[string_ty], u64_ty, vec![s1], Some(y1))
        .unwrap();

    let s2 = builder.argument_value(0).unwrap();
    let y2 = builder.create_variable(scope, u64_ty);
    builder
        .invoke_native(scope, LEN_CALLEE, &[string_ty], u64_ty, vec![s2], Some(y2))
        .unwrap();

    let add = builder.create_primitive_binary_expression_parser(BinaryOperator::Add);
    let sum_expr = add.var_var(builder.variable_value(y1), builder.variable_value(y2)).unwrap();
    let sum = builder.create_variable(scope, u64_ty);
    builder.copy_construct_from_immediate(scope, sum, sum_expr).unwrap();
    builder.function_return(scope, Some(sum)).unwrap();
    let func = builder.rectify();

    let orchestrator =
        Orchestrator::with_single_agent(LenResolver::new(string_ty), OrchestratorConfig::default()).unwrap();
    let instance = orchestrator.create_instance(func);

    let length: u64 = 21;
    let result = instance.call(&[&length.to_ne_bytes()]).expect("call should succeed");
    assert_eq!(u64::from_ne_bytes(result.try_into().unwrap()), 42);
    assert_eq!(CTOR_COUNT.load(Ordering::SeqCst), 2);
    assert_eq!(DTOR_COUNT.load(Ordering::SeqCst), 2);
}

#[test]
fn while_loop_with_early_break() {
    let ty = TypeDescriptor::i32();
    let mut builder = FunctionBuilder::new(ty, vec![ty]);
    let scope = builder.main_scope();

    let i_var = builder.create_variable(scope, ty);
    builder.copy_construct_from_immediate(scope, i_var, Value::Immediate(Immediate::i32(0))).unwrap();

    let n = builder.argument_value(0).unwrap();
    let lt = builder.create_primitive_binary_expression_parser(BinaryOperator::Lt);
    let cond = lt.var_var(builder.variable_value(i_var), n).unwrap();
    let body = builder.while_branch(scope, cond).unwrap();

    let eq = builder.create_primitive_binary_expression_parser(BinaryOperator::Eq);
    let break_cond = eq.var_imm(builder.variable_value(i_var), Value::Immediate(Immediate::i32(5))).unwrap();
    let if_body = builder.if_branch(body, break_cond).unwrap();
    builder.break_loop(if_body).unwrap();

    let add = builder.create_primitive_binary_expression_parser(BinaryOperator::Add);
    let inc = add.var_imm(builder.variable_value(i_var), Value::Immediate(Immediate::i32(1))).unwrap();
    builder.assign_from_immediate(body, i_var, inc).unwrap();

    builder.function_return(scope, Some(i_var)).unwrap();
    let func = builder.rectify();

    let orchestrator = single_orchestrator();
    let instance = orchestrator.create_instance(func);
    assert_eq!(call_i32(&instance, &[100]), 5);
    assert_eq!(call_i32(&instance, &[3]), 3);
}

#[test]
fn if_else_arithmetic() {
    let ty = TypeDescriptor::i32();
    let mut builder = FunctionBuilder::new(ty, vec![ty]);
    let scope = builder.main_scope();

    let x = builder.argument_value(0).unwrap();
    let ge = builder.create_primitive_binary_expression_parser(BinaryOperator::Ge);
    let cond = ge.var_imm(x, Value::Immediate(Immediate::i32(0))).unwrap();

    let if_body = builder.if_branch(scope, cond).unwrap();
    let rx = builder.create_variable(if_body, ty);
    builder.copy_construct_from_argument(if_body, rx, 0).unwrap();
    builder.function_return(if_body, Some(rx)).unwrap();

    let else_body = builder.else_branch(scope).unwrap();
    let sub = builder.create_primitive_binary_expression_parser(BinaryOperator::Sub);
    let neg = sub.imm_var(Value::Immediate(Immediate::i32(0)), builder.argument_value(0).unwrap()).unwrap();
    let ry = builder.create_variable(else_body, ty);
    builder.copy_construct_from_immediate(else_body, ry, neg).unwrap();
    builder.function_return(else_body, Some(ry)).unwrap();

    let func = builder.rectify();
    let orchestrator = single_orchestrator();
    let instance = orchestrator.create_instance(func);
    assert_eq!(call_i32(&instance, &[-7]), 7);
    assert_eq!(call_i32(&instance, &[0]), 0);
    assert_eq!(call_i32(&instance, &[42]), 42);
}

#[test]
fn floating_point_comparison_treats_nan_as_unequal() {
    let f64_ty = TypeDescriptor::f64();
    let bool_ty = TypeDescriptor::bool_();
    let mut builder = FunctionBuilder::new(bool_ty, vec![f64_ty, f64_ty]);
    let scope = builder.main_scope();

    let a = builder.argument_value(0).unwrap();
    let b = builder.argument_value(1).unwrap();
    let eq = builder.create_primitive_binary_expression_parser(BinaryOperator::Eq);
    let cond = eq.var_var(a, b).unwrap();
    let result = builder.create_variable(scope, bool_ty);
    builder.copy_construct_from_immediate(scope, result, cond).unwrap();
    builder.function_return(scope, Some(result)).unwrap();
    let func = builder.rectify();

    let orchestrator = single_orchestrator();
    let instance = orchestrator.create_instance(func);

    let call = |a: f64, b: f64| -> bool {
        let result = instance.call(&[&a.to_ne_bytes(), &b.to_ne_bytes()]).expect("call should succeed");
        result[0] != 0
    };
    assert!(!call(f64::NAN, f64::NAN));
    assert!(call(1.0, 1.0));
}
