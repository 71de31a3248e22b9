use criterion::{black_box, criterion_group, criterion_main, Criterion};
use vstack_jit::codegen::CalleeResolver;
use vstack_jit::ir::{BinaryOperator, CalleeId, FunctionBuilder, Immediate, Value};
use vstack_jit::types::TypeDescriptor;
use vstack_jit::{Orchestrator, OrchestratorConfig};

struct NoCallees;
impl CalleeResolver for NoCallees {
    fn resolve(&self, _callee: CalleeId) -> Option<(usize, usize)> {
        None
    }
}

fn identity_function() -> vstack_jit::ir::RectifiedFunction {
    let ty = TypeDescriptor::i32();
    let mut builder = FunctionBuilder::new(ty, vec![ty]);
    let scope = builder.main_scope();
    let x = builder.create_variable(scope, ty);
    builder.copy_construct_from_argument(scope, x, 0).unwrap();
    builder.function_return(scope, Some(x)).unwrap();
    builder.rectify()
}

fn loop_function() -> vstack_jit::ir::RectifiedFunction {
    let ty = TypeDescriptor::i32();
    let mut builder = FunctionBuilder::new(ty, vec![ty]);
    let scope = builder.main_scope();

    let i_var = builder.create_variable(scope, ty);
    builder.copy_construct_from_immediate(scope, i_var, Value::Immediate(Immediate::i32(0))).unwrap();

    let n = builder.argument_value(0).unwrap();
    let lt = builder.create_primitive_binary_expression_parser(BinaryOperator::Lt);
    let cond = lt.var_var(builder.variable_value(i_var), n).unwrap();
    let body = builder.while_branch(scope, cond).unwrap();

    let add = builder.create_primitive_binary_expression_parser(BinaryOperator::Add);
    let inc = add.var_imm(builder.variable_value(i_var), Value::Immediate(Immediate::i32(1))).unwrap();
    builder.assign_from_immediate(body, i_var, inc).unwrap();

    builder.function_return(scope, Some(i_var)).unwrap();
    builder.rectify()
}

fn bench_compile(c: &mut Criterion) {
    c.bench_function("compile_identity", |b| {
        b.iter(|| {
            let orchestrator = Orchestrator::with_single_agent(NoCallees, OrchestratorConfig::default()).unwrap();
            let instance = orchestrator.create_instance(black_box(identity_function()));
            instance.call(&[&42i32.to_ne_bytes()]).unwrap();
        });
    });

    c.bench_function("compile_loop", |b| {
        b.iter(|| {
            let orchestrator = Orchestrator::with_single_agent(NoCallees, OrchestratorConfig::default()).unwrap();
            let instance = orchestrator.create_instance(black_box(loop_function()));
            instance.call(&[&1000i32.to_ne_bytes()]).unwrap();
        });
    });
}

fn bench_call(c: &mut Criterion) {
    let orchestrator = Orchestrator::with_single_agent(NoCallees, OrchestratorConfig::default()).unwrap();
    let instance = orchestrator.create_instance(identity_function());
    instance.call(&[&1i32.to_ne_bytes()]).unwrap();

    c.bench_function("call_already_compiled_identity", |b| {
        b.iter(|| {
            instance.call(&[black_box(&42i32.to_ne_bytes())]).unwrap();
        });
    });

    let loop_orchestrator = Orchestrator::with_single_agent(NoCallees, OrchestratorConfig::default()).unwrap();
    let loop_instance = loop_orchestrator.create_instance(loop_function());
    loop_instance.call(&[&1i32.to_ne_bytes()]).unwrap();

    c.bench_function("call_already_compiled_loop_1000_iterations", |b| {
        b.iter(|| {
            loop_instance.call(&[black_box(&1000i32.to_ne_bytes())]).unwrap();
        });
    });
}

criterion_group!(benches, bench_compile, bench_call);
criterion_main!(benches);
