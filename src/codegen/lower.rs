//! Per-instruction lowering (spec §4.5/§4.6): walks a rectified function's
//! scope tree and emits machine code for every instruction, using the
//! frame/branch plans already computed by [`crate::plan`].
//!
//! Grounded on `examples/original_source/src/microjit/jit.h`'s
//! `CodeGenerator::generate` (the per-instruction dispatch, the destructor
//! sweep on scope exit and on `return`) and on
//! `examples/other_examples/7531a88d_myuon-moca__src-jit-compiler_x86_64.rs.rs`
//! for the register-direct lowering style (no general-purpose register
//! allocator; every rule names a fixed scratch register).

use rustc_hash::FxHashMap;

use crate::codegen::assembler::{self, Cond, FpWidth};
use crate::codegen::buffer::CodeBuffer;
use crate::codegen::regs::{self, Reg};
use crate::error::JitError;
use crate::ir::{
    BinaryOperator, BranchKind, CalleeId, Instruction, InstructionId, RectifiedFunction, ScopeId, Value, VariableId,
};
use crate::codegen::call_abi;
use crate::plan::{BranchInfo, FrameInfo, Label};
use crate::runtime::vstack::{vstack_abort_on_overflow, vstack_get_rbp, vstack_is_stack_overflown};
use crate::types::TypeDescriptor;

/// Resolves a [`CalleeId`] to the trampoline handle and dispatcher address a
/// call site should embed as immediates. Implemented by whatever owns the
/// function table at compile time (the orchestrator); this module only
/// needs the two addresses, not the table itself.
pub trait CalleeResolver {
    fn resolve(&self, callee: CalleeId) -> Option<(usize, usize)>;
}

fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

fn fp_width(size: usize) -> FpWidth {
    if size == 4 {
        FpWidth::F32
    } else {
        FpWidth::F64
    }
}

/// Walks one rectified function's scope tree and emits its whole body,
/// prologue through epilogue, into a fresh [`CodeBuffer`].
pub struct Lowerer<'f> {
    func: &'f RectifiedFunction,
    frame: &'f FrameInfo,
    branches: &'f BranchInfo,
    resolver: &'f dyn CalleeResolver,
    buf: CodeBuffer,
    exit_label: Label,
    overflow_ok_label: Label,
    /// Innermost loop's break target last.
    loop_ends: Vec<Label>,
    /// Non-primitive locals constructed so far, per scope, in construction
    /// order — swept in reverse on scope exit or on `return`.
    constructed: FxHashMap<ScopeId, Vec<VariableId>>,
    /// Ancestor chain currently open, outermost first. `return` sweeps every
    /// scope in this list; natural scope exit and `break` sweep only the
    /// innermost one.
    open_scopes: Vec<ScopeId>,
}

impl<'f> Lowerer<'f> {
    pub fn new(
        func: &'f RectifiedFunction,
        frame: &'f FrameInfo,
        branches: &'f BranchInfo,
        resolver: &'f dyn CalleeResolver,
    ) -> Self {
        let exit_label = Label(branches.next_free_label);
        let overflow_ok_label = Label(branches.next_free_label + 1);
        Lowerer {
            func,
            frame,
            branches,
            resolver,
            buf: CodeBuffer::new(),
            exit_label,
            overflow_ok_label,
            loop_ends: Vec::new(),
            constructed: FxHashMap::default(),
            open_scopes: Vec::new(),
        }
    }

    /// Lowers the whole function and returns its machine code, with all
    /// forward references already patched.
    pub fn lower(mut self) -> Result<Vec<u8>, JitError> {
        self.emit_prologue();
        self.emit_scope(self.func.main_scope());
        self.emit_epilogue();
        self.buf.patch_forward_refs();
        Ok(self.buf.into_bytes())
    }

    // ---- prologue / epilogue -------------------------------------------

    fn emit_prologue(&mut self) {
        assembler::push_reg(&mut self.buf, Reg::Rbp);
        assembler::mov_rr(&mut self.buf, Reg::Rbp, Reg::Rsp);
        let total = regs::FIXED_SLOTS_SIZE + self.frame.max_frame_size;
        assembler::sub_ri32(&mut self.buf, Reg::Rsp, total as i32);

        // Entry convention: the sole argument (the vstack handle) arrives
        // in `rdi`, matching `runtime::trampoline::EntryFn`.
        assembler::store_int(&mut self.buf, 8, Reg::Rbp, regs::VSTACK_HANDLE_SLOT, Reg::Rdi);

        self.call_fixed(vstack_get_rbp as usize);
        assembler::store_int(&mut self.buf, 8, Reg::Rbp, regs::VRBP_CACHE_SLOT, Reg::Rax);

        // Stack-overflow guard: abort the process rather than run off the
        // end of the virtual stack's allocation.
        assembler::load_int_zx(&mut self.buf, 8, regs::CTOR_ARG0, Reg::Rbp, regs::VSTACK_HANDLE_SLOT);
        self.call_fixed(vstack_is_stack_overflown as usize);
        assembler::movzx_r64_r8(&mut self.buf, Reg::Rax, Reg::Rax);
        assembler::cmp_ri32(&mut self.buf, 4, Reg::Rax, 0);
        assembler::jcc_label(&mut self.buf, Cond::Eq, self.overflow_ok_label);
        assembler::load_int_zx(&mut self.buf, 8, regs::CTOR_ARG0, Reg::Rbp, regs::VSTACK_HANDLE_SLOT);
        self.call_fixed(vstack_abort_on_overflow as usize);
        self.buf.bind_label(self.overflow_ok_label);
    }

    fn emit_epilogue(&mut self) {
        self.buf.bind_label(self.exit_label);
        assembler::leave(&mut self.buf);
        assembler::ret(&mut self.buf);
    }

    // ---- scopes -----------------------------------------------------------

    fn emit_scope(&mut self, scope: ScopeId) {
        self.open_scopes.push(scope);
        self.constructed.insert(scope, Vec::new());

        let instrs = self.func.scope(scope).instructions.clone();
        let mut prev: Option<InstructionId> = None;
        for instr_id in instrs {
            self.emit_instruction(instr_id, prev);
            prev = Some(instr_id);
        }

        self.sweep_scope(scope);
        self.constructed.remove(&scope);
        self.open_scopes.pop();
    }

    fn emit_instruction(&mut self, instr_id: InstructionId, prev: Option<InstructionId>) {
        // Copying the instruction enum's interesting fields out by value
        // (everything here is `Copy` except `Value`/`Vec<Value>`, which we
        // only ever borrow) keeps this match's borrow of `self.func`
        // independent of the `&mut self` calls inside each arm.
        match self.func.instruction(instr_id) {
            Instruction::DeclareVariable(_) => {}
            Instruction::Construct(_) => {
                // `TypeDescriptor` carries no default-constructor function
                // pointer, only `copy_ctor`/`dtor` — default construction
                // is a documented no-op for every type (see DESIGN.md).
            }
            Instruction::CopyConstruct { dest, source } => {
                let dest = *dest;
                let source = clone_value(source);
                self.emit_copy_construct(dest, &source);
            }
            Instruction::Assign { dest, source } => {
                let dest = *dest;
                let source = clone_value(source);
                self.emit_assign(dest, &source);
            }
            Instruction::Convert { dest, source } => {
                // No separate conversion-constructor pointer exists on
                // `TypeDescriptor`; lowering is identical to `Assign` (see
                // DESIGN.md's Open Question decision).
                let dest = *dest;
                let source = clone_value(source);
                self.emit_assign(dest, &source);
            }
            Instruction::PrimitiveConvert { .. } => {
                unreachable!("not constructible from the public builder API")
            }
            Instruction::Return(value) => {
                let value = value.as_ref().map(clone_value);
                self.emit_return(value.as_ref());
            }
            Instruction::ScopeCreate(child) => {
                let child = *child;
                self.emit_scope(child);
            }
            Instruction::Branch { kind: BranchKind::If, condition, body } => {
                let condition = clone_value(condition.as_ref().expect("if always carries a condition"));
                let body = *body;
                self.emit_if(instr_id, &condition, body);
            }
            Instruction::Branch { kind: BranchKind::Else, body, .. } => {
                let body = *body;
                self.emit_else(instr_id, prev, body);
            }
            Instruction::Branch { kind: BranchKind::While, condition, body } => {
                let condition = clone_value(condition.as_ref().expect("while always carries a condition"));
                let body = *body;
                self.emit_while(instr_id, &condition, body);
            }
            Instruction::Break => self.emit_break(),
            Instruction::InvokeJit { callee, args, ret, return_ty } => {
                let callee = *callee;
                let args: Vec<Value> = args.iter().map(clone_value).collect();
                let ret = *ret;
                let return_ty = *return_ty;
                self.emit_invoke(callee, &args, ret, return_ty);
            }
            Instruction::InvokeNative { callee, args, ret, return_ty } => {
                let callee = *callee;
                let args: Vec<Value> = args.iter().map(clone_value).collect();
                let ret = *ret;
                let return_ty = *return_ty;
                self.emit_invoke(callee, &args, ret, return_ty);
            }
        }
    }

    // ---- destructor sweeps -------------------------------------------------

    fn record_constructed(&mut self, var: VariableId) {
        let ty = self.func.variable(var).ty;
        if ty.is_primitive {
            return;
        }
        let scope = self.func.variable(var).parent_scope;
        let list = self.constructed.entry(scope).or_default();
        if !list.contains(&var) {
            list.push(var);
        }
    }

    fn sweep_scope(&mut self, scope: ScopeId) {
        let vars = self.constructed.get(&scope).cloned().unwrap_or_default();
        for var in vars.into_iter().rev() {
            let ty = self.func.variable(var).ty;
            let disp = self.frame.variable_offsets[&var] as i32;
            assembler::lea(&mut self.buf, regs::CTOR_ARG0, Reg::Rbp, disp);
            self.call_dtor(ty);
        }
    }

    fn full_destructor_sweep(&mut self) {
        let scopes = self.open_scopes.clone();
        for scope in scopes.into_iter().rev() {
            self.sweep_scope(scope);
        }
    }

    // ---- primitive construct / assign --------------------------------------

    fn emit_copy_construct(&mut self, dest: VariableId, source: &Value) {
        let dest_ty = self.func.variable(dest).ty;
        let dest_disp = self.frame.variable_offsets[&dest] as i32;
        if dest_ty.is_primitive {
            self.load_primitive(source, regs::BINOP_LEFT, regs::xmm::LEFT);
            self.store_primitive_result(dest_ty, dest_disp);
        } else {
            self.with_composite_operand(source, |this, base, disp| {
                assembler::lea(&mut this.buf, regs::CTOR_ARG0, Reg::Rbp, dest_disp);
                assembler::lea(&mut this.buf, regs::CTOR_ARG1, base, disp);
                this.call_copy_ctor(dest_ty);
            });
        }
        if !dest_ty.is_primitive {
            self.record_constructed(dest);
        }
    }

    fn emit_assign(&mut self, dest: VariableId, source: &Value) {
        let dest_ty = self.func.variable(dest).ty;
        let dest_disp = self.frame.variable_offsets[&dest] as i32;
        if dest_ty.is_primitive {
            self.load_primitive(source, regs::BINOP_LEFT, regs::xmm::LEFT);
            self.store_primitive_result(dest_ty, dest_disp);
        } else {
            // Assign destructs the previous value before reconstructing —
            // it differs from `CopyConstruct` only in that respect.
            assembler::lea(&mut self.buf, regs::CTOR_ARG0, Reg::Rbp, dest_disp);
            self.call_dtor(dest_ty);
            self.with_composite_operand(source, |this, base, disp| {
                assembler::lea(&mut this.buf, regs::CTOR_ARG0, Reg::Rbp, dest_disp);
                assembler::lea(&mut this.buf, regs::CTOR_ARG1, base, disp);
                this.call_copy_ctor(dest_ty);
            });
            self.record_constructed(dest);
        }
    }

    fn store_primitive_result(&mut self, ty: TypeDescriptor, disp: i32) {
        if ty.is_floating_point() {
            assembler::movs_store(&mut self.buf, fp_width(ty.size), Reg::Rbp, disp, regs::xmm::LEFT);
        } else {
            assembler::store_int(&mut self.buf, ty.size as u8, Reg::Rbp, disp, regs::BINOP_LEFT);
        }
    }

    // ---- return -------------------------------------------------------------

    fn emit_return(&mut self, value: Option<&Value>) {
        if let Some(value) = value {
            let return_ty = self.func.return_ty();
            // The return slot lives in *this* function's own virtual frame,
            // at the same offset from its vrbp that the caller used to
            // reserve it (`call_abi::emit_invoke`'s step 4): closest to
            // vrbp, size `return_ty.size`.
            assembler::load_int_zx(&mut self.buf, 8, regs::SCRATCH_B, Reg::Rbp, regs::VRBP_CACHE_SLOT);
            let disp = -(return_ty.size as i32);
            if return_ty.is_primitive {
                self.load_primitive(value, regs::BINOP_LEFT, regs::xmm::LEFT);
                if return_ty.is_floating_point() {
                    assembler::movs_store(&mut self.buf, fp_width(return_ty.size), regs::SCRATCH_B, disp, regs::xmm::LEFT);
                } else {
                    assembler::store_int(&mut self.buf, return_ty.size as u8, regs::SCRATCH_B, disp, regs::BINOP_LEFT);
                }
            } else {
                // `function_return` only ever binds a `Value::Variable`.
                let (base, src_disp) = match value {
                    Value::Variable { id, .. } => (Reg::Rbp, self.frame.variable_offsets[id] as i32),
                    _ => unreachable!("a composite return value is always a bound variable"),
                };
                assembler::lea(&mut self.buf, regs::CTOR_ARG0, regs::SCRATCH_B, disp);
                assembler::lea(&mut self.buf, regs::CTOR_ARG1, base, src_disp);
                self.call_copy_ctor(return_ty);
            }
        }
        self.full_destructor_sweep();
        assembler::jmp_label(&mut self.buf, self.exit_label);
    }

    // ---- branching ----------------------------------------------------------

    fn emit_if(&mut self, instr_id: InstructionId, condition: &Value, body: ScopeId) {
        let labels = *self.branches.get(instr_id);
        self.load_primitive(condition, regs::BINOP_LEFT, regs::xmm::LEFT);
        assembler::cmp_ri32(&mut self.buf, 1, regs::BINOP_LEFT, 0);
        let false_target = match labels.paired_else {
            Some(else_id) => self.branches.get(else_id).begin_of_scope,
            None => labels.end_of_scope,
        };
        assembler::jcc_label(&mut self.buf, Cond::Eq, false_target);
        self.emit_scope(body);
        if labels.paired_else.is_some() {
            assembler::jmp_label(&mut self.buf, labels.end_of_scope);
        } else {
            self.buf.bind_label(labels.end_of_scope);
        }
    }

    fn emit_else(&mut self, instr_id: InstructionId, prev: Option<InstructionId>, body: ScopeId) {
        let labels = *self.branches.get(instr_id);
        self.buf.bind_label(labels.begin_of_scope);
        self.emit_scope(body);
        let if_id = prev.expect("an `else` always immediately follows its `if` in the same scope");
        let if_labels = *self.branches.get(if_id);
        self.buf.bind_label(if_labels.end_of_scope);
    }

    fn emit_while(&mut self, instr_id: InstructionId, condition: &Value, body: ScopeId) {
        let labels = *self.branches.get(instr_id);
        assembler::jmp_label(&mut self.buf, labels.end_of_scope);
        self.buf.bind_label(labels.begin_of_scope);
        self.loop_ends.push(labels.loop_end_of_scope);
        self.emit_scope(body);
        self.loop_ends.pop();
        self.buf.bind_label(labels.end_of_scope);
        self.load_primitive(condition, regs::BINOP_LEFT, regs::xmm::LEFT);
        assembler::cmp_ri32(&mut self.buf, 1, regs::BINOP_LEFT, 0);
        assembler::jcc_label(&mut self.buf, Cond::Ne, labels.begin_of_scope);
        self.buf.bind_label(labels.loop_end_of_scope);
    }

    fn emit_break(&mut self) {
        let current = *self.open_scopes.last().expect("break only occurs inside an open scope");
        self.sweep_scope(current);
        let target = *self.loop_ends.last().expect("the builder only accepts `break` inside a loop");
        assembler::jmp_label(&mut self.buf, target);
    }

    // ---- nested invocation ----------------------------------------------------

    fn emit_invoke(&mut self, callee: CalleeId, args: &[Value], ret: Option<VariableId>, return_ty: TypeDescriptor) {
        let (trampoline_handle, dispatcher) = self
            .resolver
            .resolve(callee)
            .expect("every callee referenced by a rectified function must be registered before it is compiled");

        let mut native_stack_used: i32 = 0;
        let mut arg_operands = Vec::with_capacity(args.len());
        for value in args {
            match value {
                Value::Immediate(imm) => {
                    let size = align_up(imm.ty.size.max(1), 8) as i32;
                    assembler::sub_ri32(&mut self.buf, Reg::Rsp, size);
                    self.write_bytes_at(Reg::Rsp, 0, &imm.bytes);
                    arg_operands.push(call_abi::ArgOperand { ty: imm.ty, base: Reg::Rsp, disp: 0 });
                    native_stack_used += size;
                }
                Value::Argument { index, ty } => {
                    let (base, disp) = self.argument_addr(*index, *ty);
                    arg_operands.push(call_abi::ArgOperand { ty: *ty, base, disp });
                }
                Value::Variable { id, ty } => {
                    let disp = self.frame.variable_offsets[id] as i32;
                    arg_operands.push(call_abi::ArgOperand { ty: *ty, base: Reg::Rbp, disp });
                }
                Value::Expression(_) => unreachable!("rejected by the builder: expressions cannot be call arguments"),
            }
        }

        let ret_dest = ret.map(|v| self.frame.variable_offsets[&v] as i32);
        let plan = call_abi::InvokePlan { args: arg_operands, return_ty, ret_dest, trampoline_handle, dispatcher };
        call_abi::emit_invoke(&mut self.buf, &plan);

        if native_stack_used > 0 {
            assembler::add_ri32(&mut self.buf, Reg::Rsp, native_stack_used);
        }

        if let Some(var) = ret {
            if !return_ty.is_primitive {
                self.record_constructed(var);
            }
        }
    }

    fn argument_addr(&mut self, index: usize, ty: TypeDescriptor) -> (Reg, i32) {
        assembler::load_int_zx(&mut self.buf, 8, regs::SCRATCH_B, Reg::Rbp, regs::VRBP_CACHE_SLOT);
        let offset = self.frame.argument_offsets[&index];
        let disp = -(offset as i32 + ty.size as i32);
        (regs::SCRATCH_B, disp)
    }

    // ---- operand loading ------------------------------------------------------

    /// Loads any primitive-typed `Value` so its bits end up in `dst_int`
    /// (integers/bool) or `dst_xmm` (floats). `Expression` recurses into
    /// [`Self::emit_expression`], which always computes into the canonical
    /// `BINOP_LEFT`/`xmm::LEFT`, then moves into the requested destination
    /// only if it differs.
    fn load_primitive(&mut self, value: &Value, dst_int: Reg, dst_xmm: u8) {
        match value {
            Value::Immediate(imm) => {
                if imm.ty.is_floating_point() {
                    let bits = if imm.ty.size == 4 {
                        i32::from_ne_bytes(imm.bytes[..4].try_into().unwrap()) as i64
                    } else {
                        i64::from_ne_bytes(imm.bytes[..8].try_into().unwrap())
                    };
                    assembler::mov_ri64(&mut self.buf, regs::SCRATCH_A, bits);
                    assembler::movq_to_xmm(&mut self.buf, dst_xmm, regs::SCRATCH_A);
                } else {
                    assembler::mov_ri64(&mut self.buf, dst_int, extend_int_bytes(&imm.bytes, imm.ty.is_signed_integer()));
                }
            }
            Value::Argument { index, ty } => {
                let (base, disp) = self.argument_addr(*index, *ty);
                self.load_primitive_mem(*ty, base, disp, dst_int, dst_xmm);
            }
            Value::Variable { id, ty } => {
                let disp = self.frame.variable_offsets[id] as i32;
                self.load_primitive_mem(*ty, Reg::Rbp, disp, dst_int, dst_xmm);
            }
            Value::Expression(op) => {
                self.emit_expression(op);
                if op.result_ty.is_floating_point() {
                    if dst_xmm != regs::xmm::LEFT {
                        assembler::movs_rr(&mut self.buf, fp_width(op.result_ty.size), dst_xmm, regs::xmm::LEFT);
                    }
                } else if dst_int != regs::BINOP_LEFT {
                    assembler::mov_rr(&mut self.buf, dst_int, regs::BINOP_LEFT);
                }
            }
        }
    }

    /// Signed integer locals are loaded sign-extended, not zero-extended:
    /// comparisons and `idiv` both read the full 64-bit register, and only a
    /// correctly sign-extended value compares/divides the way the narrower
    /// type's signed semantics require. Zero/sign-extension choice makes no
    /// difference to `add`/`sub`/`imul`, whose truncated low-width result is
    /// invariant to what's above the type's own bits.
    fn load_primitive_mem(&mut self, ty: TypeDescriptor, base: Reg, disp: i32, dst_int: Reg, dst_xmm: u8) {
        if ty.is_floating_point() {
            assembler::movs_load(&mut self.buf, fp_width(ty.size), dst_xmm, base, disp);
        } else if ty.is_signed_integer() {
            assembler::load_int_sx(&mut self.buf, ty.size as u8, dst_int, base, disp);
        } else {
            assembler::load_int_zx(&mut self.buf, ty.size as u8, dst_int, base, disp);
        }
    }

    /// Runs `f` with `(base, disp)` addressing a composite operand's bytes.
    /// Immediates are staged on the native stack first (there is no fixed
    /// address for them otherwise) and popped back off once `f` returns.
    fn with_composite_operand(&mut self, value: &Value, f: impl FnOnce(&mut Self, Reg, i32)) {
        match value {
            Value::Variable { id, .. } => {
                let disp = self.frame.variable_offsets[id] as i32;
                f(self, Reg::Rbp, disp);
            }
            Value::Argument { index, ty } => {
                let (base, disp) = self.argument_addr(*index, *ty);
                f(self, base, disp);
            }
            Value::Immediate(imm) => {
                let size = align_up(imm.ty.size.max(1), 8) as i32;
                assembler::sub_ri32(&mut self.buf, Reg::Rsp, size);
                self.write_bytes_at(Reg::Rsp, 0, &imm.bytes);
                f(self, Reg::Rsp, 0);
                assembler::add_ri32(&mut self.buf, Reg::Rsp, size);
            }
            Value::Expression(_) => unreachable!("expressions are always primitive-typed"),
        }
    }

    /// Chunked immediate store: writes `bytes` to `[base + base_disp]` in
    /// 8/4/2/1-byte pieces, largest-first.
    fn write_bytes_at(&mut self, base: Reg, base_disp: i32, bytes: &[u8]) {
        let mut offset = 0usize;
        while offset < bytes.len() {
            let remaining = bytes.len() - offset;
            let chunk = if remaining >= 8 {
                8
            } else if remaining >= 4 {
                4
            } else if remaining >= 2 {
                2
            } else {
                1
            };
            let mut tmp = [0u8; 8];
            tmp[..chunk].copy_from_slice(&bytes[offset..offset + chunk]);
            let value = i64::from_ne_bytes(tmp);
            assembler::mov_ri64(&mut self.buf, regs::SCRATCH_A, value);
            assembler::store_int(&mut self.buf, chunk as u8, base, base_disp + offset as i32, regs::SCRATCH_A);
            offset += chunk;
        }
    }

    // ---- expressions ------------------------------------------------------

    fn emit_expression(&mut self, op: &crate::ir::AbstractOperation) {
        self.load_primitive(&op.left, regs::BINOP_LEFT, regs::xmm::LEFT);
        self.load_primitive(&op.right, regs::BINOP_RIGHT, regs::xmm::RIGHT);
        let operand_ty = op.left.ty();
        if operand_ty.is_floating_point() {
            self.emit_float_op(op.operator, operand_ty);
        } else {
            self.emit_int_op(op.operator, operand_ty);
        }
    }

    fn emit_int_op(&mut self, op: BinaryOperator, ty: TypeDescriptor) {
        let width = ty.size as u8;
        let signed = ty.is_signed_integer();
        match op {
            BinaryOperator::Add => assembler::add_rr(&mut self.buf, width, regs::BINOP_LEFT, regs::BINOP_RIGHT),
            BinaryOperator::Sub => assembler::sub_rr(&mut self.buf, width, regs::BINOP_LEFT, regs::BINOP_RIGHT),
            BinaryOperator::Mul => assembler::imul_rr(&mut self.buf, width, regs::BINOP_LEFT, regs::BINOP_RIGHT),
            BinaryOperator::Div | BinaryOperator::Mod => {
                // `idiv`/`div` at width 1 leave their remainder in `ah`,
                // which isn't addressable once a REX prefix is in play (it
                // reads as `spl` instead). Both operands are already
                // correctly sign/zero-extended across the full register
                // from `load_primitive`, so running the division at width 2
                // instead gives an identical low-byte quotient/remainder
                // while keeping the remainder in the ordinarily-addressable
                // `dx`/`rdx`.
                let op_width = if width == 1 { 2 } else { width };
                if signed {
                    assembler::cqo(&mut self.buf, op_width);
                    assembler::idiv_r(&mut self.buf, op_width, regs::BINOP_RIGHT);
                } else {
                    assembler::zero_rdx(&mut self.buf);
                    assembler::div_r(&mut self.buf, op_width, regs::BINOP_RIGHT);
                }
                if op == BinaryOperator::Mod {
                    assembler::mov_rr(&mut self.buf, regs::BINOP_LEFT, Reg::Rdx);
                }
            }
            BinaryOperator::Eq | BinaryOperator::Ne | BinaryOperator::Gt | BinaryOperator::Ge | BinaryOperator::Lt | BinaryOperator::Le => {
                assembler::cmp_rr(&mut self.buf, width, regs::BINOP_LEFT, regs::BINOP_RIGHT);
                let cond = int_cond(op, signed);
                assembler::setcc(&mut self.buf, cond, regs::BINOP_LEFT);
                assembler::movzx_r64_r8(&mut self.buf, regs::BINOP_LEFT, regs::BINOP_LEFT);
            }
        }
    }

    fn emit_float_op(&mut self, op: BinaryOperator, ty: TypeDescriptor) {
        let width = fp_width(ty.size);
        match op {
            BinaryOperator::Add => assembler::adds(&mut self.buf, width, regs::xmm::LEFT, regs::xmm::RIGHT),
            BinaryOperator::Sub => assembler::subs(&mut self.buf, width, regs::xmm::LEFT, regs::xmm::RIGHT),
            BinaryOperator::Mul => assembler::muls(&mut self.buf, width, regs::xmm::LEFT, regs::xmm::RIGHT),
            BinaryOperator::Div => assembler::divs(&mut self.buf, width, regs::xmm::LEFT, regs::xmm::RIGHT),
            BinaryOperator::Mod => unreachable!("floating-point modulo is rejected by the builder"),
            BinaryOperator::Eq | BinaryOperator::Ne => {
                let negate = op == BinaryOperator::Ne;
                assembler::ucomis(&mut self.buf, width, regs::xmm::LEFT, regs::xmm::RIGHT);
                assembler::mov_ri32(&mut self.buf, regs::BINOP_LEFT, if negate { 0 } else { 1 });
                assembler::mov_ri32(&mut self.buf, regs::BINOP_RIGHT, if negate { 1 } else { 0 });
                // ZF==0 (ordered, not equal) or PF==1 (unordered) both flip
                // to the "not equal" value; this makes NaN compare unequal
                // to everything, including itself.
                assembler::cmovne_rr(&mut self.buf, regs::BINOP_LEFT, regs::BINOP_RIGHT);
                assembler::cmovp_rr(&mut self.buf, regs::BINOP_LEFT, regs::BINOP_RIGHT);
            }
            BinaryOperator::Gt | BinaryOperator::Ge => {
                assembler::comis(&mut self.buf, width, regs::xmm::LEFT, regs::xmm::RIGHT);
                let cond = if op == BinaryOperator::Gt { Cond::Above } else { Cond::AboveEq };
                assembler::setcc(&mut self.buf, cond, regs::BINOP_LEFT);
                assembler::movzx_r64_r8(&mut self.buf, regs::BINOP_LEFT, regs::BINOP_LEFT);
            }
            BinaryOperator::Lt | BinaryOperator::Le => {
                // Swap operand order so an unordered result (NaN present)
                // lands on the `Above`/`AboveEq` side, which is false for
                // unordered — `comis(right, left)` + `seta`/`setae` gives
                // `right > left` / `right >= left`, i.e. `left < right` /
                // `left <= right`, without the false-positive `comis(left,
                // right)` + `setb`/`setbe` would give for NaN operands.
                assembler::comis(&mut self.buf, width, regs::xmm::RIGHT, regs::xmm::LEFT);
                let cond = if op == BinaryOperator::Lt { Cond::Above } else { Cond::AboveEq };
                assembler::setcc(&mut self.buf, cond, regs::BINOP_LEFT);
                assembler::movzx_r64_r8(&mut self.buf, regs::BINOP_LEFT, regs::BINOP_LEFT);
            }
        }
    }

    // ---- small call helpers -------------------------------------------------

    fn call_fixed(&mut self, addr: usize) {
        assembler::mov_ri64(&mut self.buf, regs::SCRATCH_C, addr as i64);
        assembler::call_reg(&mut self.buf, regs::SCRATCH_C);
    }

    fn call_copy_ctor(&mut self, ty: TypeDescriptor) {
        assembler::mov_ri64(&mut self.buf, regs::SCRATCH_C, ty.copy_ctor as usize as i64);
        assembler::call_reg(&mut self.buf, regs::SCRATCH_C);
    }

    fn call_dtor(&mut self, ty: TypeDescriptor) {
        assembler::mov_ri64(&mut self.buf, regs::SCRATCH_C, ty.dtor as usize as i64);
        assembler::call_reg(&mut self.buf, regs::SCRATCH_C);
    }
}

/// Widens a primitive integer immediate's raw bytes to `i64`, sign-extending
/// for signed types and zero-extending otherwise — the same rule
/// [`Lowerer::load_primitive_mem`] applies to memory operands, so immediates
/// and locals compare/divide consistently regardless of which one a given
/// expression operand happens to be.
fn extend_int_bytes(bytes: &[u8], signed: bool) -> i64 {
    if signed {
        match bytes.len() {
            1 => bytes[0] as i8 as i64,
            2 => i16::from_ne_bytes(bytes[..2].try_into().unwrap()) as i64,
            4 => i32::from_ne_bytes(bytes[..4].try_into().unwrap()) as i64,
            8 => i64::from_ne_bytes(bytes[..8].try_into().unwrap()),
            other => panic!("unsupported signed immediate width {other}"),
        }
    } else {
        match bytes.len() {
            1 => bytes[0] as i64,
            2 => u16::from_ne_bytes(bytes[..2].try_into().unwrap()) as i64,
            4 => u32::from_ne_bytes(bytes[..4].try_into().unwrap()) as i64,
            8 => i64::from_ne_bytes(bytes[..8].try_into().unwrap()),
            other => panic!("unsupported unsigned immediate width {other}"),
        }
    }
}

fn int_cond(op: BinaryOperator, signed: bool) -> Cond {
    use BinaryOperator::*;
    match (op, signed) {
        (Eq, _) => Cond::Eq,
        (Ne, _) => Cond::Ne,
        (Gt, true) => Cond::Gt,
        (Gt, false) => Cond::Above,
        (Ge, true) => Cond::Ge,
        (Ge, false) => Cond::AboveEq,
        (Lt, true) => Cond::Lt,
        (Lt, false) => Cond::Below,
        (Le, true) => Cond::Le,
        (Le, false) => Cond::BelowEq,
        _ => unreachable!("not a comparison operator"),
    }
}

/// `Value` holds a non-`Clone` `Immediate`/`AbstractOperation` payload (they
/// own a destructor-bearing byte buffer), but lowering only ever needs to
/// read through a `&Value` borrowed from the instruction arena while also
/// holding `&mut self` — cloning the (small) operand tree sidesteps that
/// borrow without giving `Value` a `Clone` impl that callers could use to
/// silently duplicate a non-primitive immediate's ownership.
fn clone_value(value: &Value) -> Value {
    match value {
        Value::Immediate(imm) => Value::Immediate(imm.clone()),
        Value::Argument { index, ty } => Value::Argument { index: *index, ty: *ty },
        Value::Variable { id, ty } => Value::Variable { id: *id, ty: *ty },
        Value::Expression(op) => Value::Expression(Box::new(crate::ir::AbstractOperation {
            operator: op.operator,
            left: clone_value(&op.left),
            right: clone_value(&op.right),
            result_ty: op.result_ty,
        })),
    }
}
