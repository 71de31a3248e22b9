//! Function builder and its frozen ("rectified") form.
//!
//! Grounded on spec §3 (`RectifiedFunction`) and §4.2 (builder contracts),
//! and on spec §9's design note replacing the original's refcounted,
//! raw-pointer-linked nodes with arena-indexed handles. `ScopeArena` and
//! `InstructionArena` (see `ir::scope`, `ir::instr`) are the two arenas; a
//! `FunctionBuilder` owns both until `rectify()` freezes them into a
//! `RectifiedFunction`.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{IrResult, IrValidationError};
use crate::ir::expr::BinaryExpressionParser;
use crate::ir::instr::{BranchKind, CalleeId, Instruction, InstructionArena};
use crate::ir::scope::{Scope, ScopeArena, ScopeRole, VariableDecl};
use crate::ir::value::{BinaryOperator, InstructionId, ScopeId, Value, VariableId};
use crate::types::TypeDescriptor;

static NEXT_FUNCTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a rectified function; used as the compilation cache key.
/// The original uses the function's host pointer for this; Rust has no
/// stable equivalent once values move, so this crate hands out a process-
/// unique counter value at `rectify()` time instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionId(pub u64);

#[derive(Debug, Clone, Copy)]
pub struct ArgumentDecl {
    pub ty: TypeDescriptor,
}

/// Mutable IR builder for one function. Every method here either mutates
/// the arenas or returns an `IrValidationError` without touching them —
/// a caller that gets `Err` back knows nothing was appended.
pub struct FunctionBuilder {
    arguments: Vec<ArgumentDecl>,
    return_ty: TypeDescriptor,
    scopes: ScopeArena,
    instructions: InstructionArena,
}

impl FunctionBuilder {
    pub fn new(return_ty: TypeDescriptor, arguments: Vec<TypeDescriptor>) -> Self {
        FunctionBuilder {
            arguments: arguments.into_iter().map(|ty| ArgumentDecl { ty }).collect(),
            return_ty,
            scopes: ScopeArena::new(),
            instructions: InstructionArena::new(),
        }
    }

    pub fn main_scope(&self) -> ScopeId {
        self.scopes.main_scope()
    }

    pub fn return_ty(&self) -> TypeDescriptor {
        self.return_ty
    }

    pub fn arguments(&self) -> &[ArgumentDecl] {
        &self.arguments
    }

    pub fn argument_value(&self, index: usize) -> IrResult<Value> {
        let decl = self.arguments.get(index).ok_or(IrValidationError::ArgumentIndexOutOfBounds {
            index,
            count: self.arguments.len(),
        })?;
        Ok(Value::Argument { index, ty: decl.ty })
    }

    pub fn variable_value(&self, var: VariableId) -> Value {
        let decl = self.scopes.variable(var);
        Value::Variable { id: var, ty: decl.ty }
    }

    fn push(&mut self, scope: ScopeId, instr: Instruction) -> InstructionId {
        let id = self.instructions.push(instr);
        self.scopes.scope_mut(scope).instructions.push(id);
        id
    }

    /// Appends a declaration with parent pointer = `scope`; returns a fresh
    /// handle. Also records a `DeclareVariable` instruction at the current
    /// position so the frame planner can walk declarations in document
    /// order.
    pub fn create_variable(&mut self, scope: ScopeId, ty: TypeDescriptor) -> VariableId {
        let var = self.scopes.declare_variable(scope, ty);
        self.push(scope, Instruction::DeclareVariable(var));
        var
    }

    fn require_owned(&self, scope: ScopeId, var: VariableId) -> IrResult<()> {
        if self.scopes.owns(scope, var) {
            Ok(())
        } else {
            Err(IrValidationError::VariableNotOwnedByScope)
        }
    }

    fn require_owned_in_all_scope(&self, scope: ScopeId, var: VariableId) -> IrResult<()> {
        if self.scopes.owns_in_all_scope(scope, var) {
            Ok(())
        } else {
            Err(IrValidationError::VariableNotOwnedInAllScope)
        }
    }

    fn require_same_type(&self, var: VariableId, other: TypeDescriptor) -> IrResult<()> {
        let decl_ty = self.scopes.variable(var).ty;
        if decl_ty == other {
            Ok(())
        } else {
            Err(IrValidationError::TypeMismatch { expected: decl_ty.type_id, found: other.type_id })
        }
    }

    pub fn default_construct(&mut self, scope: ScopeId, var: VariableId) -> IrResult<()> {
        self.require_owned(scope, var)?;
        self.push(scope, Instruction::Construct(var));
        Ok(())
    }

    pub fn copy_construct_from_immediate(
        &mut self,
        scope: ScopeId,
        var: VariableId,
        source: Value,
    ) -> IrResult<()> {
        self.require_owned(scope, var)?;
        self.require_same_type(var, source.ty())?;
        self.push(scope, Instruction::CopyConstruct { dest: var, source });
        Ok(())
    }

    pub fn copy_construct_from_argument(
        &mut self,
        scope: ScopeId,
        var: VariableId,
        index: usize,
    ) -> IrResult<()> {
        let source = self.argument_value(index)?;
        self.require_owned(scope, var)?;
        self.require_same_type(var, source.ty())?;
        self.push(scope, Instruction::CopyConstruct { dest: var, source });
        Ok(())
    }

    pub fn copy_construct_from_variable(
        &mut self,
        scope: ScopeId,
        var: VariableId,
        other: VariableId,
    ) -> IrResult<()> {
        if var == other {
            return Err(IrValidationError::SelfAssignment);
        }
        self.require_owned(scope, var)?;
        self.require_owned_in_all_scope(scope, other)?;
        let source = self.variable_value(other);
        self.require_same_type(var, source.ty())?;
        self.push(scope, Instruction::CopyConstruct { dest: var, source });
        Ok(())
    }

    pub fn assign_from_immediate(&mut self, scope: ScopeId, var: VariableId, source: Value) -> IrResult<()> {
        self.require_owned_in_all_scope(scope, var)?;
        self.require_same_type(var, source.ty())?;
        self.push(scope, Instruction::Assign { dest: var, source });
        Ok(())
    }

    pub fn assign_from_argument(&mut self, scope: ScopeId, var: VariableId, index: usize) -> IrResult<()> {
        let source = self.argument_value(index)?;
        self.require_owned_in_all_scope(scope, var)?;
        self.require_same_type(var, source.ty())?;
        self.push(scope, Instruction::Assign { dest: var, source });
        Ok(())
    }

    pub fn assign_from_variable(&mut self, scope: ScopeId, var: VariableId, other: VariableId) -> IrResult<()> {
        if var == other {
            return Err(IrValidationError::SelfAssignment);
        }
        self.require_owned_in_all_scope(scope, var)?;
        self.require_owned_in_all_scope(scope, other)?;
        let source = self.variable_value(other);
        self.require_same_type(var, source.ty())?;
        self.push(scope, Instruction::Assign { dest: var, source });
        Ok(())
    }

    /// `from`/`to` convert via the target's `Convert` semantics (the
    /// original's `ObjectTools::convert`, a stdlib-style `To(From)` cast or
    /// bitwise coercion, is resolved by the code generator from the two
    /// type descriptors — this layer only checks shapes).
    pub fn convert(&mut self, scope: ScopeId, var: VariableId, source: Value) -> IrResult<()> {
        self.require_owned_in_all_scope(scope, var)?;
        self.push(scope, Instruction::Convert { dest: var, source });
        Ok(())
    }

    pub fn function_return(&mut self, scope: ScopeId, var: Option<VariableId>) -> IrResult<()> {
        if self.return_ty.is_void() {
            if var.is_some() {
                return Err(IrValidationError::VoidFunctionReturnsValue);
            }
            self.push(scope, Instruction::Return(None));
            return Ok(());
        }
        let var = var.ok_or(IrValidationError::MissingReturnValue)?;
        self.require_owned_in_all_scope(scope, var)?;
        self.require_same_type(var, self.return_ty)?;
        let value = self.variable_value(var);
        self.push(scope, Instruction::Return(Some(value)));
        Ok(())
    }

    pub fn create_scope(&mut self, parent: ScopeId) -> ScopeId {
        let child = self.scopes.create_scope(parent, ScopeRole::Plain);
        self.push(parent, Instruction::ScopeCreate(child));
        child
    }

    pub fn if_branch(&mut self, scope: ScopeId, condition: Value) -> IrResult<ScopeId> {
        let bool_ty = TypeDescriptor::bool_();
        if condition.ty() != bool_ty {
            return Err(IrValidationError::TypeMismatch {
                expected: bool_ty.type_id,
                found: condition.ty().type_id,
            });
        }
        let body = self.scopes.create_scope(scope, ScopeRole::If);
        self.push(scope, Instruction::Branch { kind: BranchKind::If, condition: Some(condition), body });
        Ok(body)
    }

    pub fn else_branch(&mut self, scope: ScopeId) -> IrResult<ScopeId> {
        let last = *self
            .scopes
            .scope(scope)
            .instructions
            .last()
            .ok_or(IrValidationError::DanglingElse)?;
        match self.instructions.get(last) {
            Instruction::Branch { kind: BranchKind::If, .. } => {}
            _ => return Err(IrValidationError::DanglingElse),
        }
        let body = self.scopes.create_scope(scope, ScopeRole::Else);
        self.push(scope, Instruction::Branch { kind: BranchKind::Else, condition: None, body });
        Ok(body)
    }

    pub fn while_branch(&mut self, scope: ScopeId, condition: Value) -> IrResult<ScopeId> {
        let bool_ty = TypeDescriptor::bool_();
        if condition.ty() != bool_ty {
            return Err(IrValidationError::TypeMismatch {
                expected: bool_ty.type_id,
                found: condition.ty().type_id,
            });
        }
        let body = self.scopes.create_scope(scope, ScopeRole::While);
        self.push(scope, Instruction::Branch { kind: BranchKind::While, condition: Some(condition), body });
        Ok(body)
    }

    pub fn break_loop(&mut self, scope: ScopeId) -> IrResult<()> {
        let mut cur = Some(scope);
        let mut inside_loop = false;
        while let Some(s) = cur {
            if self.scopes.scope(s).role == ScopeRole::While {
                inside_loop = true;
                break;
            }
            cur = self.scopes.scope(s).parent;
        }
        if !inside_loop {
            return Err(IrValidationError::BreakOutsideLoop);
        }
        self.push(scope, Instruction::Break);
        Ok(())
    }

    fn invoke(
        &mut self,
        scope: ScopeId,
        callee: CalleeId,
        param_tys: &[TypeDescriptor],
        return_ty: TypeDescriptor,
        args: Vec<Value>,
        ret: Option<VariableId>,
        native: bool,
    ) -> IrResult<()> {
        if args.len() != param_tys.len() {
            return Err(IrValidationError::ArgumentIndexOutOfBounds { index: args.len(), count: param_tys.len() });
        }
        for (i, (arg, expected)) in args.iter().zip(param_tys.iter()).enumerate() {
            if arg.is_expression() {
                return Err(IrValidationError::ExpressionArgumentNotAllowed);
            }
            if arg.ty() != *expected {
                return Err(IrValidationError::ArgumentTypeMismatch { index: i });
            }
        }
        if let Some(ret_var) = ret {
            self.require_owned_in_all_scope(scope, ret_var)?;
            self.require_same_type(ret_var, return_ty)?;
        }
        let instr = if native {
            Instruction::InvokeNative { callee, args, ret, return_ty }
        } else {
            Instruction::InvokeJit { callee, args, ret, return_ty }
        };
        self.push(scope, instr);
        Ok(())
    }

    pub fn invoke_jit(
        &mut self,
        scope: ScopeId,
        callee: CalleeId,
        param_tys: &[TypeDescriptor],
        return_ty: TypeDescriptor,
        args: Vec<Value>,
        ret: Option<VariableId>,
    ) -> IrResult<()> {
        self.invoke(scope, callee, param_tys, return_ty, args, ret, false)
    }

    pub fn invoke_native(
        &mut self,
        scope: ScopeId,
        callee: CalleeId,
        param_tys: &[TypeDescriptor],
        return_ty: TypeDescriptor,
        args: Vec<Value>,
        ret: Option<VariableId>,
    ) -> IrResult<()> {
        self.invoke(scope, callee, param_tys, return_ty, args, ret, true)
    }

    pub fn create_primitive_binary_expression_parser(&self, operator: BinaryOperator) -> BinaryExpressionParser {
        BinaryExpressionParser::new(operator)
    }

    /// Freezes the builder. The returned function's scope tree is
    /// immutable; it is ready for consumption by the frame/branch planners
    /// and the code generator.
    pub fn rectify(self) -> RectifiedFunction {
        let id = FunctionId(NEXT_FUNCTION_ID.fetch_add(1, Ordering::Relaxed));
        RectifiedFunction {
            id,
            arguments: self.arguments,
            return_ty: self.return_ty,
            scopes: self.scopes,
            instructions: self.instructions,
        }
    }
}

/// Frozen function metadata: argument declarations, return type, and the
/// scope/instruction arenas. Identity is `id()`, used as the compilation
/// cache key.
pub struct RectifiedFunction {
    id: FunctionId,
    arguments: Vec<ArgumentDecl>,
    return_ty: TypeDescriptor,
    scopes: ScopeArena,
    instructions: InstructionArena,
}

impl RectifiedFunction {
    pub fn id(&self) -> FunctionId {
        self.id
    }

    pub fn main_scope(&self) -> ScopeId {
        self.scopes.main_scope()
    }

    pub fn return_ty(&self) -> TypeDescriptor {
        self.return_ty
    }

    pub fn arguments(&self) -> &[ArgumentDecl] {
        &self.arguments
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        self.scopes.scope(id)
    }

    pub fn variable(&self, id: VariableId) -> &VariableDecl {
        self.scopes.variable(id)
    }

    pub fn instruction(&self, id: InstructionId) -> &Instruction {
        self.instructions.get(id)
    }
}

// Safety: a `RectifiedFunction` is immutable after construction and holds
// no thread-affine state (the arenas are plain `Vec`s); sharing `Arc<RectifiedFunction>`
// across worker threads is the whole point of the pooled compilation agent.
unsafe impl Send for RectifiedFunction {}
unsafe impl Sync for RectifiedFunction {}
