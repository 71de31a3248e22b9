//! Values: the operands that instructions are built from.

use crate::types::TypeDescriptor;

/// Handle to a variable declaration inside a [`crate::ir::FunctionBuilder`]'s
/// arena. Stable for the lifetime of the function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VariableId(pub(crate) u32);

/// Handle to a scope inside a [`crate::ir::FunctionBuilder`]'s arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub(crate) u32);

/// Handle to an instruction inside a [`crate::ir::FunctionBuilder`]'s arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstructionId(pub(crate) u32);

/// An immediate constant: a type descriptor plus the owned bytes of its
/// value. Non-primitive immediates run their destructor when dropped.
pub struct Immediate {
    pub ty: TypeDescriptor,
    pub bytes: Box<[u8]>,
}

impl Immediate {
    pub fn from_bytes(ty: TypeDescriptor, bytes: Vec<u8>) -> Self {
        debug_assert_eq!(bytes.len(), ty.size, "immediate byte length must match its type size");
        Immediate { ty, bytes: bytes.into_boxed_slice() }
    }

    pub fn i32(value: i32) -> Self {
        Self::from_bytes(TypeDescriptor::i32(), value.to_ne_bytes().to_vec())
    }
    pub fn i64(value: i64) -> Self {
        Self::from_bytes(TypeDescriptor::i64(), value.to_ne_bytes().to_vec())
    }
    pub fn f64(value: f64) -> Self {
        Self::from_bytes(TypeDescriptor::f64(), value.to_ne_bytes().to_vec())
    }
    pub fn bool(value: bool) -> Self {
        Self::from_bytes(TypeDescriptor::bool_(), vec![value as u8])
    }
}

impl Drop for Immediate {
    fn drop(&mut self) {
        if !self.ty.is_primitive {
            unsafe { (self.ty.dtor)(self.bytes.as_mut_ptr()) }
        }
    }
}

impl Clone for Immediate {
    fn clone(&self) -> Self {
        let mut bytes = vec![0u8; self.ty.size].into_boxed_slice();
        if self.ty.is_primitive {
            bytes.copy_from_slice(&self.bytes);
        } else {
            unsafe { (self.ty.copy_ctor)(bytes.as_mut_ptr(), self.bytes.as_ptr()) };
        }
        Immediate { ty: self.ty, bytes }
    }
}

/// A binary operator. Unary operators are reserved but unimplemented, per
/// the non-goals; there is no variant for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl BinaryOperator {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOperator::Eq
                | BinaryOperator::Ne
                | BinaryOperator::Gt
                | BinaryOperator::Ge
                | BinaryOperator::Lt
                | BinaryOperator::Le
        )
    }
}

/// A primitive binary expression: both operands share a primitive type; the
/// result type is that same type for arithmetic, or `bool` for comparisons.
pub struct AbstractOperation {
    pub operator: BinaryOperator,
    pub left: Value,
    pub right: Value,
    pub result_ty: TypeDescriptor,
}

/// A tagged-sum operand. `Expression` values may not be passed as call
/// arguments; they must be bound to a variable via `CopyConstruct`/`Assign`
/// first (see `IrValidationError::ExpressionArgumentNotAllowed`).
pub enum Value {
    Immediate(Immediate),
    Argument { index: usize, ty: TypeDescriptor },
    Variable { id: VariableId, ty: TypeDescriptor },
    Expression(Box<AbstractOperation>),
}

impl Value {
    pub fn ty(&self) -> TypeDescriptor {
        match self {
            Value::Immediate(imm) => imm.ty,
            Value::Argument { ty, .. } => *ty,
            Value::Variable { ty, .. } => *ty,
            Value::Expression(op) => op.result_ty,
        }
    }

    pub fn is_expression(&self) -> bool {
        matches!(self, Value::Expression(_))
    }
}
