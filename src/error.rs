//! Error taxonomy for IR construction and compilation.
//!
//! `StackOverflow` and `LookupMiss` from the design are not represented here:
//! the former is a fatal runtime signal handled in [`crate::runtime::vstack`]
//! (it aborts the process rather than returning), and the latter is not an
//! error at all — it surfaces as a `bool` return from `remove_function`.

use thiserror::Error;

use crate::types::TypeId;

/// Failures raised synchronously while a [`crate::ir::FunctionBuilder`] is
/// being constructed. Every builder method that can fail validates before
/// mutating any shared state, so a caller that gets an `Err` back is
/// guaranteed the scope was left unchanged.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IrValidationError {
    #[error("type mismatch: expected type {expected}, found {found}")]
    TypeMismatch { expected: TypeId, found: TypeId },

    #[error("variable is not owned by the current scope")]
    VariableNotOwnedByScope,

    #[error("variable is not owned by the current scope or any enclosing scope")]
    VariableNotOwnedInAllScope,

    #[error("argument index {index} out of bounds (function declares {count} arguments)")]
    ArgumentIndexOutOfBounds { index: usize, count: usize },

    #[error("floating-point modulo is not supported")]
    FloatModuloUnsupported,

    #[error("unary operators are not supported")]
    UnaryOperatorUnsupported,

    #[error("binary operation requires both operands to share a primitive type")]
    OperandTypeMismatch,

    #[error("binary operation operands must be primitive types")]
    NonPrimitiveOperand,

    #[error("expression operands must be immediates or variables, not nested expressions")]
    ExpressionArgumentNotAllowed,

    #[error("call argument {index} type does not match the callee's declared parameter type")]
    ArgumentTypeMismatch { index: usize },

    #[error("return value type does not match the function's declared return type")]
    ReturnTypeMismatch,

    #[error("a non-void function must return a value")]
    MissingReturnValue,

    #[error("a void function cannot return a value")]
    VoidFunctionReturnsValue,

    #[error("assign/copy source and destination variables must differ")]
    SelfAssignment,

    #[error("`else` must immediately follow an `if` branch in the same scope")]
    DanglingElse,

    #[error("`break` used outside of a loop")]
    BreakOutsideLoop,

    #[error("primitive-to-primitive conversion is not reachable from the public builder API")]
    PrimitiveConversionUnreachable,
}

/// Top-level error type returned by compilation and orchestration APIs.
#[derive(Debug, Error)]
pub enum JitError {
    #[error("IR validation failed: {0}")]
    IrValidation(#[from] IrValidationError),

    #[error("unsupported target: {0}")]
    UnsupportedTarget(String),

    #[error("compilation failed: {0}")]
    Compilation(String),
}

pub type IrResult<T> = Result<T, IrValidationError>;
pub type JitResult<T> = Result<T, JitError>;
