//! The IR model: values, instructions, scopes, and functions (spec §3,
//! §4.2).

pub mod expr;
pub mod function;
pub mod instr;
pub mod scope;
pub mod value;

pub use expr::BinaryExpressionParser;
pub use function::{ArgumentDecl, FunctionBuilder, FunctionId, RectifiedFunction};
pub use instr::{BranchKind, CalleeId, Instruction};
pub use scope::{Scope, ScopeRole, VariableDecl};
pub use value::{AbstractOperation, BinaryOperator, Immediate, InstructionId, ScopeId, Value, VariableId};
