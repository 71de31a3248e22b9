//! Instructions: the tagged sum every scope's body is built from.
//!
//! Grounded on the class hierarchy named in
//! `examples/original_source/src/microjit/instructions.h`
//! (`ConstructInstruction`, `ReturnInstruction`, `ScopeCreateInstruction`,
//! `ConvertInstruction`, `InvokeJitInstruction`, `BranchInstruction` and its
//! `If`/`Else`/`While` subclasses, `BreakInstruction`) and on the
//! closed-enum idiom in `raya-engine`'s `jit/ir/instr.rs`. The original's
//! `scope_offset` ordinal is realized here as the instruction's index
//! within its parent scope's `instructions` vector — that index is already
//! a monotonically increasing ordinal, so no separate field is needed.

use crate::ir::value::{InstructionId, ScopeId, VariableId, Value};
use crate::types::TypeDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchKind {
    If,
    Else,
    While,
}

/// An identifier for a function invoked through `InvokeJit`/`InvokeNative`.
/// Opaque to the IR layer; resolved against the orchestrator's function
/// table at code-generation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CalleeId(pub u64);

pub enum Instruction {
    DeclareVariable(VariableId),
    Construct(VariableId),
    CopyConstruct { dest: VariableId, source: Value },
    Assign { dest: VariableId, source: Value },
    Convert { dest: VariableId, source: Value },
    /// Reachable only as an enum shape — see `IrValidationError::PrimitiveConversionUnreachable`
    /// and `DESIGN.md`'s Open Question decisions. No public builder method
    /// constructs this variant.
    PrimitiveConvert { dest: VariableId, source: Value },
    Return(Option<Value>),
    ScopeCreate(ScopeId),
    Branch { kind: BranchKind, condition: Option<Value>, body: ScopeId },
    /// `return_ty` is carried even when `ret` is `None` (the callee's result
    /// is discarded) so the code generator can still size the callee frame's
    /// return slot without consulting anything outside this instruction.
    InvokeJit { callee: CalleeId, args: Vec<Value>, ret: Option<VariableId>, return_ty: TypeDescriptor },
    InvokeNative { callee: CalleeId, args: Vec<Value>, ret: Option<VariableId>, return_ty: TypeDescriptor },
    Break,
}

impl Instruction {
    /// `true` for instructions that introduce a child scope the frame and
    /// branch planners must descend into.
    pub fn child_scope(&self) -> Option<ScopeId> {
        match self {
            Instruction::ScopeCreate(scope) => Some(*scope),
            Instruction::Branch { body, .. } => Some(*body),
            _ => None,
        }
    }
}

pub(crate) struct InstructionArena {
    pub(crate) instructions: Vec<Instruction>,
}

impl InstructionArena {
    pub(crate) fn new() -> Self {
        InstructionArena { instructions: Vec::new() }
    }

    pub(crate) fn push(&mut self, instr: Instruction) -> InstructionId {
        let id = InstructionId(self.instructions.len() as u32);
        self.instructions.push(instr);
        id
    }

    pub(crate) fn get(&self, id: InstructionId) -> &Instruction {
        &self.instructions[id.0 as usize]
    }
}
