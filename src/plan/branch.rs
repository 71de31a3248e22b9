//! Branch planner (spec §4.4): a breadth-first walk over every branch
//! reachable from the main scope, assigning a fresh `(begin, end, loop_end)`
//! label triple to each and pairing `if` nodes with an immediately
//! following `else` in the same scope.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;

use crate::ir::{BranchKind, Instruction, InstructionId, RectifiedFunction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(pub u32);

#[derive(Debug, Clone, Copy)]
pub struct BranchLabels {
    pub begin_of_scope: Label,
    pub end_of_scope: Label,
    pub loop_end_of_scope: Label,
    pub paired_else: Option<InstructionId>,
}

#[derive(Debug, Default)]
pub struct BranchInfo {
    pub labels: FxHashMap<InstructionId, BranchLabels>,
    /// One past the highest label id handed out to any branch. The code
    /// generator allocates its own single function-exit label starting from
    /// this value so it never collides with a branch planner label.
    pub next_free_label: u32,
}

impl BranchInfo {
    pub fn get(&self, instr: InstructionId) -> &BranchLabels {
        &self.labels[&instr]
    }
}

pub fn plan_branches(func: &RectifiedFunction) -> BranchInfo {
    let mut labels = FxHashMap::default();
    let mut next_label = 0u32;
    let mut fresh_triple = || {
        let triple = (Label(next_label), Label(next_label + 1), Label(next_label + 2));
        next_label += 3;
        triple
    };

    let mut queue = VecDeque::new();
    queue.push_back(func.main_scope());

    while let Some(scope_id) = queue.pop_front() {
        let scope = func.scope(scope_id);
        for (i, &instr_id) in scope.instructions.iter().enumerate() {
            let (kind, body) = match func.instruction(instr_id) {
                Instruction::Branch { kind, body, .. } => (*kind, *body),
                _ => continue,
            };
            let (begin, end, loop_end) = fresh_triple();
            labels.insert(
                instr_id,
                BranchLabels { begin_of_scope: begin, end_of_scope: end, loop_end_of_scope: loop_end, paired_else: None },
            );
            queue.push_back(body);

            if kind != BranchKind::Else {
                if let Some(&next_id) = scope.instructions.get(i + 1) {
                    if let Instruction::Branch { kind: BranchKind::Else, .. } = func.instruction(next_id) {
                        labels.get_mut(&instr_id).unwrap().paired_else = Some(next_id);
                    }
                }
            }
        }
    }

    BranchInfo { labels, next_free_label: next_label }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::FunctionBuilder;
    use crate::types::TypeDescriptor;

    #[test]
    fn if_is_paired_with_immediately_following_else() {
        let mut b = FunctionBuilder::new(TypeDescriptor::i32(), vec![TypeDescriptor::i32()]);
        let main = b.main_scope();
        let cond = b
            .create_primitive_binary_expression_parser(crate::ir::BinaryOperator::Ge)
            .var_imm(b.argument_value(0).unwrap(), crate::ir::Value::Immediate(crate::ir::Immediate::i32(0)))
            .unwrap();
        let then_scope = b.if_branch(main, cond).unwrap();
        let y = b.create_variable(then_scope, TypeDescriptor::i32());
        b.copy_construct_from_argument(then_scope, y, 0).unwrap();
        b.function_return(then_scope, Some(y)).unwrap();
        let else_scope = b.else_branch(main).unwrap();
        let z = b.create_variable(else_scope, TypeDescriptor::i32());
        b.copy_construct_from_argument(else_scope, z, 0).unwrap();
        b.function_return(else_scope, Some(z)).unwrap();
        let f = b.rectify();
        let info = plan_branches(&f);
        let if_instr = f.scope(main).instructions[0];
        assert!(info.get(if_instr).paired_else.is_some());
    }

    #[test]
    fn while_without_else_has_no_pairing() {
        let mut b = FunctionBuilder::new(TypeDescriptor::void(), vec![]);
        let main = b.main_scope();
        let cond = crate::ir::Value::Immediate(crate::ir::Immediate::bool(true));
        let _ = b.while_branch(main, cond).unwrap();
        let f = b.rectify();
        let info = plan_branches(&f);
        let while_instr = f.scope(main).instructions[0];
        assert!(info.get(while_instr).paired_else.is_none());
    }
}
