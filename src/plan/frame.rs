//! Frame planner (spec §4.3): walks a function's scope tree with an
//! explicit worklist and assigns each local a negative rbp-relative offset
//! and each argument a positive vrbp-relative offset.
//!
//! Grounded on spec §4.3 for the algorithm and on
//! `examples/original_source/src/microjit/jit.h`'s `StackFrameInfo` for the
//! field shape (`variable_map`, `args_map`, `max_frame_size`,
//! `max_object_allocation`).

use rustc_hash::FxHashMap;

use crate::ir::{Instruction, RectifiedFunction, ScopeId, VariableId};

fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

#[derive(Debug, Default, Clone)]
pub struct FrameInfo {
    /// Offset from native `rbp`, negative (locals live below the saved
    /// base pointer).
    pub variable_offsets: FxHashMap<VariableId, i64>,
    /// Offset from the caller's virtual base pointer, positive, measured
    /// past the return slot.
    pub argument_offsets: FxHashMap<usize, usize>,
    /// Multiple of 16; the amount subtracted from native `rsp` in the
    /// prologue.
    pub max_frame_size: usize,
    pub max_live_objects: usize,
}

struct WorkItem {
    scope: ScopeId,
    next_instr: usize,
    size: usize,
    live: usize,
}

pub fn plan_frame(func: &RectifiedFunction) -> FrameInfo {
    let mut variable_offsets = FxHashMap::default();
    let mut max_frame_size = 0usize;
    let mut max_live_objects = 0usize;

    let mut worklist = vec![WorkItem { scope: func.main_scope(), next_instr: 0, size: 0, live: 0 }];

    while let Some(mut item) = worklist.pop() {
        let scope = func.scope(item.scope);
        if item.next_instr >= scope.instructions.len() {
            continue;
        }
        let instr_id = scope.instructions[item.next_instr];
        item.next_instr += 1;

        let mut descend_into = None;
        match func.instruction(instr_id) {
            Instruction::DeclareVariable(var) => {
                let decl = func.variable(*var);
                let mut offset = item.size;
                if decl.ty.size >= 16 {
                    offset = align_up(offset, 16);
                }
                offset += decl.ty.size;
                variable_offsets.insert(*var, -(offset as i64));
                item.size = offset;
                item.live += 1;
                max_frame_size = max_frame_size.max(item.size);
                max_live_objects = max_live_objects.max(item.live);
            }
            other => descend_into = other.child_scope(),
        }

        let (resume_size, resume_live) = (item.size, item.live);
        worklist.push(item);
        if let Some(child) = descend_into {
            worklist.push(WorkItem { scope: child, next_instr: 0, size: resume_size, live: resume_live });
        }
    }

    let argument_offsets = plan_argument_offsets(func);

    FrameInfo {
        variable_offsets,
        argument_offsets,
        max_frame_size: align_up(max_frame_size, 16),
        max_live_objects,
    }
}

/// First argument sits immediately below the return slot; later arguments
/// at increasing offsets, so the last argument has the highest offset (the
/// caller pushes them in reverse).
fn plan_argument_offsets(func: &RectifiedFunction) -> FxHashMap<usize, usize> {
    let mut offsets = FxHashMap::default();
    let mut offset = func.return_ty().size;
    for (index, arg) in func.arguments().iter().enumerate() {
        offsets.insert(index, offset);
        offset += arg.ty.size;
    }
    offsets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::FunctionBuilder;
    use crate::types::TypeDescriptor;

    #[test]
    fn single_local_gets_negative_offset() {
        let mut b = FunctionBuilder::new(TypeDescriptor::void(), vec![]);
        let main = b.main_scope();
        let v = b.create_variable(main, TypeDescriptor::i32());
        b.default_construct(main, v).unwrap();
        let f = b.rectify();
        let frame = plan_frame(&f);
        assert_eq!(frame.variable_offsets[&v], -4);
        assert_eq!(frame.max_frame_size, 16);
        assert_eq!(frame.max_live_objects, 1);
    }

    #[test]
    fn disjoint_offsets_within_a_scope_path() {
        let mut b = FunctionBuilder::new(TypeDescriptor::void(), vec![]);
        let main = b.main_scope();
        let a = b.create_variable(main, TypeDescriptor::i64());
        let c = b.create_variable(main, TypeDescriptor::i32());
        b.default_construct(main, a).unwrap();
        b.default_construct(main, c).unwrap();
        let f = b.rectify();
        let frame = plan_frame(&f);
        assert_eq!(frame.variable_offsets[&a], -8);
        assert_eq!(frame.variable_offsets[&c], -12);
    }

    #[test]
    fn argument_offsets_grow_with_index() {
        let b = FunctionBuilder::new(TypeDescriptor::i32(), vec![TypeDescriptor::i32(), TypeDescriptor::i64()]);
        let f = b.rectify();
        let frame = plan_frame(&f);
        assert_eq!(frame.argument_offsets[&0], 4);
        assert_eq!(frame.argument_offsets[&1], 8);
    }
}
