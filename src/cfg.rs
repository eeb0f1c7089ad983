use std::collections::BTreeSet;

use crate::ir::{BasicBlock, ControlFlowGraph, EdgeKind, FlowEdge, Instruction, InstructionKind};
use crate::opcodes;

/// Build a control flow graph from decoded instructions.
pub(crate) fn build_cfg(instructions: &[Instruction], code_len: u32) -> ControlFlowGraph {
    if instructions.is_empty() {
        return ControlFlowGraph::default();
    }

    let mut leaders = BTreeSet::new();
    leaders.insert(0u32);
    for (index, inst) in instructions.iter().enumerate() {
        let next = instructions.get(index + 1).map(|next| next.offset);
        if let InstructionKind::Branch(targets) = &inst.kind {
            leaders.extend(targets.iter().copied());
            leaders.extend(next);
        }
        if is_exit_opcode(inst.opcode) {
            leaders.extend(next);
        }
    }
    // Branch targets that do not start an instruction are dropped; verified code never has them.
    let starts: BTreeSet<u32> = instructions.iter().map(|inst| inst.offset).collect();
    let leader_list: Vec<u32> = leaders
        .into_iter()
        .filter(|offset| starts.contains(offset))
        .collect();

    let mut blocks = Vec::with_capacity(leader_list.len());
    for (position, start) in leader_list.iter().enumerate() {
        let end = leader_list.get(position + 1).copied().unwrap_or(code_len);
        let first = instructions.partition_point(|inst| inst.offset < *start);
        let last = instructions.partition_point(|inst| inst.offset < end);
        blocks.push(BasicBlock {
            start_offset: *start,
            end_offset: end,
            instructions: first..last,
        });
    }

    let mut edges = Vec::new();
    for (position, block) in blocks.iter().enumerate() {
        let Some(last_inst) = block
            .instructions
            .end
            .checked_sub(1)
            .and_then(|index| instructions.get(index))
        else {
            continue;
        };
        let next = blocks.get(position + 1).map(|next| next.start_offset);
        if let InstructionKind::Branch(targets) = &last_inst.kind {
            let mut seen = BTreeSet::new();
            for target in targets {
                if starts.contains(target) && seen.insert(*target) {
                    edges.push(FlowEdge {
                        from: block.start_offset,
                        to: *target,
                        kind: EdgeKind::Branch,
                    });
                }
            }
            if !is_unconditional_branch(last_inst.opcode) {
                if let Some(next) = next {
                    edges.push(FlowEdge {
                        from: block.start_offset,
                        to: next,
                        kind: EdgeKind::FallThrough,
                    });
                }
            }
        } else if !is_exit_opcode(last_inst.opcode) {
            if let Some(next) = next {
                edges.push(FlowEdge {
                    from: block.start_offset,
                    to: next,
                    kind: EdgeKind::FallThrough,
                });
            }
        }
    }

    ControlFlowGraph { blocks, edges }
}

pub(crate) fn is_exit_opcode(opcode: u8) -> bool {
    matches!(
        opcode,
        opcodes::IRETURN
            | opcodes::LRETURN
            | opcodes::FRETURN
            | opcodes::DRETURN
            | opcodes::ARETURN
            | opcodes::RETURN
            | opcodes::ATHROW
            | opcodes::RET
    )
}

fn is_unconditional_branch(opcode: u8) -> bool {
    matches!(
        opcode,
        opcodes::GOTO
            | opcodes::JSR
            | opcodes::GOTO_W
            | opcodes::JSR_W
            | opcodes::TABLESWITCH
            | opcodes::LOOKUPSWITCH
    )
}
