//! Buffer-sharing optimizer.
//!
//! Computes a live interval per buffer (first definition to last use in
//! instruction order) and greedily merges buffers along the in-place pairs
//! declared on each instruction kind. A merge is legal only when the source
//! class dies at the very instruction that first defines the destination
//! class, so overlapping lifetimes can never alias. Placeholder-backed
//! buffers are externally visible and never participate.

use crate::ir::{AllocId, IrModule};
use crate::schema::{self, OperandKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LiveRange {
    start: usize,
    end: usize,
}

impl LiveRange {
    const EMPTY: LiveRange = LiveRange {
        start: usize::MAX,
        end: 0,
    };

    fn union(self, other: LiveRange) -> LiveRange {
        LiveRange {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ShareStats {
    pub merged: usize,
    pub allocs_before: usize,
    pub allocs_after: usize,
}

fn find_root(parent: &mut [usize], mut index: usize) -> usize {
    while parent[index] != index {
        parent[index] = parent[parent[index]];
        index = parent[index];
    }
    index
}

/// Rewrites `alloc` classes in place; instruction stream and buffer set are
/// untouched. Deterministic: candidates are considered in instruction order,
/// then in declared pair order.
pub fn share_buffers(module: &mut IrModule) -> ShareStats {
    let count = module.buffers.len();
    let mut stats = ShareStats {
        allocs_before: module.alloc_count(),
        ..ShareStats::default()
    };

    // Positions are 1-based so position 0 can mean "not yet defined".
    let mut ranges = vec![LiveRange::EMPTY; count];
    for (idx, instr) in module.instrs.iter().enumerate() {
        let pos = idx + 1;
        for operand in &instr.operands {
            let range = &mut ranges[operand.buffer.0 as usize];
            if matches!(operand.kind, OperandKind::Out | OperandKind::InOut) {
                range.start = range.start.min(pos);
            }
            range.end = range.end.max(pos);
        }
    }

    let mergeable: Vec<bool> = module
        .buffers
        .iter()
        .map(|b| !b.is_placeholder())
        .collect();
    let mut parent: Vec<usize> = (0..count).collect();
    let mut class_range = ranges;

    for (idx, instr) in module.instrs.iter().enumerate() {
        let pos = idx + 1;
        let Some(def) = schema::inst_def(instr.kind) else {
            continue;
        };
        for &(dest, src) in &def.inplace_pairs {
            let (Some(dest_op), Some(src_op)) =
                (instr.operands.get(dest), instr.operands.get(src))
            else {
                continue;
            };
            let dest_buf = dest_op.buffer.0 as usize;
            let src_buf = src_op.buffer.0 as usize;
            if !mergeable[dest_buf] || !mergeable[src_buf] {
                continue;
            }
            if module.buffers[dest_buf].ty != module.buffers[src_buf].ty {
                continue;
            }
            let dest_root = find_root(&mut parent, dest_buf);
            let src_root = find_root(&mut parent, src_buf);
            if dest_root == src_root {
                continue;
            }
            // Legal only when the source dies here and the destination is
            // born here, so the intervals touch at exactly this instruction.
            if class_range[dest_root].start != pos || class_range[src_root].end != pos {
                continue;
            }
            parent[src_root] = dest_root;
            class_range[dest_root] = class_range[dest_root].union(class_range[src_root]);
            stats.merged += 1;
        }
    }

    for index in 0..count {
        let root = find_root(&mut parent, index);
        module.buffers[index].alloc = AllocId(root as u32);
    }
    stats.allocs_after = module.alloc_count();
    stats
}
