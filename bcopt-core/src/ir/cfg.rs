//! Control Flow Graphs
//!
//! Per-method CFG representation consumed by the analyses. Blocks hold their
//! instructions in execution order; edges are stored redundantly as successor
//! and predecessor lists so both forward and backward walks are cheap.
//!
//! Block ids are `u32` indices into the block vector, and both edge lists use
//! `SmallVec<[u32; 2]>` since most blocks have at most two successors and two
//! predecessors.

use smallvec::SmallVec;

use crate::ir::InsnId;

/// Basic block: a maximal straight-line instruction sequence with a single
/// entry and a single exit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicBlock {
    /// Block id, equal to the block's index in its graph
    pub id: u32,
    /// Instructions in execution order
    pub instructions: Vec<InsnId>,
    /// Successor block ids
    pub successors: SmallVec<[u32; 2]>,
    /// Predecessor block ids
    pub predecessors: SmallVec<[u32; 2]>,
}

/// Control flow graph of one method.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ControlFlowGraph {
    /// Basic blocks, indexed by block id
    pub blocks: Vec<BasicBlock>,
    /// Entry block id
    pub entry: u32,
}

impl ControlFlowGraph {
    pub fn new() -> Self {
        ControlFlowGraph {
            blocks: Vec::new(),
            entry: 0,
        }
    }

    /// Append a block and return its id.
    pub fn add_block(&mut self, instructions: Vec<InsnId>) -> u32 {
        let id = self.blocks.len() as u32;
        self.blocks.push(BasicBlock {
            id,
            instructions,
            successors: SmallVec::new(),
            predecessors: SmallVec::new(),
        });
        id
    }

    /// Connect two blocks, updating both edge lists.
    ///
    /// Duplicate edges are ignored so callers can add edges while scanning
    /// branch targets without deduplicating first.
    pub fn add_edge(&mut self, from: u32, to: u32) {
        let (from_idx, to_idx) = (from as usize, to as usize);
        if from_idx >= self.blocks.len() || to_idx >= self.blocks.len() {
            return;
        }
        if !self.blocks[from_idx].successors.contains(&to) {
            self.blocks[from_idx].successors.push(to);
        }
        if !self.blocks[to_idx].predecessors.contains(&from) {
            self.blocks[to_idx].predecessors.push(from);
        }
    }

    pub fn block(&self, id: u32) -> Option<&BasicBlock> {
        self.blocks.get(id as usize)
    }

    /// Blocks with no successors (method exits).
    pub fn exit_blocks(&self) -> impl Iterator<Item = &BasicBlock> {
        self.blocks.iter().filter(|b| b.successors.is_empty())
    }
}
