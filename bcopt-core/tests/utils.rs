//! Test Utilities
//!
//! Builders for small hand-made programs: a tracked hierarchy under a common
//! `Base` type, host classes, and per-method CFGs assembled from instruction
//! lists.

use bcopt_core::config::{AnalysisConfig, ResolvedConfig};
use bcopt_core::ir::{ControlFlowGraph, Instruction, MethodId, Program, TypeId};

/// A program under construction plus the ids tests usually need.
pub struct TestProgram {
    pub program: Program,
    pub base: TypeId,
}

impl TestProgram {
    pub fn new() -> Self {
        let mut program = Program::new();
        let base = program.add_type("Base", None);
        TestProgram { program, base }
    }

    /// A class whose type extends `Base` (and is therefore tracked).
    pub fn tracked_class(&mut self, name: &str) -> TypeId {
        let ty = self.program.add_type(name, Some(self.base));
        self.program.add_class(ty);
        ty
    }

    /// A class outside the tracked hierarchy.
    pub fn plain_class(&mut self, name: &str) -> TypeId {
        let ty = self.program.add_type(name, None);
        self.program.add_class(ty);
        ty
    }

    pub fn method(&mut self, owner: TypeId, name: &str) -> MethodId {
        self.program.add_method(owner, name)
    }

    /// Attach a straight-line body to `method`.
    pub fn straight_line(&mut self, method: MethodId, insns: Vec<Instruction>) {
        self.blocks(method, vec![insns], &[], 0);
    }

    /// Attach a multi-block body to `method`.
    ///
    /// Blocks get ids in list order; `edges` are (from, to) pairs.
    pub fn blocks(
        &mut self,
        method: MethodId,
        blocks: Vec<Vec<Instruction>>,
        edges: &[(u32, u32)],
        entry: u32,
    ) {
        let mut cfg = ControlFlowGraph::new();
        cfg.entry = entry;
        for insns in blocks {
            let ids = insns
                .into_iter()
                .map(|insn| self.program.add_insn(insn))
                .collect();
            cfg.add_block(ids);
        }
        for &(from, to) in edges {
            cfg.add_edge(from, to);
        }
        self.program.set_method_cfg(method, cfg);
    }

    /// Config tracking descendants of `Base` with the given safe escapes
    /// (in `Owner.name` form) on two worker threads.
    pub fn config(&self, safe_escapes: &[&str]) -> ResolvedConfig {
        let mut config = AnalysisConfig::new("Base");
        config.safe_escapes = safe_escapes.iter().map(|s| s.to_string()).collect();
        config.num_threads = Some(2);
        config
            .resolve(&self.program)
            .expect("test config should resolve")
    }
}
