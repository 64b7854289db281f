//! Per-Method Analysis
//!
//! The single-block transfer function and the worklist fixpoint that drives
//! it over a method's CFG.
//!
//! # Fixpoint Algorithm
//! 1. Seed the worklist with the entry block and an empty register file.
//! 2. For each popped block, compute its input as the `combine_paths` fold
//!    over the predecessors' final register files (an unvisited predecessor
//!    contributes bottom).
//! 3. Skip the block if it was visited before, the new input is
//!    `consistent_with` the previous one, and the usage records are
//!    unchanged. Otherwise run the transfer function and push the
//!    successors.
//!
//! Loops converge because tracked-value identities are structural (promoted
//! merged values with the same instruction set are the same record), flow
//! statuses only move from `AllPaths` to `Conditional` under joins, and the
//! record sets only grow. Back-edges conditionalize operations that do not
//! dominate their use naturally: the first pass through a back-edge combines
//! an unvisited predecessor's bottom contribution.
//!
//! A safety cap on worklist pops guards against malformed block graphs; the
//! analysis logs a diagnostic and stops iterating if it trips.

use std::collections::{HashMap, HashSet, VecDeque};

use bitvec::prelude::*;

use crate::analysis::registers::RegisterSet;
use crate::analysis::tracked::{MergedStore, MergedUses, ObjectUses, TrackedUses};
use crate::ir::{BasicBlock, InsnId, MethodId, Opcode, Program, TypeId};

/// One execution of a construction transfer: the creation event the init
/// index records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitEvent {
    pub instr: InsnId,
    pub class_used: TypeId,
}

/// Result of analyzing one method, ready to be folded into the global index.
#[derive(Debug, Clone)]
pub struct MethodSummary {
    /// Type of the class containing the analyzed method
    pub container: TypeId,
    pub method: MethodId,
    /// Creation events in the order the transfer function saw them;
    /// re-analyzed blocks contribute repeat events
    pub init_events: Vec<InitEvent>,
    /// Final usage records of single-site values
    pub final_objects: Vec<ObjectUses>,
    /// Merged values promoted during the analysis
    pub merged: Vec<MergedUses>,
}

/// Per-block fixpoint state.
struct BlockState {
    input: RegisterSet,
    final_result: RegisterSet,
}

/// Analyze one method, tracking constructions of `tracked_types`.
///
/// Returns `None` for methods without a CFG (abstract/native) and for
/// methods that construct no tracked type anywhere — the common case, which
/// a cheap prescan handles without running the fixpoint.
pub fn analyze_method(
    program: &Program,
    tracked_types: &HashSet<TypeId>,
    safe_escapes: &HashSet<MethodId>,
    container: TypeId,
    method: MethodId,
) -> Option<MethodSummary> {
    let cfg = program.method(method).cfg.as_ref()?;

    let constructs_tracked = cfg.blocks.iter().any(|block| {
        block.instructions.iter().any(|&id| {
            let insn = program.insn(id);
            insn.opcode == Opcode::Construct
                && insn.type_ref.is_some_and(|ty| tracked_types.contains(&ty))
        })
    });
    if !constructs_tracked {
        return None;
    }
    log::debug!("analyzing {}", program.method_display(method));

    let block_count = cfg.blocks.len();
    let mut states: HashMap<u32, BlockState> = HashMap::new();
    let mut store = MergedStore::default();
    let mut events: Vec<InitEvent> = Vec::new();

    let mut worklist: VecDeque<u32> = VecDeque::new();
    let mut on_queue: BitVec<u32> = bitvec![u32, Lsb0; 0; block_count];
    worklist.push_back(cfg.entry);
    if (cfg.entry as usize) < block_count {
        on_queue.set(cfg.entry as usize, true);
    }

    // Monotonicity bounds the iteration; the cap only trips on malformed
    // graphs.
    let safety_cap = block_count * 16 + 64;
    let mut pops = 0usize;

    while let Some(block_id) = worklist.pop_front() {
        if (block_id as usize) < block_count {
            on_queue.set(block_id as usize, false);
        }
        pops += 1;
        if pops > safety_cap {
            log::warn!(
                "fixpoint safety cap ({} pops) exceeded in {}; stopping iteration early",
                safety_cap,
                program.method_display(method)
            );
            break;
        }
        let Some(block) = cfg.block(block_id) else {
            continue;
        };

        let mut input: Option<RegisterSet> = None;
        for &pred in &block.predecessors {
            let pred_final = states
                .get(&pred)
                .map(|s| s.final_result.clone())
                .unwrap_or_default();
            match input.as_mut() {
                Some(acc) => acc.combine_paths(&pred_final, &mut store),
                None => input = Some(pred_final),
            }
        }
        let input = input.unwrap_or_default();

        if let Some(state) = states.get(&block_id) {
            if input.consistent_with(&state.input) && input.same_uses(&state.input) {
                continue;
            }
        }

        let mut output = input.clone();
        transfer_block(program, tracked_types, safe_escapes, block, &mut output, &mut events);

        let mut final_result = input.clone();
        final_result.merge(&output);
        states.insert(
            block_id,
            BlockState {
                input,
                final_result,
            },
        );

        for &succ in &block.successors {
            let idx = succ as usize;
            if idx < block_count && !on_queue[idx] {
                on_queue.set(idx, true);
                worklist.push_back(succ);
            }
        }
    }

    // The method answer is the path-join over every exit state; with no exit
    // block (the whole method loops) every visited block contributes.
    let mut fold_ids: Vec<u32> = cfg.exit_blocks().map(|b| b.id).collect();
    if fold_ids.is_empty() {
        log::debug!(
            "{} has no exit block; folding over all visited blocks",
            program.method_display(method)
        );
        fold_ids = states.keys().copied().collect();
    }
    let mut method_final: Option<RegisterSet> = None;
    for id in fold_ids {
        let Some(state) = states.get(&id) else {
            continue;
        };
        match method_final.as_mut() {
            Some(acc) => acc.combine_paths(&state.final_result, &mut store),
            None => method_final = Some(state.final_result.clone()),
        }
    }
    let method_final = method_final.unwrap_or_default();

    let mut final_objects = Vec::new();
    for value in method_final.all_uses() {
        match value {
            TrackedUses::Object(object) => final_objects.push(object.clone()),
            TrackedUses::Merged(merged) => store.update(merged),
        }
    }

    Some(MethodSummary {
        container,
        method,
        init_events: events,
        final_objects,
        merged: store.into_values(),
    })
}

/// Transfer function for a single basic block.
///
/// Mutates `regs` in place, so on return it holds the block-exit state with
/// every usage record updated for the instructions executed here.
fn transfer_block(
    program: &Program,
    tracked_types: &HashSet<TypeId>,
    safe_escapes: &HashSet<MethodId>,
    block: &BasicBlock,
    regs: &mut RegisterSet,
    events: &mut Vec<InitEvent>,
) {
    for &insn_id in &block.instructions {
        let insn = program.insn(insn_id);

        // The destination is overwritten before the instruction's effect is
        // applied; the prior value persists only via the all-seen table.
        if let Some(dest) = insn.dest {
            regs.clear(dest);
        }

        match insn.opcode {
            Opcode::Construct => {
                let (Some(ty), Some(dest)) = (insn.type_ref, insn.dest) else {
                    continue;
                };
                if tracked_types.contains(&ty) {
                    events.push(InitEvent {
                        instr: insn_id,
                        class_used: ty,
                    });
                    regs.insert(dest, TrackedUses::Object(ObjectUses::new(ty, insn_id)));
                }
            }
            Opcode::Move => {
                let (Some(dest), Some(&src)) = (insn.dest, insn.srcs.first()) else {
                    continue;
                };
                if let Some(key) = regs.key_at(src).cloned() {
                    regs.alias(dest, key);
                }
            }
            Opcode::FieldWrite => {
                let Some(field) = insn.field_ref else { continue };
                let (Some(&value_reg), receiver) = (insn.srcs.first(), insn.srcs.get(1).copied())
                else {
                    continue;
                };
                if let Some(value) = regs.get_mut(value_reg) {
                    // A tracked value stored into a field is both a write
                    // and a potential escape through that field.
                    let flow = value.use_flow();
                    let uses = value.uses_mut();
                    uses.fields_set.add_field(field, value_reg, insn_id, flow);
                    uses.escapes.add_field_set(field, value_reg, insn_id, flow);
                } else if let Some(receiver_value) = receiver.and_then(|r| regs.get_mut(r)) {
                    let flow = receiver_value.use_flow();
                    receiver_value
                        .uses_mut()
                        .fields_set
                        .add_field(field, value_reg, insn_id, flow);
                }
            }
            Opcode::FieldRead => {
                let Some(field) = insn.field_ref else { continue };
                let Some(&receiver) = insn.srcs.first() else {
                    continue;
                };
                // Field loads are not constructions: the destination stays
                // bottom even when the field's type is tracked.
                if let Some(value) = regs.get_mut(receiver) {
                    let flow = value.use_flow();
                    value.uses_mut().fields_read.add_field(field, flow);
                }
            }
            Opcode::InvokeVirtual => {
                let Some(callee) = insn.method_ref else { continue };
                if let Some(&receiver) = insn.srcs.first() {
                    if let Some(value) = regs.get_mut(receiver) {
                        let flow = value.use_flow();
                        value
                            .uses_mut()
                            .method_calls
                            .add_call(callee, receiver, insn_id, flow);
                    }
                }
                let safe = safe_escapes.contains(&callee);
                for &arg in insn.srcs.iter().skip(1) {
                    if let Some(value) = regs.get_mut(arg) {
                        let flow = value.use_flow();
                        let uses = value.uses_mut();
                        let escapes = if safe { &mut uses.safe_escapes } else { &mut uses.escapes };
                        escapes.add_vmethod(callee, arg, insn_id, flow);
                    }
                }
            }
            Opcode::InvokeStatic => {
                let Some(callee) = insn.method_ref else { continue };
                let safe = safe_escapes.contains(&callee);
                for &arg in insn.srcs.iter() {
                    if let Some(value) = regs.get_mut(arg) {
                        let flow = value.use_flow();
                        let uses = value.uses_mut();
                        let escapes = if safe { &mut uses.safe_escapes } else { &mut uses.escapes };
                        escapes.add_smethod(callee, arg, insn_id, flow);
                    }
                }
            }
            Opcode::Return => {
                if let Some(value) = insn.srcs.first().and_then(|&src| regs.get_mut(src)) {
                    let flow = value.use_flow();
                    value.uses_mut().escapes.add_return(insn_id, flow);
                }
            }
            Opcode::ArrayStore => {
                if let Some(value) = insn.srcs.first().and_then(|&src| regs.get_mut(src)) {
                    let flow = value.use_flow();
                    value.uses_mut().escapes.add_array(insn_id, flow);
                }
            }
            // Null-comparison refinement on branches stays conservative:
            // nullability is only introduced at joins with bottom.
            Opcode::Branch | Opcode::Other => {}
        }
    }
}
