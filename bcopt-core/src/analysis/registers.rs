//! Register File
//!
//! Per-program-point state of the analysis: a map from register index to
//! tracked value, plus the set of all tracked values ever seen by this
//! register file. Overwriting a register drops only the register binding —
//! the value and its usage record stay alive in the all-seen table, keyed by
//! the value's structural identity.
//!
//! Because two registers holding the same value map to the same table slot,
//! a use recorded through either register is visible through both.

use std::collections::{HashMap, HashSet};

use crate::analysis::tracked::{join_distinct, MergedStore, TrackedKey, TrackedUses};
use crate::ir::Reg;

/// Registers plus the all-seen value table.
///
/// An absent register is bottom.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegisterSet {
    registers: HashMap<Reg, TrackedKey>,
    all_uses: HashMap<TrackedKey, TrackedUses>,
}

impl RegisterSet {
    pub fn new() -> Self {
        RegisterSet::default()
    }

    /// Place a tracked value into register `reg`, remembering it in the
    /// all-seen table.
    ///
    /// If a value with the same identity is already known, the existing
    /// record keeps its accumulated uses and the register simply points at
    /// it.
    pub fn insert(&mut self, reg: Reg, value: TrackedUses) {
        let key = value.key();
        self.all_uses.entry(key.clone()).or_insert(value);
        self.registers.insert(reg, key);
    }

    /// Point `reg` at an already-seen value (register-to-register move).
    pub fn alias(&mut self, reg: Reg, key: TrackedKey) {
        if self.all_uses.contains_key(&key) {
            self.registers.insert(reg, key);
        }
    }

    /// Set register `reg` back to bottom. The value survives in the
    /// all-seen table.
    pub fn clear(&mut self, reg: Reg) {
        self.registers.remove(&reg);
    }

    pub fn get(&self, reg: Reg) -> Option<&TrackedUses> {
        self.registers.get(&reg).and_then(|k| self.all_uses.get(k))
    }

    pub fn get_mut(&mut self, reg: Reg) -> Option<&mut TrackedUses> {
        match self.registers.get(&reg) {
            Some(key) => self.all_uses.get_mut(key),
            None => None,
        }
    }

    pub fn key_at(&self, reg: Reg) -> Option<&TrackedKey> {
        self.registers.get(&reg)
    }

    pub fn is_empty(&self, reg: Reg) -> bool {
        self.get(reg).is_none()
    }

    /// Every value this register file has ever seen.
    pub fn all_uses(&self) -> impl Iterator<Item = &TrackedUses> {
        self.all_uses.values()
    }

    pub fn record(&self, key: &TrackedKey) -> Option<&TrackedUses> {
        self.all_uses.get(key)
    }

    /// Equality of the all-seen tables (values and their usage records).
    pub fn same_uses(&self, other: &RegisterSet) -> bool {
        self.all_uses == other.all_uses
    }

    /// Whether evaluating a block from `other` instead of `self` could
    /// produce a different outcome.
    ///
    /// Register-wise: every register must be bound in both or in neither,
    /// and bound values must be pairwise consistent (in the asymmetric
    /// tracked-value sense, so a register generalized from `ObjectUses` to a
    /// covering `MergedUses` still counts as consistent).
    pub fn consistent_with(&self, other: &RegisterSet) -> bool {
        for (reg, key) in &self.registers {
            let Some(other_key) = other.registers.get(reg) else {
                return false;
            };
            match (self.all_uses.get(key), other.all_uses.get(other_key)) {
                (Some(value), Some(other_value)) => {
                    if !value.consistent_with(other_value) {
                        return false;
                    }
                }
                _ => return false,
            }
        }
        other.registers.keys().all(|reg| self.registers.contains_key(reg))
    }

    /// Join with the register file of a divergent path.
    ///
    /// Values known to both sides have their usage records path-combined. A
    /// register bound on one side only marks its value as conditionally
    /// reached; registers bound to different values on the two paths are
    /// promoted to a `MergedUses`, which is interned in `store`.
    pub fn combine_paths(&mut self, other: &RegisterSet, store: &mut MergedStore) {
        // All-seen table first: values known to both sides join pairwise
        // (which is where diverging per-field and per-call statuses degrade
        // to conditional); values known to one side only are kept as
        // recorded. Whether the value *exists* on all paths is a register
        // question, handled below at the slots.
        for (key, other_value) in &other.all_uses {
            match self.all_uses.get_mut(key) {
                Some(value) => value.combine_paths(other_value),
                None => {
                    self.all_uses.insert(key.clone(), other_value.clone());
                }
            }
        }

        // Then the register bindings.
        let regs: HashSet<Reg> = self
            .registers
            .keys()
            .chain(other.registers.keys())
            .copied()
            .collect();
        for reg in regs {
            let lhs = self.registers.get(&reg).cloned();
            let rhs = other.registers.get(&reg).cloned();
            match (lhs, rhs) {
                (Some(key), Some(other_key)) if key == other_key => {}
                (Some(key), Some(other_key)) => {
                    let (Some(a), Some(b)) = (self.all_uses.get(&key), self.all_uses.get(&other_key))
                    else {
                        continue;
                    };
                    let merged = join_distinct(a, b);
                    store.intern(&merged);
                    let merged_key = merged.key();
                    match self.all_uses.get_mut(&merged_key) {
                        Some(existing) => existing.combine_paths(&TrackedUses::Merged(merged)),
                        None => {
                            self.all_uses
                                .insert(merged_key.clone(), TrackedUses::Merged(merged));
                        }
                    }
                    self.registers.insert(reg, merged_key);
                }
                (Some(key), None) => {
                    // The other path reaches this point with the register at
                    // bottom.
                    if let Some(value) = self.all_uses.get_mut(&key) {
                        value.mark_conditionally_reached();
                    }
                }
                (None, Some(other_key)) => {
                    if let Some(value) = self.all_uses.get_mut(&other_key) {
                        value.mark_conditionally_reached();
                    }
                    self.registers.insert(reg, other_key);
                }
                (None, None) => {}
            }
        }
    }

    /// Sequential composition: `other` is the state after executing a block
    /// that started from `self`.
    ///
    /// Usage records merge (all-paths events survive); register bindings are
    /// taken from `other`, including clears — an overwritten value persists
    /// only through the all-seen table.
    pub fn merge(&mut self, other: &RegisterSet) {
        for (key, other_value) in &other.all_uses {
            match self.all_uses.get_mut(key) {
                Some(value) => value.merge(other_value),
                None => {
                    self.all_uses.insert(key.clone(), other_value.clone());
                }
            }
        }
        self.registers = other.registers.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::tracked::ObjectUses;
    use crate::analysis::FlowStatus;
    use crate::ir::{InsnId, TypeId};

    fn object(instr: u32) -> TrackedUses {
        TrackedUses::Object(ObjectUses::new(TypeId(0), InsnId(instr)))
    }

    #[test]
    fn cleared_register_keeps_value_in_all_seen() {
        let mut regs = RegisterSet::new();
        let value = object(0);
        let key = value.key();
        regs.insert(3, value);
        regs.clear(3);
        assert!(regs.is_empty(3));
        assert!(regs.record(&key).is_some());
    }

    #[test]
    fn aliased_registers_share_one_record() {
        let mut regs = RegisterSet::new();
        let value = object(0);
        let key = value.key();
        regs.insert(0, value);
        regs.alias(1, key);
        if let Some(rec) = regs.get_mut(1) {
            rec.uses_mut().fields_read.add_field(crate::ir::FieldId(0), FlowStatus::AllPaths);
        }
        assert_eq!(regs.get(0).map(|v| v.uses().fields_read.get_fields().len()), Some(1));
    }

    #[test]
    fn combine_with_bottom_conditionalizes_creation() {
        let mut regs = RegisterSet::new();
        regs.insert(0, object(0));
        let mut store = MergedStore::default();
        regs.combine_paths(&RegisterSet::new(), &mut store);
        match regs.get(0) {
            Some(TrackedUses::Object(o)) => assert_eq!(o.created_flow, FlowStatus::Conditional),
            other => panic!("expected conditional object, got {other:?}"),
        }
        assert!(store.is_empty());
    }

    #[test]
    fn divergent_registers_promote_to_merged() {
        let mut lhs = RegisterSet::new();
        lhs.insert(0, object(0));
        let mut rhs = RegisterSet::new();
        rhs.insert(0, object(1));
        let mut store = MergedStore::default();
        lhs.combine_paths(&rhs, &mut store);
        match lhs.get(0) {
            Some(TrackedUses::Merged(m)) => {
                assert_eq!(m.instrs().len(), 2);
                assert!(!m.is_nullable());
            }
            other => panic!("expected merged value, got {other:?}"),
        }
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn repeated_promotions_intern_to_one_record() {
        let mut store = MergedStore::default();
        for _ in 0..2 {
            let mut lhs = RegisterSet::new();
            lhs.insert(0, object(0));
            let mut rhs = RegisterSet::new();
            rhs.insert(0, object(1));
            lhs.combine_paths(&rhs, &mut store);
        }
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn consistency_follows_generalization_direction() {
        let mut narrow = RegisterSet::new();
        narrow.insert(0, object(0));
        let mut wide = RegisterSet::new();
        wide.insert(0, object(0));
        let mut rhs = RegisterSet::new();
        rhs.insert(0, object(1));
        let mut store = MergedStore::default();
        wide.combine_paths(&rhs, &mut store);
        assert!(narrow.consistent_with(&wide));
        assert!(!wide.consistent_with(&narrow));
    }

    #[test]
    fn merge_adopts_later_register_bindings() {
        let mut before = RegisterSet::new();
        before.insert(0, object(0));
        let mut after = before.clone();
        after.clear(0);
        after.insert(1, object(1));
        before.merge(&after);
        assert!(before.is_empty(0));
        assert!(before.get(1).is_some());
        assert!(before.record(&TrackedKey::Object(InsnId(0))).is_some());
    }
}
