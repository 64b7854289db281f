//! Tracked-Value Lattice
//!
//! The abstract domain of the analysis. A register either holds nothing of
//! interest (bottom, represented by absence) or one of two tracked variants:
//!
//! - [`ObjectUses`]: a value produced by exactly one construction
//!   instruction
//! - [`MergedUses`]: a value produced by one of a set of construction
//!   instructions, with a nullable flag recording that null was also
//!   observed in the same register
//!
//! Identity is structural: an `ObjectUses` is identified by its construction
//! instruction and a `MergedUses` by its instruction set ([`TrackedKey`]).
//! Keying all-seen tables and the promoted store on this identity is what
//! makes merged-value interning automatic — two independent promotions of the
//! same instruction set land on the same slot — and that convergence is what
//! terminates the fixpoint.

use std::collections::BTreeSet;
use std::collections::HashMap;

use crate::analysis::uses::UsageRecord;
use crate::analysis::FlowStatus;
use crate::ir::{InsnId, TypeId};

/// Structural identity of a tracked value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TrackedKey {
    /// Identified by the construction instruction
    Object(InsnId),
    /// Identified by the sorted set of construction instructions
    Merged(Box<[InsnId]>),
}

/// A value created by a single construction instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectUses {
    instr: InsnId,
    class_used: TypeId,
    /// Whether the construction happens on every path to the current point
    pub created_flow: FlowStatus,
    pub uses: UsageRecord,
}

impl ObjectUses {
    pub fn new(class_used: TypeId, instr: InsnId) -> Self {
        ObjectUses {
            instr,
            class_used,
            created_flow: FlowStatus::AllPaths,
            uses: UsageRecord::default(),
        }
    }

    pub fn instr(&self) -> InsnId {
        self.instr
    }

    pub fn class_used(&self) -> TypeId {
        self.class_used
    }

    pub fn same_instr(&self, other: &ObjectUses) -> bool {
        self.instr == other.instr
    }
}

/// A value created by one of a set of construction instructions.
///
/// The class set can be smaller than the instruction set (two sites may
/// construct the same type). `nullable` records that the register may also
/// hold null, which is only discoverable during analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedUses {
    instrs: BTreeSet<InsnId>,
    classes: BTreeSet<TypeId>,
    nullable: bool,
    pub uses: UsageRecord,
}

impl MergedUses {
    pub fn instrs(&self) -> &BTreeSet<InsnId> {
        &self.instrs
    }

    pub fn classes(&self) -> &BTreeSet<TypeId> {
        &self.classes
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn set_is_nullable(&mut self) {
        self.nullable = true;
    }

    pub fn same_instrs(&self, other: &MergedUses) -> bool {
        self.instrs == other.instrs
    }

    pub fn key(&self) -> TrackedKey {
        TrackedKey::Merged(self.instrs.iter().copied().collect())
    }
}

/// A tracked value: the tagged sum over the two variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackedUses {
    Object(ObjectUses),
    Merged(MergedUses),
}

impl TrackedUses {
    pub fn key(&self) -> TrackedKey {
        match self {
            TrackedUses::Object(o) => TrackedKey::Object(o.instr),
            TrackedUses::Merged(m) => m.key(),
        }
    }

    pub fn uses(&self) -> &UsageRecord {
        match self {
            TrackedUses::Object(o) => &o.uses,
            TrackedUses::Merged(m) => &m.uses,
        }
    }

    pub fn uses_mut(&mut self) -> &mut UsageRecord {
        match self {
            TrackedUses::Object(o) => &mut o.uses,
            TrackedUses::Merged(m) => &mut m.uses,
        }
    }

    /// Flow status attached to uses of this value at record time.
    ///
    /// A use of a conditionally-created object, or of a merged value that may
    /// be null, cannot hold on all paths.
    pub fn use_flow(&self) -> FlowStatus {
        match self {
            TrackedUses::Object(o) => o.created_flow,
            TrackedUses::Merged(m) => {
                if m.nullable {
                    FlowStatus::Conditional
                } else {
                    FlowStatus::AllPaths
                }
            }
        }
    }

    /// Join with the same value observed on a divergent path.
    ///
    /// Callers guarantee `other.key() == self.key()`; joining values with
    /// different identities goes through [`join_distinct`] instead.
    pub fn combine_paths(&mut self, other: &TrackedUses) {
        match (&mut *self, other) {
            (TrackedUses::Object(a), TrackedUses::Object(b)) => {
                a.created_flow = a.created_flow.combine(b.created_flow);
            }
            (TrackedUses::Merged(a), TrackedUses::Merged(b)) => {
                a.nullable = a.nullable || b.nullable;
            }
            _ => {}
        }
        self.uses_mut().combine_paths(other.uses());
    }

    /// Sequential composition with the same value from a later block state.
    pub fn merge(&mut self, other: &TrackedUses) {
        match (&mut *self, other) {
            (TrackedUses::Object(a), TrackedUses::Object(b)) => {
                a.created_flow = a.created_flow.merge(b.created_flow);
            }
            (TrackedUses::Merged(a), TrackedUses::Merged(b)) => {
                a.nullable = a.nullable || b.nullable;
            }
            _ => {}
        }
        self.uses_mut().merge(other.uses());
    }

    /// Whether this value could stand in for `other` without widening the
    /// answer.
    ///
    /// The relation is deliberately asymmetric: `ObjectUses(i)` is consistent
    /// with a `MergedUses` containing `i`, but not the other way around.
    pub fn consistent_with(&self, other: &TrackedUses) -> bool {
        match (self, other) {
            (TrackedUses::Object(a), TrackedUses::Object(b)) => a.instr == b.instr,
            (TrackedUses::Object(a), TrackedUses::Merged(m)) => m.instrs.contains(&a.instr),
            (TrackedUses::Merged(_), TrackedUses::Object(_)) => false,
            (TrackedUses::Merged(a), TrackedUses::Merged(b)) => {
                a.instrs == b.instrs && (!a.nullable || b.nullable)
            }
        }
    }

    /// Record that a divergent path reached this point with the register at
    /// bottom: the value may not exist here.
    pub fn mark_conditionally_reached(&mut self) {
        match self {
            TrackedUses::Object(o) => o.created_flow = FlowStatus::Conditional,
            TrackedUses::Merged(m) => m.nullable = true,
        }
    }
}

/// Join two tracked values with *different* identities into a `MergedUses`.
///
/// The instruction and class sets are unioned; a conditionally-created
/// object contributes nullability (the merged variant has no per-site
/// creation flag, so "may not exist" lands in the nullable bit). The usage
/// records are path-combined.
pub(crate) fn join_distinct(a: &TrackedUses, b: &TrackedUses) -> MergedUses {
    let mut instrs = BTreeSet::new();
    let mut classes = BTreeSet::new();
    let mut nullable = false;
    for side in [a, b] {
        match side {
            TrackedUses::Object(o) => {
                instrs.insert(o.instr);
                classes.insert(o.class_used);
                nullable = nullable || o.created_flow == FlowStatus::Conditional;
            }
            TrackedUses::Merged(m) => {
                instrs.extend(m.instrs.iter().copied());
                classes.extend(m.classes.iter().copied());
                nullable = nullable || m.nullable;
            }
        }
    }
    let mut uses = a.uses().clone();
    uses.combine_paths(b.uses());
    MergedUses {
        instrs,
        classes,
        nullable,
        uses,
    }
}

/// Interning store for merged values promoted during lattice operations.
///
/// Keyed by instruction set, so repeated promotions of the same set share
/// one record. The store survives the fixpoint and becomes the per-method
/// merged report.
#[derive(Debug, Clone, Default)]
pub struct MergedStore {
    map: HashMap<TrackedKey, MergedUses>,
}

impl MergedStore {
    /// Register a promotion. The first promotion of a given instruction set
    /// wins the slot; later ones fold their nullability in.
    pub fn intern(&mut self, merged: &MergedUses) {
        match self.map.get_mut(&merged.key()) {
            Some(entry) => {
                if merged.nullable {
                    entry.set_is_nullable();
                }
            }
            None => {
                self.map.insert(merged.key(), merged.clone());
            }
        }
    }

    /// Replace a stored record with its final state after the fixpoint.
    pub fn update(&mut self, merged: &MergedUses) {
        if let Some(entry) = self.map.get_mut(&merged.key()) {
            *entry = merged.clone();
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = &MergedUses> {
        self.map.values()
    }

    pub fn into_values(self) -> Vec<MergedUses> {
        self.map.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(instr: u32, ty: u32) -> TrackedUses {
        TrackedUses::Object(ObjectUses::new(TypeId(ty), InsnId(instr)))
    }

    #[test]
    fn consistent_with_is_reflexive() {
        let o = object(0, 0);
        assert!(o.consistent_with(&o));
        let m = TrackedUses::Merged(join_distinct(&object(0, 0), &object(1, 1)));
        assert!(m.consistent_with(&m));
    }

    #[test]
    fn consistent_with_is_asymmetric_across_variants() {
        let o = object(0, 0);
        let m = TrackedUses::Merged(join_distinct(&object(0, 0), &object(1, 1)));
        assert!(o.consistent_with(&m));
        assert!(!m.consistent_with(&o));
    }

    #[test]
    fn object_inconsistent_with_unrelated_sites() {
        let o = object(0, 0);
        let other = object(1, 0);
        assert!(!o.consistent_with(&other));
        let m = TrackedUses::Merged(join_distinct(&object(1, 0), &object(2, 0)));
        assert!(!o.consistent_with(&m));
    }

    #[test]
    fn nullable_consistency_is_directional() {
        let mut a = join_distinct(&object(0, 0), &object(1, 1));
        let b = a.clone();
        a.set_is_nullable();
        // A nullable answer is not covered by a non-nullable one.
        assert!(!TrackedUses::Merged(a.clone()).consistent_with(&TrackedUses::Merged(b.clone())));
        assert!(TrackedUses::Merged(b).consistent_with(&TrackedUses::Merged(a)));
    }

    #[test]
    fn join_distinct_unions_sites_and_classes() {
        let merged = join_distinct(&object(0, 0), &object(1, 1));
        assert_eq!(merged.instrs().len(), 2);
        assert_eq!(merged.classes().len(), 2);
        assert!(!merged.is_nullable());
        assert!(merged.instrs().len() >= 2);
    }

    #[test]
    fn join_of_conditional_object_is_nullable() {
        let mut conditional = object(0, 0);
        conditional.mark_conditionally_reached();
        let merged = join_distinct(&conditional, &object(1, 1));
        assert!(merged.is_nullable());
    }

    #[test]
    fn same_class_sites_collapse_in_class_set() {
        let merged = join_distinct(&object(0, 7), &object(1, 7));
        assert_eq!(merged.instrs().len(), 2);
        assert_eq!(merged.classes().len(), 1);
    }

    #[test]
    fn store_interns_by_instruction_set() {
        let mut store = MergedStore::default();
        let first = join_distinct(&object(0, 0), &object(1, 1));
        let mut second = join_distinct(&object(0, 0), &object(1, 1));
        second.set_is_nullable();
        store.intern(&first);
        store.intern(&second);
        assert_eq!(store.len(), 1);
        // Later promotions of the same set fold nullability into the slot.
        assert!(store.values().next().is_some_and(|m| m.is_nullable()));
    }

    #[test]
    fn combine_paths_is_idempotent() {
        let mut value = object(0, 0);
        let snapshot = value.clone();
        value.combine_paths(&snapshot);
        let once = value.clone();
        value.combine_paths(&snapshot);
        assert_eq!(once, value);
    }
}
