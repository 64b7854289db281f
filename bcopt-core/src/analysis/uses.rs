//! Usage Records
//!
//! Each tracked value owns four sub-records describing how the value was
//! used: field writes, field reads, method calls, and escapes. A fifth record
//! with the same shape as escapes holds escapes into callees the analysis was
//! configured to treat as non-leaking.
//!
//! All records follow the shared three-operator discipline:
//!
//! - `combine_paths(other)`: this record and `other` come from divergent
//!   paths of the same predecessor. Entries present on both sides keep
//!   `AllPaths` only if both sides agree; entries present on one side only
//!   degrade to `Conditional`.
//! - `merge(other)`: `other` is the record of a block executed after this
//!   one. Entries present on either side are kept, and `AllPaths` on either
//!   side survives.
//! - `consistent_with(other)`: structural comparison used as the fixpoint
//!   convergence test.

use std::collections::{HashMap, HashSet};

use crate::analysis::{FlowStatus, SourceStatus};
use crate::ir::{FieldId, InsnId, MethodId, Reg};

/// One field's write record: which registers stored into it (and through
/// which instructions), whether the write happens on all paths, and how many
/// registers supplied the value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSet {
    /// Store instructions grouped by the register the value came from
    pub regs: HashMap<Reg, HashSet<InsnId>>,
    pub set: FlowStatus,
    pub source: SourceStatus,
}

pub type FieldSetMap = HashMap<FieldId, FieldSet>;
pub type FieldReadMap = HashMap<FieldId, FlowStatus>;

/// One callee's call record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodCall {
    pub call: FlowStatus,
    /// (call instruction, receiver/argument register) pairs
    pub call_sites: HashSet<(InsnId, Reg)>,
}

pub type CallMap = HashMap<MethodId, MethodCall>;
pub type ArrayWriteMap = HashMap<InsnId, FlowStatus>;

fn combine_field_set(entry: &mut FieldSet, other: &FieldSet) {
    // Paths that disagree about the source registers leave the source
    // status unclear; identical register sets keep the wider of the two.
    let same_regs = {
        let lhs: HashSet<Reg> = entry.regs.keys().copied().collect();
        let rhs: HashSet<Reg> = other.regs.keys().copied().collect();
        lhs == rhs
    };
    entry.source = if same_regs {
        match (entry.source, other.source) {
            (SourceStatus::Unclear, _) | (_, SourceStatus::Unclear) => SourceStatus::Unclear,
            (SourceStatus::MultipleReg, _) | (_, SourceStatus::MultipleReg) => {
                SourceStatus::MultipleReg
            }
            _ => SourceStatus::OneReg,
        }
    } else {
        SourceStatus::Unclear
    };
    for (reg, instrs) in &other.regs {
        entry.regs.entry(*reg).or_default().extend(instrs.iter().copied());
    }
    entry.set = entry.set.combine(other.set);
}

fn merge_field_set(entry: &mut FieldSet, other: &FieldSet) {
    for (reg, instrs) in &other.regs {
        entry.regs.entry(*reg).or_default().extend(instrs.iter().copied());
    }
    entry.set = entry.set.merge(other.set);
    entry.source = match (entry.source, other.source) {
        (SourceStatus::Unclear, _) | (_, SourceStatus::Unclear) => SourceStatus::Unclear,
        _ if entry.regs.len() > 1 => SourceStatus::MultipleReg,
        _ => SourceStatus::OneReg,
    };
}

fn combine_field_set_map(map: &mut FieldSetMap, other: &FieldSetMap) {
    for entry in map.iter_mut().filter(|(f, _)| !other.contains_key(*f)) {
        entry.1.set = FlowStatus::Conditional;
    }
    for (field, ofs) in other {
        match map.get_mut(field) {
            Some(entry) => combine_field_set(entry, ofs),
            None => {
                let mut copy = ofs.clone();
                copy.set = FlowStatus::Conditional;
                map.insert(*field, copy);
            }
        }
    }
}

fn merge_field_set_map(map: &mut FieldSetMap, other: &FieldSetMap) {
    for (field, ofs) in other {
        match map.get_mut(field) {
            Some(entry) => merge_field_set(entry, ofs),
            None => {
                map.insert(*field, ofs.clone());
            }
        }
    }
}

fn combine_call_map(map: &mut CallMap, other: &CallMap) {
    for entry in map.iter_mut().filter(|(m, _)| !other.contains_key(*m)) {
        entry.1.call = FlowStatus::Conditional;
    }
    for (method, ocall) in other {
        match map.get_mut(method) {
            Some(entry) => {
                entry.call = entry.call.combine(ocall.call);
                entry.call_sites.extend(ocall.call_sites.iter().copied());
            }
            None => {
                let mut copy = ocall.clone();
                copy.call = FlowStatus::Conditional;
                map.insert(*method, copy);
            }
        }
    }
}

fn merge_call_map(map: &mut CallMap, other: &CallMap) {
    for (method, ocall) in other {
        match map.get_mut(method) {
            Some(entry) => {
                entry.call = entry.call.merge(ocall.call);
                entry.call_sites.extend(ocall.call_sites.iter().copied());
            }
            None => {
                map.insert(*method, ocall.clone());
            }
        }
    }
}

/// Field writes either to or through a tracked value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldWriteRegs {
    fields: FieldSetMap,
}

impl FieldWriteRegs {
    pub fn add_field(&mut self, field: FieldId, reg: Reg, instr: InsnId, flow: FlowStatus) {
        match self.fields.get_mut(&field) {
            Some(entry) => {
                let new_reg = !entry.regs.contains_key(&reg);
                entry.regs.entry(reg).or_default().insert(instr);
                if new_reg && entry.source == SourceStatus::OneReg {
                    entry.source = SourceStatus::MultipleReg;
                }
                // A later write that happens on all paths covers the field
                // regardless of earlier conditional writes.
                entry.set = entry.set.merge(flow);
            }
            None => {
                let mut regs: HashMap<Reg, HashSet<InsnId>> = HashMap::new();
                regs.entry(reg).or_default().insert(instr);
                self.fields.insert(
                    field,
                    FieldSet {
                        regs,
                        set: flow,
                        source: SourceStatus::OneReg,
                    },
                );
            }
        }
    }

    pub fn get_fields(&self) -> &FieldSetMap {
        &self.fields
    }

    pub fn combine_paths(&mut self, other: &FieldWriteRegs) {
        combine_field_set_map(&mut self.fields, &other.fields);
    }

    pub fn merge(&mut self, other: &FieldWriteRegs) {
        merge_field_set_map(&mut self.fields, &other.fields);
    }

    pub fn consistent_with(&self, other: &FieldWriteRegs) -> bool {
        self.fields == other.fields
    }
}

/// Fields read from a tracked value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldReads {
    fields: FieldReadMap,
}

impl FieldReads {
    pub fn add_field(&mut self, field: FieldId, flow: FlowStatus) {
        match self.fields.get_mut(&field) {
            Some(status) => *status = status.merge(flow),
            None => {
                self.fields.insert(field, flow);
            }
        }
    }

    pub fn get_fields(&self) -> &FieldReadMap {
        &self.fields
    }

    pub fn combine_paths(&mut self, other: &FieldReads) {
        for entry in self.fields.iter_mut().filter(|(f, _)| !other.fields.contains_key(*f)) {
            *entry.1 = FlowStatus::Conditional;
        }
        for (field, ostatus) in &other.fields {
            match self.fields.get_mut(field) {
                Some(status) => *status = status.combine(*ostatus),
                None => {
                    self.fields.insert(*field, FlowStatus::Conditional);
                }
            }
        }
    }

    pub fn merge(&mut self, other: &FieldReads) {
        for (field, ostatus) in &other.fields {
            match self.fields.get_mut(field) {
                Some(status) => *status = status.merge(*ostatus),
                None => {
                    self.fields.insert(*field, *ostatus);
                }
            }
        }
    }

    pub fn consistent_with(&self, other: &FieldReads) -> bool {
        self.fields == other.fields
    }
}

/// Method calls made on a tracked value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MethodCalls {
    calls: CallMap,
}

impl MethodCalls {
    pub fn add_call(&mut self, method: MethodId, in_reg: Reg, instr: InsnId, flow: FlowStatus) {
        match self.calls.get_mut(&method) {
            Some(entry) => {
                entry.call = entry.call.merge(flow);
                entry.call_sites.insert((instr, in_reg));
            }
            None => {
                let mut call_sites = HashSet::new();
                call_sites.insert((instr, in_reg));
                self.calls.insert(method, MethodCall { call: flow, call_sites });
            }
        }
    }

    pub fn get_calls(&self) -> &CallMap {
        &self.calls
    }

    pub fn combine_paths(&mut self, other: &MethodCalls) {
        combine_call_map(&mut self.calls, &other.calls);
    }

    pub fn merge(&mut self, other: &MethodCalls) {
        merge_call_map(&mut self.calls, &other.calls);
    }

    pub fn consistent_with(&self, other: &MethodCalls) -> bool {
        self.calls == other.calls
    }
}

/// The ways a tracked value escapes the current method.
///
/// Channels are disjoint: a given instruction lands in exactly one of them,
/// and for a given value in either the escape record or the safe-escape
/// record, never both.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Escapes {
    /// Present when the value is returned; carries whether the return is on
    /// every path
    pub via_return: Option<FlowStatus>,
    /// The return instructions themselves
    pub return_instrs: HashSet<InsnId>,
    pub via_array_write: ArrayWriteMap,
    pub via_field_set: FieldSetMap,
    pub via_vmethod_call: CallMap,
    pub via_smethod_call: CallMap,
}

impl Escapes {
    pub fn add_return(&mut self, instr: InsnId, flow: FlowStatus) {
        self.via_return = Some(match self.via_return {
            Some(status) => status.merge(flow),
            None => flow,
        });
        self.return_instrs.insert(instr);
    }

    pub fn add_array(&mut self, instr: InsnId, flow: FlowStatus) {
        match self.via_array_write.get_mut(&instr) {
            Some(status) => *status = status.merge(flow),
            None => {
                self.via_array_write.insert(instr, flow);
            }
        }
    }

    pub fn add_field_set(&mut self, field: FieldId, reg: Reg, instr: InsnId, flow: FlowStatus) {
        match self.via_field_set.get_mut(&field) {
            Some(entry) => {
                let new_reg = !entry.regs.contains_key(&reg);
                entry.regs.entry(reg).or_default().insert(instr);
                if new_reg && entry.source == SourceStatus::OneReg {
                    entry.source = SourceStatus::MultipleReg;
                }
                entry.set = entry.set.merge(flow);
            }
            None => {
                let mut regs: HashMap<Reg, HashSet<InsnId>> = HashMap::new();
                regs.entry(reg).or_default().insert(instr);
                self.via_field_set.insert(
                    field,
                    FieldSet {
                        regs,
                        set: flow,
                        source: SourceStatus::OneReg,
                    },
                );
            }
        }
    }

    pub fn add_vmethod(&mut self, method: MethodId, object: Reg, instr: InsnId, flow: FlowStatus) {
        add_call_site(&mut self.via_vmethod_call, method, object, instr, flow);
    }

    pub fn add_smethod(&mut self, method: MethodId, object: Reg, instr: InsnId, flow: FlowStatus) {
        add_call_site(&mut self.via_smethod_call, method, object, instr, flow);
    }

    pub fn combine_paths(&mut self, other: &Escapes) {
        self.via_return = match (self.via_return, other.via_return) {
            (Some(a), Some(b)) => Some(a.combine(b)),
            (Some(_), None) | (None, Some(_)) => Some(FlowStatus::Conditional),
            (None, None) => None,
        };
        self.return_instrs.extend(other.return_instrs.iter().copied());
        for entry in self
            .via_array_write
            .iter_mut()
            .filter(|(i, _)| !other.via_array_write.contains_key(*i))
        {
            *entry.1 = FlowStatus::Conditional;
        }
        for (instr, ostatus) in &other.via_array_write {
            match self.via_array_write.get_mut(instr) {
                Some(status) => *status = status.combine(*ostatus),
                None => {
                    self.via_array_write.insert(*instr, FlowStatus::Conditional);
                }
            }
        }
        combine_field_set_map(&mut self.via_field_set, &other.via_field_set);
        combine_call_map(&mut self.via_vmethod_call, &other.via_vmethod_call);
        combine_call_map(&mut self.via_smethod_call, &other.via_smethod_call);
    }

    pub fn merge(&mut self, other: &Escapes) {
        self.via_return = match (self.via_return, other.via_return) {
            (Some(a), Some(b)) => Some(a.merge(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        };
        self.return_instrs.extend(other.return_instrs.iter().copied());
        for (instr, ostatus) in &other.via_array_write {
            match self.via_array_write.get_mut(instr) {
                Some(status) => *status = status.merge(*ostatus),
                None => {
                    self.via_array_write.insert(*instr, *ostatus);
                }
            }
        }
        merge_field_set_map(&mut self.via_field_set, &other.via_field_set);
        merge_call_map(&mut self.via_vmethod_call, &other.via_vmethod_call);
        merge_call_map(&mut self.via_smethod_call, &other.via_smethod_call);
    }

    pub fn consistent_with(&self, other: &Escapes) -> bool {
        self == other
    }

    /// All instructions recorded in any escape channel.
    pub fn escape_instructions(&self) -> HashSet<InsnId> {
        let mut out: HashSet<InsnId> = self.return_instrs.iter().copied().collect();
        out.extend(self.via_array_write.keys().copied());
        for entry in self.via_field_set.values() {
            for instrs in entry.regs.values() {
                out.extend(instrs.iter().copied());
            }
        }
        for call in self.via_vmethod_call.values().chain(self.via_smethod_call.values()) {
            out.extend(call.call_sites.iter().map(|(instr, _)| *instr));
        }
        out
    }
}

fn add_call_site(map: &mut CallMap, method: MethodId, object: Reg, instr: InsnId, flow: FlowStatus) {
    match map.get_mut(&method) {
        Some(entry) => {
            entry.call = entry.call.merge(flow);
            entry.call_sites.insert((instr, object));
        }
        None => {
            let mut call_sites = HashSet::new();
            call_sites.insert((instr, object));
            map.insert(method, MethodCall { call: flow, call_sites });
        }
    }
}

/// The full per-value use record: the four sub-records plus safe escapes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UsageRecord {
    pub method_calls: MethodCalls,
    pub fields_set: FieldWriteRegs,
    pub fields_read: FieldReads,
    pub escapes: Escapes,
    pub safe_escapes: Escapes,
}

impl UsageRecord {
    pub fn combine_paths(&mut self, other: &UsageRecord) {
        self.method_calls.combine_paths(&other.method_calls);
        self.fields_set.combine_paths(&other.fields_set);
        self.fields_read.combine_paths(&other.fields_read);
        self.escapes.combine_paths(&other.escapes);
        self.safe_escapes.combine_paths(&other.safe_escapes);
    }

    pub fn merge(&mut self, other: &UsageRecord) {
        self.method_calls.merge(&other.method_calls);
        self.fields_set.merge(&other.fields_set);
        self.fields_read.merge(&other.fields_read);
        self.escapes.merge(&other.escapes);
        self.safe_escapes.merge(&other.safe_escapes);
    }

    pub fn consistent_with(&self, other: &UsageRecord) -> bool {
        self.method_calls.consistent_with(&other.method_calls)
            && self.fields_set.consistent_with(&other.fields_set)
            && self.fields_read.consistent_with(&other.fields_read)
            && self.escapes.consistent_with(&other.escapes)
            && self.safe_escapes.consistent_with(&other.safe_escapes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(n: u32) -> FieldId {
        FieldId(n)
    }

    fn insn(n: u32) -> InsnId {
        InsnId(n)
    }

    #[test]
    fn field_write_source_status_tracks_registers() {
        let mut writes = FieldWriteRegs::default();
        writes.add_field(field(0), 1, insn(0), FlowStatus::AllPaths);
        assert_eq!(writes.get_fields()[&field(0)].source, SourceStatus::OneReg);
        writes.add_field(field(0), 2, insn(1), FlowStatus::AllPaths);
        assert_eq!(
            writes.get_fields()[&field(0)].source,
            SourceStatus::MultipleReg
        );
    }

    #[test]
    fn combine_degrades_one_sided_write_to_conditional() {
        let mut writes = FieldWriteRegs::default();
        writes.add_field(field(0), 1, insn(0), FlowStatus::AllPaths);
        writes.combine_paths(&FieldWriteRegs::default());
        assert_eq!(writes.get_fields()[&field(0)].set, FlowStatus::Conditional);
    }

    #[test]
    fn combine_with_disagreeing_registers_is_unclear() {
        let mut lhs = FieldWriteRegs::default();
        lhs.add_field(field(0), 1, insn(0), FlowStatus::AllPaths);
        let mut rhs = FieldWriteRegs::default();
        rhs.add_field(field(0), 2, insn(1), FlowStatus::AllPaths);
        lhs.combine_paths(&rhs);
        assert_eq!(lhs.get_fields()[&field(0)].source, SourceStatus::Unclear);
        assert_eq!(lhs.get_fields()[&field(0)].regs.len(), 2);
    }

    #[test]
    fn merge_keeps_all_paths_writes() {
        let mut earlier = FieldWriteRegs::default();
        earlier.add_field(field(0), 1, insn(0), FlowStatus::AllPaths);
        let mut later = FieldWriteRegs::default();
        later.add_field(field(0), 1, insn(1), FlowStatus::Conditional);
        earlier.merge(&later);
        assert_eq!(earlier.get_fields()[&field(0)].set, FlowStatus::AllPaths);
    }

    #[test]
    fn combine_and_merge_are_idempotent() {
        let mut record = UsageRecord::default();
        record.fields_set.add_field(field(0), 1, insn(0), FlowStatus::AllPaths);
        record.fields_read.add_field(field(1), FlowStatus::AllPaths);
        record.escapes.add_return(insn(2), FlowStatus::AllPaths);

        let other = record.clone();
        let mut once = record.clone();
        once.combine_paths(&other);
        let mut twice = once.clone();
        twice.combine_paths(&other);
        assert_eq!(once, twice);

        let mut merged_once = record.clone();
        merged_once.merge(&other);
        let mut merged_twice = merged_once.clone();
        merged_twice.merge(&other);
        assert_eq!(merged_once, merged_twice);
    }

    #[test]
    fn escape_instructions_collects_all_channels() {
        let mut escapes = Escapes::default();
        escapes.add_return(insn(0), FlowStatus::AllPaths);
        escapes.add_array(insn(1), FlowStatus::AllPaths);
        escapes.add_field_set(field(0), 3, insn(2), FlowStatus::AllPaths);
        escapes.add_vmethod(MethodId(0), 4, insn(3), FlowStatus::AllPaths);
        escapes.add_smethod(MethodId(1), 5, insn(4), FlowStatus::AllPaths);
        let instrs = escapes.escape_instructions();
        assert_eq!(instrs.len(), 5);
    }
}
