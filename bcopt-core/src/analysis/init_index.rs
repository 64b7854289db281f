//! Init Index
//!
//! Per-tracked-type index of construction sites: containing class type →
//! method → construction instruction → usage records. One record is appended
//! per execution of a construction transfer, so an instruction revisited
//! through a loop back-edge can own several records; the final usage data is
//! attached to the most recent one when the method's analysis completes.

use std::collections::HashMap;

use crate::analysis::tracked::ObjectUses;
use crate::ir::{InsnId, MethodId, TypeId};

pub type InitMap = HashMap<TypeId, HashMap<MethodId, HashMap<InsnId, Vec<ObjectUses>>>>;

/// All construction sites of one tracked type, with usage data.
#[derive(Debug, Clone)]
pub struct InitLocation {
    typ: TypeId,
    inits: InitMap,
    count: u32,
}

impl InitLocation {
    pub fn new(typ: TypeId) -> Self {
        InitLocation {
            typ,
            inits: InitMap::new(),
            count: 0,
        }
    }

    /// The tracked type this location indexes.
    pub fn typ(&self) -> TypeId {
        self.typ
    }

    /// Total number of construction events recorded.
    pub fn get_count(&self) -> u32 {
        self.count
    }

    /// Record a construction of this type at `instr` inside
    /// `container.caller`, returning the fresh record.
    pub fn add_init(
        &mut self,
        container: TypeId,
        caller: MethodId,
        instr: InsnId,
    ) -> &mut ObjectUses {
        self.count += 1;
        let records = self
            .inits
            .entry(container)
            .or_default()
            .entry(caller)
            .or_default()
            .entry(instr)
            .or_default();
        records.push(ObjectUses::new(self.typ, instr));
        let last = records.len() - 1;
        &mut records[last]
    }

    /// Attach the final usage record of `object` to its construction site.
    pub fn update_object(&mut self, container: TypeId, caller: MethodId, object: &ObjectUses) {
        if let Some(records) = self
            .inits
            .get_mut(&container)
            .and_then(|methods| methods.get_mut(&caller))
            .and_then(|sites| sites.get_mut(&object.instr()))
        {
            if let Some(last) = records.last_mut() {
                *last = object.clone();
            }
        }
    }

    pub fn get_inits(&self) -> &InitMap {
        &self.inits
    }

    /// Append every record from `container.method` to `out`.
    pub fn all_uses_from(&self, container: TypeId, method: MethodId, out: &mut Vec<ObjectUses>) {
        if let Some(sites) = self
            .inits
            .get(&container)
            .and_then(|methods| methods.get(&method))
        {
            for records in sites.values() {
                out.extend(records.iter().cloned());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_keep_the_construction_instruction() {
        let mut location = InitLocation::new(TypeId(5));
        let record = location.add_init(TypeId(1), MethodId(0), InsnId(9));
        assert_eq!(record.instr(), InsnId(9));
        assert_eq!(record.class_used(), TypeId(5));
        assert_eq!(location.get_count(), 1);
    }

    #[test]
    fn revisits_append_additional_records() {
        let mut location = InitLocation::new(TypeId(5));
        location.add_init(TypeId(1), MethodId(0), InsnId(9));
        location.add_init(TypeId(1), MethodId(0), InsnId(9));
        assert_eq!(location.get_count(), 2);
        let mut out = Vec::new();
        location.all_uses_from(TypeId(1), MethodId(0), &mut out);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|r| r.instr() == InsnId(9)));
    }

    #[test]
    fn update_object_replaces_the_latest_record() {
        let mut location = InitLocation::new(TypeId(5));
        location.add_init(TypeId(1), MethodId(0), InsnId(9));
        let mut final_record = ObjectUses::new(TypeId(5), InsnId(9));
        final_record.created_flow = crate::analysis::FlowStatus::Conditional;
        location.update_object(TypeId(1), MethodId(0), &final_record);
        let mut out = Vec::new();
        location.all_uses_from(TypeId(1), MethodId(0), &mut out);
        assert_eq!(out[0].created_flow, crate::analysis::FlowStatus::Conditional);
    }
}
