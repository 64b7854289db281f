//! Program Driver
//!
//! Walks the class hierarchy to find every tracked type (strict descendants
//! of the configured common parent), schedules each method of the program
//! through the work queue, and folds the per-method summaries into the
//! global init index and merged store.
//!
//! Per-method analyses are independent: workers never write the same index
//! slot, so the only locking in the whole run is inside the work queue.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::analysis::init_index::InitLocation;
use crate::analysis::method::analyze_method;
use crate::analysis::tracked::{MergedUses, ObjectUses};
use crate::config::ResolvedConfig;
use crate::ir::{MethodId, Program, TypeId};
use crate::workqueue::{WorkQueue, WorkerState};

pub type TypeToInit = HashMap<TypeId, InitLocation>;
pub type MergedUsesMap = HashMap<TypeId, HashMap<MethodId, Vec<MergedUses>>>;

/// Counters collected over one analysis run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisStats {
    /// Classes found below the configured parent
    pub tracked_classes: usize,
    /// Methods scheduled through the work queue
    pub methods_scheduled: usize,
    /// Methods that constructed at least one tracked type
    pub methods_with_inits: usize,
    /// Total construction events recorded
    pub total_inits: u64,
    /// Merged values promoted across all methods
    pub merged_values: usize,
}

/// Whole-program index of tracked-type constructions and their uses.
pub struct ClassInitCounter {
    type_to_inits: TypeToInit,
    stored_mergeds: MergedUsesMap,
    stats: AnalysisStats,
}

impl ClassInitCounter {
    /// Run the analysis over every method of `program`.
    pub fn run(program: &Program, config: &ResolvedConfig) -> Self {
        let tracked_types = find_children(program, config.parent);
        let mut type_to_inits: TypeToInit = tracked_types
            .iter()
            .map(|&ty| (ty, InitLocation::new(ty)))
            .collect();

        let mut work_items: Vec<(TypeId, MethodId)> = Vec::new();
        for (_, class) in program.classes() {
            for &method in &class.methods {
                if let Some(filter) = &config.method_filter {
                    if program.method(method).name != *filter {
                        continue;
                    }
                }
                work_items.push((class.ty, method));
            }
        }

        log::info!(
            "class-init analysis: {} tracked classes under {}, {} methods on {} threads",
            tracked_types.len(),
            program.type_name(config.parent),
            work_items.len(),
            config.num_threads
        );

        let stats_seed = AnalysisStats {
            tracked_classes: tracked_types.len(),
            methods_scheduled: work_items.len(),
            ..AnalysisStats::default()
        };

        let safe_escapes = &config.safe_escapes;
        let tracked = &tracked_types;
        let mut queue = WorkQueue::new(
            move |_state: &mut WorkerState<(TypeId, MethodId), ()>, (container, method)| {
                analyze_method(program, tracked, safe_escapes, container, method)
                    .into_iter()
                    .collect::<Vec<_>>()
            },
            |mut acc: Vec<_>, mut part: Vec<_>| {
                acc.append(&mut part);
                acc
            },
            |_| (),
            config.num_threads,
        );
        for item in work_items {
            queue.add_item(item);
        }
        let summaries = queue.run_all(Vec::new());

        let mut counter = ClassInitCounter {
            type_to_inits: TypeToInit::new(),
            stored_mergeds: MergedUsesMap::new(),
            stats: stats_seed,
        };
        for summary in summaries {
            counter.stats.methods_with_inits += 1;
            for event in &summary.init_events {
                if let Some(location) = type_to_inits.get_mut(&event.class_used) {
                    location.add_init(summary.container, summary.method, event.instr);
                }
            }
            for object in &summary.final_objects {
                if let Some(location) = type_to_inits.get_mut(&object.class_used()) {
                    location.update_object(summary.container, summary.method, object);
                }
            }
            if !summary.merged.is_empty() {
                counter.stats.merged_values += summary.merged.len();
                counter
                    .stored_mergeds
                    .entry(summary.container)
                    .or_default()
                    .entry(summary.method)
                    .or_default()
                    .extend(summary.merged);
            }
        }
        counter.stats.total_inits = type_to_inits
            .values()
            .map(|location| u64::from(location.get_count()))
            .sum();
        counter.type_to_inits = type_to_inits;

        log::info!(
            "class-init analysis complete: {} inits in {} methods, {} merged values",
            counter.stats.total_inits,
            counter.stats.methods_with_inits,
            counter.stats.merged_values
        );
        counter
    }

    /// Init index per tracked type.
    pub fn type_to_inits(&self) -> &TypeToInit {
        &self.type_to_inits
    }

    /// Promoted merged values per (containing type, method).
    pub fn merged_uses(&self) -> &MergedUsesMap {
        &self.stored_mergeds
    }

    pub fn stats(&self) -> &AnalysisStats {
        &self.stats
    }

    /// All single-site and merged records observed within one method.
    pub fn all_uses_from(
        &self,
        container: TypeId,
        method: MethodId,
    ) -> (Vec<ObjectUses>, Vec<MergedUses>) {
        let mut objects = Vec::new();
        for location in self.type_to_inits.values() {
            location.all_uses_from(container, method, &mut objects);
        }
        let merged = self
            .stored_mergeds
            .get(&container)
            .and_then(|methods| methods.get(&method))
            .cloned()
            .unwrap_or_default();
        (objects, merged)
    }

    /// Human-readable dump of the whole index.
    pub fn debug_show_table(&self, program: &Program) -> String {
        let mut out = String::new();
        for (ty, location) in &self.type_to_inits {
            let _ = writeln!(
                out,
                "type {} ({} inits)",
                program.type_name(*ty),
                location.get_count()
            );
            for (container, methods) in location.get_inits() {
                for (method, sites) in methods {
                    let _ = writeln!(out, "  in {}", program.method_display(*method));
                    debug_assert_eq!(program.method(*method).owner, *container);
                    for (instr, records) in sites {
                        for record in records {
                            let _ = writeln!(
                                out,
                                "    site {:?}: created={:?} writes={} reads={} calls={} \
                                 escapes={} safe_escapes={}",
                                instr,
                                record.created_flow,
                                record.uses.fields_set.get_fields().len(),
                                record.uses.fields_read.get_fields().len(),
                                record.uses.method_calls.get_calls().len(),
                                record.uses.escapes.escape_instructions().len(),
                                record.uses.safe_escapes.escape_instructions().len()
                            );
                        }
                    }
                }
            }
        }
        for (container, methods) in &self.stored_mergeds {
            for (method, mergeds) in methods {
                for merged in mergeds {
                    let _ = writeln!(
                        out,
                        "merged in {} over {} sites of {} classes (nullable: {}) [container {}]",
                        program.method_display(*method),
                        merged.instrs().len(),
                        merged.classes().len(),
                        merged.is_nullable(),
                        program.type_name(*container)
                    );
                }
            }
        }
        out
    }
}

/// Collect the types of all classes strictly below `parent`.
fn find_children(program: &Program, parent: TypeId) -> HashSet<TypeId> {
    let mut tracked = HashSet::new();
    for (_, class) in program.classes() {
        if program.is_descendant(class.ty, parent) {
            tracked.insert(class.ty);
        }
    }
    tracked
}
