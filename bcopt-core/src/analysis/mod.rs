//! Class-Initialization Tracking Analysis
//!
//! This module identifies instances of a configured class hierarchy created
//! inside each method and tracks every subsequent interaction with them:
//! field writes, field reads, method calls, and the points where an instance
//! escapes the method (returns, array stores, field stores into other
//! objects, argument passing).
//!
//! The abstract domain is a lattice of tracked values:
//!
//! ```text
//!            bottom (absent)
//!           /               \
//!   nullable-tracked     ObjectUses
//!           \               /
//!              MergedUses
//! ```
//!
//! `ObjectUses` models values created by exactly one instruction;
//! `MergedUses` models values created by one of a set of instructions, with
//! a flag recording whether null was also observed in the same register.
//! Top would be a `MergedUses` over every creation site in the program and
//! is never materialized.
//!
//! Every analysis datum supports the same three operations:
//!
//! - `combine_paths`: join of data from divergent control flow paths
//! - `merge`: sequential composition of data from consecutive blocks
//! - `consistent_with`: whether one result could stand in for the other,
//!   which is the convergence test of the per-method fixpoint
//!
//! Because this is a may-analysis, joins are conservative about selecting
//! `Conditional`.

pub mod class_init;
pub mod init_index;
pub mod method;
pub mod registers;
pub mod tracked;
pub mod uses;

pub use class_init::{AnalysisStats, ClassInitCounter, MergedUsesMap, TypeToInit};
pub use init_index::InitLocation;
pub use method::{analyze_method, MethodSummary};
pub use registers::RegisterSet;
pub use tracked::{MergedStore, MergedUses, ObjectUses, TrackedKey, TrackedUses};
pub use uses::{Escapes, FieldReads, FieldSet, FieldWriteRegs, MethodCall, MethodCalls, UsageRecord};

/// Whether an event holds on every path to the observation point or only on
/// some of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FlowStatus {
    /// Holds on some but not all paths
    Conditional = 0,
    /// Holds on every path from the method entry
    AllPaths = 1,
}

impl FlowStatus {
    /// Join across divergent paths: `AllPaths` survives only when both sides
    /// have it.
    pub fn combine(self, other: FlowStatus) -> FlowStatus {
        if self == FlowStatus::AllPaths && other == FlowStatus::AllPaths {
            FlowStatus::AllPaths
        } else {
            FlowStatus::Conditional
        }
    }

    /// Sequential composition: an event that holds on all paths in either of
    /// two consecutive block states holds on all paths overall.
    pub fn merge(self, other: FlowStatus) -> FlowStatus {
        if self == FlowStatus::AllPaths || other == FlowStatus::AllPaths {
            FlowStatus::AllPaths
        } else {
            FlowStatus::Conditional
        }
    }
}

/// How many registers supplied the value of a field write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SourceStatus {
    /// All stores came through a single register
    OneReg = 0,
    /// Stores came through more than one known register
    MultipleReg = 1,
    /// Different paths disagree about the source registers
    Unclear = 2,
}
