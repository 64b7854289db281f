//! bcopt-core
//!
//! Core of a bytecode optimizer for a stack-based class/method IR. The crate
//! provides:
//!
//! - An in-memory IR view: classes with supertype links, methods with
//!   control flow graphs, and category-tagged instructions (`ir`)
//! - A class-initialization may-analysis that tracks every instance of a
//!   configured class hierarchy created inside a method, together with all
//!   field reads/writes, method calls, and escapes observed on it
//!   (`analysis`)
//! - A work-stealing map/reduce worker pool used to run the per-method
//!   analyses across a whole program in parallel (`workqueue`)
//!
//! The analysis is intraprocedural: each method is analyzed independently,
//! which is what makes the per-method work units freely schedulable across
//! worker threads.

pub mod analysis;
pub mod config;
pub mod error;
pub mod ir;
pub mod workqueue;
