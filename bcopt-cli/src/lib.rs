//! bcopt-cli
//!
//! Command handlers and the JSON program-description loader for the `bcopt`
//! binary.

pub mod commands;
pub mod loader;
