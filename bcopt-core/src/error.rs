//! Error Types
//!
//! Library-boundary errors for the optimizer core. Structural contract
//! violations (zero-thread pools, malformed block graphs) are programmer
//! errors and fail fast instead of surfacing here.

use thiserror::Error;

/// Optimizer core error types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OptimizerError {
    /// A configuration entry names a type the program does not define.
    #[error("unknown type: {0}")]
    UnknownType(String),

    /// A configuration entry names a method the program does not define.
    ///
    /// Method references use the `Owner.name` form.
    #[error("unknown method reference: {0}")]
    UnknownMethod(String),

    /// A program description is structurally invalid.
    #[error("malformed program: {0}")]
    MalformedProgram(String),
}
