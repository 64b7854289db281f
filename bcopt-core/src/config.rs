//! Analysis Configuration
//!
//! The externally-supplied knobs of the class-init analysis: the common
//! parent type whose descendants are tracked, the set of callees considered
//! non-leaking, an optional method-name restriction, and the worker count.
//!
//! `AnalysisConfig` is the serde-facing form with everything by name;
//! `resolve` checks the names against a loaded program and produces the
//! id-based form the driver consumes.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::OptimizerError;
use crate::ir::{MethodId, Program, TypeId};
use crate::workqueue::default_num_threads;

/// Name-based configuration, typically loaded from JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Common parent type; strict descendants are tracked
    pub parent: String,
    /// Callees (in `Owner.name` form) that do not leak tracked arguments
    #[serde(default)]
    pub safe_escapes: Vec<String>,
    /// When set, only methods with this name are analyzed
    #[serde(default)]
    pub method_filter: Option<String>,
    /// Worker threads; defaults to the available parallelism
    #[serde(default)]
    pub num_threads: Option<usize>,
}

/// Id-based configuration, checked against a program.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub parent: TypeId,
    pub safe_escapes: HashSet<MethodId>,
    pub method_filter: Option<String>,
    pub num_threads: usize,
}

impl AnalysisConfig {
    pub fn new(parent: impl Into<String>) -> Self {
        AnalysisConfig {
            parent: parent.into(),
            safe_escapes: Vec::new(),
            method_filter: None,
            num_threads: None,
        }
    }

    /// Resolve all names against `program`.
    ///
    /// # Errors
    /// Returns an error when the parent type, a safe-escape owner type, or a
    /// safe-escape method does not exist in the program.
    pub fn resolve(&self, program: &Program) -> Result<ResolvedConfig, OptimizerError> {
        let parent = program
            .find_type(&self.parent)
            .ok_or_else(|| OptimizerError::UnknownType(self.parent.clone()))?;

        let mut safe_escapes = HashSet::new();
        for entry in &self.safe_escapes {
            let (owner_name, method_name) = entry
                .rsplit_once('.')
                .ok_or_else(|| OptimizerError::UnknownMethod(entry.clone()))?;
            let owner = program
                .find_type(owner_name)
                .ok_or_else(|| OptimizerError::UnknownType(owner_name.to_string()))?;
            let method = program
                .find_method(owner, method_name)
                .ok_or_else(|| OptimizerError::UnknownMethod(entry.clone()))?;
            safe_escapes.insert(method);
        }

        Ok(ResolvedConfig {
            parent,
            safe_escapes,
            method_filter: self.method_filter.clone(),
            num_threads: self.num_threads.unwrap_or_else(default_num_threads),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_checks_names() {
        let mut program = Program::new();
        let parent = program.add_type("Base", None);
        let child = program.add_type("Child", Some(parent));
        program.add_class(child);
        program.add_method(child, "helper");

        let mut config = AnalysisConfig::new("Base");
        config.safe_escapes.push("Child.helper".to_string());
        let resolved = config.resolve(&program).expect("resolvable config");
        assert_eq!(resolved.parent, parent);
        assert_eq!(resolved.safe_escapes.len(), 1);

        let missing = AnalysisConfig::new("NoSuchType");
        assert!(matches!(
            missing.resolve(&program),
            Err(OptimizerError::UnknownType(_))
        ));

        let mut bad_method = AnalysisConfig::new("Base");
        bad_method.safe_escapes.push("Child.nope".to_string());
        assert!(matches!(
            bad_method.resolve(&program),
            Err(OptimizerError::UnknownMethod(_))
        ));
    }
}
