//! Static stage definitions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A named unit of pipeline work and how it is scheduled.
///
/// Definitions are loaded once per mode and never change during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDefinition {
    /// Unique stage name within its mode.
    pub name: String,
    /// Tag telling the stage executor what kind of work this is.
    #[serde(rename = "executor")]
    pub executor_kind: String,
    /// Names of stages that must complete first.
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
    /// Whether the stage may run concurrently with other ready stages.
    #[serde(default)]
    pub parallel: bool,
    /// Whether the approval gate is consulted before the stage runs.
    #[serde(default)]
    pub approval_required: bool,
    /// Output path patterns, relative to the target directory, that must
    /// exist for a completed run of this stage to be trusted on resume.
    #[serde(default)]
    pub outputs: Vec<String>,
}

impl StageDefinition {
    /// Creates a stage definition with no dependencies.
    #[must_use]
    pub fn new(name: impl Into<String>, executor_kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            executor_kind: executor_kind.into(),
            depends_on: BTreeSet::new(),
            parallel: false,
            approval_required: false,
            outputs: Vec::new(),
        }
    }

    /// Adds a dependency.
    #[must_use]
    pub fn with_dependency(mut self, dep: impl Into<String>) -> Self {
        self.depends_on.insert(dep.into());
        self
    }

    /// Sets the dependencies.
    #[must_use]
    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Marks the stage as parallel-eligible.
    #[must_use]
    pub fn parallel(mut self) -> Self {
        self.parallel = true;
        self
    }

    /// Requires approval before the stage runs.
    #[must_use]
    pub fn requires_approval(mut self) -> Self {
        self.approval_required = true;
        self
    }

    /// Adds a required output pattern.
    #[must_use]
    pub fn with_output(mut self, pattern: impl Into<String>) -> Self {
        self.outputs.push(pattern.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_builder() {
        let def = StageDefinition::new("design", "architect")
            .with_dependencies(["prd", "srs"])
            .parallel()
            .requires_approval()
            .with_output("docs/sds.md");

        assert_eq!(def.depends_on.len(), 2);
        assert!(def.parallel);
        assert!(def.approval_required);
        assert_eq!(def.outputs, vec!["docs/sds.md".to_string()]);
    }

    #[test]
    fn test_definition_from_yaml_defaults() {
        let yaml = "name: prd\nexecutor: writer\n";
        let def: StageDefinition = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(def.executor_kind, "writer");
        assert!(def.depends_on.is_empty());
        assert!(!def.parallel);
        assert!(!def.approval_required);
    }
}
