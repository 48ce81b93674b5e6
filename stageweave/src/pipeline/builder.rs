//! Pipeline builder with validation.

use super::StageGraph;
use crate::core::StageDefinition;
use crate::errors::{CycleDetectedError, ErrorInfo, PipelineValidationError};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

static STAGE_NAME: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9_-]*$").ok());

/// Returns true if `name` is a valid stage name.
#[must_use]
pub fn is_valid_stage_name(name: &str) -> bool {
    STAGE_NAME.as_ref().is_some_and(|re| re.is_match(name))
}

/// Collects the stage definitions of one mode and validates them as a DAG.
///
/// Stages may reference dependencies declared later in the list; all checks
/// run in [`PipelineBuilder::build`].
#[derive(Debug, Clone, Default)]
pub struct PipelineBuilder {
    mode: String,
    stages: Vec<StageDefinition>,
}

impl PipelineBuilder {
    /// Creates a builder for a pipeline mode.
    #[must_use]
    pub fn new(mode: impl Into<String>) -> Self {
        Self {
            mode: mode.into(),
            stages: Vec::new(),
        }
    }

    /// Appends a stage definition.
    #[must_use]
    pub fn stage(mut self, definition: StageDefinition) -> Self {
        self.stages.push(definition);
        self
    }

    /// Appends several stage definitions in order.
    #[must_use]
    pub fn stages(mut self, definitions: impl IntoIterator<Item = StageDefinition>) -> Self {
        self.stages.extend(definitions);
        self
    }

    /// Returns the mode name.
    #[must_use]
    pub fn mode(&self) -> &str {
        &self.mode
    }

    /// Returns the number of stages added so far.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Validates the definitions and builds the graph.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty pipeline, an invalid or
    /// duplicate name, a dependency on an unknown stage, or a cycle.
    pub fn build(self) -> Result<StageGraph, PipelineValidationError> {
        if self.stages.is_empty() {
            return Err(PipelineValidationError::new(format!(
                "Pipeline mode '{}' has no stages",
                self.mode
            ))
            .with_error_info(
                ErrorInfo::new("DAG-EMPTY", "Cannot build an empty pipeline")
                    .with_fix_hint("Declare at least one stage for the mode."),
            ));
        }

        let mut seen = HashSet::new();
        for stage in &self.stages {
            if !is_valid_stage_name(&stage.name) {
                return Err(PipelineValidationError::new(format!(
                    "Invalid stage name '{}'",
                    stage.name
                ))
                .with_stages(vec![stage.name.clone()])
                .with_error_info(
                    ErrorInfo::new("DAG-INVALID-NAME", format!("Invalid stage name '{}'", stage.name))
                        .with_fix_hint(
                            "Use lowercase letters, digits, '-' and '_', starting with a letter or digit.",
                        ),
                ));
            }
            if !seen.insert(stage.name.as_str()) {
                return Err(PipelineValidationError::new(format!(
                    "Stage '{}' is declared more than once",
                    stage.name
                ))
                .with_stages(vec![stage.name.clone()])
                .with_error_info(
                    ErrorInfo::new("DAG-DUPLICATE", format!("Duplicate stage '{}'", stage.name))
                        .with_fix_hint("Rename or remove one of the duplicate stages."),
                ));
            }
        }

        for stage in &self.stages {
            for dep in &stage.depends_on {
                if dep == &stage.name {
                    return Err(CycleDetectedError::new(vec![dep.clone(), dep.clone()]).into());
                }
                if !seen.contains(dep.as_str()) {
                    return Err(PipelineValidationError::new(format!(
                        "Stage '{}' depends on unknown stage '{}'",
                        stage.name, dep
                    ))
                    .with_stages(vec![stage.name.clone(), dep.clone()])
                    .with_error_info(
                        ErrorInfo::new("DAG-MISSING-DEP", format!("Dependency '{dep}' not found"))
                            .with_fix_hint("Declare the dependency in the same mode or remove it."),
                    ));
                }
            }
        }

        self.detect_cycles()?;

        Ok(StageGraph::new(self.mode, self.stages))
    }

    fn detect_cycles(&self) -> Result<(), CycleDetectedError> {
        let by_name: HashMap<&str, &StageDefinition> =
            self.stages.iter().map(|s| (s.name.as_str(), s)).collect();
        let mut visited = HashSet::new();
        let mut on_path = HashSet::new();
        let mut path = Vec::new();

        for stage in &self.stages {
            if !visited.contains(stage.name.as_str()) {
                if let Some(cycle) =
                    dfs_cycle(&stage.name, &by_name, &mut visited, &mut on_path, &mut path)
                {
                    return Err(CycleDetectedError::new(cycle));
                }
            }
        }
        Ok(())
    }
}

fn dfs_cycle<'a>(
    node: &'a str,
    by_name: &HashMap<&'a str, &'a StageDefinition>,
    visited: &mut HashSet<&'a str>,
    on_path: &mut HashSet<&'a str>,
    path: &mut Vec<&'a str>,
) -> Option<Vec<String>> {
    visited.insert(node);
    on_path.insert(node);
    path.push(node);

    if let Some(&stage) = by_name.get(node) {
        for dep in &stage.depends_on {
            let dep = dep.as_str();
            if on_path.contains(dep) {
                let start = path.iter().position(|n| *n == dep).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].iter().map(|s| (*s).to_string()).collect();
                cycle.push(dep.to_string());
                return Some(cycle);
            }
            if !visited.contains(dep) {
                if let Some(cycle) = dfs_cycle(dep, by_name, visited, on_path, path) {
                    return Some(cycle);
                }
            }
        }
    }

    path.pop();
    on_path.remove(node);
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(name: &str) -> StageDefinition {
        StageDefinition::new(name, "writer")
    }

    #[test]
    fn test_stage_name_pattern() {
        assert!(is_valid_stage_name("prd"));
        assert!(is_valid_stage_name("0-setup_env"));
        assert!(!is_valid_stage_name(""));
        assert!(!is_valid_stage_name("-leading"));
        assert!(!is_valid_stage_name("Upper"));
        assert!(!is_valid_stage_name("has space"));
    }

    #[test]
    fn test_build_success() {
        let graph = PipelineBuilder::new("greenfield")
            .stage(stage("prd"))
            .stage(stage("srs").with_dependency("prd"))
            .build()
            .unwrap();

        assert_eq!(graph.mode(), "greenfield");
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn test_forward_dependency_allowed() {
        let graph = PipelineBuilder::new("m")
            .stage(stage("b").with_dependency("a"))
            .stage(stage("a"))
            .build()
            .unwrap();

        assert_eq!(graph.execution_order(), &["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_empty_pipeline() {
        let err = PipelineBuilder::new("m").build().unwrap_err();
        assert_eq!(err.code(), Some("DAG-EMPTY"));
    }

    #[test]
    fn test_invalid_name() {
        let err = PipelineBuilder::new("m").stage(stage("Bad Name")).build().unwrap_err();
        assert_eq!(err.code(), Some("DAG-INVALID-NAME"));
    }

    #[test]
    fn test_duplicate_name() {
        let err = PipelineBuilder::new("m")
            .stage(stage("a"))
            .stage(stage("a"))
            .build()
            .unwrap_err();
        assert_eq!(err.code(), Some("DAG-DUPLICATE"));
    }

    #[test]
    fn test_missing_dependency() {
        let err = PipelineBuilder::new("m")
            .stage(stage("a").with_dependency("ghost"))
            .build()
            .unwrap_err();

        assert_eq!(err.code(), Some("DAG-MISSING-DEP"));
        assert_eq!(err.stages, vec!["a".to_string(), "ghost".to_string()]);
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let err = PipelineBuilder::new("m")
            .stage(stage("a").with_dependency("a"))
            .build()
            .unwrap_err();
        assert_eq!(err.code(), Some("DAG-CYCLE"));
    }

    #[test]
    fn test_cycle_reports_path() {
        let err = PipelineBuilder::new("m")
            .stage(stage("a").with_dependency("c"))
            .stage(stage("b").with_dependency("a"))
            .stage(stage("c").with_dependency("b"))
            .build()
            .unwrap_err();

        assert_eq!(err.code(), Some("DAG-CYCLE"));
        assert_eq!(err.stages.first(), err.stages.last());
        assert_eq!(err.stages.len(), 4);
    }
}
