//! Validated stage graph for one pipeline mode.

use crate::core::StageDefinition;
use crate::errors::PipelineValidationError;
use std::collections::{BTreeSet, HashMap, HashSet};

/// The stage definitions of a mode, known to form a DAG.
///
/// Built by [`super::PipelineBuilder`]; never constructed unvalidated.
#[derive(Debug, Clone)]
pub struct StageGraph {
    mode: String,
    stages: Vec<StageDefinition>,
    index: HashMap<String, usize>,
    execution_order: Vec<String>,
}

impl StageGraph {
    pub(crate) fn new(mode: String, stages: Vec<StageDefinition>) -> Self {
        let index = stages
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.clone(), i))
            .collect();
        let execution_order = topological_order(&stages);
        Self {
            mode,
            stages,
            index,
            execution_order,
        }
    }

    /// Returns the mode name.
    #[must_use]
    pub fn mode(&self) -> &str {
        &self.mode
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if the graph has no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Returns the definitions in declaration order.
    #[must_use]
    pub fn definitions(&self) -> &[StageDefinition] {
        &self.stages
    }

    /// Looks up a stage by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&StageDefinition> {
        self.index.get(name).map(|&i| &self.stages[i])
    }

    /// Returns true if the graph declares `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Position of a stage in declaration order.
    #[must_use]
    pub fn declaration_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Topological order that keeps declaration order where dependencies allow.
    #[must_use]
    pub fn execution_order(&self) -> &[String] {
        &self.execution_order
    }

    /// Every stage ordered before `name` in [`Self::execution_order`].
    ///
    /// Used to treat earlier stages as done when starting from `name`.
    pub fn stages_before(&self, name: &str) -> Result<BTreeSet<String>, PipelineValidationError> {
        let position = self
            .execution_order
            .iter()
            .position(|s| s == name)
            .ok_or_else(|| PipelineValidationError::unknown_stage(&self.mode, name))?;
        Ok(self.execution_order[..position].iter().cloned().collect())
    }

    /// Stages that depend on `name` directly or transitively.
    #[must_use]
    pub fn dependents(&self, name: &str) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        let mut frontier = vec![name.to_string()];
        while let Some(current) = frontier.pop() {
            for stage in &self.stages {
                if stage.depends_on.contains(&current) && found.insert(stage.name.clone()) {
                    frontier.push(stage.name.clone());
                }
            }
        }
        found
    }
}

/// Depth-first post-order over declaration order; dependencies are visited
/// in their own declaration order so the result is deterministic.
fn topological_order(stages: &[StageDefinition]) -> Vec<String> {
    fn visit<'a>(
        i: usize,
        stages: &'a [StageDefinition],
        position: &HashMap<&'a str, usize>,
        visited: &mut HashSet<usize>,
        order: &mut Vec<String>,
    ) {
        if !visited.insert(i) {
            return;
        }
        let mut deps: Vec<usize> = stages[i]
            .depends_on
            .iter()
            .filter_map(|d| position.get(d.as_str()).copied())
            .collect();
        deps.sort_unstable();
        for dep in deps {
            visit(dep, stages, position, visited, order);
        }
        order.push(stages[i].name.clone());
    }

    let position: HashMap<&str, usize> = stages
        .iter()
        .enumerate()
        .map(|(i, s)| (s.name.as_str(), i))
        .collect();
    let mut visited = HashSet::new();
    let mut order = Vec::with_capacity(stages.len());

    for i in 0..stages.len() {
        visit(i, stages, &position, &mut visited, &mut order);
    }
    order
}
