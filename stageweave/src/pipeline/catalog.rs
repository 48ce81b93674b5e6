//! Pipeline modes and their validated stage graphs.

use super::{PipelineBuilder, StageGraph};
use crate::core::StageDefinition;
use crate::errors::{ConfigError, PipelineValidationError, StageweaveError};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct CatalogFile {
    modes: BTreeMap<String, Vec<StageDefinition>>,
}

/// Every pipeline mode known to the orchestrator.
///
/// Each mode is validated as a DAG when it is added, so lookups never hand
/// out a malformed graph.
#[derive(Debug, Clone, Default)]
pub struct PipelineCatalog {
    modes: BTreeMap<String, StageGraph>,
}

impl PipelineCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and adds a mode, replacing any mode with the same name.
    pub fn add_mode(
        &mut self,
        mode: impl Into<String>,
        stages: impl IntoIterator<Item = StageDefinition>,
    ) -> Result<(), PipelineValidationError> {
        let graph = PipelineBuilder::new(mode).stages(stages).build()?;
        self.modes.insert(graph.mode().to_string(), graph);
        Ok(())
    }

    /// Builder-style [`Self::add_mode`].
    pub fn with_mode(
        mut self,
        mode: impl Into<String>,
        stages: impl IntoIterator<Item = StageDefinition>,
    ) -> Result<Self, PipelineValidationError> {
        self.add_mode(mode, stages)?;
        Ok(self)
    }

    /// Parses a catalog of the form `modes: {<mode>: [<stage>...]}`.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, StageweaveError> {
        let file: CatalogFile = serde_yaml::from_str(yaml).map_err(ConfigError::from)?;
        let mut catalog = Self::new();
        for (mode, stages) in file.modes {
            catalog.add_mode(mode, stages)?;
        }
        Ok(catalog)
    }

    /// Reads and parses a catalog file.
    pub fn from_yaml_file(path: &Path) -> Result<Self, StageweaveError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    /// Returns the graph for a mode.
    ///
    /// # Errors
    ///
    /// Fails with `MODE-UNKNOWN` if the mode is not declared.
    pub fn graph(&self, mode: &str) -> Result<&StageGraph, PipelineValidationError> {
        self.modes
            .get(mode)
            .ok_or_else(|| PipelineValidationError::unknown_mode(mode))
    }

    /// Returns the declared mode names, sorted.
    pub fn modes(&self) -> impl Iterator<Item = &str> {
        self.modes.keys().map(String::as_str)
    }

    /// Returns true if no modes are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r"
modes:
  greenfield:
    - name: prd
      executor: writer
      outputs: [docs/prd.md]
    - name: srs
      executor: writer
      depends_on: [prd]
      approval_required: true
    - name: diagrams
      executor: diagram
      depends_on: [srs]
      parallel: true
    - name: stack
      executor: template
      depends_on: [srs]
      parallel: true
  quick:
    - name: readme
      executor: writer
";

    #[test]
    fn test_parse_catalog() {
        let catalog = PipelineCatalog::from_yaml_str(CATALOG).unwrap();
        assert_eq!(catalog.modes().collect::<Vec<_>>(), vec!["greenfield", "quick"]);

        let graph = catalog.graph("greenfield").unwrap();
        assert_eq!(graph.len(), 4);
        let srs = graph.get("srs").unwrap();
        assert!(srs.approval_required);
        assert!(srs.depends_on.contains("prd"));
        assert!(graph.get("diagrams").unwrap().parallel);
        assert_eq!(graph.get("prd").unwrap().outputs, vec!["docs/prd.md".to_string()]);
    }

    #[test]
    fn test_unknown_mode() {
        let catalog = PipelineCatalog::from_yaml_str(CATALOG).unwrap();
        let err = catalog.graph("brownfield").unwrap_err();
        assert_eq!(err.code(), Some("MODE-UNKNOWN"));
    }

    #[test]
    fn test_invalid_mode_rejected_at_load() {
        let yaml = r"
modes:
  broken:
    - name: a
      executor: writer
      depends_on: [b]
    - name: b
      executor: writer
      depends_on: [a]
";
        let err = PipelineCatalog::from_yaml_str(yaml).unwrap_err();
        match err {
            StageweaveError::Validation(e) => assert_eq!(e.code(), Some("DAG-CYCLE")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_malformed_yaml_is_config_error() {
        let err = PipelineCatalog::from_yaml_str("modes: [").unwrap_err();
        assert!(matches!(err, StageweaveError::Config(ConfigError::Parse(_))));
    }

    #[test]
    fn test_add_mode_programmatically() {
        let catalog = PipelineCatalog::new()
            .with_mode("m", [StageDefinition::new("a", "writer")])
            .unwrap();
        assert!(!catalog.is_empty());
        assert!(catalog.graph("m").is_ok());
    }
}
