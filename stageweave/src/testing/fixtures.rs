//! Catalog and configuration fixtures for scheduler tests.

use std::path::PathBuf;

use crate::config::OrchestratorConfig;
use crate::core::StageDefinition;
use crate::errors::StageweaveError;
use crate::pipeline::PipelineCatalog;

/// A small document-production pipeline in catalog YAML form.
pub const GREENFIELD_CATALOG: &str = r"
modes:
  greenfield:
    - name: prd
      executor: writer
      outputs: [docs/prd.md]
    - name: srs
      executor: writer
      depends_on: [prd]
      approval_required: true
      outputs: [docs/srs.md]
    - name: diagrams
      executor: diagram
      depends_on: [srs]
      parallel: true
      outputs: ['diagrams/*.mmd']
    - name: stack
      executor: template
      depends_on: [srs]
      parallel: true
    - name: readme
      executor: writer
      depends_on: [diagrams, stack]
";

/// Configuration with millisecond delays, rooted at `store_root`.
#[must_use]
pub fn fast_config(store_root: impl Into<PathBuf>) -> OrchestratorConfig {
    let mut config = OrchestratorConfig {
        store_root: store_root.into(),
        ..OrchestratorConfig::default()
    };
    config.scheduler.stage_timeout_ms = 2_000;
    config.retry = config
        .retry
        .with_max_retries(3)
        .with_base_delay_ms(1)
        .with_max_delay_ms(10);
    config.lock.ttl_ms = 1_000;
    config.lock.steal_threshold_ms = 200;
    config.lock.poll_interval_ms = 5;
    config.lock.retry = config
        .lock
        .retry
        .with_base_delay_ms(1)
        .with_max_delay_ms(10);
    config
}

/// Mode `chain`: `a -> b -> c`.
pub fn chain_catalog() -> Result<PipelineCatalog, StageweaveError> {
    Ok(PipelineCatalog::new().with_mode(
        "chain",
        [
            StageDefinition::new("a", "writer").with_output("docs/a.md"),
            StageDefinition::new("b", "writer").with_dependency("a"),
            StageDefinition::new("c", "writer").with_dependency("b"),
        ],
    )?)
}

/// Mode `fanout`: independent parallel stages `a` and `b`, joined by `c`.
pub fn fanout_catalog() -> Result<PipelineCatalog, StageweaveError> {
    Ok(PipelineCatalog::new().with_mode(
        "fanout",
        [
            StageDefinition::new("a", "writer").parallel(),
            StageDefinition::new("b", "writer").parallel(),
            StageDefinition::new("c", "writer").with_dependencies(["a", "b"]),
        ],
    )?)
}

/// The `greenfield` mode from [`GREENFIELD_CATALOG`].
pub fn greenfield_catalog() -> Result<PipelineCatalog, StageweaveError> {
    PipelineCatalog::from_yaml_str(GREENFIELD_CATALOG)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixtures_are_valid() {
        assert!(chain_catalog().unwrap().graph("chain").is_ok());
        assert!(fanout_catalog().unwrap().graph("fanout").is_ok());

        let greenfield = greenfield_catalog().unwrap();
        let graph = greenfield.graph("greenfield").unwrap();
        assert_eq!(graph.execution_order().last().map(String::as_str), Some("readme"));
    }

    #[test]
    fn test_fast_config_is_valid() {
        let config = fast_config("/tmp/stageweave-test");
        assert!(config.validate().is_ok());
        assert_eq!(config.retry.max_retries, 3);
    }
}
