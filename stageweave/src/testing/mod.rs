//! Testing utilities for stageweave pipelines.
//!
//! This module provides:
//! - A scripted stage executor that records its calls
//! - Catalog and configuration fixtures

mod fixtures;
mod mocks;

pub use fixtures::{
    chain_catalog, fanout_catalog, fast_config, greenfield_catalog, GREENFIELD_CATALOG,
};
pub use mocks::{RecordedCall, ScriptedExecutor, Step};
