//! Filesystem check of declared stage outputs.

use super::{ArtifactChecker, ArtifactReport};
use crate::core::StageDefinition;
use glob::{MatchOptions, Pattern};
use std::path::{Component, Path};
use tracing::{debug, warn};

/// Checks declared output patterns against the target directory.
///
/// Patterns are relative to the target directory. `*` matches within a
/// single path segment; `**` and other cross-segment matching is not
/// supported. Absolute patterns and patterns containing `..` never match.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsArtifactChecker;

impl FsArtifactChecker {
    /// Creates a checker.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn pattern_matches(target_dir: &Path, pattern: &str) -> bool {
        let escapes = Path::new(pattern).components().any(|c| {
            matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_))
        });
        if escapes {
            warn!(pattern, "Artifact pattern leaves the target directory");
            return false;
        }

        if !pattern.contains(['*', '?', '[']) {
            return target_dir.join(pattern).exists();
        }

        let base = Pattern::escape(&target_dir.to_string_lossy());
        let full = format!("{}/{}", base.trim_end_matches('/'), pattern);
        let options = MatchOptions {
            require_literal_separator: true,
            ..MatchOptions::default()
        };

        match glob::glob_with(&full, options) {
            Ok(mut paths) => paths.any(|entry| entry.is_ok()),
            Err(e) => {
                warn!(pattern, error = %e, "Invalid artifact pattern");
                false
            }
        }
    }
}

impl ArtifactChecker for FsArtifactChecker {
    fn check(&self, mode: &str, stage: &StageDefinition, target_dir: &Path) -> ArtifactReport {
        let present: Vec<String> = stage
            .outputs
            .iter()
            .filter(|pattern| Self::pattern_matches(target_dir, pattern))
            .cloned()
            .collect();

        debug!(
            mode,
            stage = %stage.name,
            required = stage.outputs.len(),
            present = present.len(),
            "Checked stage artifacts"
        );

        ArtifactReport {
            stage: stage.name.clone(),
            required: stage.outputs.clone(),
            present,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &Path, rel: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_literal_outputs() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "docs/prd.md");

        let stage = StageDefinition::new("prd", "writer")
            .with_output("docs/prd.md")
            .with_output("docs/srs.md");
        let report = FsArtifactChecker::new().check("greenfield", &stage, dir.path());

        assert_eq!(report.present, vec!["docs/prd.md".to_string()]);
        assert_eq!(report.missing(), vec!["docs/srs.md"]);
        assert!(!report.is_satisfied());
    }

    #[test]
    fn test_wildcard_matches_single_segment() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "diagrams/nested/context.mmd");

        let stage = StageDefinition::new("diagrams", "diagram").with_output("diagrams/*.mmd");
        let report = FsArtifactChecker.check("greenfield", &stage, dir.path());
        assert!(!report.is_satisfied());

        touch(dir.path(), "diagrams/context.mmd");
        let report = FsArtifactChecker.check("greenfield", &stage, dir.path());
        assert!(report.is_satisfied());

        let nested = StageDefinition::new("diagrams", "diagram").with_output("diagrams/*/context.mmd");
        assert!(FsArtifactChecker.check("greenfield", &nested, dir.path()).is_satisfied());
    }

    #[test]
    fn test_patterns_outside_target_dir_never_match() {
        let root = TempDir::new().unwrap();
        touch(root.path(), "secret.md");
        touch(root.path(), "project/docs/prd.md");
        let target = root.path().join("project");
        let outside = root.path().join("secret.md");

        let stage = StageDefinition::new("prd", "writer")
            .with_output("../secret.md")
            .with_output("docs/../../secret.md")
            .with_output("../*.md")
            .with_output(outside.to_string_lossy())
            .with_output("docs/prd.md");
        let report = FsArtifactChecker.check("greenfield", &stage, &target);

        assert_eq!(report.present, vec!["docs/prd.md".to_string()]);
        assert_eq!(report.missing().len(), 4);
    }

    #[test]
    fn test_no_declared_outputs_is_satisfied() {
        let dir = TempDir::new().unwrap();
        let stage = StageDefinition::new("lint", "checker");
        assert!(FsArtifactChecker.check("m", &stage, dir.path()).is_satisfied());
    }
}
