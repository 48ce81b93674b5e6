//! Scripted stage executor for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::pipeline::{ExecutorOutput, StageContext, StageExecutor};

/// One scripted attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Succeed with a summary and artifacts.
    Succeed {
        /// Output summary.
        summary: String,
        /// Reported artifact paths.
        artifacts: Vec<String>,
    },
    /// Fail with a message.
    Fail(String),
    /// Sleep, then succeed.
    Delay(Duration),
    /// Write a file under the target directory and report it as an artifact.
    WriteArtifact(String),
    /// Acquire a shared-state lock and return without releasing it.
    HoldLock(String),
    /// Panic with a message.
    Panic(String),
}

impl Step {
    /// Succeeds with `summary`.
    #[must_use]
    pub fn succeed(summary: impl Into<String>) -> Self {
        Self::Succeed {
            summary: summary.into(),
            artifacts: Vec::new(),
        }
    }

    /// Fails with `error`.
    #[must_use]
    pub fn fail(error: impl Into<String>) -> Self {
        Self::Fail(error.into())
    }

    /// Sleeps for `delay`, then succeeds.
    #[must_use]
    pub fn delay(delay: Duration) -> Self {
        Self::Delay(delay)
    }

    /// Writes `path` relative to the target directory.
    #[must_use]
    pub fn write_artifact(path: impl Into<String>) -> Self {
        Self::WriteArtifact(path.into())
    }

    /// Acquires the lock on the shared document `path` and leaks it.
    #[must_use]
    pub fn hold_lock(path: impl Into<String>) -> Self {
        Self::HoldLock(path.into())
    }

    /// Panics with `message`.
    #[must_use]
    pub fn panic(message: impl Into<String>) -> Self {
        Self::Panic(message.into())
    }
}

/// A recorded executor call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    /// Stage name.
    pub stage: String,
    /// Executor kind.
    pub executor_kind: String,
    /// Session id from the context.
    pub session_id: String,
    /// One-based attempt number.
    pub attempt: usize,
}

struct Running<'a>(&'a AtomicUsize);

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A stage executor driven by per-stage scripts.
///
/// Each call consumes the next step of the stage's script; the last step
/// repeats once the script runs out. Stages without a script succeed.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    scripts: Mutex<HashMap<String, Vec<Step>>>,
    calls: Mutex<Vec<RecordedCall>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl ScriptedExecutor {
    /// Creates an executor where every stage succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the script for a stage.
    #[must_use]
    pub fn script(self, stage: impl Into<String>, steps: impl IntoIterator<Item = Step>) -> Self {
        self.scripts
            .lock()
            .insert(stage.into(), steps.into_iter().collect());
        self
    }

    /// Returns every recorded call in order.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Returns the stage names called, in call order.
    #[must_use]
    pub fn called_stages(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.stage.clone()).collect()
    }

    /// Returns how often a stage was called.
    #[must_use]
    pub fn call_count(&self, stage: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.stage == stage).count()
    }

    /// Returns the attempt numbers a stage was called with.
    #[must_use]
    pub fn attempts(&self, stage: &str) -> Vec<usize> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.stage == stage)
            .map(|c| c.attempt)
            .collect()
    }

    /// Returns the highest number of calls observed running at once.
    #[must_use]
    pub fn max_concurrency(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    fn next_step(&self, stage: &str, call_index: usize) -> Step {
        self.scripts
            .lock()
            .get(stage)
            .and_then(|steps| steps.get(call_index).or_else(|| steps.last()))
            .cloned()
            .unwrap_or_else(|| Step::succeed(format!("{stage} done")))
    }
}

#[async_trait]
impl StageExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        stage_name: &str,
        executor_kind: &str,
        ctx: &StageContext,
    ) -> anyhow::Result<ExecutorOutput> {
        let call_index = {
            let mut calls = self.calls.lock();
            let index = calls.iter().filter(|c| c.stage == stage_name).count();
            calls.push(RecordedCall {
                stage: stage_name.to_string(),
                executor_kind: executor_kind.to_string(),
                session_id: ctx.session_id.clone(),
                attempt: ctx.attempt,
            });
            index
        };

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        let _running = Running(&self.running);

        match self.next_step(stage_name, call_index) {
            Step::Succeed { summary, artifacts } => Ok(ExecutorOutput { summary, artifacts }),
            Step::Fail(error) => Err(anyhow::anyhow!(error)),
            Step::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(ExecutorOutput::new(format!("{stage_name} done after {delay:?}")))
            }
            Step::WriteArtifact(path) => {
                let full = ctx.target_dir.join(&path);
                if let Some(parent) = full.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&full, format!("# {stage_name}\n"))?;
                Ok(ExecutorOutput::new(format!("wrote {path}")).with_artifact(path))
            }
            Step::HoldLock(path) => {
                let lock = ctx.state.locks().acquire(&path).await?;
                Ok(ExecutorOutput::new(format!(
                    "holding {} at generation {}",
                    path, lock.generation
                )))
            }
            Step::Panic(message) => panic!("{message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LockConfig;
    use crate::store::{AtomicStore, LockManager, SharedStateStore};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn ctx(dir: &TempDir) -> StageContext {
        let store = AtomicStore::open(dir.path().join("store")).unwrap();
        StageContext {
            session_id: "s".to_string(),
            mode: "m".to_string(),
            target_dir: dir.path().to_path_buf(),
            attempt: 1,
            prior_results: Vec::new(),
            state: SharedStateStore::new(Arc::new(LockManager::new(store, "t", LockConfig::default()))),
        }
    }

    #[tokio::test]
    async fn test_script_consumed_then_last_step_repeats() {
        let dir = TempDir::new().unwrap();
        let executor = ScriptedExecutor::new().script("a", [Step::fail("x"), Step::succeed("ok")]);
        let ctx = ctx(&dir);

        assert!(executor.execute("a", "k", &ctx).await.is_err());
        assert_eq!(executor.execute("a", "k", &ctx).await.unwrap().summary, "ok");
        assert_eq!(executor.execute("a", "k", &ctx).await.unwrap().summary, "ok");
        assert_eq!(executor.call_count("a"), 3);
    }

    #[tokio::test]
    async fn test_unscripted_stage_succeeds() {
        let dir = TempDir::new().unwrap();
        let executor = ScriptedExecutor::new();
        let output = executor.execute("b", "k", &ctx(&dir)).await.unwrap();
        assert_eq!(output.summary, "b done");
        assert_eq!(executor.called_stages(), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_write_artifact() {
        let dir = TempDir::new().unwrap();
        let executor = ScriptedExecutor::new().script("a", [Step::write_artifact("docs/a.md")]);
        let output = executor.execute("a", "k", &ctx(&dir)).await.unwrap();

        assert_eq!(output.artifacts, vec!["docs/a.md".to_string()]);
        assert!(dir.path().join("docs/a.md").exists());
    }
}
