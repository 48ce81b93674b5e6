//! Runs one stage to a terminal result under a deadline with retries.

use super::{RetryConfig, StageContext, StageExecutor};
use crate::core::{StageDefinition, StageResult};
use crate::events::{EventSink, STAGE_COMPLETED, STAGE_FAILED, STAGE_RETRYING, STAGE_STARTED};
use crate::utils::duration_ms;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

enum AttemptOutcome {
    Succeeded(super::ExecutorOutput),
    Failed(String),
    TimedOut,
}

/// Invokes the stage executor with per-attempt deadlines and backoff.
///
/// Each attempt runs as its own task. An attempt that misses its deadline
/// is abandoned: the task is detached rather than aborted, since the
/// executor may be in the middle of external side effects.
#[derive(Clone)]
pub struct StageRunner {
    executor: Arc<dyn StageExecutor>,
    retry: RetryConfig,
    timeout: Duration,
    events: Arc<dyn EventSink>,
}

impl fmt::Debug for StageRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageRunner")
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl StageRunner {
    /// Creates a runner.
    #[must_use]
    pub fn new(
        executor: Arc<dyn StageExecutor>,
        retry: RetryConfig,
        timeout: Duration,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            executor,
            retry,
            timeout,
            events,
        }
    }

    /// Replaces the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Returns the retry policy.
    #[must_use]
    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    /// Returns the per-attempt deadline.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs `stage` until it completes or its attempts are exhausted.
    ///
    /// Never returns an error: executor failures, panics and timeouts all end
    /// up in a `failed` result. On success `retry_count` is the number of
    /// failed attempts before it; on exhaustion it is the number of attempts
    /// made.
    ///
    /// Locks the stage leaked through `ctx.state` are released afterwards,
    /// unless an attempt was abandoned on timeout and may still hold them.
    pub async fn run(&self, stage: &StageDefinition, mut ctx: StageContext) -> StageResult {
        let started = Instant::now();
        let max_attempts = self.retry.max_attempts();
        let mut abandoned = false;
        let mut last_error = String::new();

        let mut attempt = 1;
        let result = loop {
            ctx.attempt = attempt;
            self.events.try_emit(
                STAGE_STARTED,
                Some(serde_json::json!({
                    "session_id": &ctx.session_id,
                    "stage": &stage.name,
                    "attempt": attempt,
                })),
            );

            match self.attempt(stage, &ctx).await {
                AttemptOutcome::Succeeded(output) => {
                    break StageResult::completed(
                        &stage.name,
                        &stage.executor_kind,
                        output.summary,
                        output.artifacts,
                    )
                    .with_retry_count(attempt - 1);
                }
                AttemptOutcome::Failed(error) => last_error = error,
                AttemptOutcome::TimedOut => {
                    abandoned = true;
                    last_error = format!(
                        "Stage '{}' timed out after {}ms",
                        stage.name,
                        self.timeout.as_millis()
                    );
                }
            }

            if attempt >= max_attempts {
                break StageResult::failed(&stage.name, &stage.executor_kind, last_error.clone())
                    .with_retry_count(attempt);
            }

            let delay = self.retry.delay_for(attempt - 1);
            warn!(
                stage = %stage.name,
                attempt,
                max_attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %last_error,
                "Stage attempt failed, retrying"
            );
            self.events.try_emit(
                STAGE_RETRYING,
                Some(serde_json::json!({
                    "session_id": &ctx.session_id,
                    "stage": &stage.name,
                    "attempt": attempt,
                    "error": &last_error,
                    "delay_ms": duration_ms(delay),
                })),
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        };

        let result = result.with_duration_ms(duration_ms(started.elapsed()));

        if abandoned {
            debug!(stage = %stage.name, "Leaving stage locks to expire after abandoned attempt");
        } else {
            let leaked = ctx.state.locks().release_all();
            if leaked > 0 {
                warn!(stage = %stage.name, leaked, "Released locks left held by stage");
            }
        }

        if result.is_completed() {
            info!(
                stage = %stage.name,
                retries = result.retry_count,
                duration_ms = result.duration_ms,
                "Stage completed"
            );
            self.events.try_emit(
                STAGE_COMPLETED,
                Some(serde_json::json!({
                    "session_id": &ctx.session_id,
                    "stage": &stage.name,
                    "duration_ms": result.duration_ms,
                    "retry_count": result.retry_count,
                })),
            );
        } else {
            warn!(
                stage = %stage.name,
                attempts = result.retry_count,
                error = result.error.as_deref().unwrap_or_default(),
                "Stage failed"
            );
            self.events.try_emit(
                STAGE_FAILED,
                Some(serde_json::json!({
                    "session_id": &ctx.session_id,
                    "stage": &stage.name,
                    "error": &result.error,
                    "attempts": result.retry_count,
                })),
            );
        }
        result
    }

    async fn attempt(&self, stage: &StageDefinition, ctx: &StageContext) -> AttemptOutcome {
        let executor = Arc::clone(&self.executor);
        let name = stage.name.clone();
        let kind = stage.executor_kind.clone();
        let attempt_ctx = ctx.clone();
        let handle =
            tokio::spawn(async move { executor.execute(&name, &kind, &attempt_ctx).await });

        match tokio::time::timeout(self.timeout, handle).await {
            Ok(Ok(Ok(output))) => AttemptOutcome::Succeeded(output),
            Ok(Ok(Err(e))) => AttemptOutcome::Failed(format!("{e:#}")),
            Ok(Err(join_err)) => {
                AttemptOutcome::Failed(format!("Stage '{}' executor panicked: {join_err}", stage.name))
            }
            Err(_) => AttemptOutcome::TimedOut,
        }
    }
}
