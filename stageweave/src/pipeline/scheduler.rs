//! Session lifecycle and round-based pipeline execution.

use super::{
    plan_round, ApprovalGate, ApprovalProvider, ArtifactChecker, FsArtifactChecker,
    PipelineCatalog, PipelineProgress, RunSummary, StageContext, StageExecutor, StageGraph,
    StageRunner,
};
use crate::cancellation::CancellationToken;
use crate::config::OrchestratorConfig;
use crate::core::{OrchestratorSession, SessionStatus, StageDefinition, StageResult, StageStatus};
use crate::errors::{SessionError, StageweaveError};
use crate::events::{
    EventSink, NoOpEventSink, APPROVAL_DECIDED, PIPELINE_COMPLETED, PIPELINE_STARTED,
    STAGE_SKIPPED,
};
use crate::store::{AtomicStore, LockManager, RecordValidator, SessionStore, SharedStateStore};
use crate::utils::{duration_ms, generate_holder_id, generate_session_id, now_utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Where a new session picks up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resume {
    /// Continue a prior session by id.
    Session(String),
    /// Continue the most recently modified session.
    Latest,
    /// Treat every stage ordered before this one as done.
    FromStage(String),
}

/// Arguments to [`PipelineScheduler::start_session`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    /// Directory the pipeline works on. Ignored when resuming a session.
    pub target_dir: PathBuf,
    /// Pipeline mode. Ignored when resuming a session.
    pub mode: String,
    /// Optional resumption point.
    pub resume: Option<Resume>,
}

impl SessionRequest {
    /// Requests a fresh session.
    #[must_use]
    pub fn new(target_dir: impl Into<PathBuf>, mode: impl Into<String>) -> Self {
        Self {
            target_dir: target_dir.into(),
            mode: mode.into(),
            resume: None,
        }
    }

    /// Sets the resumption point.
    #[must_use]
    pub fn resume(mut self, resume: Resume) -> Self {
        self.resume = Some(resume);
        self
    }
}

/// Outcome of one [`PipelineScheduler::execute_pipeline`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineResult {
    /// The session that ran.
    pub session_id: String,
    /// Aggregated status, also stored on the session.
    pub status: SessionStatus,
    /// Outcome counts and the partial-run warning.
    pub summary: RunSummary,
    /// Results recorded in this run, in commit order.
    pub results: Vec<StageResult>,
    /// Whether cancellation was requested during the run.
    pub cancelled: bool,
    /// Wall time of the run in milliseconds.
    pub duration_ms: f64,
}

/// Drives sessions through their mode's stage graph.
///
/// The scheduler owns the session during a run. Stage tasks only hand
/// their results back; results of a round are committed to the session,
/// and the session saved, once the whole round has resolved.
pub struct PipelineScheduler {
    config: OrchestratorConfig,
    catalog: PipelineCatalog,
    runner: StageRunner,
    sessions: SessionStore,
    state: SharedStateStore,
    approvals: ApprovalGate,
    artifacts: Arc<dyn ArtifactChecker>,
    events: Arc<dyn EventSink>,
}

impl fmt::Debug for PipelineScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineScheduler")
            .field("store_root", &self.config.store_root)
            .field("modes", &self.catalog.modes().collect::<Vec<_>>())
            .field("approvals", &self.approvals)
            .finish_non_exhaustive()
    }
}

impl PipelineScheduler {
    /// Creates a scheduler over the store at `config.store_root`.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid or the store root cannot be
    /// created.
    pub fn new(
        config: OrchestratorConfig,
        catalog: PipelineCatalog,
        executor: Arc<dyn StageExecutor>,
    ) -> Result<Self, StageweaveError> {
        config.validate()?;
        let store = AtomicStore::open(&config.store_root)?;
        let locks = LockManager::new(
            store.clone(),
            generate_holder_id("scheduler"),
            config.lock.clone(),
        );
        let events: Arc<dyn EventSink> = Arc::new(NoOpEventSink);
        let runner = StageRunner::new(
            executor,
            config.retry.clone(),
            config.scheduler.stage_timeout(),
            Arc::clone(&events),
        );

        Ok(Self {
            approvals: ApprovalGate::new(config.approval),
            runner,
            sessions: SessionStore::new(store),
            state: SharedStateStore::new(Arc::new(locks)),
            artifacts: Arc::new(FsArtifactChecker::new()),
            events,
            catalog,
            config,
        })
    }

    /// Sets the provider consulted by `manual` and `custom` approval modes.
    #[must_use]
    pub fn with_approval_provider(mut self, provider: Arc<dyn ApprovalProvider>) -> Self {
        self.approvals = self.approvals.with_provider(provider);
        self
    }

    /// Replaces the artifact checker used when resuming.
    #[must_use]
    pub fn with_artifact_checker(mut self, checker: Arc<dyn ArtifactChecker>) -> Self {
        self.artifacts = checker;
        self
    }

    /// Sets the sink that receives lifecycle events.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.runner = self.runner.with_events(Arc::clone(&events));
        self.events = events;
        self
    }

    /// Sets the validator applied to structured records stages read and write.
    #[must_use]
    pub fn with_record_validator(mut self, validator: Arc<dyn RecordValidator>) -> Self {
        self.state = self.state.with_validator(validator);
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Returns the pipeline catalog.
    #[must_use]
    pub fn catalog(&self) -> &PipelineCatalog {
        &self.catalog
    }

    /// Returns the session store.
    #[must_use]
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Returns the shared state store.
    #[must_use]
    pub fn state(&self) -> &SharedStateStore {
        &self.state
    }

    /// Creates and saves a new session.
    ///
    /// A resumed session inherits the prior session's mode and target
    /// directory. Stages carried over as pre-completed are kept only if
    /// their declared outputs still exist.
    ///
    /// # Errors
    ///
    /// Fails on an unknown mode or stage, a missing or corrupted prior
    /// session, or a store failure.
    pub fn start_session(
        &self,
        request: SessionRequest,
    ) -> Result<OrchestratorSession, StageweaveError> {
        let (mode, target_dir, resumed_from, candidates) = match request.resume {
            None => (request.mode, request.target_dir, None, BTreeSet::new()),
            Some(Resume::Session(id)) => self.resume_point(&id)?,
            Some(Resume::Latest) => {
                let id = self
                    .sessions
                    .find_latest()?
                    .ok_or_else(|| SessionError::NotFound("<latest>".to_string()))?;
                self.resume_point(&id)?
            }
            Some(Resume::FromStage(stage)) => {
                let before = self.catalog.graph(&request.mode)?.stages_before(&stage)?;
                (request.mode, request.target_dir, None, before)
            }
        };

        let graph = self.catalog.graph(&mode)?;
        let pre_completed = self.verify_pre_completed(graph, &target_dir, candidates);

        let mut session = OrchestratorSession::new(
            generate_session_id(),
            target_dir,
            mode,
            self.store_root(),
        );
        session.resumed_from = resumed_from;
        session.pre_completed_stages = pre_completed;
        self.sessions.save(&session)?;

        info!(
            session_id = %session.session_id,
            mode = %session.mode,
            resumed_from = session.resumed_from.as_deref().unwrap_or_default(),
            pre_completed = session.pre_completed_stages.len(),
            "Session started"
        );
        Ok(session)
    }

    fn store_root(&self) -> PathBuf {
        self.state.atomic().root().to_path_buf()
    }

    fn resume_point(
        &self,
        session_id: &str,
    ) -> Result<(String, PathBuf, Option<String>, BTreeSet<String>), StageweaveError> {
        let prior = self.sessions.load(session_id)?;
        let mut candidates = prior.completed_stages();
        candidates.extend(prior.pre_completed_stages.iter().cloned());
        Ok((
            prior.mode,
            prior.target_dir,
            Some(prior.session_id),
            candidates,
        ))
    }

    fn verify_pre_completed(
        &self,
        graph: &StageGraph,
        target_dir: &std::path::Path,
        candidates: BTreeSet<String>,
    ) -> BTreeSet<String> {
        candidates
            .into_iter()
            .filter(|name| {
                let Some(stage) = graph.get(name) else {
                    debug!(stage = %name, "Dropping carried-over stage not in mode");
                    return false;
                };
                let report = self.artifacts.check(graph.mode(), stage, target_dir);
                if !report.is_satisfied() {
                    warn!(
                        stage = %name,
                        missing = ?report.missing(),
                        "Artifacts missing, stage will re-run"
                    );
                }
                report.is_satisfied()
            })
            .collect()
    }

    /// Runs the session's remaining stages round by round.
    ///
    /// Stage failures never surface as errors: they are recorded as results
    /// and aggregated into the session status. Cancellation is honored
    /// between rounds and before each stage is started; stages not started
    /// are recorded as skipped.
    ///
    /// # Errors
    ///
    /// Fails on an unknown mode or if the session cannot be saved.
    pub async fn execute_pipeline(
        &self,
        session: &mut OrchestratorSession,
        cancel: &CancellationToken,
    ) -> Result<PipelineResult, StageweaveError> {
        let graph = self.catalog.graph(&session.mode)?;
        let started = Instant::now();

        let mut known: BTreeMap<String, StageStatus> = session
            .pre_completed_stages
            .iter()
            .chain(session.completed_stages().iter())
            .filter(|name| graph.contains(name))
            .map(|name| (name.clone(), StageStatus::Completed))
            .collect();
        let mut run_results: Vec<StageResult> = Vec::new();
        let mut cancelled = false;

        session.status = SessionStatus::Running;
        info!(
            session_id = %session.session_id,
            mode = %session.mode,
            stages = graph.len(),
            satisfied = known.len(),
            "Pipeline started"
        );
        self.events
            .emit(
                PIPELINE_STARTED,
                Some(serde_json::json!({
                    "session_id": &session.session_id,
                    "mode": &session.mode,
                    "pre_completed": &session.pre_completed_stages,
                })),
            )
            .await;

        let mut round = 0usize;
        loop {
            if cancel.is_cancelled() {
                cancelled = true;
                let reason = Self::cancel_reason(cancel);
                let remaining: Vec<StageResult> = graph
                    .execution_order()
                    .iter()
                    .filter(|name| !known.contains_key(*name))
                    .filter_map(|name| graph.get(name))
                    .map(|stage| StageResult::skipped(&stage.name, &stage.executor_kind, reason.clone()))
                    .collect();
                self.commit_round(session, &mut known, &mut run_results, remaining)
                    .await?;
                break;
            }

            let plan = plan_round(graph, &known);
            if plan.is_idle() {
                break;
            }
            round += 1;
            debug!(
                session_id = %session.session_id,
                round,
                ready = ?plan.ready,
                skipped = plan.skipped.len(),
                waiting = plan.waiting.len(),
                "Round planned"
            );
            if plan.deadlocked {
                warn!(
                    session_id = %session.session_id,
                    stages = ?plan.skipped.iter().map(|(n, _)| n).collect::<Vec<_>>(),
                    "No stage can make progress, skipping remaining stages"
                );
            }

            let mut round_results: Vec<StageResult> = plan
                .skipped
                .iter()
                .filter_map(|(name, reason)| {
                    graph
                        .get(name)
                        .map(|s| StageResult::skipped(&s.name, &s.executor_kind, reason.clone()))
                })
                .collect();

            let ready: Vec<&StageDefinition> =
                plan.ready.iter().filter_map(|name| graph.get(name)).collect();
            self.run_ready(session, graph, ready, cancel, &run_results, &mut round_results)
                .await;

            self.commit_round(session, &mut known, &mut run_results, round_results)
                .await?;
        }

        let summary = RunSummary::from_results(&run_results);
        session.status = summary.status;
        session.finished_at = Some(now_utc());
        self.sessions.save(session)?;

        if let Some(warning) = &summary.warning {
            warn!(session_id = %session.session_id, warning = %warning, "Pipeline partially succeeded");
        }
        info!(
            session_id = %session.session_id,
            status = %summary.status,
            completed = summary.completed,
            failed = summary.failed,
            skipped = summary.skipped,
            cancelled,
            "Pipeline finished"
        );
        self.events
            .emit(
                PIPELINE_COMPLETED,
                Some(serde_json::json!({
                    "session_id": &session.session_id,
                    "status": summary.status,
                    "completed": summary.completed,
                    "failed": summary.failed,
                    "skipped": summary.skipped,
                    "warning": &summary.warning,
                    "cancelled": cancelled,
                })),
            )
            .await;

        Ok(PipelineResult {
            session_id: session.session_id.clone(),
            status: summary.status,
            summary,
            results: run_results,
            cancelled,
            duration_ms: duration_ms(started.elapsed()),
        })
    }

    /// Runs one round's ready stages: the parallel group first, then the
    /// rest one at a time in declaration order.
    async fn run_ready(
        &self,
        session: &mut OrchestratorSession,
        graph: &StageGraph,
        ready: Vec<&StageDefinition>,
        cancel: &CancellationToken,
        run_results: &[StageResult],
        round_results: &mut Vec<StageResult>,
    ) {
        let parallel_count = ready.iter().filter(|s| s.parallel).count();
        let (group, mut sequential): (Vec<&StageDefinition>, Vec<&StageDefinition>) =
            ready.into_iter().partition(|s| s.parallel && parallel_count > 1);
        sequential.sort_by_key(|s| graph.declaration_index(&s.name));

        if !group.is_empty() {
            if cancel.is_cancelled() {
                let reason = Self::cancel_reason(cancel);
                round_results.extend(
                    group
                        .iter()
                        .map(|s| StageResult::skipped(&s.name, &s.executor_kind, reason.clone())),
                );
            } else {
                let mut approved = Vec::with_capacity(group.len());
                for stage in group {
                    let seen: Vec<StageResult> =
                        run_results.iter().chain(round_results.iter()).cloned().collect();
                    match self.gate(session, stage, &seen).await {
                        Some(denied) => round_results.push(denied),
                        None => approved.push(stage),
                    }
                }

                let prior = session.results().to_vec();
                let runs = approved.into_iter().map(|stage| {
                    let ctx = self.stage_context(session, stage, prior.clone());
                    self.runner.run(stage, ctx)
                });
                let mut finished: Vec<StageResult> = stream::iter(runs)
                    .buffer_unordered(self.config.scheduler.max_concurrent_stages)
                    .collect()
                    .await;
                finished.sort_by_key(|r| graph.declaration_index(&r.name));
                round_results.extend(finished);
            }
        }

        for stage in sequential {
            if cancel.is_cancelled() {
                round_results.push(StageResult::skipped(
                    &stage.name,
                    &stage.executor_kind,
                    Self::cancel_reason(cancel),
                ));
                continue;
            }
            let seen: Vec<StageResult> =
                run_results.iter().chain(round_results.iter()).cloned().collect();
            if let Some(denied) = self.gate(session, stage, &seen).await {
                round_results.push(denied);
                continue;
            }
            let ctx = self.stage_context(session, stage, session.results().to_vec());
            round_results.push(self.runner.run(stage, ctx).await);
        }
    }

    /// Consults the approval gate. Returns the skipped result on denial.
    async fn gate(
        &self,
        session: &mut OrchestratorSession,
        stage: &StageDefinition,
        seen: &[StageResult],
    ) -> Option<StageResult> {
        if !stage.approval_required {
            return None;
        }
        let decision = self.approvals.evaluate(stage, seen).await;
        self.events.try_emit(
            APPROVAL_DECIDED,
            Some(serde_json::json!({
                "session_id": &session.session_id,
                "stage": &stage.name,
                "approved": decision.approved,
                "reason": &decision.reason,
                "decided_by": &decision.decided_by,
            })),
        );
        let denied = (!decision.approved).then(|| {
            info!(stage = %stage.name, reason = %decision.reason, "Approval denied");
            StageResult::skipped(
                &stage.name,
                &stage.executor_kind,
                format!("Approval denied by {}: {}", decision.decided_by, decision.reason),
            )
        });
        session.approvals.push(decision);
        denied
    }

    fn stage_context(
        &self,
        session: &OrchestratorSession,
        stage: &StageDefinition,
        prior_results: Vec<StageResult>,
    ) -> StageContext {
        StageContext {
            session_id: session.session_id.clone(),
            mode: session.mode.clone(),
            target_dir: session.target_dir.clone(),
            attempt: 0,
            prior_results,
            state: self
                .state
                .scoped(generate_holder_id(&format!("stage-{}", stage.name))),
        }
    }

    async fn commit_round(
        &self,
        session: &mut OrchestratorSession,
        known: &mut BTreeMap<String, StageStatus>,
        run_results: &mut Vec<StageResult>,
        round_results: Vec<StageResult>,
    ) -> Result<(), StageweaveError> {
        if round_results.is_empty() {
            return Ok(());
        }
        for result in round_results {
            if result.status == StageStatus::Skipped {
                self.events
                    .emit(
                        STAGE_SKIPPED,
                        Some(serde_json::json!({
                            "session_id": &session.session_id,
                            "stage": &result.name,
                            "reason": &result.skip_reason,
                        })),
                    )
                    .await;
            }
            known.insert(result.name.clone(), result.status);
            session.push_result(result.clone());
            run_results.push(result);
        }
        self.sessions.save(session)?;
        Ok(())
    }

    fn cancel_reason(cancel: &CancellationToken) -> String {
        match cancel.reason() {
            Some(reason) => format!("Pipeline cancelled: {reason}"),
            None => "Pipeline cancelled".to_string(),
        }
    }

    /// Reports a persisted session's progress against its mode.
    ///
    /// # Errors
    ///
    /// Fails if the session is missing or corrupted, or its mode is no
    /// longer in the catalog.
    pub fn monitor_pipeline(&self, session_id: &str) -> Result<PipelineProgress, StageweaveError> {
        let session = self.sessions.load(session_id)?;
        let graph = self.catalog.graph(&session.mode)?;

        let (mut completed, mut failed, mut skipped) = (0, 0, 0);
        let mut pending = Vec::new();
        for name in graph.execution_order() {
            if session.pre_completed_stages.contains(name) {
                completed += 1;
                continue;
            }
            match session.latest_result(name).map(|r| r.status) {
                Some(StageStatus::Completed) => completed += 1,
                Some(StageStatus::Failed) => failed += 1,
                Some(StageStatus::Skipped) => skipped += 1,
                _ => pending.push(name.clone()),
            }
        }

        let total = graph.len();
        #[allow(clippy::cast_precision_loss)]
        let percent_complete = if total == 0 {
            100.0
        } else {
            (completed + failed + skipped) as f64 * 100.0 / total as f64
        };

        Ok(PipelineProgress {
            session_id: session.session_id,
            mode: session.mode,
            status: session.status,
            total,
            completed,
            failed,
            skipped,
            pending,
            percent_complete,
        })
    }
}
