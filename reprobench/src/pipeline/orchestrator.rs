//! Sequential, fail-stop execution of a stage graph.

use super::context::append_log;
use super::{StageAction, StageContext, StageGraph, StageSpec};
use crate::artifacts::ArtifactStore;
use crate::cancellation::CancellationToken;
use crate::config::ReproConfig;
use crate::core::{StageKind, StageState};
use crate::errors::{PipelineValidationError, ReproError, StageFailure};
use crate::events::{EventSink, LoggingEventSink};
use crate::layout::Layout;
use crate::process::{Invocation, ProcessRunner, RunOutcome, TemplateVars};
use crate::report::ReportWriter;
use crate::trials::TrialRunner;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// The outcome of one stage in a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageRecord {
    /// The stage id.
    pub id: String,
    /// The stage kind.
    pub kind: StageKind,
    /// The terminal state.
    pub state: StageState,
    /// Attempts made; zero for skipped stages.
    pub attempts: usize,
    /// Wall time spent, in milliseconds.
    pub duration_ms: f64,
}

impl StageRecord {
    fn new(spec: &StageSpec, state: StageState, attempts: usize, duration_ms: f64) -> Self {
        Self {
            id: spec.id.clone(),
            kind: spec.kind,
            state,
            attempts,
            duration_ms,
        }
    }
}

/// The result of a successful orchestrator run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRun {
    /// Unique id of this invocation.
    pub run_id: Uuid,
    /// The pipeline name.
    pub pipeline: String,
    /// One record per planned stage, in execution order.
    pub records: Vec<StageRecord>,
    /// Total wall time, in milliseconds.
    pub duration_ms: f64,
}

impl PipelineRun {
    /// Ids of stages whose action ran.
    #[must_use]
    pub fn executed(&self) -> Vec<&str> {
        self.ids_where(|r| r.state.executed())
    }

    /// Ids of stages skipped as fresh.
    #[must_use]
    pub fn skipped(&self) -> Vec<&str> {
        self.ids_where(|r| r.state == StageState::Skipped)
    }

    /// The record of one stage.
    #[must_use]
    pub fn record(&self, id: &str) -> Option<&StageRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    fn ids_where(&self, pred: impl Fn(&StageRecord) -> bool) -> Vec<&str> {
        self.records
            .iter()
            .filter(|r| pred(r))
            .map(|r| r.id.as_str())
            .collect()
    }
}

/// A stage of the execution plan and whether it would run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedStage {
    /// The stage id.
    pub id: String,
    /// The stage kind.
    pub kind: StageKind,
    /// True if the stage would be skipped.
    pub fresh: bool,
}

/// Walks a stage graph in topological order, skipping fresh stages.
///
/// Stages run strictly one after another. The first failure halts the run,
/// invalidates the failing stage and surfaces its log; a later run resumes
/// at that stage because everything before it is still fresh.
pub struct Orchestrator {
    graph: StageGraph,
    config: ReproConfig,
    layout: Layout,
    store: ArtifactStore,
    runner: Arc<dyn ProcessRunner>,
    events: Arc<dyn EventSink>,
    trials: TrialRunner,
    globals: TemplateVars,
}

impl Orchestrator {
    /// Creates an orchestrator for `graph`.
    #[must_use]
    pub fn new(graph: StageGraph, config: ReproConfig, runner: Arc<dyn ProcessRunner>) -> Self {
        let layout = Layout::new(config.work_dir.clone(), config.results_dir.clone());
        let globals = TemplateVars::new()
            .with("jobs", config.jobs.to_string())
            .with("work_dir", layout.work_dir().display().to_string())
            .with("results_dir", layout.results_dir().display().to_string());
        let trials = TrialRunner::new(config.trial_parallelism).with_tee(config.tee_output);

        Self {
            graph,
            store: ArtifactStore::new(layout.clone()),
            layout,
            config,
            runner,
            events: Arc::new(LoggingEventSink::debug()),
            trials,
            globals,
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Adds a template variable visible to every stage.
    #[must_use]
    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.globals.set(name, value);
        self
    }

    /// Returns the stage graph.
    #[must_use]
    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    /// Returns the filesystem layout.
    #[must_use]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Returns the artifact store.
    #[must_use]
    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// The key a stage's stamp must hold for the stage to be fresh.
    ///
    /// Covers the stage definition, the values of the variables its command
    /// references and, for measurement stages, the configured trial count.
    #[must_use]
    pub fn stage_key(&self, spec: &StageSpec) -> String {
        spec.resolved_key(&self.stage_vars(spec), self.config.trials)
    }

    /// Computes the execution plan for `targets` without running anything.
    ///
    /// A stage is reported fresh only if it is fresh on disk and none of its
    /// dependencies would run.
    pub fn plan(&self, targets: &[&str]) -> Result<Vec<PlannedStage>, ReproError> {
        let order = self.graph.plan_for(targets)?;
        let mut would_run: HashSet<&str> = HashSet::new();
        let mut planned = Vec::with_capacity(order.len());

        for id in &order {
            let spec = self.spec(id)?;
            let fresh = !spec.dependencies.iter().any(|d| would_run.contains(d.as_str()))
                && self.is_fresh(spec);
            if !fresh {
                would_run.insert(spec.id.as_str());
            }
            planned.push(PlannedStage {
                id: spec.id.clone(),
                kind: spec.kind,
                fresh,
            });
        }

        Ok(planned)
    }

    /// Runs `targets` and their ancestors; an empty slice runs every stage.
    ///
    /// # Errors
    ///
    /// Returns the first stage failure, [`ReproError::Cancelled`] after an
    /// operator interrupt, or a validation error for unknown targets.
    pub async fn run(
        &self,
        targets: &[&str],
        cancel: &CancellationToken,
    ) -> Result<PipelineRun, ReproError> {
        let run_id = Uuid::now_v7();
        let order = self.graph.plan_for(targets)?;
        let start = Instant::now();

        info!(
            run_id = %run_id,
            pipeline = %self.graph.name(),
            stages = order.len(),
            "Starting pipeline run"
        );
        self.events.try_emit(
            "pipeline.started",
            Some(serde_json::json!({
                "run_id": run_id.to_string(),
                "pipeline": self.graph.name(),
                "stages": &order,
            })),
        );

        let mut executed: HashSet<String> = HashSet::new();
        let mut records = Vec::with_capacity(order.len());

        for id in &order {
            let spec = self.spec(id)?;

            if cancel.is_cancelled() {
                let reason = cancel.reason().unwrap_or_else(|| "cancelled".to_string());
                let err = ReproError::Cancelled {
                    stage: spec.id.clone(),
                    reason,
                };
                self.fail_stage(run_id, spec, &err, 0, 0.0, records);
                return Err(err);
            }

            let dependency_ran = spec.dependencies.iter().any(|d| executed.contains(d));
            if !dependency_ran && self.is_fresh(spec) {
                info!(stage = %spec.id, "Stage is fresh, skipping");
                self.emit_stage("stage.skipped", spec, serde_json::json!({ "reason": "fresh" }));
                records.push(StageRecord::new(spec, StageState::Skipped, 0, 0.0));
                continue;
            }

            let stage_start = Instant::now();
            let (attempts, result) = self.execute_stage(spec, cancel).await;
            let duration_ms = stage_start.elapsed().as_secs_f64() * 1000.0;

            if let Err(err) = result {
                self.fail_stage(run_id, spec, &err, attempts, duration_ms, records);
                return Err(err);
            }

            info!(stage = %spec.id, duration_ms, "Stage succeeded");
            self.emit_stage(
                "stage.succeeded",
                spec,
                serde_json::json!({ "duration_ms": duration_ms, "attempts": attempts }),
            );
            executed.insert(spec.id.clone());
            records.push(StageRecord::new(spec, StageState::Succeeded, attempts, duration_ms));
        }

        let run = PipelineRun {
            run_id,
            pipeline: self.graph.name().to_string(),
            records,
            duration_ms: start.elapsed().as_secs_f64() * 1000.0,
        };

        info!(
            run_id = %run_id,
            executed = run.executed().len(),
            skipped = run.skipped().len(),
            duration_ms = run.duration_ms,
            "Pipeline run completed"
        );
        self.events.try_emit(
            "pipeline.completed",
            Some(serde_json::json!({
                "run_id": run_id.to_string(),
                "executed": run.executed(),
                "skipped": run.skipped(),
                "duration_ms": run.duration_ms,
            })),
        );

        Ok(run)
    }

    /// Runs a stage up to `max_attempts` times. Returns the attempt count.
    async fn execute_stage(
        &self,
        spec: &StageSpec,
        cancel: &CancellationToken,
    ) -> (usize, Result<(), ReproError>) {
        let max_attempts = self.config.max_attempts.max(1);
        let key = self.stage_key(spec);
        let mut attempt = 1;

        loop {
            if let Err(e) = self.store.invalidate(spec) {
                return (attempt, Err(self.attribute(spec, e.into()).await));
            }

            info!(stage = %spec.id, kind = %spec.kind, attempt, "Running stage");
            self.emit_stage("stage.started", spec, serde_json::json!({ "attempt": attempt }));

            let result = match self.execute_action(spec, cancel).await {
                Ok(()) => self.store.record(spec, &key).map_err(ReproError::from),
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => return (attempt, Ok(())),
                Err(err) if attempt < max_attempts && is_retryable(&err) => {
                    warn!(
                        stage = %spec.id,
                        attempt,
                        max_attempts,
                        error = %err,
                        "Stage failed, retrying"
                    );
                    attempt += 1;
                }
                Err(err) => return (attempt, Err(self.attribute(spec, err).await)),
            }
        }
    }

    /// Turns an error raised around the stage's command (rendering, sample
    /// files, declared outputs) into the stage kind's failure, so that it
    /// names the stage and a log. The detail is appended to that log.
    async fn attribute(&self, spec: &StageSpec, err: ReproError) -> ReproError {
        if err.stage_failure().is_some() || matches!(err, ReproError::Cancelled { .. }) {
            return err;
        }

        let log = self.layout.stage_log(&spec.id);
        let detail = err.to_string();
        if let Err(e) = append_log(&log, &format!("error: {detail}\n")).await {
            warn!(stage = %spec.id, error = %e, "Failed to write stage log");
        }
        spec.kind
            .failure(StageFailure::new(&spec.id, spec.action.describe(), log).with_detail(detail))
    }

    fn is_fresh(&self, spec: &StageSpec) -> bool {
        self.store
            .stage_is_fresh(spec, &self.stage_key(spec), &self.dependencies_of(spec))
    }

    async fn execute_action(&self, spec: &StageSpec, cancel: &CancellationToken) -> Result<(), ReproError> {
        let ctx = StageContext {
            spec,
            layout: &self.layout,
            config: &self.config,
            vars: self.stage_vars(spec),
            runner: self.runner.clone(),
            events: self.events.clone(),
            cancel,
        };

        match &spec.action {
            StageAction::Command(template) => {
                let invocation = Invocation::new(template.render(&ctx.vars)?, ctx.stage_dir(), ctx.log_path())
                    .with_tee(self.config.tee_output);
                match self.runner.run(&invocation, cancel).await? {
                    RunOutcome::Success => Ok(()),
                    RunOutcome::Failed { exit_code } => Err(spec.kind.failure(
                        StageFailure::new(&spec.id, invocation.command_line(), &invocation.log_path)
                            .with_exit_code(exit_code),
                    )),
                    RunOutcome::Cancelled => Err(ReproError::Cancelled {
                        stage: spec.id.clone(),
                        reason: cancel.reason().unwrap_or_else(|| "cancelled".to_string()),
                    }),
                }
            }
            StageAction::Trials(trial) => {
                let Some(output) = spec.outputs.first() else {
                    return Err(PipelineValidationError::new(format!(
                        "Measurement stage '{}' declares no sample file",
                        spec.id
                    ))
                    .with_code("GRAPH-TRIAL-OUTPUT")
                    .into());
                };

                let samples = self.trials.run_trials(&ctx, trial, self.config.trials).await?;
                ReportWriter::new(self.layout.clone()).write_samples(output, &samples)?;

                let mut log = format!("{} trials of {}\n", samples.len(), trial.config);
                for sample in &samples {
                    let _ = writeln!(
                        log,
                        "trial {}: {} (log: {})",
                        sample.index,
                        sample.value,
                        self.layout.trial_log(&spec.id, sample.index).display()
                    );
                }
                let _ = writeln!(log, "wrote {}", output.display());
                ctx.write_log(&log).await?;
                Ok(())
            }
            StageAction::Task(task) => {
                debug!(stage = %spec.id, task = %task.describe(), "Executing in-process task");
                task.execute(&ctx).await
            }
        }
    }

    /// Global variables plus `stage`, `stage_dir`, `log` and the stage's own.
    fn stage_vars(&self, spec: &StageSpec) -> TemplateVars {
        let mut vars = self.globals.clone();
        vars.set("stage", spec.id.clone());
        vars.set("stage_dir", self.layout.stage_dir(&spec.id).display().to_string());
        vars.set("log", self.layout.stage_log(&spec.id).display().to_string());
        vars.extend(&spec.vars);
        vars
    }

    /// Invalidates the failing stage and reports the partial run.
    ///
    /// `pipeline.failed` carries the records of every stage that finished
    /// plus the failing one.
    fn fail_stage(
        &self,
        run_id: Uuid,
        spec: &StageSpec,
        err: &ReproError,
        attempts: usize,
        duration_ms: f64,
        mut records: Vec<StageRecord>,
    ) {
        if attempts > 0 {
            if let Err(e) = self.store.invalidate(spec) {
                warn!(stage = %spec.id, error = %e, "Failed to invalidate stage outputs");
            }
        }

        let log = err
            .log_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| self.layout.stage_log(&spec.id).display().to_string());

        let record = if let ReproError::Cancelled { reason, .. } = err {
            warn!(stage = %spec.id, reason = %reason, "Stage cancelled");
            let record = StageRecord::new(spec, StageState::Cancelled, attempts, duration_ms);
            self.emit_stage(
                "stage.cancelled",
                spec,
                serde_json::json!({ "reason": reason, "duration_ms": duration_ms }),
            );
            record
        } else {
            error!(stage = %spec.id, error = %err, log = %log, "Stage failed");
            let record = StageRecord::new(spec, StageState::Failed, attempts, duration_ms);
            self.emit_stage(
                "stage.failed",
                spec,
                serde_json::json!({
                    "error": err.to_string(),
                    "log": log,
                    "duration_ms": duration_ms,
                }),
            );
            record
        };
        records.push(record);

        self.events.try_emit(
            "pipeline.failed",
            Some(serde_json::json!({
                "run_id": run_id.to_string(),
                "stage": &spec.id,
                "error": err.to_string(),
                "records": records,
            })),
        );
    }

    fn emit_stage(&self, event_type: &str, spec: &StageSpec, extra: serde_json::Value) {
        let mut data = serde_json::json!({
            "stage": &spec.id,
            "kind": spec.kind.to_string(),
        });
        if let (Some(data), serde_json::Value::Object(extra)) = (data.as_object_mut(), extra) {
            data.extend(extra);
        }
        self.events.try_emit(event_type, Some(data));
    }

    fn spec(&self, id: &str) -> Result<&StageSpec, ReproError> {
        self.graph.stage(id).ok_or_else(|| {
            PipelineValidationError::new(format!("Unknown stage '{id}'"))
                .with_stages(vec![id.to_string()])
                .into()
        })
    }

    fn dependencies_of(&self, spec: &StageSpec) -> Vec<&StageSpec> {
        spec.dependencies
            .iter()
            .filter_map(|d| self.graph.stage(d))
            .collect()
    }
}

/// Stage failures and filesystem errors may be transient; rendering and
/// validation errors repeat identically.
fn is_retryable(err: &ReproError) -> bool {
    err.stage_failure().is_some() || matches!(err, ReproError::Io(_))
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("pipeline", &self.graph.name())
            .field("layout", &self.layout)
            .field("trials", &self.trials)
            .finish_non_exhaustive()
    }
}
