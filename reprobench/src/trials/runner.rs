//! Repeated measurement with bounded concurrency.

use super::{SampleSource, TrialSample, TrialSpec};
use crate::errors::{ReproError, StageFailure};
use crate::pipeline::StageContext;
use crate::process::{Invocation, RunOutcome};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

/// Runs the trials of a measurement stage.
///
/// Trial-level concurrency is independent of the job count each trial's
/// build uses internally.
#[derive(Debug, Clone, Copy)]
pub struct TrialRunner {
    parallelism: usize,
    tee: bool,
}

impl Default for TrialRunner {
    fn default() -> Self {
        Self::new(1)
    }
}

impl TrialRunner {
    /// Creates a runner executing at most `parallelism` trials at once.
    #[must_use]
    pub fn new(parallelism: usize) -> Self {
        Self {
            parallelism: parallelism.max(1),
            tee: false,
        }
    }

    /// Mirrors trial output to the console.
    #[must_use]
    pub fn with_tee(mut self, tee: bool) -> Self {
        self.tee = tee;
        self
    }

    /// Returns the concurrency bound.
    #[must_use]
    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Runs `n` trials and returns their samples ordered by index.
    ///
    /// Each trial runs in a fresh directory under the layout's trial root,
    /// removed when the trial ends. The first failing trial fails the stage;
    /// trials still in flight are dropped, which kills their processes.
    ///
    /// # Errors
    ///
    /// Returns the stage kind's failure variant pointing at the failing
    /// trial's log, [`ReproError::Aggregation`] if a sample cannot be read,
    /// or [`ReproError::Cancelled`].
    pub async fn run_trials(
        &self,
        ctx: &StageContext<'_>,
        spec: &TrialSpec,
        n: usize,
    ) -> Result<Vec<TrialSample>, ReproError> {
        let root = ctx.layout.trial_root();
        tokio::fs::create_dir_all(&root).await?;

        info!(
            stage = %ctx.stage_id(),
            config = %spec.config,
            trials = n,
            parallelism = self.parallelism,
            "Running trials"
        );

        let mut samples: Vec<TrialSample> = stream::iter(0..n)
            .map(|index| self.run_one(ctx, spec, index, &root))
            .buffer_unordered(self.parallelism)
            .try_collect()
            .await?;

        samples.sort_by_key(|s| s.index);
        Ok(samples)
    }

    async fn run_one(
        &self,
        ctx: &StageContext<'_>,
        spec: &TrialSpec,
        index: usize,
        root: &Path,
    ) -> Result<TrialSample, ReproError> {
        let stage = ctx.stage_id();
        let trial_dir = tempfile::Builder::new()
            .prefix(&format!("{stage}-{index}-"))
            .tempdir_in(root)?;
        let log_path = ctx.layout.trial_log(stage, index);

        let mut vars = ctx.vars.clone();
        vars.set("trial", index.to_string());
        vars.set("trial_dir", trial_dir.path().display().to_string());
        vars.set("config", spec.config.slug());

        let invocation = Invocation::new(spec.template.render(&vars)?, trial_dir.path(), &log_path)
            .with_tee(self.tee);

        let start = Instant::now();
        let outcome = ctx.runner.run(&invocation, ctx.cancel).await?;
        let elapsed = start.elapsed();

        match outcome {
            RunOutcome::Success => {}
            RunOutcome::Failed { exit_code } => {
                return Err(ctx.spec.kind.failure(
                    StageFailure::new(stage, invocation.command_line(), &log_path)
                        .with_exit_code(exit_code)
                        .with_detail(format!("trial {index}")),
                ));
            }
            RunOutcome::Cancelled => {
                return Err(ReproError::Cancelled {
                    stage: stage.to_string(),
                    reason: ctx.cancel.reason().unwrap_or_else(|| "cancelled".to_string()),
                });
            }
        }

        let value = match &spec.sample {
            SampleSource::WallClock => elapsed.as_secs_f64(),
            SampleSource::File(relative) => SampleSource::read_file(trial_dir.path(), relative)
                .map_err(|detail| {
                    ReproError::Aggregation(
                        StageFailure::new(stage, invocation.command_line(), &log_path)
                            .with_detail(format!("trial {index}: {detail}")),
                    )
                })?,
        };

        trial_dir.close()?;

        debug!(stage = %stage, trial = index, value, "Trial completed");
        ctx.events.try_emit(
            "trial.completed",
            Some(serde_json::json!({
                "stage": stage,
                "config": spec.config.slug(),
                "trial": index,
                "value": value,
            })),
        );

        Ok(TrialSample {
            config: spec.config,
            index,
            value,
        })
    }
}
