//! Test doubles for the process and task seams.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::cancellation::CancellationToken;
use crate::errors::ReproError;
use crate::pipeline::{StageContext, StageTask};
use crate::process::{Invocation, ProcessRunner, RunOutcome, SystemProcessRunner};

/// A runner that records every invocation and can inject failures.
///
/// Invocations are identified by the stem of their log file: `build` for a
/// stage log, `measure.trial-0` for a trial log. Everything not scripted to
/// fail is forwarded to the wrapped runner.
pub struct RecordingRunner {
    inner: Arc<dyn ProcessRunner>,
    invocations: Mutex<Vec<Invocation>>,
    failures: Mutex<HashMap<String, i32>>,
}

impl Default for RecordingRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingRunner {
    /// Wraps a real [`SystemProcessRunner`].
    #[must_use]
    pub fn new() -> Self {
        Self::wrapping(Arc::new(SystemProcessRunner::new()))
    }

    /// Wraps an arbitrary runner.
    #[must_use]
    pub fn wrapping(inner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            inner,
            invocations: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Makes invocations logging to `<stem>.log` exit with `code`.
    pub fn fail(&self, stem: impl Into<String>, code: i32) {
        self.failures.lock().insert(stem.into(), code);
    }

    /// Removes every injected failure.
    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    /// All recorded invocations, oldest first.
    #[must_use]
    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().clone()
    }

    /// How often a stage ran, counting each of its trials.
    #[must_use]
    pub fn count_for(&self, stage: &str) -> usize {
        let trial_prefix = format!("{stage}.trial-");
        self.invocations
            .lock()
            .iter()
            .filter(|inv| {
                let stem = log_stem(inv);
                stem == stage || stem.starts_with(&trial_prefix)
            })
            .count()
    }

    /// Stage and trial log stems in invocation order.
    #[must_use]
    pub fn stems(&self) -> Vec<String> {
        self.invocations.lock().iter().map(log_stem).collect()
    }

    /// Forgets recorded invocations.
    pub fn reset(&self) {
        self.invocations.lock().clear();
    }
}

fn log_stem(invocation: &Invocation) -> String {
    invocation
        .log_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[async_trait]
impl ProcessRunner for RecordingRunner {
    async fn run(
        &self,
        invocation: &Invocation,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, ReproError> {
        self.invocations.lock().push(invocation.clone());

        let injected = self.failures.lock().get(&log_stem(invocation)).copied();
        if let Some(code) = injected {
            if let Some(parent) = invocation.log_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(
                &invocation.log_path,
                format!("$ {}\ninjected failure: exit {code}\n", invocation.command_line()),
            )?;
            return Ok(RunOutcome::Failed {
                exit_code: Some(code),
            });
        }

        self.inner.run(invocation, cancel).await
    }
}

impl std::fmt::Debug for RecordingRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingRunner")
            .field("invocations", &self.invocations.lock().len())
            .field("failures", &*self.failures.lock())
            .finish_non_exhaustive()
    }
}

/// An in-process task that counts executions and creates its outputs.
#[derive(Debug, Default)]
pub struct CountingTask {
    name: String,
    calls: AtomicUsize,
}

impl CountingTask {
    /// Creates a counting task.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            calls: AtomicUsize::new(0),
        })
    }

    /// Returns how often the task executed.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StageTask for CountingTask {
    fn describe(&self) -> String {
        format!("counting {}", self.name)
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> Result<(), ReproError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        for output in &ctx.spec.outputs {
            if let Some(parent) = output.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(output, self.name.as_bytes()).await?;
        }
        ctx.write_log(&format!("{} ran\n", self.name)).await?;
        Ok(())
    }
}
