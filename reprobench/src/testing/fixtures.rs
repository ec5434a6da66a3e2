//! Scratch workspaces for pipeline tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::ReproConfig;
use crate::core::StageKind;
use crate::events::CollectingEventSink;
use crate::layout::Layout;
use crate::pipeline::{Orchestrator, StageGraph, StageSpec};
use crate::process::{CommandTemplate, ProcessRunner};

/// A temporary work/results tree with a matching configuration.
///
/// The directory is removed when the workspace is dropped.
#[derive(Debug)]
pub struct TestWorkspace {
    dir: tempfile::TempDir,
    /// Configuration rooted inside the workspace.
    pub config: ReproConfig,
}

impl TestWorkspace {
    /// Creates a workspace with 3 sequential trials and 2 build jobs.
    ///
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("failed to create temporary workspace");
        let config = ReproConfig::default()
            .with_roots(dir.path().join("work"), dir.path().join("results"))
            .with_jobs(2)
            .with_trials(3)
            .with_trial_parallelism(1);
        Self { dir, config }
    }

    /// The workspace root.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// The layout derived from the configuration.
    #[must_use]
    pub fn layout(&self) -> Layout {
        Layout::new(self.config.work_dir.clone(), self.config.results_dir.clone())
    }

    /// A stage's own directory.
    #[must_use]
    pub fn stage_dir(&self, stage: &str) -> PathBuf {
        self.layout().stage_dir(stage)
    }

    /// Builds an orchestrator over `graph` with a collecting event sink.
    #[must_use]
    pub fn orchestrator(
        &self,
        graph: StageGraph,
        runner: Arc<dyn ProcessRunner>,
    ) -> (Orchestrator, Arc<CollectingEventSink>) {
        let events = Arc::new(CollectingEventSink::new());
        let orchestrator = Orchestrator::new(graph, self.config.clone(), runner)
            .with_events(events.clone());
        (orchestrator, events)
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

/// A command stage that writes `<stage_dir>/<file>` through `sh -c`.
#[must_use]
pub fn touch_stage(workspace: &TestWorkspace, id: &str, kind: StageKind, file: &str) -> StageSpec {
    let output = workspace.stage_dir(id).join(file);
    StageSpec::command(
        id,
        kind,
        CommandTemplate::shell(format!("mkdir -p {{stage_dir}} && echo {id} > {{stage_dir}}/{file}")),
    )
    .with_output(output)
}
