//! Per-stage execution context.

use super::StageSpec;
use crate::cancellation::CancellationToken;
use crate::config::ReproConfig;
use crate::events::EventSink;
use crate::layout::Layout;
use crate::process::{ProcessRunner, TemplateVars};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

/// Everything a stage action may use while it runs.
///
/// Borrowed from the orchestrator for the duration of one stage.
pub struct StageContext<'a> {
    /// The stage being executed.
    pub spec: &'a StageSpec,
    /// Filesystem layout.
    pub layout: &'a Layout,
    /// Harness configuration.
    pub config: &'a ReproConfig,
    /// Global plus stage-local template variables.
    pub vars: TemplateVars,
    /// Runner for external commands.
    pub runner: Arc<dyn ProcessRunner>,
    /// Event sink for progress events.
    pub events: Arc<dyn EventSink>,
    /// Operator interrupt.
    pub cancel: &'a CancellationToken,
}

impl<'a> StageContext<'a> {
    /// The stage id.
    #[must_use]
    pub fn stage_id(&self) -> &str {
        &self.spec.id
    }

    /// The stage's own working directory.
    #[must_use]
    pub fn stage_dir(&self) -> PathBuf {
        self.layout.stage_dir(&self.spec.id)
    }

    /// The stage's log file.
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.layout.stage_log(&self.spec.id)
    }

    /// Truncates the stage log and writes `text` into it.
    ///
    /// In-process tasks use this so that a failure still points at exactly
    /// one log file.
    pub async fn write_log(&self, text: &str) -> std::io::Result<()> {
        let path = self.log_path();
        create_parent(&path).await?;
        let mut file = tokio::fs::File::create(&path).await?;
        file.write_all(text.as_bytes()).await?;
        file.flush().await
    }
}

impl std::fmt::Debug for StageContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageContext")
            .field("stage", &self.spec.id)
            .field("layout", &self.layout)
            .field("vars", &self.vars)
            .finish_non_exhaustive()
    }
}

/// Appends `text` to the log at `path`, creating it if needed.
pub(super) async fn append_log(path: &Path, text: &str) -> std::io::Result<()> {
    create_parent(path).await?;
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(text.as_bytes()).await?;
    file.flush().await
}

async fn create_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) => tokio::fs::create_dir_all(parent).await,
        None => Ok(()),
    }
}
