//! Stage state and kind enums.

use crate::errors::{ReproError, StageFailure};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of work a stage performs.
///
/// The kind decides which error a failing stage surfaces as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Fetches sources (version control, archives).
    Download,
    /// Configures and builds a toolchain.
    #[default]
    Build,
    /// Collects a hardware-counter sample trace.
    Profile,
    /// Converts raw profile data into a consumable profile.
    Aggregate,
    /// Runs the post-link binary optimization tool.
    Optimize,
    /// Repeats a timed build to collect samples.
    Measure,
    /// Computes statistics and writes reports.
    Report,
}

impl StageKind {
    /// Wraps a stage failure in the error variant for this kind.
    #[must_use]
    pub fn failure(self, failure: StageFailure) -> ReproError {
        match self {
            Self::Download => ReproError::Download(failure),
            Self::Build | Self::Measure => ReproError::Build(failure),
            Self::Profile => ReproError::ProfileCollection(failure),
            Self::Aggregate | Self::Report => ReproError::Aggregation(failure),
            Self::Optimize => ReproError::OptimizationTool(failure),
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Download => write!(f, "download"),
            Self::Build => write!(f, "build"),
            Self::Profile => write!(f, "profile"),
            Self::Aggregate => write!(f, "aggregate"),
            Self::Optimize => write!(f, "optimize"),
            Self::Measure => write!(f, "measure"),
            Self::Report => write!(f, "report"),
        }
    }
}

/// How a stage ended within one orchestrator run.
///
/// Successful runs hold only `Skipped` and `Succeeded` records; the
/// `pipeline.failed` event also carries the `Failed` or `Cancelled` one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    /// Outputs were fresh; nothing ran.
    Skipped,
    /// The stage action completed and its stamp was recorded.
    Succeeded,
    /// The stage action failed; outputs were invalidated.
    Failed,
    /// An operator interrupt stopped the stage; outputs were invalidated.
    Cancelled,
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skipped => write!(f, "skipped"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl StageState {
    /// Returns true if downstream stages may proceed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Skipped | Self::Succeeded)
    }

    /// Returns true if the state indicates failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled)
    }

    /// Returns true if the stage action actually executed.
    #[must_use]
    pub fn executed(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}
