//! Error types for reprobench.
//!
//! Every subprocess failure is local to the stage that ran it. The stage kind
//! decides which variant of [`ReproError`] surfaces, and each of those carries
//! a [`StageFailure`] pointing at exactly one log file.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for reprobench operations.
#[derive(Debug, Error)]
pub enum ReproError {
    /// Fetching sources failed (network or version control).
    #[error("Download failed: {0}")]
    Download(StageFailure),

    /// A build step exited non-zero.
    #[error("Build failed: {0}")]
    Build(StageFailure),

    /// The sampling tool failed, including missing hardware counter support.
    #[error("Profile collection failed: {0}")]
    ProfileCollection(StageFailure),

    /// Raw sample data was malformed or empty.
    #[error("Aggregation failed: {0}")]
    Aggregation(StageFailure),

    /// The binary optimization tool rejected its input.
    #[error("Optimization tool failed: {0}")]
    OptimizationTool(StageFailure),

    /// Fewer than two trials completed.
    #[error("{0}")]
    InsufficientSamples(#[from] InsufficientSamplesError),

    /// The stage graph contains a cycle.
    #[error("{0}")]
    CycleDetected(#[from] CycleDetectedError),

    /// The pipeline definition is invalid.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// A command template could not be rendered.
    #[error("{0}")]
    Template(#[from] TemplateError),

    /// An operator interrupt stopped a stage.
    #[error("Stage '{stage}' cancelled: {reason}")]
    Cancelled {
        /// The interrupted stage.
        stage: String,
        /// Why cancellation was requested.
        reason: String,
    },

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReproError {
    /// Returns the stage failure details if this error came from a stage.
    #[must_use]
    pub fn stage_failure(&self) -> Option<&StageFailure> {
        match self {
            Self::Download(f)
            | Self::Build(f)
            | Self::ProfileCollection(f)
            | Self::Aggregation(f)
            | Self::OptimizationTool(f) => Some(f),
            _ => None,
        }
    }

    /// Returns the name of the failing stage, if any.
    #[must_use]
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::Cancelled { stage, .. } => Some(stage),
            _ => self.stage_failure().map(|f| f.stage.as_str()),
        }
    }

    /// Returns the log file holding the full output of the failing step.
    #[must_use]
    pub fn log_path(&self) -> Option<&PathBuf> {
        self.stage_failure().map(|f| &f.log_path)
    }
}

impl From<serde_json::Error> for ReproError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Diagnostics for a failed stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    /// The failing stage id.
    pub stage: String,
    /// The rendered command line (or task description).
    pub command: String,
    /// The exit code, when the process exited normally.
    pub exit_code: Option<i32>,
    /// The log holding the complete output of the failing step.
    pub log_path: PathBuf,
    /// Extra detail, e.g. a parse error.
    pub detail: Option<String>,
}

impl StageFailure {
    /// Creates a new stage failure.
    #[must_use]
    pub fn new(
        stage: impl Into<String>,
        command: impl Into<String>,
        log_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            stage: stage.into(),
            command: command.into(),
            exit_code: None,
            log_path: log_path.into(),
            detail: None,
        }
    }

    /// Sets the exit code.
    #[must_use]
    pub fn with_exit_code(mut self, code: Option<i32>) -> Self {
        self.exit_code = code;
        self
    }

    /// Sets the detail message.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage '{}' ", self.stage)?;
        match self.exit_code {
            Some(code) => write!(f, "exited with code {code}")?,
            None => write!(f, "failed")?,
        }
        write!(f, " running `{}`", self.command)?;
        if let Some(ref detail) = self.detail {
            write!(f, " ({detail})")?;
        }
        write!(f, "; see log: {}", self.log_path.display())
    }
}

/// Error raised when pipeline validation fails.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
    /// Stable error code (e.g. "GRAPH-MISSING-DEP").
    pub code: Option<&'static str>,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
            code: None,
            fix_hint: None,
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Sets the error code.
    #[must_use]
    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }
}

/// Error raised when a cycle is detected in the stage graph.
///
/// This is a programming error in the pipeline definition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Cycle detected in stage graph: {}", cycle_path.join(" -> "))]
pub struct CycleDetectedError {
    /// The path of stages forming the cycle, first stage repeated at the end.
    pub cycle_path: Vec<String>,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        Self { cycle_path }
    }
}

impl From<CycleDetectedError> for PipelineValidationError {
    fn from(err: CycleDetectedError) -> Self {
        Self {
            message: err.to_string(),
            stages: err.cycle_path,
            code: Some("GRAPH-CYCLE"),
            fix_hint: Some("Remove one of the dependencies in the cycle to break it.".to_string()),
        }
    }
}

/// Error raised when fewer than two samples are available.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Insufficient samples: need at least 2, got {got}")]
pub struct InsufficientSamplesError {
    /// Number of samples supplied.
    pub got: usize,
}

/// Errors rendering a command template.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    /// A placeholder had no value.
    #[error("Unknown placeholder '{{{name}}}' in template `{template}`")]
    UnknownPlaceholder {
        /// The placeholder name.
        name: String,
        /// The template text.
        template: String,
    },

    /// The template has no program.
    #[error("Command template has an empty program")]
    EmptyProgram,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_failure_display_points_at_log() {
        let failure = StageFailure::new("build-baseline", "ninja -j 8", "/w/logs/build-baseline.log")
            .with_exit_code(Some(2));

        let text = failure.to_string();
        assert!(text.contains("build-baseline"));
        assert!(text.contains("exited with code 2"));
        assert!(text.contains("ninja -j 8"));
        assert!(text.ends_with("see log: /w/logs/build-baseline.log"));
    }

    #[test]
    fn test_repro_error_stage_accessors() {
        let err = ReproError::Build(StageFailure::new("b", "make", "/tmp/b.log"));
        assert_eq!(err.stage(), Some("b"));
        assert_eq!(err.log_path(), Some(&PathBuf::from("/tmp/b.log")));

        let err = ReproError::Cancelled {
            stage: "m".to_string(),
            reason: "interrupt".to_string(),
        };
        assert_eq!(err.stage(), Some("m"));
        assert!(err.log_path().is_none());
    }

    #[test]
    fn test_cycle_detected_error() {
        let err = CycleDetectedError::new(vec!["a".to_string(), "b".to_string(), "a".to_string()]);
        assert!(err.to_string().contains("a -> b -> a"));

        let validation: PipelineValidationError = err.into();
        assert_eq!(validation.code, Some("GRAPH-CYCLE"));
        assert_eq!(validation.stages.len(), 3);
    }

    #[test]
    fn test_template_error_message() {
        let err = TemplateError::UnknownPlaceholder {
            name: "jobz".to_string(),
            template: "make -j{jobz}".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Unknown placeholder '{jobz}' in template `make -j{jobz}`"
        );
    }

    #[test]
    fn test_insufficient_samples_message() {
        let err = InsufficientSamplesError { got: 1 };
        assert_eq!(err.to_string(), "Insufficient samples: need at least 2, got 1");
    }
}
