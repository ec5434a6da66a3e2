//! # Reprobench
//!
//! An idempotent build-and-measure pipeline for reproducing compiler
//! build-time comparisons.
//!
//! Reprobench models the reproduction as a graph of stages with declared
//! outputs and provides:
//!
//! - **Deterministic planning**: topological order with declaration-order tie-breaks
//! - **Stage memoization**: fresh stages are skipped, decided from the filesystem alone
//! - **Fail-stop resumability**: a failed or interrupted stage is left stale, and the
//!   next run resumes exactly there
//! - **Isolated trials**: repeated measurements in ephemeral directories with bounded
//!   concurrency
//! - **Explicit comparisons**: named baseline/treatment pairs with mean, stddev and
//!   percentage delta
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use reprobench::prelude::*;
//!
//! let config = ReproConfig::load(None)?;
//! let orchestrator = ClangRecipe::new(config)
//!     .orchestrator(Arc::new(SystemProcessRunner::new()))?;
//!
//! let run = orchestrator.run(&[], &CancellationToken::new()).await?;
//! println!("executed {:?}, skipped {:?}", run.executed(), run.skipped());
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod artifacts;
pub mod cancellation;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod layout;
pub mod pipeline;
pub mod process;
pub mod recipe;
pub mod report;
pub mod stats;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod trials;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::artifacts::ArtifactStore;
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::ReproConfig;
    pub use crate::core::{ConfigName, StageKind, StageState};
    pub use crate::errors::{
        CycleDetectedError, InsufficientSamplesError, PipelineValidationError, ReproError,
        StageFailure,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::layout::Layout;
    pub use crate::pipeline::{
        Orchestrator, PipelineBuilder, PipelineRun, PlannedStage, StageGraph, StageSpec,
        StageTask,
    };
    pub use crate::process::{CommandTemplate, ProcessRunner, SystemProcessRunner};
    pub use crate::recipe::{ClangRecipe, Target};
    pub use crate::stats::{aggregate, compare, ComparisonResult, SampleStats};
    pub use crate::trials::{SampleSource, TrialSample, TrialSpec};
    pub use std::sync::Arc;
}
