//! Persisted directory layout.
//!
//! ```text
//! <work>/<stage-id>/             one subtree per stage
//! <work>/logs/<stage-id>.log     one log per stage invocation
//! <work>/.stamps/<stage-id>.stamp
//! <work>/trials/                 ephemeral trial directories
//! <results>/<config>.samples
//! <results>/<treatment>-vs-<baseline>.json
//! <results>/<config>.report
//! <results>/report.txt
//! ```

use crate::core::ConfigName;
use std::path::{Path, PathBuf};

/// Maps stage ids and configuration names to filesystem paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    work_dir: PathBuf,
    results_dir: PathBuf,
}

impl Layout {
    /// Creates a layout rooted at the given directories.
    ///
    /// Relative roots are resolved against the current directory once, here:
    /// commands run inside their stage directory, so every path handed to
    /// them must be absolute.
    #[must_use]
    pub fn new(work_dir: impl Into<PathBuf>, results_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: absolute(work_dir.into()),
            results_dir: absolute(results_dir.into()),
        }
    }

    /// Root of all per-stage work trees.
    #[must_use]
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Root of all results.
    #[must_use]
    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    /// The working directory owned by a stage.
    #[must_use]
    pub fn stage_dir(&self, stage: &str) -> PathBuf {
        self.work_dir.join(stage)
    }

    /// Directory holding all logs.
    #[must_use]
    pub fn log_dir(&self) -> PathBuf {
        self.work_dir.join("logs")
    }

    /// The single log file for a stage.
    #[must_use]
    pub fn stage_log(&self, stage: &str) -> PathBuf {
        self.log_dir().join(format!("{stage}.log"))
    }

    /// The log file for one trial of a measurement stage.
    #[must_use]
    pub fn trial_log(&self, stage: &str, index: usize) -> PathBuf {
        self.log_dir().join(format!("{stage}.trial-{index}.log"))
    }

    /// Directory holding completion stamps.
    #[must_use]
    pub fn stamp_dir(&self) -> PathBuf {
        self.work_dir.join(".stamps")
    }

    /// Completion stamp for a stage.
    #[must_use]
    pub fn stamp(&self, stage: &str) -> PathBuf {
        self.stamp_dir().join(format!("{stage}.stamp"))
    }

    /// Parent directory for ephemeral trial directories.
    #[must_use]
    pub fn trial_root(&self) -> PathBuf {
        self.work_dir.join("trials")
    }

    /// Raw sample dump for a configuration.
    #[must_use]
    pub fn samples_file(&self, config: ConfigName) -> PathBuf {
        self.results_dir.join(format!("{}.samples", config.slug()))
    }

    /// Aggregated comparison for a baseline/treatment pair.
    #[must_use]
    pub fn comparison_file(&self, baseline: ConfigName, treatment: ConfigName) -> PathBuf {
        self.results_dir
            .join(format!("{}-vs-{}.json", treatment.slug(), baseline.slug()))
    }

    /// Append-only human readable report for a configuration.
    #[must_use]
    pub fn config_report(&self, config: ConfigName) -> PathBuf {
        self.results_dir.join(format!("{}.report", config.slug()))
    }

    /// The final report collecting every configuration's latest line.
    #[must_use]
    pub fn final_report(&self) -> PathBuf {
        self.results_dir.join("report.txt")
    }
}

fn absolute(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        return path;
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path,
    }
}
