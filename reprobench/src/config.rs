//! Harness configuration.
//!
//! Values come from built-in defaults, then an optional `reprobench.toml`,
//! then `REPRO_*` environment variables. The CLI applies its flags last.

use crate::errors::ReproError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default configuration file name looked up in the current directory.
pub const CONFIG_FILE_NAME: &str = "reprobench.toml";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "REPRO_";

/// Configuration for a reproduction run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReproConfig {
    /// Job count handed to the underlying build tool.
    #[serde(default = "default_jobs")]
    pub jobs: usize,
    /// Number of measured trials per configuration.
    #[serde(default = "default_trials")]
    pub trials: usize,
    /// How many trials of one configuration may run at once.
    #[serde(default = "default_trial_parallelism")]
    pub trial_parallelism: usize,
    /// Root of per-stage work trees, logs and stamps.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    /// Root of sample dumps and reports.
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
    /// Attempts per stage; 1 means fail-stop.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    /// Mirror subprocess output to the console.
    #[serde(default)]
    pub tee_output: bool,
    /// Source repository to fetch.
    #[serde(default = "default_llvm_repo")]
    pub llvm_repo: String,
    /// Git ref checked out for every build.
    #[serde(default = "default_llvm_ref")]
    pub llvm_ref: String,
    /// External tool locations.
    #[serde(default)]
    pub tools: ToolPaths,
}

fn default_jobs() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

fn default_trials() -> usize {
    3
}

fn default_trial_parallelism() -> usize {
    1
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("work")
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_max_attempts() -> usize {
    1
}

fn default_llvm_repo() -> String {
    "https://github.com/llvm/llvm-project.git".to_string()
}

fn default_llvm_ref() -> String {
    "llvmorg-14.0.6".to_string()
}

impl Default for ReproConfig {
    fn default() -> Self {
        Self {
            jobs: default_jobs(),
            trials: default_trials(),
            trial_parallelism: default_trial_parallelism(),
            work_dir: default_work_dir(),
            results_dir: default_results_dir(),
            max_attempts: default_max_attempts(),
            tee_output: false,
            llvm_repo: default_llvm_repo(),
            llvm_ref: default_llvm_ref(),
            tools: ToolPaths::default(),
        }
    }
}

/// Locations of the external tools the recipe invokes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    /// Version control client.
    pub git: String,
    /// Build system generator.
    pub cmake: String,
    /// Build tool.
    pub ninja: String,
    /// Hardware-counter sampling tool.
    pub perf: String,
    /// Converts sample traces into an edge-count profile.
    pub perf2bolt: String,
    /// The post-link binary optimizer.
    pub llvm_bolt: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            git: "git".to_string(),
            cmake: "cmake".to_string(),
            ninja: "ninja".to_string(),
            perf: "perf".to_string(),
            perf2bolt: "perf2bolt".to_string(),
            llvm_bolt: "llvm-bolt".to_string(),
        }
    }
}

impl ReproConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ReproError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
            .map_err(|e| ReproError::Config(format!("{}: {e}", path.display())))
    }

    /// Parses configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ReproError> {
        toml::from_str(content).map_err(|e| ReproError::Config(e.to_string()))
    }

    /// Loads the explicit file if given, else `reprobench.toml` in the
    /// current directory if present, else defaults. Environment overrides are
    /// applied on top.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ReproError> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => {
                let candidate = Path::new(CONFIG_FILE_NAME);
                if candidate.is_file() {
                    Self::from_file(candidate)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `REPRO_*` overrides from the given variables.
    pub fn apply_env<I>(&mut self, vars: I) -> Result<(), ReproError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            debug!(key = %key, value = %value, "Applying environment override");
            match name {
                "JOBS" => self.jobs = parse_count(&key, &value)?,
                "TRIALS" => self.trials = parse_count(&key, &value)?,
                "TRIAL_PARALLELISM" => self.trial_parallelism = parse_count(&key, &value)?,
                "MAX_ATTEMPTS" => self.max_attempts = parse_count(&key, &value)?,
                "WORK_DIR" => self.work_dir = PathBuf::from(value),
                "RESULTS_DIR" => self.results_dir = PathBuf::from(value),
                "TEE" => self.tee_output = matches!(value.as_str(), "1" | "true" | "yes"),
                "LLVM_REPO" => self.llvm_repo = value,
                "LLVM_REF" => self.llvm_ref = value,
                _ => {}
            }
        }
        Ok(())
    }

    /// Checks that counts are usable.
    pub fn validate(&self) -> Result<(), ReproError> {
        if self.jobs == 0 {
            return Err(ReproError::Config("jobs must be at least 1".to_string()));
        }
        if self.trial_parallelism == 0 {
            return Err(ReproError::Config(
                "trial_parallelism must be at least 1".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(ReproError::Config("max_attempts must be at least 1".to_string()));
        }
        if self.trials < 2 {
            return Err(ReproError::Config(format!(
                "trials must be at least 2 to compute a standard deviation, got {}",
                self.trials
            )));
        }
        Ok(())
    }

    /// Sets the build job count.
    #[must_use]
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }

    /// Sets the number of trials.
    #[must_use]
    pub fn with_trials(mut self, trials: usize) -> Self {
        self.trials = trials;
        self
    }

    /// Sets the trial concurrency bound.
    #[must_use]
    pub fn with_trial_parallelism(mut self, parallelism: usize) -> Self {
        self.trial_parallelism = parallelism;
        self
    }

    /// Sets the work and results roots.
    #[must_use]
    pub fn with_roots(mut self, work_dir: impl Into<PathBuf>, results_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self.results_dir = results_dir.into();
        self
    }
}

fn parse_count(key: &str, value: &str) -> Result<usize, ReproError> {
    value
        .trim()
        .parse()
        .map_err(|_| ReproError::Config(format!("{key} must be a positive integer, got '{value}'")))
}
