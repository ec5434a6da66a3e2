//! Trial definitions and samples.

use crate::core::ConfigName;
use crate::process::CommandTemplate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where a trial's measurement comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleSource {
    /// Wall-clock seconds the trial command took.
    WallClock,
    /// A number the command writes to this path, relative to the trial
    /// directory. The last non-empty line is parsed.
    File(PathBuf),
}

impl SampleSource {
    /// Reads a sample from a file, relative to `trial_dir`.
    pub(crate) fn read_file(trial_dir: &Path, relative: &Path) -> Result<f64, String> {
        let path = trial_dir.join(relative);
        let text = std::fs::read_to_string(&path)
            .map_err(|e| format!("cannot read sample file {}: {e}", path.display()))?;
        parse_sample(&text)
            .ok_or_else(|| format!("no numeric sample in {}: {:?}", path.display(), text.trim()))
    }
}

/// Parses the last non-empty line of `text` as a finite number.
pub(crate) fn parse_sample(text: &str) -> Option<f64> {
    text.lines()
        .map(str::trim)
        .rfind(|line| !line.is_empty())
        .and_then(|line| line.parse::<f64>().ok())
        .filter(|value| value.is_finite())
}

/// How to measure one configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialSpec {
    /// The configuration being measured.
    pub config: ConfigName,
    /// The measured command, rendered once per trial with `{trial}`,
    /// `{trial_dir}` and `{config}` available.
    pub template: CommandTemplate,
    /// Where the measurement comes from.
    pub sample: SampleSource,
}

impl TrialSpec {
    /// Creates a trial specification.
    #[must_use]
    pub fn new(config: ConfigName, template: CommandTemplate, sample: SampleSource) -> Self {
        Self {
            config,
            template,
            sample,
        }
    }
}

/// One measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrialSample {
    /// The measured configuration.
    pub config: ConfigName,
    /// Zero-based trial index.
    pub index: usize,
    /// The measured value, in seconds for build-time trials.
    pub value: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sample_uses_last_line() {
        assert_eq!(parse_sample("12.5\n"), Some(12.5));
        assert_eq!(parse_sample("Command exited\n  \n3.25\n\n"), Some(3.25));
        assert_eq!(parse_sample(""), None);
        assert_eq!(parse_sample("12.5\nnot a number"), None);
        assert_eq!(parse_sample("NaN"), None);
    }

    #[test]
    fn test_read_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = SampleSource::read_file(dir.path(), Path::new("elapsed.txt")).unwrap_err();
        assert!(err.contains("elapsed.txt"));

        std::fs::write(dir.path().join("elapsed.txt"), "41.07\n").unwrap();
        assert_eq!(
            SampleSource::read_file(dir.path(), Path::new("elapsed.txt")),
            Ok(41.07)
        );
    }
}
