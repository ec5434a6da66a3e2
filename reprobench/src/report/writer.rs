//! Persisting samples, comparisons and reports.

use crate::artifacts::write_atomic;
use crate::core::ConfigName;
use crate::layout::Layout;
use crate::stats::ComparisonResult;
use crate::trials::TrialSample;
use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// A raw sample dump could not be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SampleFileError {
    /// The dump holds no samples.
    #[error("sample file is empty")]
    Empty,

    /// A line is not `<index>\t<value>`.
    #[error("malformed sample on line {line}: {content:?}")]
    Malformed {
        /// One-based line number.
        line: usize,
        /// The offending line.
        content: String,
    },
}

/// Renders samples as `<index>\t<value>` lines.
#[must_use]
pub fn format_samples(samples: &[TrialSample]) -> String {
    samples.iter().fold(String::new(), |mut out, s| {
        let _ = writeln!(out, "{}\t{}", s.index, s.value);
        out
    })
}

/// Parses a raw sample dump. Blank lines are ignored.
///
/// # Errors
///
/// Returns [`SampleFileError`] if a line is malformed or nothing was parsed.
pub fn parse_samples(text: &str, config: ConfigName) -> Result<Vec<TrialSample>, SampleFileError> {
    let mut samples = Vec::new();
    for (i, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let malformed = || SampleFileError::Malformed {
            line: i + 1,
            content: raw.to_string(),
        };
        let (index, value) = line.split_once('\t').ok_or_else(malformed)?;
        let index = index.trim().parse::<usize>().map_err(|_| malformed())?;
        let value = value
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(malformed)?;
        samples.push(TrialSample {
            config,
            index,
            value,
        });
    }

    if samples.is_empty() {
        return Err(SampleFileError::Empty);
    }
    Ok(samples)
}

/// Writes result files under the layout's results directory.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    layout: Layout,
}

impl ReportWriter {
    /// Creates a writer over the given layout.
    #[must_use]
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    /// Atomically replaces `path` with the sample dump.
    pub fn write_samples(&self, path: &Path, samples: &[TrialSample]) -> io::Result<()> {
        ensure_parent(path)?;
        write_atomic(path, format_samples(samples).as_bytes())?;
        debug!(path = %path.display(), samples = samples.len(), "Wrote sample dump");
        Ok(())
    }

    /// Reads a configuration's sample dump from its conventional path.
    pub fn read_samples(&self, config: ConfigName) -> Result<Vec<TrialSample>, ReadSamplesError> {
        let path = self.layout.samples_file(config);
        let text = fs::read_to_string(&path).map_err(|source| ReadSamplesError::Io {
            path: path.clone(),
            source,
        })?;
        parse_samples(&text, config).map_err(|source| ReadSamplesError::Parse { path, source })
    }

    /// Atomically writes the comparison JSON for its pair.
    pub fn write_comparison(&self, result: &ComparisonResult) -> io::Result<PathBuf> {
        let path = self
            .layout
            .comparison_file(result.baseline.config, result.treatment.config);
        ensure_parent(&path)?;
        let json = serde_json::to_string_pretty(result)?;
        write_atomic(&path, format!("{json}\n").as_bytes())?;
        Ok(path)
    }

    /// Reads a pair's comparison JSON.
    pub fn read_comparison(
        &self,
        baseline: ConfigName,
        treatment: ConfigName,
    ) -> io::Result<ComparisonResult> {
        let text = fs::read_to_string(self.layout.comparison_file(baseline, treatment))?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Appends one line to the treatment's own report. Existing lines are
    /// never rewritten.
    pub fn append_report_line(&self, config: ConfigName, line: &str) -> io::Result<PathBuf> {
        let path = self.layout.config_report(config);
        ensure_parent(&path)?;
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(file, "{line}")?;
        Ok(path)
    }

    /// The most recent line of a configuration's report, if any.
    pub fn latest_report_line(&self, config: ConfigName) -> io::Result<Option<String>> {
        match fs::read_to_string(self.layout.config_report(config)) {
            Ok(text) => Ok(text
                .lines()
                .rfind(|l| !l.trim().is_empty())
                .map(str::to_string)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Atomically replaces the final report with `lines`.
    pub fn write_final_report(&self, lines: &[String]) -> io::Result<PathBuf> {
        let path = self.layout.final_report();
        ensure_parent(&path)?;
        let mut text = lines.join("\n");
        text.push('\n');
        write_atomic(&path, text.as_bytes())?;
        Ok(path)
    }
}

/// Reading a sample dump failed.
#[derive(Debug, Error)]
pub enum ReadSamplesError {
    /// The file could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Io {
        /// The dump path.
        path: PathBuf,
        /// The underlying error.
        source: io::Error,
    },

    /// The file content is unusable.
    #[error("{}: {source}", path.display())]
    Parse {
        /// The dump path.
        path: PathBuf,
        /// The parse error.
        source: SampleFileError,
    },
}

fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::ComparisonResult;
    use pretty_assertions::assert_eq;

    fn sample(config: ConfigName, index: usize, value: f64) -> TrialSample {
        TrialSample {
            config,
            index,
            value,
        }
    }

    fn writer() -> (tempfile::TempDir, ReportWriter) {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path().join("work"), dir.path().join("results"));
        (dir, ReportWriter::new(layout))
    }

    #[test]
    fn test_sample_dump_format() {
        let samples = vec![
            sample(ConfigName::Baseline, 0, 101.5),
            sample(ConfigName::Baseline, 1, 99.25),
        ];
        assert_eq!(format_samples(&samples), "0\t101.5\n1\t99.25\n");
        assert_eq!(
            parse_samples("0\t101.5\n\n1\t99.25\n", ConfigName::Baseline).unwrap(),
            samples
        );
    }

    #[test]
    fn test_parse_samples_errors() {
        assert_eq!(
            parse_samples("\n  \n", ConfigName::Bolt).unwrap_err(),
            SampleFileError::Empty
        );
        assert_eq!(
            parse_samples("0\t1.0\n1 2.0\n", ConfigName::Bolt).unwrap_err(),
            SampleFileError::Malformed {
                line: 2,
                content: "1 2.0".to_string()
            }
        );
        assert!(parse_samples("0\tfast\n", ConfigName::Bolt).is_err());
    }

    #[test]
    fn test_write_and_read_samples() {
        let (_dir, writer) = writer();
        let path = writer.layout.samples_file(ConfigName::PgoLto);
        let samples = vec![sample(ConfigName::PgoLto, 0, 3.0), sample(ConfigName::PgoLto, 1, 4.0)];

        writer.write_samples(&path, &samples).unwrap();

        assert_eq!(writer.read_samples(ConfigName::PgoLto).unwrap(), samples);
        assert!(matches!(
            writer.read_samples(ConfigName::Bolt),
            Err(ReadSamplesError::Io { .. })
        ));
    }

    #[test]
    fn test_report_lines_append() {
        let (_dir, writer) = writer();
        assert_eq!(writer.latest_report_line(ConfigName::Bolt).unwrap(), None);

        writer.append_report_line(ConfigName::Bolt, "first").unwrap();
        writer.append_report_line(ConfigName::Bolt, "second").unwrap();

        let text = fs::read_to_string(writer.layout.config_report(ConfigName::Bolt)).unwrap();
        assert_eq!(text, "first\nsecond\n");
        assert_eq!(
            writer.latest_report_line(ConfigName::Bolt).unwrap().as_deref(),
            Some("second")
        );
    }

    #[test]
    fn test_comparison_file_named_by_pair() {
        let (_dir, writer) = writer();
        let result = ComparisonResult::from_samples(
            ConfigName::Baseline,
            &[sample(ConfigName::Baseline, 0, 10.0), sample(ConfigName::Baseline, 1, 10.0)],
            ConfigName::PgoLto,
            &[sample(ConfigName::PgoLto, 0, 8.0), sample(ConfigName::PgoLto, 1, 8.0)],
        )
        .unwrap();

        let path = writer.write_comparison(&result).unwrap();

        assert!(path.ends_with("pgo-lto-vs-baseline.json"));
        let back = writer
            .read_comparison(ConfigName::Baseline, ConfigName::PgoLto)
            .unwrap();
        assert_eq!(back.baseline.config, ConfigName::Baseline);
        assert_eq!(back.treatment.samples, vec![8.0, 8.0]);
    }

    #[test]
    fn test_final_report_is_rewritten() {
        let (_dir, writer) = writer();
        writer.write_final_report(&["a".to_string(), "b".to_string()]).unwrap();
        let path = writer.write_final_report(&["c".to_string()]).unwrap();
        assert_eq!(fs::read_to_string(path).unwrap(), "c\n");
    }
}
