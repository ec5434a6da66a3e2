//! In-process stage tasks producing comparisons and the final report.

use super::{ReadSamplesError, ReportWriter};
use crate::core::ConfigName;
use crate::errors::{ReproError, StageFailure};
use crate::pipeline::{StageContext, StageTask};
use crate::stats::ComparisonResult;
use async_trait::async_trait;
use std::fmt::Write as _;
use tracing::info;

/// Compares two configurations' sample dumps.
///
/// Writes the pair's comparison JSON and appends one line to the
/// treatment's report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompareTask {
    /// The reference configuration.
    pub baseline: ConfigName,
    /// The configuration measured against it.
    pub treatment: ConfigName,
}

impl CompareTask {
    /// Creates a comparison task.
    #[must_use]
    pub fn new(baseline: ConfigName, treatment: ConfigName) -> Self {
        Self {
            baseline,
            treatment,
        }
    }
}

#[async_trait]
impl StageTask for CompareTask {
    fn describe(&self) -> String {
        format!("compare {} {}", self.baseline, self.treatment)
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> Result<(), ReproError> {
        let writer = ReportWriter::new(ctx.layout.clone());
        let failure = |detail: String| {
            ReproError::Aggregation(
                StageFailure::new(ctx.stage_id(), self.describe(), ctx.log_path()).with_detail(detail),
            )
        };

        let read = |config| {
            writer.read_samples(config).map_err(|e: ReadSamplesError| e.to_string())
        };
        let baseline = match read(self.baseline) {
            Ok(samples) => samples,
            Err(detail) => {
                ctx.write_log(&format!("{detail}\n")).await?;
                return Err(failure(detail));
            }
        };
        let treatment = match read(self.treatment) {
            Ok(samples) => samples,
            Err(detail) => {
                ctx.write_log(&format!("{detail}\n")).await?;
                return Err(failure(detail));
            }
        };

        let result = match ComparisonResult::from_samples(
            self.baseline,
            &baseline,
            self.treatment,
            &treatment,
        ) {
            Ok(result) => result,
            Err(e) => {
                ctx.write_log(&format!("{e}\n")).await?;
                return Err(failure(e.to_string()));
            }
        };

        let json = writer.write_comparison(&result)?;
        let line = result.summary_line();
        writer.append_report_line(self.treatment, &line)?;

        let mut log = String::new();
        for side in [&result.baseline, &result.treatment] {
            let _ = writeln!(
                log,
                "{}: n={} mean={:.3} stddev={:.3} samples={:?}",
                side.config, side.stats.n, side.stats.mean, side.stats.stddev, side.samples
            );
        }
        let _ = writeln!(log, "{line}");
        let _ = writeln!(log, "wrote {}", json.display());
        ctx.write_log(&log).await?;

        info!(
            baseline = %self.baseline,
            treatment = %self.treatment,
            delta = result.percentage_delta,
            "{line}"
        );
        Ok(())
    }
}

/// Regenerates the final report from the current comparison of every pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryTask {
    /// Baseline/treatment pairs in report order.
    pub pairs: Vec<(ConfigName, ConfigName)>,
}

impl SummaryTask {
    /// Creates a summary over the given pairs.
    #[must_use]
    pub fn new(pairs: Vec<(ConfigName, ConfigName)>) -> Self {
        Self { pairs }
    }
}

#[async_trait]
impl StageTask for SummaryTask {
    fn describe(&self) -> String {
        let pairs: Vec<String> = self
            .pairs
            .iter()
            .map(|(b, t)| format!("{t}-vs-{b}"))
            .collect();
        format!("summary {}", pairs.join(","))
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> Result<(), ReproError> {
        let writer = ReportWriter::new(ctx.layout.clone());

        let mut lines = Vec::with_capacity(self.pairs.len());
        for &(baseline, treatment) in &self.pairs {
            match writer.read_comparison(baseline, treatment) {
                Ok(result) => lines.push(result.summary_line()),
                Err(e) => {
                    let path = ctx.layout.comparison_file(baseline, treatment);
                    let detail = format!("cannot read {}: {e}", path.display());
                    ctx.write_log(&format!("{detail}\n")).await?;
                    return Err(ReproError::Aggregation(
                        StageFailure::new(ctx.stage_id(), self.describe(), ctx.log_path())
                            .with_detail(detail),
                    ));
                }
            }
        }

        let path = writer.write_final_report(&lines)?;
        ctx.write_log(&format!("{}\nwrote {}\n", lines.join("\n"), path.display()))
            .await?;
        info!(report = %path.display(), "Final report written");
        Ok(())
    }
}
