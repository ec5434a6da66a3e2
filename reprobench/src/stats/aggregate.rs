//! Sample statistics and configuration comparison.

use crate::core::ConfigName;
use crate::errors::InsufficientSamplesError;
use crate::trials::TrialSample;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Summary statistics over one configuration's samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleStats {
    /// Number of samples.
    pub n: usize,
    /// Arithmetic mean.
    pub mean: f64,
    /// Unbiased sample standard deviation (n - 1 denominator).
    pub stddev: f64,
}

/// Computes mean and unbiased standard deviation.
///
/// # Errors
///
/// Returns [`InsufficientSamplesError`] for fewer than two values.
pub fn aggregate(values: &[f64]) -> Result<SampleStats, InsufficientSamplesError> {
    let n = values.len();
    if n < 2 {
        return Err(InsufficientSamplesError { got: n });
    }

    #[allow(clippy::cast_precision_loss)]
    let count = n as f64;
    let mean = values.iter().sum::<f64>() / count;
    let squared: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    let stddev = (squared / (count - 1.0)).sqrt();

    Ok(SampleStats { n, mean, stddev })
}

/// Percentage by which `treatment` is faster than `baseline`.
///
/// `(baseline_mean / treatment_mean - 1) * 100`: 25.0 means the treatment
/// needs 20% less time, i.e. the baseline takes 25% longer.
#[must_use]
pub fn compare(baseline: &SampleStats, treatment: &SampleStats) -> f64 {
    (baseline.mean / treatment.mean - 1.0) * 100.0
}

/// One side of a comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonSide {
    /// The configuration.
    pub config: ConfigName,
    /// Raw sample values ordered by trial index.
    pub samples: Vec<f64>,
    /// Their statistics.
    pub stats: SampleStats,
}

impl ComparisonSide {
    /// Aggregates one configuration's samples.
    ///
    /// # Errors
    ///
    /// Returns [`InsufficientSamplesError`] for fewer than two samples.
    pub fn from_samples(
        config: ConfigName,
        samples: &[TrialSample],
    ) -> Result<Self, InsufficientSamplesError> {
        let mut ordered: Vec<&TrialSample> = samples.iter().collect();
        ordered.sort_by_key(|s| s.index);
        let values: Vec<f64> = ordered.iter().map(|s| s.value).collect();
        let stats = aggregate(&values)?;
        Ok(Self {
            config,
            samples: values,
            stats,
        })
    }
}

/// An explicit baseline/treatment comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    /// The reference configuration.
    pub baseline: ComparisonSide,
    /// The configuration claimed to be faster.
    pub treatment: ComparisonSide,
    /// `(baseline.mean / treatment.mean - 1) * 100`.
    pub percentage_delta: f64,
    /// When the comparison was computed.
    pub recorded_at: DateTime<Utc>,
}

impl ComparisonResult {
    /// Builds a comparison from both sample sets.
    ///
    /// # Errors
    ///
    /// Returns [`InsufficientSamplesError`] if either side has fewer than two
    /// samples.
    pub fn from_samples(
        baseline: ConfigName,
        baseline_samples: &[TrialSample],
        treatment: ConfigName,
        treatment_samples: &[TrialSample],
    ) -> Result<Self, InsufficientSamplesError> {
        let baseline = ComparisonSide::from_samples(baseline, baseline_samples)?;
        let treatment = ComparisonSide::from_samples(treatment, treatment_samples)?;
        let percentage_delta = compare(&baseline.stats, &treatment.stats);
        Ok(Self {
            baseline,
            treatment,
            percentage_delta,
            recorded_at: Utc::now(),
        })
    }

    /// The human readable report line.
    ///
    /// A negative delta is reported as "slower" with its magnitude.
    #[must_use]
    pub fn summary_line(&self) -> String {
        let (magnitude, direction) = if self.percentage_delta < 0.0 {
            (-self.percentage_delta, "slower")
        } else {
            (self.percentage_delta, "faster")
        };
        format!(
            "{} is {:.2}% {} than {}, average of {} experiments",
            self.treatment.config.label(),
            magnitude,
            direction,
            self.baseline.config.label(),
            self.treatment.stats.n
        )
    }
}
