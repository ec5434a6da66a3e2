//! Measurement trials.
//!
//! A measurement stage repeats one command N times. Each trial runs in its
//! own ephemeral directory and yields one [`TrialSample`] identified by
//! (configuration, index).

mod runner;
mod sample;

pub use runner::TrialRunner;
pub use sample::{SampleSource, TrialSample, TrialSpec};
