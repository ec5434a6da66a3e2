//! Result persistence.
//!
//! Per configuration: a raw sample dump (rewritten atomically by its
//! measurement stage) and an append-only report of comparison lines. Per
//! pair: a comparison JSON. Overall: `report.txt`, regenerated by the
//! summary stage.

mod tasks;
mod writer;

pub use tasks::{CompareTask, SummaryTask};
pub use writer::{format_samples, parse_samples, ReadSamplesError, ReportWriter, SampleFileError};
