//! Statistics over trial samples.

mod aggregate;

pub use aggregate::{aggregate, compare, ComparisonResult, ComparisonSide, SampleStats};
