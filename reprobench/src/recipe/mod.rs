//! The concrete reproduction pipeline.

mod clang;
mod targets;

pub use clang::{ClangRecipe, Workload, COMPARISONS, DOWNLOAD_STAGE, REPORT_STAGE, STAGE1_STAGE};
pub use targets::Target;
