//! External command execution.
//!
//! This module provides:
//! - Command templates with `{placeholder}` substitution
//! - The `ProcessRunner` seam and its tokio-backed implementation

mod runner;
mod template;

pub use runner::{Invocation, ProcessRunner, RunOutcome, SystemProcessRunner};
pub use template::{CommandTemplate, RenderedCommand, TemplateVars};

#[cfg(test)]
pub use runner::MockProcessRunner;
