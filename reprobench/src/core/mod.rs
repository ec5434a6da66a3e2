//! Core domain model types for reprobench.
//!
//! This module contains the fundamental types used throughout the harness:
//! - Stage state and kind enums
//! - Typed configuration names for the compared toolchains

mod config_name;
mod status;

pub use config_name::ConfigName;
pub use status::{StageKind, StageState};
