//! Cooperative cancellation.
//!
//! An operator interrupt flips the shared [`CancellationToken`]; the process
//! runner kills the running child and the orchestrator invalidates the
//! interrupted stage's outputs so the next run re-attempts it.

mod token;

pub use token::CancellationToken;
