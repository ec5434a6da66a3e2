//! Artifact freshness.
//!
//! A stage is up to date when its completion stamp holds its current
//! idempotency key and its artifacts are not older than the artifacts of the
//! stages it depends on. State lives only on disk.

mod store;

pub(crate) use store::write_atomic;
pub use store::ArtifactStore;
