//! Event sinks for stage lifecycle observability.
//!
//! The orchestrator emits one event per stage state transition
//! (`stage.skipped`, `stage.started`, `stage.succeeded`, ...) and one per
//! completed trial. Sinks decide what to do with them.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
