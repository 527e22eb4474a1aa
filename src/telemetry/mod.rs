//! Telemetry for client calls.
//!
//! The client emits a [`ClientEvent`] at each step of a call (start, scheduled retry, final
//! outcome) and whenever the health monitor sees a status transition. Events flow into a
//! [`TelemetrySink`], which is a `tower::Service<ClientEvent>` so sinks compose with the rest of
//! the tower ecosystem. Emission is best effort: a failing sink never fails a call.

pub mod events;
pub mod sinks;

pub use events::{event_to_json, ClientEvent};
pub use sinks::{
    emit_best_effort, BoxedSink, LogSink, MemorySink, NullSink, SinkHandle, StreamingSink,
    TelemetrySink,
};
