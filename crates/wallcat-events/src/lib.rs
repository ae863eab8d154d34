//! Event channel for upload completion events.
//!
//! Publication is the one side effect the pipeline must never duplicate, so
//! the contract is strict: `publish_stored` returns only after the channel
//! has durably persisted the message, and every publish carries a
//! deterministic dedup id derived from the record id so a retried publish
//! after a crash collapses to one delivery.

pub mod nats;
pub mod publisher;
pub mod test_support;

pub use nats::JetStreamPublisher;
pub use publisher::{EventError, EventPublisher};
