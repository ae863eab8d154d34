//! Wallcat Reconciliation Engine
//!
//! Four idempotent repair passes over the upload record store, and the
//! scheduler that drives them from every service instance. Together they
//! guarantee that each accepted upload eventually reaches a consistent
//! terminal state, no matter how many instances run concurrently and where
//! a previous worker crashed.

mod reconciler;
mod scheduler;

pub use reconciler::{PassSummary, Reconciler};
pub use scheduler::Scheduler;
