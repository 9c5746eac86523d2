//! kaudit reconcile: the event-driven audit loop.
//!
//! [`Reconciler`] decides whether a key needs (re-)evaluation and drives the
//! policy engine; [`WorkerPool`] runs it on N tasks fed by the reconcile queue.

#![forbid(unsafe_code)]

pub mod backoff;
pub mod cache;
pub mod config;
pub mod memory;
pub mod reconciler;
pub mod sink;
pub mod worker;

pub use backoff::Backoff;
pub use cache::VersionCache;
pub use config::{ConfigError, ControllerConfig};
pub use memory::MemoryStore;
pub use reconciler::{Outcome, Reconciler};
pub use sink::{JsonLinesSink, LogSink, MemorySink};
pub use worker::{pump_events, WorkerPool};
