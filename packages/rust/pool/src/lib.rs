//! Bounded-concurrency task execution and result coordination.
//!
//! This crate provides:
//! - [`WorkerPool`]: a fixed set of executors draining one FIFO queue, with a
//!   drain barrier that also counts tasks submitted from continuations
//! - [`OrderedReassembler`]: flushes out-of-order results in submission order
//! - [`FanInCoordinator`]: groups member results by key and submits exactly one
//!   aggregation task per completed group
//! - [`OutputSink`]: where flushed and aggregated results are delivered

pub mod fan_in;
pub mod ordered;
pub mod sink;
pub mod worker;

pub use fan_in::{Aggregator, FanInCoordinator, GroupResult, MemberOutcome};
pub use ordered::OrderedReassembler;
pub use sink::{CollectingSink, OutputSink};
pub use worker::{JobId, WorkerPool};
