//! Scheduler layer
//!
//! Turns a job selection into outcomes: admission control against host
//! memory, a bounded worker pool, and completion-order harvesting.

pub mod pool;

pub use pool::WorkerPool;
