//! Service layer
//!
//! Services contain the per-job logic of the runner: backend discovery,
//! pipeline invocation, job execution and scratch management.
//!
//! The seams the scheduler depends on are traits so they can be replaced in tests.

mod capabilities;
mod execution;
mod pipeline;
mod scratch;

// Re-export traits
pub use capabilities::CapabilitiesService;
pub use execution::ExecutionService;

// Re-export implementations
pub use capabilities::StandardCapabilitiesService;
pub use execution::StandardExecutionService;
pub use scratch::JobScratchSpace;

#[cfg(test)]
pub use scratch::testing as scratch_testing;
