//! Facebatch Core
//!
//! Core types for the facebatch batch orchestrator.
//!
//! This crate contains:
//! - Domain types: jobs, outcomes, artifacts, resource samples, run configuration
//! - Output naming used for skip-on-exists idempotence
//! - Precondition and configuration errors

pub mod domain;
pub mod error;

pub use domain::artifact::{SourceArtifact, derived_key};
pub use domain::job::{FailureKind, JobDescriptor, JobOutcome, JobStatus, SkipReason};
pub use domain::range::RangeSelector;
pub use domain::resource::ResourceSample;
pub use domain::run::{ExecutionBackend, RunConfiguration};
pub use domain::summary::{ResultAggregator, Summary};
pub use error::{CatalogError, ConfigError};
