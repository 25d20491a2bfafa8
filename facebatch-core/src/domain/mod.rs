//! Core domain types
//!
//! These types are created by the catalog and scheduler and shared read-only
//! with the workers that run jobs.

pub mod artifact;
pub mod job;
pub mod range;
pub mod resource;
pub mod run;
pub mod summary;
