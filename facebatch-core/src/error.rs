//! Error types for facebatch

use std::path::PathBuf;
use thiserror::Error;

/// Precondition failures found while building the job catalog
///
/// Any of these aborts the run before scheduling starts.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// No reference artifact in the source directory
    #[error("no source image found in {dir} (supported: jpg, jpeg, png, bmp)")]
    NoSourceFound { dir: PathBuf },

    /// No inputs in the input directory
    #[error("no input videos found in {dir} (supported: mp4, avi, mov, mkv, wmv)")]
    NoInputsFound { dir: PathBuf },

    /// A directory could not be created or listed
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CatalogError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True for the "nothing to work with" cases, as opposed to I/O trouble
    pub fn is_missing_artifacts(&self) -> bool {
        matches!(self, Self::NoSourceFound { .. } | Self::NoInputsFound { .. })
    }
}

/// Invalid run configuration
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
