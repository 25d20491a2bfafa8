//! Artifact types and output naming
//!
//! The output name of a job is a pure function of the source artifact name
//! and the input artifact name, which is what makes re-runs skip finished work.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Extensions accepted for the source (reference) artifact
pub const SOURCE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];

/// Extensions accepted for input artifacts
pub const INPUT_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "wmv"];

static DIGIT_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("digit pattern is valid"));

/// The single reference artifact shared by every job of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceArtifact {
    pub path: PathBuf,
}

impl SourceArtifact {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Base name without extension
    pub fn stem(&self) -> String {
        file_stem(&self.path)
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Returns true if the path has one of `extensions`, compared case-insensitively
pub fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| extensions.contains(&ext.as_str()))
}

/// Last run of digits in the input's base name, or the whole base name if it has none
pub fn input_key(input_name: &str) -> String {
    let stem = file_stem(Path::new(input_name));
    DIGIT_RUN
        .find_iter(&stem)
        .last()
        .map(|m| m.as_str().to_string())
        .unwrap_or(stem)
}

/// Output file name for a (source, input) pair: `<source stem>_<input key>.<extension>`
///
/// `derived_key("DanielaAS", "24.mp4", "mp4")` is `"DanielaAS_24.mp4"`.
pub fn derived_key(source_name: &str, input_name: &str, extension: &str) -> String {
    let source_stem = file_stem(Path::new(source_name));
    format!("{}_{}.{}", source_stem, input_key(input_name), extension)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}
