//! Job catalog
//!
//! Discovers the source artifact and the input artifacts, derives output
//! names, and separates jobs whose output already exists.

use facebatch_core::domain::artifact::{INPUT_EXTENSIONS, SOURCE_EXTENSIONS, has_extension};
use facebatch_core::{CatalogError, JobDescriptor, RangeSelector, SourceArtifact, derived_key};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Everything discovered on disk, in deterministic order
#[derive(Debug, Clone)]
pub struct Catalog {
    pub source: SourceArtifact,
    pub jobs: Vec<JobDescriptor>,
}

/// Jobs chosen for this run
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// Jobs to submit, in catalog order
    pub pending: Vec<JobDescriptor>,
    /// Jobs whose output already exists, with its size in bytes
    pub pre_skipped: Vec<(JobDescriptor, u64)>,
}

impl Selection {
    /// Number of jobs the final tally must account for
    pub fn len(&self) -> usize {
        self.pending.len() + self.pre_skipped.len()
    }
}

/// Creates the source, input and output directories when absent
pub fn ensure_layout(dirs: &[&Path]) -> Result<(), CatalogError> {
    for dir in dirs {
        if !dir.exists() {
            std::fs::create_dir_all(dir).map_err(|e| CatalogError::io(*dir, e))?;
            info!("Created directory {}", dir.display());
        }
    }
    Ok(())
}

/// Scans the directories and builds the ordered job list
///
/// Fails with `NoSourceFound` or `NoInputsFound` when either side is empty.
pub fn discover(
    source_dir: &Path,
    input_dir: &Path,
    output_dir: &Path,
    output_extension: &str,
) -> Result<Catalog, CatalogError> {
    let source = list_matching(source_dir, SOURCE_EXTENSIONS)?
        .into_iter()
        .next()
        .map(SourceArtifact::new)
        .ok_or_else(|| CatalogError::NoSourceFound {
            dir: source_dir.to_path_buf(),
        })?;

    let inputs = list_matching(input_dir, INPUT_EXTENSIONS)?;
    if inputs.is_empty() {
        return Err(CatalogError::NoInputsFound {
            dir: input_dir.to_path_buf(),
        });
    }

    let source_name = source.file_name();
    let jobs: Vec<JobDescriptor> = inputs
        .into_iter()
        .enumerate()
        .map(|(idx, input_path)| {
            let input_name = input_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let key = derived_key(&source_name, &input_name, output_extension);
            JobDescriptor {
                id: idx + 1,
                output_path: output_dir.join(&key),
                input_path,
                derived_key: key,
            }
        })
        .collect();

    debug!(
        "Discovered source {} and {} input(s)",
        source.path.display(),
        jobs.len()
    );

    Ok(Catalog { source, jobs })
}

impl Catalog {
    /// Applies the optional range, then sets aside jobs whose output exists
    ///
    /// With `overwrite` set nothing is set aside.
    pub fn select(&self, range: Option<RangeSelector>, overwrite: bool) -> Selection {
        let chosen = match range {
            Some(range) => range.select(&self.jobs),
            None => self.jobs.clone(),
        };

        let mut selection = Selection::default();
        for job in chosen {
            match existing_size(&job.output_path) {
                Some(size) if !overwrite => selection.pre_skipped.push((job, size)),
                _ => selection.pending.push(job),
            }
        }
        selection
    }
}

/// Reads the optional range argument
///
/// A malformed range is reported and ignored, so the whole catalog runs.
pub fn parse_range(arg: Option<&str>) -> Option<RangeSelector> {
    let raw = arg?.trim();
    match raw.parse::<RangeSelector>() {
        Ok(range) => Some(range),
        Err(e) => {
            warn!("Ignoring range '{}': {}; processing all jobs", raw, e);
            None
        }
    }
}

/// Size of an existing output file
pub fn existing_size(path: &Path) -> Option<u64> {
    std::fs::metadata(path)
        .ok()
        .filter(|m| m.is_file())
        .map(|m| m.len())
}

/// Files in `dir` with one of `extensions`, sorted by path
fn list_matching(dir: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>, CatalogError> {
    let entries = std::fs::read_dir(dir).map_err(|e| CatalogError::io(dir, e))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| CatalogError::io(dir, e))?;
        let path = entry.path();
        if path.is_file() && has_extension(&path, extensions) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Layout {
        _root: TempDir,
        source: PathBuf,
        input: PathBuf,
        output: PathBuf,
    }

    fn layout() -> Layout {
        let root = TempDir::new().unwrap();
        let source = root.path().join("source");
        let input = root.path().join("inputVideos");
        let output = root.path().join("outputVideos");
        ensure_layout(&[source.as_path(), input.as_path(), output.as_path()]).unwrap();
        Layout {
            _root: root,
            source,
            input,
            output,
        }
    }

    fn touch(path: &Path) {
        std::fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_missing_source_is_precondition_error() {
        let l = layout();
        touch(&l.input.join("1.mp4"));

        let err = discover(&l.source, &l.input, &l.output, "mp4").unwrap_err();
        assert!(matches!(err, CatalogError::NoSourceFound { .. }));
        assert!(err.is_missing_artifacts());
    }

    #[test]
    fn test_missing_inputs_is_precondition_error() {
        let l = layout();
        touch(&l.source.join("face.jpg"));
        touch(&l.input.join("readme.txt"));

        let err = discover(&l.source, &l.input, &l.output, "mp4").unwrap_err();
        assert!(matches!(err, CatalogError::NoInputsFound { .. }));
    }

    #[test]
    fn test_source_is_lexicographically_first() {
        let l = layout();
        touch(&l.source.join("zed.png"));
        touch(&l.source.join("DanielaAS.jpg"));
        touch(&l.source.join("alpha.txt"));
        touch(&l.input.join("24.mp4"));

        let catalog = discover(&l.source, &l.input, &l.output, "mp4").unwrap();
        assert_eq!(catalog.source.file_name(), "DanielaAS.jpg");
        assert_eq!(catalog.jobs[0].derived_key, "DanielaAS_24.mp4");
        assert_eq!(catalog.jobs[0].output_path, l.output.join("DanielaAS_24.mp4"));
    }

    #[test]
    fn test_inputs_sorted_and_numbered() {
        let l = layout();
        touch(&l.source.join("face.jpg"));
        for name in ["c_3.MOV", "a_1.mp4", "b_2.mkv", "notes.md"] {
            touch(&l.input.join(name));
        }

        let catalog = discover(&l.source, &l.input, &l.output, "mp4").unwrap();
        let names: Vec<_> = catalog.jobs.iter().map(|j| j.input_name()).collect();
        assert_eq!(names, vec!["a_1.mp4", "b_2.mkv", "c_3.MOV"]);
        let ids: Vec<_> = catalog.jobs.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_select_range_and_pre_skip() {
        let l = layout();
        touch(&l.source.join("face.jpg"));
        for i in 1..=10 {
            touch(&l.input.join(format!("{:02}.mp4", i)));
        }
        std::fs::write(l.output.join("face_04.mp4"), b"done").unwrap();

        let catalog = discover(&l.source, &l.input, &l.output, "mp4").unwrap();

        let selection = catalog.select(Some("3-5".parse().unwrap()), false);
        let pending: Vec<_> = selection.pending.iter().map(|j| j.id).collect();
        assert_eq!(pending, vec![3, 5]);
        assert_eq!(selection.pre_skipped.len(), 1);
        assert_eq!(selection.pre_skipped[0].0.id, 4);
        assert_eq!(selection.pre_skipped[0].1, 4);
        assert_eq!(selection.len(), 3);

        let overwrite = catalog.select(Some("3-5".parse().unwrap()), true);
        assert_eq!(overwrite.pending.len(), 3);
        assert!(overwrite.pre_skipped.is_empty());
    }

    #[test]
    fn test_select_out_of_range_is_empty() {
        let l = layout();
        touch(&l.source.join("face.jpg"));
        for i in 1..=10 {
            touch(&l.input.join(format!("{}.mp4", i)));
        }

        let catalog = discover(&l.source, &l.input, &l.output, "mp4").unwrap();
        let selection = catalog.select(Some(RangeSelector::single(50)), false);
        assert_eq!(selection.len(), 0);
    }

    #[test]
    fn test_parse_range_falls_back_to_everything() {
        assert_eq!(parse_range(None), None);
        assert_eq!(parse_range(Some("3-5")), Some(RangeSelector { start: 3, end: 5 }));
        assert_eq!(parse_range(Some(" 5 ")), Some(RangeSelector::single(5)));
        assert_eq!(parse_range(Some("three")), None);
    }
}
