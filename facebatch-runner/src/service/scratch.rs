//! Scratch space
//!
//! Each job gets its own temp directory, plus the frame directory the
//! pipeline creates next to its input. Both are removed exactly once when
//! the job's run ends, whichever way it ends.

use facebatch_core::JobDescriptor;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Transient paths owned by one job run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchDirs {
    /// Private temp directory exported to the pipeline
    pub temp_dir: PathBuf,
    /// Frame directory the pipeline derives from the input path
    pub frame_dir: Option<PathBuf>,
}

impl ScratchDirs {
    pub fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        std::iter::once(&self.temp_dir).chain(self.frame_dir.iter())
    }
}

/// Allocates and removes per-job scratch state
pub trait ScratchSpace: Send + Sync {
    /// Paths a job will use; does not touch the filesystem
    fn dirs_for(&self, job: &JobDescriptor) -> ScratchDirs;

    /// Creates the temp directory
    fn prepare(&self, dirs: &ScratchDirs) -> std::io::Result<()>;

    /// Removes every scratch path; must tolerate paths that were never created
    fn cleanup(&self, job: &JobDescriptor, dirs: &ScratchDirs);
}

/// Filesystem-backed scratch space
pub struct JobScratchSpace {
    root: PathBuf,
    frame_dir_name: String,
}

impl JobScratchSpace {
    pub fn new(root: impl Into<PathBuf>, frame_dir_name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            frame_dir_name: frame_dir_name.into(),
        }
    }
}

impl ScratchSpace for JobScratchSpace {
    fn dirs_for(&self, job: &JobDescriptor) -> ScratchDirs {
        let temp_dir = self
            .root
            .join(format!("job-{:04}-{}", job.id, Uuid::new_v4().simple()));

        let frame_dir = match (job.input_path.parent(), job.input_path.file_stem()) {
            (Some(parent), Some(stem)) if !self.frame_dir_name.is_empty() => {
                Some(parent.join(&self.frame_dir_name).join(stem))
            }
            _ => None,
        };

        ScratchDirs {
            temp_dir,
            frame_dir,
        }
    }

    fn prepare(&self, dirs: &ScratchDirs) -> std::io::Result<()> {
        std::fs::create_dir_all(&dirs.temp_dir)
    }

    fn cleanup(&self, job: &JobDescriptor, dirs: &ScratchDirs) {
        for path in dirs.paths() {
            remove_tree(path);
        }

        // The shared frame parent goes away once the last job has left it.
        if let Some(parent) = dirs.frame_dir.as_deref().and_then(Path::parent) {
            let _ = std::fs::remove_dir(parent);
        }

        debug!("Scratch cleaned for job {}", job.id);
    }
}

fn remove_tree(path: &Path) {
    match std::fs::remove_dir_all(path) {
        Ok(()) => debug!("Removed scratch {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove scratch {}: {}", path.display(), e),
    }
}

/// Runs scratch cleanup when dropped
///
/// Held for the whole run of a job so that early returns, timeouts and
/// cancellation all pass through the same cleanup.
pub struct ScratchGuard<'a> {
    space: &'a dyn ScratchSpace,
    job: &'a JobDescriptor,
    dirs: ScratchDirs,
}

impl<'a> ScratchGuard<'a> {
    pub fn new(space: &'a dyn ScratchSpace, job: &'a JobDescriptor) -> Self {
        let dirs = space.dirs_for(job);
        Self { space, job, dirs }
    }

    pub fn dirs(&self) -> &ScratchDirs {
        &self.dirs
    }
}

impl Drop for ScratchGuard<'_> {
    fn drop(&mut self) {
        self.space.cleanup(self.job, &self.dirs);
    }
}

#[cfg(test)]
pub mod testing {
    //! Scratch space that records what happened to it

    use super::*;
    use std::sync::Mutex;

    /// Wraps `JobScratchSpace` and logs `prepare:<id>` / `cleanup:<id>` events in order
    pub struct CountingScratch {
        inner: JobScratchSpace,
        events: Mutex<Vec<String>>,
    }

    impl CountingScratch {
        pub fn new(root: impl Into<PathBuf>) -> Self {
            Self {
                inner: JobScratchSpace::new(root, "temp"),
                events: Mutex::new(Vec::new()),
            }
        }

        pub fn cleanups_for(&self, job_id: usize) -> usize {
            let wanted = format!("cleanup:{}", job_id);
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter(|e| **e == wanted)
                .count()
        }

        pub fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl ScratchSpace for CountingScratch {
        fn dirs_for(&self, job: &JobDescriptor) -> ScratchDirs {
            self.inner.dirs_for(job)
        }

        fn prepare(&self, dirs: &ScratchDirs) -> std::io::Result<()> {
            let name = dirs
                .temp_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            // temp dirs are named job-<id>-<uuid>
            let id = name
                .split('-')
                .nth(1)
                .and_then(|n| n.parse::<usize>().ok())
                .unwrap_or(0);
            self.events.lock().unwrap().push(format!("prepare:{}", id));
            self.inner.prepare(dirs)
        }

        fn cleanup(&self, job: &JobDescriptor, dirs: &ScratchDirs) {
            self.events
                .lock()
                .unwrap()
                .push(format!("cleanup:{}", job.id));
            self.inner.cleanup(job, dirs);
        }
    }
}
