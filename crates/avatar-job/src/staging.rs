//! Per-job scratch space and staged engine inputs.
//!
//! A [`StagedJob`] owns everything one job writes to disk: a private work
//! directory for downloaded/decoded inputs and the uniquely-named copies
//! placed in the engine's input directory. Dropping it removes all of it.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Filesystem footprint of one job.
#[derive(Debug)]
pub struct StagedJob {
    task_id: String,
    work_dir: PathBuf,
    input_dir: PathBuf,
    staged: Vec<PathBuf>,
    cleaned: bool,
}

/// Names of the staged inputs, relative to the engine's input directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedInputs {
    /// Reference image file name.
    pub image_name: String,
    /// Driving video file name.
    pub video_name: String,
}

impl StagedJob {
    /// Generate a fresh job id of the form `task_<12 hex chars>`.
    pub fn new_task_id() -> String {
        let hex = uuid::Uuid::new_v4().simple().to_string();
        format!("task_{}", &hex[..12])
    }

    /// Describe a job's footprint. Nothing is created on disk yet.
    pub fn new(task_id: impl Into<String>, work_root: &Path, input_dir: &Path) -> Self {
        let task_id = task_id.into();
        Self {
            work_dir: work_root.join(&task_id),
            input_dir: input_dir.to_path_buf(),
            task_id,
            staged: Vec::new(),
            cleaned: false,
        }
    }

    /// Job id.
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Private scratch directory.
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Create the scratch directory.
    pub async fn prepare(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.work_dir).await
    }

    /// Scratch path for the reference image.
    pub fn image_scratch_path(&self) -> PathBuf {
        self.work_dir.join("input_image.jpg")
    }

    /// Scratch path for the driving video.
    pub fn video_scratch_path(&self) -> PathBuf {
        self.work_dir.join("driving_video.mp4")
    }

    /// Copy both inputs into the engine's input directory under job-unique
    /// names.
    ///
    /// Each target is registered before the copy starts, so a partially
    /// written file is still removed on cleanup.
    pub async fn stage_inputs(
        &mut self,
        image: &Path,
        video: &Path,
    ) -> std::io::Result<StagedInputs> {
        tokio::fs::create_dir_all(&self.input_dir).await?;

        let image_name = format!("{}_input_image.jpg", self.task_id);
        let video_name = format!("{}_driving_video.mp4", self.task_id);

        for (src, name) in [(image, &image_name), (video, &video_name)] {
            let dest = self.input_dir.join(name);
            self.staged.push(dest.clone());
            tokio::fs::copy(src, &dest).await?;
            debug!(
                task_id = %self.task_id,
                src = %src.display(),
                dest = %dest.display(),
                "Staged input"
            );
        }

        Ok(StagedInputs {
            image_name,
            video_name,
        })
    }

    /// Files placed in the engine's input directory so far.
    pub fn staged_files(&self) -> &[PathBuf] {
        &self.staged
    }

    /// Remove the scratch directory and every staged file.
    ///
    /// Idempotent; removal failures are logged and swallowed.
    pub fn cleanup(&mut self) {
        if self.cleaned {
            return;
        }
        self.cleaned = true;

        for path in self.staged.drain(..) {
            remove_quietly(&path, false);
        }
        remove_quietly(&self.work_dir, true);
        debug!(task_id = %self.task_id, "Job files cleaned up");
    }
}

impl Drop for StagedJob {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn remove_quietly(path: &Path, dir: bool) {
    let result = if dir {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    match result {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove job file"),
    }
}
