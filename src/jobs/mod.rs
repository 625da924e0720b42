//! Shared lifecycle for bulk import and export jobs.
//!
//! Both job kinds live in their own table but share the `job_status` enum,
//! the progress bookkeeping, and the claim/cancel protocol in [`queue`].
//! The [`dispatcher`] polls both tables and runs claimed jobs in the
//! background.

pub mod dispatcher;
pub mod queue;
pub mod status;

pub use queue::JobQueue;
pub use status::{JobStatus, progress_percentage};

use std::path::Path;

use thiserror::Error;

/// Which job table an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Import,
    Export,
}

impl JobKind {
    pub fn table(self) -> &'static str {
        match self {
            JobKind::Import => "import_jobs",
            JobKind::Export => "export_jobs",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            JobKind::Import => "import",
            JobKind::Export => "export",
        }
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("xlsx error: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),
    #[error("{0}")]
    Invalid(String),
    #[error("job {0} not found")]
    NotFound(i32),
    #[error("job cannot be cancelled in status '{}'", .0.as_str())]
    NotCancellable(JobStatus),
    #[error("job was cancelled")]
    Cancelled,
    #[error("{0}")]
    FileMissing(String),
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type JobResult<T> = Result<T, JobError>;

/// Delete a job's file. A missing file is fine; other failures are logged.
pub async fn remove_file_if_present(path: impl AsRef<Path>) {
    let path = path.as_ref();
    if path.as_os_str().is_empty() {
        return;
    }
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => log::warn!("failed to remove '{}': {}", path.display(), err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn removing_files_tolerates_missing_ones() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.csv");
        std::fs::write(&path, "email\n").unwrap();

        remove_file_if_present(&path).await;
        assert!(!path.exists());

        remove_file_if_present(&path).await;
        remove_file_if_present("").await;
    }
}
