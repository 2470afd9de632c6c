//! Error types shared by the job store, executor and HTTP boundary

use thiserror::Error;

/// Coarse classification used to pick a boundary response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input rejected before any resource is committed
    Validation,
    /// Request conflicts with the job's current state
    Conflict,
    /// Admission ceiling reached; the caller may retry
    Capacity,
    /// Unknown job, or an artifact vanished from disk
    NotFound,
    /// Anything else (I/O on our side, broken invariants)
    Internal,
}

/// Error type for job operations
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Invalid resolution '{0}'. Choose 720p, 1080p, or original")]
    InvalidPreset(String),

    #[error("Unsupported file type '{0}'")]
    UnsupportedFileType(String),

    #[error("File too large. Maximum size is {limit_bytes} bytes")]
    TooLarge { limit_bytes: u64 },

    #[error("Malformed upload: {0}")]
    MalformedUpload(String),

    #[error("Job not found")]
    NotFound,

    #[error("Compression already in progress")]
    AlreadyProcessing,

    #[error("Video already compressed")]
    AlreadyCompleted,

    #[error("Video file not found. It may have been deleted.")]
    InputMissing,

    #[error(
        "Server is busy. Maximum {limit} concurrent compressions allowed ({active} active)"
    )]
    Busy { active: usize, limit: usize },

    #[error("Video compression not completed yet")]
    NotReady,

    #[error("Compressed file not found. It may have been deleted.")]
    FileMissing,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl JobError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            JobError::InvalidPreset(_)
            | JobError::UnsupportedFileType(_)
            | JobError::TooLarge { .. }
            | JobError::MalformedUpload(_) => ErrorKind::Validation,
            JobError::AlreadyProcessing
            | JobError::AlreadyCompleted
            | JobError::NotReady => ErrorKind::Conflict,
            JobError::Busy { .. } => ErrorKind::Capacity,
            JobError::NotFound | JobError::InputMissing | JobError::FileMissing => {
                ErrorKind::NotFound
            }
            JobError::Io(_) => ErrorKind::Internal,
        }
    }
}
