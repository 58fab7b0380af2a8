use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the split pipeline
#[derive(Error, Debug)]
pub enum SplitError {
    /// The request carried no `file` field
    #[error("Missing file field 'file'")]
    MissingUpload,

    /// The multipart body could not be decoded
    #[error("Invalid upload: {0}")]
    InvalidUpload(String),

    /// The upload exceeded the configured body limit
    #[error("Upload exceeds the maximum allowed size")]
    UploadTooLarge,

    /// ffmpeg could not be started at all
    #[error("Failed to start {}: {source}", program.display())]
    ProcessStartup {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// ffmpeg ran and exited unsuccessfully
    #[error("ffmpeg failed: {}\n{diagnostic}", display_exit_code(*exit_code))]
    TranscodeFailed {
        exit_code: Option<i32>,
        diagnostic: String,
    },

    #[error("ffmpeg did not finish within {seconds} seconds")]
    TranscodeTimeout { seconds: u64 },

    /// ffmpeg reported success but left no segment files behind
    #[error("No segments produced")]
    NoSegmentsProduced,

    /// The per-request working directory could not be created
    #[error("Workspace error: {0}")]
    Workspace(#[source] std::io::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Archive stream did not finish within {seconds} seconds")]
    StreamTimeout { seconds: u64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while writing the ZIP archive
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("failed to read segment {}: {source}", path.display())]
    ReadSegment {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write archive: {0}")]
    Write(#[from] std::io::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("archive task panicked or was cancelled: {0}")]
    Join(String),
}

fn display_exit_code(code: Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "terminated by signal".to_string(),
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, SplitError>;
