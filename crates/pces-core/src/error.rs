use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur when working with the preconsensus event stream
#[derive(Debug, Error)]
pub enum PcesError {
    /// I/O error when reading, writing or moving files
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error while walking a database directory
    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),

    /// A file name does not follow the PCES naming scheme
    #[error("Invalid PCES file name {name:?}: {reason}")]
    InvalidFileName { name: String, reason: String },

    /// A stream or file invariant does not hold
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// A caller supplied an out-of-range value
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A record failed checksum or structural validation before EOF
    #[error("Corrupted record in {} at offset {offset}: {reason}", .path.display())]
    Corrupted {
        path: PathBuf,
        offset: u64,
        reason: String,
    },

    /// Event body could not be encoded
    #[error("Event encoding error: {0}")]
    Encode(#[from] bincode::Error),

    /// The database root exists but is not a directory
    #[error("Not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    /// The background writer is no longer accepting work
    #[error("Writer has stopped")]
    WriterStopped,
}

/// A specialized Result type for PCES operations
pub type Result<T> = std::result::Result<T, PcesError>;
