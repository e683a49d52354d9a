//! File-side helpers for Ferry transfers: content digests, destination path
//! validation, directory enumeration, progress metering and per-file outcomes.

mod digest;
mod progress;
mod types;
mod validation;
mod walk;

pub use digest::{FileDigest, digest_bytes};
pub use progress::{ProgressMeter, ProgressSnapshot, TransferStats};
pub use types::{FileOutcome, FileStatus};
pub use validation::{resolve_destination, validate_upload_path};
pub use walk::{SourceFile, collect_files};

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("not found: {0}")]
    NotFound(String),
}
