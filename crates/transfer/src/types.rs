use std::fmt;
use std::time::Duration;

use crate::TransferStats;

/// How a single file transfer ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStatus {
    /// Sizes and digests agree.
    Completed,
    /// All bytes arrived but the digests differ; the file is kept on disk.
    DigestMismatch { expected: String, actual: String },
    /// The byte count at `End` differs from the announced size; the file is kept.
    SizeMismatch { declared: u64, received: u64 },
    /// The file was rejected or could not be read/written; the session continued.
    Failed(String),
    /// The connection dropped mid-file; a partial file may remain.
    Aborted(String),
}

impl FileStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Returns `true` for outcomes whose bytes are on disk but cannot be trusted.
    pub fn is_suspect(&self) -> bool {
        matches!(self, Self::DigestMismatch { .. } | Self::SizeMismatch { .. })
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::DigestMismatch { expected, actual } => {
                write!(f, "digest mismatch (expected {expected}, got {actual})")
            }
            Self::SizeMismatch { declared, received } => {
                write!(f, "size mismatch (declared {declared}, received {received})")
            }
            Self::Failed(reason) => write!(f, "failed: {reason}"),
            Self::Aborted(reason) => write!(f, "aborted: {reason}"),
        }
    }
}

/// Result record for one file, produced by both sender and receiver.
#[derive(Debug, Clone, PartialEq)]
pub struct FileOutcome {
    pub relative_path: String,
    /// Content bytes sent or written.
    pub bytes: u64,
    /// Lowercase hex MD5 of the bytes that moved (empty if none were hashed).
    pub digest: String,
    pub elapsed: Duration,
    pub status: FileStatus,
}

impl FileOutcome {
    /// An outcome for a file that never got as far as moving bytes.
    pub fn failed(relative_path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            relative_path: relative_path.into(),
            bytes: 0,
            digest: String::new(),
            elapsed: Duration::ZERO,
            status: FileStatus::Failed(reason.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn stats(&self) -> TransferStats {
        TransferStats {
            bytes: self.bytes,
            elapsed: self.elapsed,
        }
    }
}
