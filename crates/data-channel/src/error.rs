//! Error types for the data channel.

use std::path::PathBuf;

use ferry_protocol::{FrameError, VarintError};
use ferry_transfer::TransferError;

/// Coarse classification used to decide how far an error propagates.
///
/// Digest and size disagreements are not errors; they are reported through
/// [`ferry_transfer::FileStatus`] so the session keeps going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad magic, unexpected frame type, malformed varint or path.
    Protocol,
    /// Read, write, accept or timeout failures on the connection.
    Connection,
    /// Open, create, read or write failures on the local filesystem.
    FileIo,
}

/// Errors produced by the data channel.
#[derive(Debug, thiserror::Error)]
pub enum DataChannelError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid file path: {0}")]
    InvalidPath(String),

    #[error("file I/O error on {path}: {source}")]
    FileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid chunk size {0}")]
    InvalidChunkSize(usize),

    #[error("cannot enumerate source: {0}")]
    Walk(#[from] TransferError),

    #[error("connection timed out")]
    Timeout,

    #[error("cancelled")]
    Cancelled,
}

impl DataChannelError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) | Self::Timeout | Self::Cancelled => ErrorKind::Connection,
            Self::Frame(e) if e.is_connection_error() => ErrorKind::Connection,
            Self::Frame(_) | Self::Protocol(_) | Self::InvalidPath(_) => ErrorKind::Protocol,
            Self::FileIo { .. } | Self::InvalidChunkSize(_) | Self::Walk(_) => ErrorKind::FileIo,
        }
    }

    /// Returns `true` if the error ends the whole session rather than one file.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Connection
    }

    pub(crate) fn file_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileIo {
            path: path.into(),
            source,
        }
    }
}

impl From<VarintError> for DataChannelError {
    fn from(e: VarintError) -> Self {
        Self::Protocol(format!("malformed size: {e}"))
    }
}
