//! Frame codec.
//!
//! # Wire format
//!
//! ```text
//! offset 0: [1 byte: magic (151)]
//! offset 1: [1 byte: type]        0=Data 1=Filename 2=Size 3=End 4=NewFile 5=Disconnect
//! offset 2: [2 bytes BE: total_size]  header (4) + content length
//! offset 4: [total_size - 4 bytes: content]
//! ```

use std::fmt;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::constants::{HEADER_SIZE, MAGIC, MAX_CONTENT_SIZE};
use crate::varint::{VarintError, decode_varint, encode_varint};

/// Errors produced by the frame codec.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame content too large: {len} bytes (max {MAX_CONTENT_SIZE})")]
    FrameTooLarge { len: usize },

    #[error("stream closed before a full frame was read")]
    ShortRead,

    #[error("invalid magic number, expected {MAGIC}, got {0}")]
    BadMagic(u8),

    #[error("invalid total size {0} (header alone is {HEADER_SIZE} bytes)")]
    InvalidLength(u16),

    #[error("unknown frame type {0}")]
    UnknownType(u8),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// Returns `true` if the error came from the underlying connection
    /// rather than from the bytes it carried.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::ShortRead | Self::Io(_))
    }

    /// Returns `true` if the stream position is still on a frame boundary.
    ///
    /// `UnknownType` is reported after its content has been consumed, so the
    /// next read starts at a fresh header.
    pub fn stream_aligned(&self) -> bool {
        matches!(self, Self::UnknownType(_))
    }
}

/// Frame type carried in the second header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Raw file bytes.
    Data = 0,
    /// UTF-8 relative path, `/`-separated.
    Filename = 1,
    /// File length as a signed varint.
    Size = 2,
    /// Raw digest bytes of the file content.
    End = 3,
    /// Empty; opens the next file in a multi-file session.
    NewFile = 4,
    /// Empty; closes a multi-file session.
    Disconnect = 5,
}

impl TryFrom<u8> for FrameType {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Data),
            1 => Ok(Self::Filename),
            2 => Ok(Self::Size),
            3 => Ok(Self::End),
            4 => Ok(Self::NewFile),
            5 => Ok(Self::Disconnect),
            other => Err(other),
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Data => "Data",
            Self::Filename => "Filename",
            Self::Size => "Size",
            Self::End => "End",
            Self::NewFile => "NewFile",
            Self::Disconnect => "Disconnect",
        };
        f.write_str(name)
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub content: Vec<u8>,
}

impl Frame {
    pub fn new(frame_type: FrameType, content: impl Into<Vec<u8>>) -> Self {
        Self {
            frame_type,
            content: content.into(),
        }
    }

    pub fn data(bytes: &[u8]) -> Self {
        Self::new(FrameType::Data, bytes)
    }

    pub fn filename(relative_path: &str) -> Self {
        Self::new(FrameType::Filename, relative_path.as_bytes())
    }

    pub fn size(len: i64) -> Self {
        Self::new(FrameType::Size, encode_varint(len))
    }

    pub fn end(digest: &[u8]) -> Self {
        Self::new(FrameType::End, digest)
    }

    pub fn new_file() -> Self {
        Self::new(FrameType::NewFile, Vec::new())
    }

    pub fn disconnect() -> Self {
        Self::new(FrameType::Disconnect, Vec::new())
    }

    /// Parses the content of a `Size` frame.
    ///
    /// The content must hold exactly one varint and nothing else.
    pub fn parse_size(&self) -> Result<i64, VarintError> {
        let (value, used) = decode_varint(&self.content)?;
        if used != self.content.len() {
            return Err(VarintError::TrailingBytes(self.content.len() - used));
        }
        Ok(value)
    }

    /// Encodes this frame into header + content bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, FrameError> {
        encode(self.frame_type, &self.content)
    }
}

/// Encodes a frame into header + content bytes.
pub fn encode(frame_type: FrameType, content: &[u8]) -> Result<Vec<u8>, FrameError> {
    if content.len() > MAX_CONTENT_SIZE {
        return Err(FrameError::FrameTooLarge { len: content.len() });
    }

    let total_size = (HEADER_SIZE + content.len()) as u16;
    let mut buf = Vec::with_capacity(HEADER_SIZE + content.len());
    buf.push(MAGIC);
    buf.push(frame_type as u8);
    buf.extend_from_slice(&total_size.to_be_bytes());
    buf.extend_from_slice(content);
    Ok(buf)
}

/// Reads exactly one frame from the stream.
pub async fn decode<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame, FrameError> {
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header).await.map_err(short_read)?;

    if header[0] != MAGIC {
        return Err(FrameError::BadMagic(header[0]));
    }

    let total_size = u16::from_be_bytes([header[2], header[3]]);
    if usize::from(total_size) < HEADER_SIZE {
        return Err(FrameError::InvalidLength(total_size));
    }

    let mut content = vec![0u8; usize::from(total_size) - HEADER_SIZE];
    reader.read_exact(&mut content).await.map_err(short_read)?;

    let frame_type = FrameType::try_from(header[1]).map_err(FrameError::UnknownType)?;
    Ok(Frame {
        frame_type,
        content,
    })
}

/// Encodes a frame and writes it to the stream.
///
/// Does not flush; callers batching several frames flush once at the end.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &Frame,
) -> Result<(), FrameError> {
    let bytes = frame.to_bytes()?;
    writer.write_all(&bytes).await?;
    Ok(())
}

fn short_read(e: std::io::Error) -> FrameError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        FrameError::ShortRead
    } else {
        FrameError::Io(e)
    }
}
