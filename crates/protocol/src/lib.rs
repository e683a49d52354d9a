//! Wire protocol for Ferry file transfers.
//!
//! Every message on the connection is a [`Frame`]: a fixed 4-byte header
//! followed by a variable-length body.
//!
//! ```text
//! [1 byte: magic 0x97][1 byte: type][2 bytes BE: total_size][content]
//! ```
//!
//! A multi-file session is `(NewFile, Filename, Size, Data*, End)*` followed
//! by a single `Disconnect`.

pub mod constants;
pub mod frame;
pub mod varint;

pub use constants::{
    DEFAULT_CHUNK_SIZE, DEFAULT_PORT, DIGEST_LEN, HEADER_SIZE, MAGIC, MAX_CONTENT_SIZE,
};
pub use frame::{Frame, FrameError, FrameType, decode, encode, write_frame};
pub use varint::{VarintError, decode_varint, encode_varint};
