/// Sentinel byte at the start of every frame header.
pub const MAGIC: u8 = 151;

/// Size of the fixed frame header in bytes.
pub const HEADER_SIZE: usize = 4;

/// Largest content a single frame can carry.
///
/// `total_size` is a `u16` covering header and content.
pub const MAX_CONTENT_SIZE: usize = u16::MAX as usize - HEADER_SIZE;

/// Default `Data` frame payload size (4 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024;

/// Default TCP port for the receiver.
pub const DEFAULT_PORT: u16 = 20235;

/// Length of the MD5 digest carried by `End` frames.
pub const DIGEST_LEN: usize = 16;
