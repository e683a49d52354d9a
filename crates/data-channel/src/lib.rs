//! Sender and receiver sessions for Ferry transfers.
//!
//! The sender walks a file or directory and streams it as framed messages;
//! the receiver runs one state machine per connection and rebuilds the files
//! under an output directory, verifying each one against its MD5 digest.
//!
//! # Wire format
//!
//! See [`ferry_protocol::frame`] for the frame layout. A session is
//! `(NewFile, Filename, Size, Data*, End)*` followed by `Disconnect`.

pub mod error;
pub mod locks;
pub mod receiver;
pub mod sender;
pub mod server;

pub use error::{DataChannelError, ErrorKind};
pub use locks::{PathLease, PathLocks};
pub use receiver::{ReceiverConfig, ReceiverSession, ReceiverState};
pub use sender::{SendOptions, SendReport, SenderSession, send_path};
pub use server::{SessionReport, TransferServer};

use std::time::Duration;

/// TCP read/write buffer size (64 KB).
pub const TCP_BUFFER_SIZE: usize = 64 * 1024;

/// Timeout for the TCP connection attempt.
pub const TCP_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default deadline for reading or writing a single frame.
pub const FRAME_TIMEOUT: Duration = Duration::from_secs(30);

/// Pause after a failed `accept` before trying again.
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);
