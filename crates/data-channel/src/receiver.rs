//! Receiver session (inbound side).
//!
//! One session runs per accepted connection. Its behaviour at any point
//! depends only on the current [`ReceiverState`] and the type of the frame
//! just decoded:
//!
//! ```text
//! AwaitingFrame --NewFile--> AwaitingFilename --Filename--> AwaitingSize
//!       ^                                                        |
//!       |                                                       Size
//!       +------------------End---- ReceivingData <--Data--------+
//! AwaitingFrame --Disconnect--> Closed
//! ```
//!
//! A file that fails (bad path, unexpected frame, local I/O error) moves the
//! session to `Discarding`, which swallows the rest of that file's frames
//! until its `End`; the connection stays open for the next `NewFile`.
//! Connection errors and lost framing end the session.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ferry_protocol::{DIGEST_LEN, Frame, FrameError, FrameType, decode};
use ferry_transfer::{
    FileDigest, FileOutcome, FileStatus, ProgressMeter, TransferError, resolve_destination,
};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::FRAME_TIMEOUT;
use crate::error::DataChannelError;
use crate::locks::{PathLease, PathLocks};

/// Receiver settings shared by every session of an acceptor.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Directory all announced paths are resolved against.
    pub output_dir: PathBuf,
    /// Deadline for reading one frame; `None` waits forever.
    pub frame_timeout: Option<Duration>,
    /// Accept sessions that start with a bare `Filename` (single file, no
    /// `NewFile`/`Disconnect`). Any error in such a session is fatal.
    pub accept_legacy: bool,
}

impl ReceiverConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            frame_timeout: Some(FRAME_TIMEOUT),
            accept_legacy: false,
        }
    }
}

/// Receiver state machine position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    AwaitingFrame,
    AwaitingFilename,
    AwaitingSize,
    ReceivingData,
    /// The current file failed; its remaining frames are skipped.
    Discarding,
    Closed,
}

/// The file currently being written.
struct InFlight {
    relative_path: String,
    destination: PathBuf,
    file: File,
    declared_size: u64,
    bytes_written: u64,
    digest: FileDigest,
    meter: ProgressMeter,
    seq: u64,
    started: Instant,
    _lease: PathLease,
}

impl InFlight {
    fn outcome(self, status: FileStatus) -> FileOutcome {
        FileOutcome {
            relative_path: self.relative_path,
            bytes: self.bytes_written,
            digest: self.digest.finalize_hex(),
            elapsed: self.started.elapsed(),
            status,
        }
    }
}

/// Drives the inbound half of a connection.
pub struct ReceiverSession<R> {
    reader: R,
    config: Arc<ReceiverConfig>,
    locks: PathLocks,
    state: ReceiverState,
    legacy: bool,
    frames_seen: u64,
    announced: Option<String>,
    current: Option<InFlight>,
    outcomes: Vec<FileOutcome>,
}

impl<R: AsyncRead + Unpin> ReceiverSession<R> {
    pub fn new(reader: R, config: Arc<ReceiverConfig>, locks: PathLocks) -> Self {
        Self {
            reader,
            config,
            locks,
            state: ReceiverState::AwaitingFrame,
            legacy: false,
            frames_seen: 0,
            announced: None,
            current: None,
            outcomes: Vec::new(),
        }
    }

    /// Current state. After [`run`](Self::run) fails this is the state the
    /// error occurred in.
    pub fn state(&self) -> ReceiverState {
        self.state
    }

    /// Outcomes of every file seen so far, in arrival order.
    pub fn outcomes(&self) -> &[FileOutcome] {
        &self.outcomes
    }

    pub fn into_outcomes(self) -> Vec<FileOutcome> {
        self.outcomes
    }

    /// Processes frames until `Disconnect` (or the end of a legacy session).
    ///
    /// Returns `Err` for connection errors, lost framing and protocol errors
    /// outside a file. A file in flight at that moment is flushed, left on
    /// disk and recorded as [`FileStatus::Aborted`].
    pub async fn run(&mut self) -> Result<(), DataChannelError> {
        let result = self.drive().await;
        if let Err(e) = &result {
            self.abort_current(e).await;
        }
        result
    }

    async fn drive(&mut self) -> Result<(), DataChannelError> {
        while self.state != ReceiverState::Closed {
            let frame = match self.next_frame().await {
                Ok(frame) => frame,
                Err(DataChannelError::Frame(e)) if e.stream_aligned() && self.in_file() => {
                    self.file_error(DataChannelError::Frame(e), None).await?;
                    continue;
                }
                Err(e) => return Err(e),
            };
            self.frames_seen += 1;
            self.handle(frame).await?;
        }
        if self.legacy {
            self.expect_close().await?;
        }
        Ok(())
    }

    /// A legacy session ends when the peer closes after `End`.
    async fn expect_close(&mut self) -> Result<(), DataChannelError> {
        match self.next_frame().await {
            Err(DataChannelError::Frame(FrameError::ShortRead)) => Ok(()),
            Ok(frame) => Err(DataChannelError::Protocol(format!(
                "trailing {} frame after legacy session",
                frame.frame_type
            ))),
            Err(e) => Err(e),
        }
    }

    async fn next_frame(&mut self) -> Result<Frame, DataChannelError> {
        let frame = match self.config.frame_timeout {
            Some(limit) => tokio::time::timeout(limit, decode(&mut self.reader))
                .await
                .map_err(|_| DataChannelError::Timeout)??,
            None => decode(&mut self.reader).await?,
        };
        Ok(frame)
    }

    /// Inside a file context (including one already being discarded).
    fn in_file(&self) -> bool {
        matches!(
            self.state,
            ReceiverState::AwaitingFilename
                | ReceiverState::AwaitingSize
                | ReceiverState::ReceivingData
                | ReceiverState::Discarding
        )
    }

    async fn handle(&mut self, frame: Frame) -> Result<(), DataChannelError> {
        let kind = frame.frame_type;
        match (self.state, kind) {
            (ReceiverState::AwaitingFrame | ReceiverState::Discarding, FrameType::NewFile) => {
                self.announced = None;
                self.state = ReceiverState::AwaitingFilename;
            }
            (ReceiverState::AwaitingFrame | ReceiverState::Discarding, FrameType::Disconnect) => {
                debug!("disconnect received");
                self.state = ReceiverState::Closed;
            }
            (ReceiverState::AwaitingFrame, FrameType::Filename)
                if self.config.accept_legacy && self.frames_seen == 1 =>
            {
                debug!("legacy single-file session");
                self.legacy = true;
                self.open_file(&frame.content).await?;
            }
            (ReceiverState::AwaitingFrame, _) => {
                return Err(DataChannelError::Protocol(format!(
                    "unexpected {kind} frame outside a file"
                )));
            }
            (ReceiverState::Discarding, FrameType::End) => {
                self.state = ReceiverState::AwaitingFrame;
            }
            (ReceiverState::Discarding, _) => {}
            (ReceiverState::AwaitingFilename, FrameType::Filename) => {
                self.open_file(&frame.content).await?;
            }
            (ReceiverState::AwaitingSize, FrameType::Size) => {
                self.set_size(&frame).await?;
            }
            (ReceiverState::ReceivingData, FrameType::Data) => {
                self.write_data(&frame.content).await?;
            }
            (ReceiverState::ReceivingData, FrameType::End) => {
                self.finish_file(&frame.content).await?;
            }
            (_, FrameType::NewFile | FrameType::Disconnect) => {
                // The sender moved on without ending this file.
                let err = DataChannelError::Protocol(format!("{kind} before End"));
                self.file_error(err, None).await?;
                self.state = if kind == FrameType::NewFile {
                    ReceiverState::AwaitingFilename
                } else {
                    ReceiverState::Closed
                };
            }
            (state, _) => {
                let err = DataChannelError::Protocol(format!("unexpected {kind} frame in {state:?}"));
                self.file_error(err, Some(kind)).await?;
            }
        }
        Ok(())
    }

    async fn open_file(&mut self, content: &[u8]) -> Result<(), DataChannelError> {
        let relative_path = match std::str::from_utf8(content) {
            Ok(name) => name.to_string(),
            Err(_) => {
                let err = DataChannelError::InvalidPath("file name is not UTF-8".into());
                return self.file_error(err, None).await;
            }
        };
        info!(path = %relative_path, "receiving file");
        self.announced = Some(relative_path.clone());

        let destination = match resolve_destination(&self.config.output_dir, &relative_path).await
        {
            Ok(path) => path,
            Err(TransferError::Io(e)) => {
                let err = DataChannelError::file_io(self.config.output_dir.join(&relative_path), e);
                return self.file_error(err, None).await;
            }
            Err(e) => {
                let err = DataChannelError::InvalidPath(e.to_string());
                return self.file_error(err, None).await;
            }
        };

        let lease = self.locks.acquire(&destination).await;
        let file = match File::create(&destination).await {
            Ok(file) => file,
            Err(e) => {
                let err = DataChannelError::file_io(&destination, e);
                return self.file_error(err, None).await;
            }
        };
        debug!(path = %relative_path, dest = %destination.display(), "saving file");

        self.current = Some(InFlight {
            relative_path,
            destination,
            file,
            declared_size: 0,
            bytes_written: 0,
            digest: FileDigest::new(),
            meter: ProgressMeter::new(0, None),
            seq: 0,
            started: Instant::now(),
            _lease: lease,
        });
        self.state = ReceiverState::AwaitingSize;
        Ok(())
    }

    async fn set_size(&mut self, frame: &Frame) -> Result<(), DataChannelError> {
        let size = match frame.parse_size() {
            Ok(size) if size >= 0 => size as u64,
            Ok(size) => {
                let err = DataChannelError::Protocol(format!("negative file size {size}"));
                return self.file_error(err, None).await;
            }
            Err(e) => return self.file_error(e.into(), None).await,
        };

        if let Some(current) = self.current.as_mut() {
            info!(path = %current.relative_path, size, "total size");
            current.declared_size = size;
            current.meter = ProgressMeter::new(size, None);
        }
        self.state = ReceiverState::ReceivingData;
        Ok(())
    }

    async fn write_data(&mut self, content: &[u8]) -> Result<(), DataChannelError> {
        let Some(current) = self.current.as_mut() else {
            return Err(DataChannelError::Protocol("data without an open file".into()));
        };

        if let Err(e) = current.file.write_all(content).await {
            let err = DataChannelError::file_io(&current.destination, e);
            return self.file_error(err, None).await;
        }
        current.bytes_written += content.len() as u64;
        current.digest.update(content);
        current.seq += 1;

        if let Some(p) = current.meter.advance(content.len() as u64) {
            debug!(
                path = %current.relative_path,
                seq = current.seq,
                received_kib = p.done / 1024,
                total_kib = p.total / 1024,
                percent = format_args!("{:.2}", p.percent),
                kib_per_sec = format_args!("{:.2}", p.bytes_per_second / 1024.0),
                "receiving"
            );
        }
        Ok(())
    }

    async fn finish_file(&mut self, remote_digest: &[u8]) -> Result<(), DataChannelError> {
        if remote_digest.len() != DIGEST_LEN {
            let err = DataChannelError::Protocol(format!(
                "End carries {} digest bytes, expected {DIGEST_LEN}",
                remote_digest.len()
            ));
            return self.file_error(err, Some(FrameType::End)).await;
        }
        let Some(mut current) = self.current.take() else {
            return Err(DataChannelError::Protocol("end without an open file".into()));
        };

        if let Err(e) = current.file.flush().await {
            let err = DataChannelError::file_io(&current.destination, e);
            self.current = Some(current);
            return self.file_error(err, Some(FrameType::End)).await;
        }

        let expected = hex::encode(remote_digest);
        let actual = current.digest.clone().finalize_hex();
        let declared = current.declared_size;
        let received = current.bytes_written;
        let destination = current.destination.display().to_string();

        let status = if received != declared {
            FileStatus::SizeMismatch { declared, received }
        } else if expected != actual {
            FileStatus::DigestMismatch {
                expected,
                actual: actual.clone(),
            }
        } else {
            FileStatus::Completed
        };

        let outcome = current.outcome(status);
        let stats = outcome.stats();
        match &outcome.status {
            FileStatus::Completed => info!(
                path = %outcome.relative_path,
                dest = %destination,
                md5 = %actual,
                elapsed_ms = format_args!("{:.2}", stats.elapsed_ms()),
                kib_per_sec = format_args!("{:.2}", stats.kib_per_second()),
                "receive file complete"
            ),
            status => warn!(
                path = %outcome.relative_path,
                dest = %destination,
                "file kept but suspect, please check manually: {status}"
            ),
        }
        self.outcomes.push(outcome);

        self.announced = None;
        self.state = if self.legacy {
            ReceiverState::Closed
        } else {
            ReceiverState::AwaitingFrame
        };
        Ok(())
    }

    /// Fails the current file and keeps the session going.
    ///
    /// In a legacy session the error is returned instead. `offending` is the
    /// frame that triggered the failure; if it already ended the file the
    /// session goes straight back to `AwaitingFrame`.
    async fn file_error(
        &mut self,
        err: DataChannelError,
        offending: Option<FrameType>,
    ) -> Result<(), DataChannelError> {
        if self.legacy {
            return Err(err);
        }

        warn!("file transfer failed: {err}");
        let reason = err.to_string();
        match self.current.take() {
            Some(mut current) => {
                flush_partial(&mut current).await;
                self.outcomes.push(current.outcome(FileStatus::Failed(reason)));
            }
            None if self.state != ReceiverState::Discarding => {
                let name = self.announced.take().unwrap_or_default();
                self.outcomes.push(FileOutcome::failed(name, reason));
            }
            None => {}
        }

        self.announced = None;
        self.state = if offending == Some(FrameType::End) {
            ReceiverState::AwaitingFrame
        } else {
            ReceiverState::Discarding
        };
        Ok(())
    }

    /// Records the in-flight file as aborted after a session-ending error.
    async fn abort_current(&mut self, err: &DataChannelError) {
        if let Some(mut current) = self.current.take() {
            flush_partial(&mut current).await;
            warn!(
                path = %current.relative_path,
                written = current.bytes_written,
                declared = current.declared_size,
                "transfer aborted: {err}"
            );
            self.outcomes
                .push(current.outcome(FileStatus::Aborted(err.to_string())));
        }
    }
}

/// Flushes a file that is being given up on; failures are only logged.
async fn flush_partial(current: &mut InFlight) {
    if let Err(e) = current.file.flush().await {
        warn!(
            path = %current.relative_path,
            dest = %current.destination.display(),
            written = current.bytes_written,
            "could not flush partial file: {e}"
        );
    }
}
