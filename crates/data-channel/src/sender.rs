//! Sender session (outbound side).
//!
//! Connects to the receiver and streams each file as
//! `NewFile, Filename, Size, Data*, End`, then closes with `Disconnect`.

use std::path::Path;
use std::time::{Duration, Instant};

use ferry_protocol::{DEFAULT_CHUNK_SIZE, Frame, MAX_CONTENT_SIZE, write_frame};
use ferry_transfer::{
    FileDigest, FileOutcome, FileStatus, ProgressMeter, SourceFile, TransferStats, collect_files,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::DataChannelError;
use crate::{FRAME_TIMEOUT, TCP_BUFFER_SIZE, TCP_CONNECT_TIMEOUT};

/// Tunables for a sending session.
#[derive(Debug, Clone)]
pub struct SendOptions {
    /// Payload bytes per `Data` frame (1..=65531).
    pub chunk_size: usize,
    /// Deadline for writing one frame; `None` waits forever.
    pub frame_timeout: Option<Duration>,
    /// Deadline for establishing the TCP connection.
    pub connect_timeout: Duration,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            frame_timeout: Some(FRAME_TIMEOUT),
            connect_timeout: TCP_CONNECT_TIMEOUT,
        }
    }
}

/// What a completed send produced.
#[derive(Debug, Clone)]
pub struct SendReport {
    pub files: Vec<FileOutcome>,
    pub stats: TransferStats,
}

impl SendReport {
    pub fn all_succeeded(&self) -> bool {
        self.files.iter().all(FileOutcome::is_success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &FileOutcome> {
        self.files.iter().filter(|f| !f.is_success())
    }
}

/// Drives the outbound half of a connection.
pub struct SenderSession<W> {
    writer: W,
    options: SendOptions,
    cancel: CancellationToken,
    buf: Vec<u8>,
    outcomes: Vec<FileOutcome>,
}

impl<W: AsyncWrite + Unpin> SenderSession<W> {
    /// Creates a session writing to `writer`.
    ///
    /// Fails if the chunk size does not fit in a single frame.
    pub fn new(
        writer: W,
        options: SendOptions,
        cancel: CancellationToken,
    ) -> Result<Self, DataChannelError> {
        if options.chunk_size == 0 || options.chunk_size > MAX_CONTENT_SIZE {
            return Err(DataChannelError::InvalidChunkSize(options.chunk_size));
        }
        Ok(Self {
            buf: vec![0u8; options.chunk_size],
            writer,
            options,
            cancel,
            outcomes: Vec::new(),
        })
    }

    /// Outcomes of every file attempted so far.
    pub fn outcomes(&self) -> &[FileOutcome] {
        &self.outcomes
    }

    /// Sends `files` in order, as enumerated by [`collect_files`].
    pub async fn send_files(&mut self, files: &[SourceFile]) -> Result<(), DataChannelError> {
        for file in files {
            self.send_file(file).await?;
        }
        Ok(())
    }

    /// Sends one file and returns its outcome.
    ///
    /// A file that cannot be opened is skipped before it is announced. A read
    /// failure mid-file ends the file early with the digest of what was sent,
    /// which the receiver reports as a size mismatch. Only connection errors
    /// are returned as `Err`.
    pub async fn send_file(&mut self, source: &SourceFile) -> Result<FileOutcome, DataChannelError> {
        let relative = source.relative_path.as_str();
        let (mut file, size) = match open_source(&source.local_path).await {
            Ok(pair) => pair,
            Err(e) => {
                let err = DataChannelError::file_io(&source.local_path, e);
                warn!(path = %relative, "skipping file: {err}");
                return Ok(self.record(FileOutcome::failed(relative, err.to_string())));
            }
        };
        self.send_reader(&mut file, relative, size, &source.local_path).await
    }

    /// Announces `relative` as `size` bytes and streams it from `reader`.
    async fn send_reader<R: AsyncRead + Unpin>(
        &mut self,
        reader: &mut R,
        relative: &str,
        size: u64,
        local_path: &Path,
    ) -> Result<FileOutcome, DataChannelError> {
        let started = Instant::now();
        info!(path = %relative, size, "start transferring");
        self.write(&Frame::new_file()).await?;
        self.write(&Frame::filename(relative)).await?;
        self.write(&Frame::size(size as i64)).await?;

        let mut digest = FileDigest::new();
        let mut meter = ProgressMeter::new(size, None);
        let mut seq = 0u64;
        let mut read_error = None;

        loop {
            let n = match read_chunk(reader, &mut self.buf).await {
                Ok(n) => n,
                Err(e) => {
                    read_error = Some(DataChannelError::file_io(local_path, e));
                    break;
                }
            };
            if n == 0 {
                break;
            }

            let frame = Frame::data(&self.buf[..n]);
            self.write(&frame).await?;
            digest.update(&frame.content);

            seq += 1;
            if let Some(p) = meter.advance(n as u64) {
                debug!(
                    path = %relative,
                    seq,
                    sent_kib = p.done / 1024,
                    total_kib = p.total / 1024,
                    percent = format_args!("{:.2}", p.percent),
                    kib_per_sec = format_args!("{:.2}", p.bytes_per_second / 1024.0),
                    "sending"
                );
            }

            // A short chunk means the file is exhausted.
            if n < self.buf.len() {
                break;
            }
        }

        let raw = digest.finalize();
        self.write(&Frame::end(&raw)).await?;
        self.flush().await?;

        let md5 = hex::encode(raw);
        let sent = meter.done();
        let status = match read_error {
            Some(err) => {
                warn!(path = %relative, sent, size, "read failed mid-file: {err}");
                FileStatus::Failed(err.to_string())
            }
            None if sent != size => {
                warn!(path = %relative, sent, size, "file changed while sending");
                FileStatus::Failed(format!("file changed while sending ({sent} of {size} bytes)"))
            }
            None => FileStatus::Completed,
        };

        let outcome = FileOutcome {
            relative_path: relative.to_string(),
            bytes: sent,
            digest: md5,
            elapsed: started.elapsed(),
            status,
        };
        if outcome.is_success() {
            let stats = outcome.stats();
            info!(
                path = %relative,
                md5 = %outcome.digest,
                elapsed_ms = format_args!("{:.2}", stats.elapsed_ms()),
                kib_per_sec = format_args!("{:.2}", stats.kib_per_second()),
                "send file complete"
            );
        }
        Ok(self.record(outcome))
    }

    /// Sends `Disconnect`, flushes and shuts the writer down.
    pub async fn finish(mut self) -> Result<Vec<FileOutcome>, DataChannelError> {
        self.write(&Frame::disconnect()).await?;
        self.flush().await?;
        self.writer.shutdown().await?;
        debug!(files = self.outcomes.len(), "session closed");
        Ok(self.outcomes)
    }

    fn record(&mut self, outcome: FileOutcome) -> FileOutcome {
        self.outcomes.push(outcome.clone());
        outcome
    }

    async fn write(&mut self, frame: &Frame) -> Result<(), DataChannelError> {
        if self.cancel.is_cancelled() {
            return Err(DataChannelError::Cancelled);
        }
        match self.options.frame_timeout {
            Some(limit) => tokio::time::timeout(limit, write_frame(&mut self.writer, frame))
                .await
                .map_err(|_| DataChannelError::Timeout)??,
            None => write_frame(&mut self.writer, frame).await?,
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), DataChannelError> {
        match self.options.frame_timeout {
            Some(limit) => tokio::time::timeout(limit, self.writer.flush())
                .await
                .map_err(|_| DataChannelError::Timeout)??,
            None => self.writer.flush().await?,
        }
        Ok(())
    }
}

async fn open_source(path: &Path) -> std::io::Result<(tokio::fs::File, u64)> {
    let file = tokio::fs::File::open(path).await?;
    let size = file.metadata().await?.len();
    Ok((file, size))
}

/// Fills `buf` from `reader`, stopping early only at end of file.
async fn read_chunk<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Connects to `addr` and sends the file or directory at `path`.
///
/// The source is enumerated before connecting, so a missing path fails
/// without touching the network.
pub async fn send_path(
    addr: &str,
    path: &Path,
    options: SendOptions,
    cancel: CancellationToken,
) -> Result<SendReport, DataChannelError> {
    let started = Instant::now();
    let files = collect_files(path).await?;

    // Connect with timeout + cancellation.
    let stream = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            return Err(DataChannelError::Cancelled);
        }
        result = tokio::time::timeout(options.connect_timeout, TcpStream::connect(addr)) => {
            match result {
                Ok(Ok(s)) => {
                    info!(%addr, "connected");
                    s
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => return Err(DataChannelError::Timeout),
            }
        }
    };

    let writer = BufWriter::with_capacity(TCP_BUFFER_SIZE, stream);
    let mut session = SenderSession::new(writer, options, cancel)?;
    info!(root = %path.display(), files = files.len(), "sending");
    session.send_files(&files).await?;
    let outcomes = session.finish().await?;

    let bytes = outcomes.iter().map(|o| o.bytes).sum();
    Ok(SendReport {
        files: outcomes,
        stats: TransferStats {
            bytes,
            elapsed: started.elapsed(),
        },
    })
}
