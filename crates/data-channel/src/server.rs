//! TCP acceptor (receiving side).
//!
//! Accepts connections until cancelled and runs one [`ReceiverSession`] per
//! connection on its own task. There is no cap on concurrent sessions; writes
//! to the same destination path are serialized through a shared [`PathLocks`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ferry_transfer::FileOutcome;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::DataChannelError;
use crate::locks::PathLocks;
use crate::receiver::{ReceiverConfig, ReceiverSession};
use crate::{ACCEPT_BACKOFF, TCP_BUFFER_SIZE};

/// Summary of one finished connection.
#[derive(Debug)]
pub struct SessionReport {
    pub peer: SocketAddr,
    pub outcomes: Vec<FileOutcome>,
    /// Set when the session ended on an error instead of `Disconnect`.
    pub error: Option<DataChannelError>,
    pub elapsed: Duration,
}

impl SessionReport {
    pub fn files_ok(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }
}

/// Accept loop for inbound transfers.
pub struct TransferServer {
    config: Arc<ReceiverConfig>,
    locks: PathLocks,
    cancel: CancellationToken,
    reports: Option<mpsc::Sender<SessionReport>>,
}

impl TransferServer {
    pub fn new(config: ReceiverConfig, cancel: CancellationToken) -> Self {
        Self {
            config: Arc::new(config),
            locks: PathLocks::new(),
            cancel,
            reports: None,
        }
    }

    /// Sends a [`SessionReport`] for every finished connection to `tx`.
    pub fn with_reports(mut self, tx: mpsc::Sender<SessionReport>) -> Self {
        self.reports = Some(tx);
        self
    }

    pub async fn bind(addr: SocketAddr) -> Result<TcpListener, DataChannelError> {
        let listener = TcpListener::bind(addr).await?;
        info!("listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Runs the accept loop until the cancellation token fires.
    ///
    /// Sessions already running are left to finish on their own.
    pub async fn run(&self, listener: TcpListener) -> Result<(), DataChannelError> {
        tokio::fs::create_dir_all(&self.config.output_dir)
            .await
            .map_err(|e| DataChannelError::file_io(&self.config.output_dir, e))?;
        info!(dir = %self.config.output_dir.display(), "saving files under");

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!("acceptor shutting down");
                    break Ok(());
                }
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            info!(%peer, "connection accepted");
                            let config = Arc::clone(&self.config);
                            let locks = self.locks.clone();
                            let reports = self.reports.clone();
                            tokio::spawn(serve_connection(stream, peer, config, locks, reports));
                        }
                        Err(e) => {
                            error!("accept error: {e}");
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                        }
                    }
                }
            }
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    config: Arc<ReceiverConfig>,
    locks: PathLocks,
    reports: Option<mpsc::Sender<SessionReport>>,
) {
    let started = Instant::now();
    let reader = BufReader::with_capacity(TCP_BUFFER_SIZE, stream);
    let mut session = ReceiverSession::new(reader, config, locks);
    let result = session.run().await;

    let report = SessionReport {
        peer,
        outcomes: session.into_outcomes(),
        error: result.err(),
        elapsed: started.elapsed(),
    };

    let total = report.outcomes.len();
    let ok = report.files_ok();
    match &report.error {
        None => info!(%peer, files = total, ok, "session finished"),
        Some(e) => warn!(%peer, files = total, ok, kind = ?e.kind(), "session ended: {e}"),
    }

    if let Some(tx) = reports {
        let _ = tx.send(report).await;
    }
}

#[cfg(test)]
mod tests {
    use ferry_protocol::Frame;
    use ferry_transfer::digest_bytes;
    use tokio::io::AsyncWriteExt;

    use super::*;

    async fn start(
        dir: &std::path::Path,
    ) -> (SocketAddr, CancellationToken, mpsc::Receiver<SessionReport>, tokio::task::JoinHandle<()>) {
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(16);
        let server = TransferServer::new(ReceiverConfig::new(dir), cancel.clone()).with_reports(tx);
        let listener = TransferServer::bind(([127, 0, 0, 1], 0).into()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            server.run(listener).await.unwrap();
        });
        (addr, cancel, rx, handle)
    }

    fn one_file_session(name: &str, data: &[u8]) -> Vec<u8> {
        let digest = hex::decode(digest_bytes(data)).unwrap();
        [
            Frame::new_file(),
            Frame::filename(name),
            Frame::size(data.len() as i64),
            Frame::data(data),
            Frame::end(&digest),
            Frame::disconnect(),
        ]
        .iter()
        .flat_map(|f| f.to_bytes().unwrap())
        .collect()
    }

    #[tokio::test]
    async fn concurrent_connections() {
        let dir = tempfile::tempdir().unwrap();
        let (addr, cancel, mut reports, handle) = start(dir.path()).await;

        let mut clients = Vec::new();
        for i in 0..4 {
            let bytes = one_file_session(&format!("f{i}.txt"), format!("payload {i}").as_bytes());
            clients.push(tokio::spawn(async move {
                let mut stream = TcpStream::connect(addr).await.unwrap();
                stream.write_all(&bytes).await.unwrap();
                stream.shutdown().await.unwrap();
            }));
        }
        for client in clients {
            client.await.unwrap();
        }

        for _ in 0..4 {
            let report = tokio::time::timeout(Duration::from_secs(5), reports.recv())
                .await
                .unwrap()
                .unwrap();
            assert!(report.error.is_none());
            assert_eq!(report.files_ok(), 1);
        }
        for i in 0..4 {
            let got = std::fs::read(dir.path().join(format!("f{i}.txt"))).unwrap();
            assert_eq!(got, format!("payload {i}").as_bytes());
        }

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn garbage_connection_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let (addr, cancel, mut reports, handle) = start(dir.path()).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();

        let report = tokio::time::timeout(Duration::from_secs(5), reports.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(report.outcomes.is_empty());
        assert!(report.error.is_some());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn cancellation_stops_accept_loop() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let server = TransferServer::new(ReceiverConfig::new(dir.path().join("out")), cancel.clone());
        let listener = TransferServer::bind(([127, 0, 0, 1], 0).into()).await.unwrap();

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), server.run(listener))
            .await
            .unwrap()
            .unwrap();
        assert!(dir.path().join("out").is_dir());
    }
}
