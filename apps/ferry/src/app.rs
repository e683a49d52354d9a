//! Send and receive modes.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;

use ferry_data_channel::{ReceiverConfig, SendOptions, SendReport, TransferServer, send_path};
use tokio_util::sync::CancellationToken;

use crate::config::Config;

/// Sends `input` to `host` and prints a summary.
///
/// Returns `false` when any file did not complete.
pub async fn run_send(config: &Config, host: &str, input: &Path) -> anyhow::Result<bool> {
    let cancel = CancellationToken::new();
    spawn_ctrl_c(cancel.clone());

    let addr = target_addr(host, config.port);
    let options = SendOptions {
        chunk_size: config.chunk_size,
        frame_timeout: config.frame_timeout(),
        connect_timeout: config.connect_timeout(),
    };

    tracing::info!(%addr, input = %input.display(), "sending");
    let report = send_path(&addr, input, options, cancel).await?;
    print_summary(&report);

    Ok(report.all_succeeded())
}

/// Listens on the configured port until Ctrl-C.
pub async fn run_receive(config: &Config) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    spawn_ctrl_c(cancel.clone());

    let receiver = ReceiverConfig {
        output_dir: config.output_dir.clone(),
        frame_timeout: config.frame_timeout(),
        accept_legacy: config.accept_legacy,
    };
    let bind: SocketAddr = ([0, 0, 0, 0], config.port).into();
    let listener = TransferServer::bind(bind).await?;
    TransferServer::new(receiver, cancel).run(listener).await?;

    tracing::info!("receiver shut down cleanly");
    Ok(())
}

fn spawn_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping");
            cancel.cancel();
        }
    });
}

/// Joins `host` with `port` unless it already names one.
fn target_addr(host: &str, port: u16) -> String {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return SocketAddr::new(ip, port).to_string();
    }
    if host.parse::<SocketAddr>().is_ok() {
        return host.to_string();
    }
    match host.rsplit_once(':') {
        Some((name, p)) if !name.is_empty() && p.parse::<u16>().is_ok() => host.to_string(),
        _ => format!("{host}:{port}"),
    }
}

fn print_summary(report: &SendReport) {
    let ok = report.files.len() - report.failures().count();
    println!(
        "sent {ok}/{} files, {} bytes in {:.2} ms ({:.2} KiB/s)",
        report.files.len(),
        report.stats.bytes,
        report.stats.elapsed_ms(),
        report.stats.kib_per_second(),
    );
    for failed in report.failures() {
        println!("  failed: {} ({})", failed.relative_path, failed.status);
    }
}
