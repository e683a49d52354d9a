//! Ferry entry point.
//!
//! Without `--send` Ferry listens and receives; with it, Ferry sends the
//! `--input` file or directory to the given host.

mod app;
mod config;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

#[derive(Debug, Parser)]
#[command(name = "ferry", version, about = "Send files and directory trees over TCP")]
struct Cli {
    /// Directory received files are written under.
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Send mode: host (or host:port) of the receiver.
    #[arg(short, long, value_name = "ADDR", requires = "input")]
    send: Option<String>,

    /// File or directory to send (send mode only).
    #[arg(short, long, value_name = "PATH", requires = "send")]
    input: Option<PathBuf>,

    /// TCP port.
    #[arg(short, long)]
    port: Option<u16>,

    /// Payload bytes per data frame.
    #[arg(short, long, value_name = "BYTES")]
    chunk_size: Option<usize>,

    /// Per-frame deadline in seconds, 0 disables it.
    #[arg(short, long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Accept legacy single-file sessions when receiving.
    #[arg(long)]
    legacy: bool,

    /// TOML configuration file.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

impl Cli {
    /// Applies command-line flags on top of the loaded configuration.
    fn apply(&self, config: &mut Config) {
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(dir) = &self.output {
            config.output_dir = dir.clone();
        }
        if let Some(chunk_size) = self.chunk_size {
            config.chunk_size = chunk_size;
        }
        if let Some(secs) = self.timeout {
            config.frame_timeout_secs = secs;
        }
        if self.legacy {
            config.accept_legacy = true;
        }
    }
}

fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    config.validate()?;

    let rt = tokio::runtime::Runtime::new()?;
    match (&cli.send, &cli.input) {
        (Some(host), Some(input)) => {
            let all_ok = rt.block_on(app::run_send(&config, host, input))?;
            Ok(if all_ok {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        _ => {
            rt.block_on(app::run_receive(&config))?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
