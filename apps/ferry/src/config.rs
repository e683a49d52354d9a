//! Ferry configuration.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/ferry/ferry.toml`
//! - Windows: `%APPDATA%/ferry/ferry.toml`
//!
//! Every key is optional. Command-line flags override whatever is loaded here.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use ferry_protocol::{DEFAULT_CHUNK_SIZE, DEFAULT_PORT, MAX_CONTENT_SIZE};
use serde::{Deserialize, Serialize};

/// Ferry configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// TCP port to listen on or connect to.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory received files are written under.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Payload bytes per data frame.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Per-frame read/write deadline in seconds (0 = no deadline).
    #[serde(default = "default_timeout_secs")]
    pub frame_timeout_secs: u64,

    /// Deadline for the sender's connect attempt in seconds.
    #[serde(default = "default_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Accept legacy single-file sessions on the receiving side.
    #[serde(default)]
    pub accept_legacy: bool,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./received/")
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            output_dir: default_output_dir(),
            chunk_size: default_chunk_size(),
            frame_timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_timeout_secs(),
            accept_legacy: false,
        }
    }
}

impl Config {
    /// Loads configuration.
    ///
    /// An explicit `path` must exist. Without one, the platform default is
    /// read if present; otherwise built-in defaults are used.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let path = config_path();
                if path.exists() {
                    Self::from_file(&path)
                } else {
                    tracing::debug!(path = %path.display(), "no config file, using defaults");
                    Ok(Self::default())
                }
            }
        }
    }

    fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Rejects values the protocol cannot carry.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chunk_size == 0 || self.chunk_size > MAX_CONTENT_SIZE {
            anyhow::bail!(
                "chunk size must be between 1 and {MAX_CONTENT_SIZE}, got {}",
                self.chunk_size
            );
        }
        Ok(())
    }

    pub fn frame_timeout(&self) -> Option<Duration> {
        (self.frame_timeout_secs > 0).then(|| Duration::from_secs(self.frame_timeout_secs))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("ferry").join("ferry.toml")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("ferry")
            .join("ferry.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.port, 20235);
        assert_eq!(config.output_dir, PathBuf::from("./received/"));
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.frame_timeout(), Some(Duration::from_secs(30)));
        assert!(!config.accept_legacy);
        config.validate().unwrap();
    }

    #[test]
    fn config_partial_toml() {
        let config: Config = toml::from_str("port = 9000\naccept_legacy = true").unwrap();
        assert_eq!(config.port, 9000);
        assert!(config.accept_legacy);
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.connect_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = Config {
            port: 1,
            output_dir: "/srv/incoming".into(),
            chunk_size: 65531,
            frame_timeout_secs: 0,
            connect_timeout_secs: 5,
            accept_legacy: true,
        };
        let text = toml::to_string_pretty(&config).unwrap();
        assert_eq!(toml::from_str::<Config>(&text).unwrap(), config);
    }

    #[test]
    fn zero_timeout_disables_deadline() {
        let config = Config {
            frame_timeout_secs: 0,
            ..Config::default()
        };
        assert_eq!(config.frame_timeout(), None);
    }

    #[test]
    fn chunk_size_bounds() {
        for bad in [0, 65532] {
            let config = Config {
                chunk_size: bad,
                ..Config::default()
            };
            assert!(config.validate().is_err());
        }
    }

    #[test]
    fn load_explicit_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("ferry.toml");
        std::fs::write(&path, "chunk_size = 512\noutput_dir = \"/tmp/in\"").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.chunk_size, 512);
        assert_eq!(config.output_dir, PathBuf::from("/tmp/in"));
    }

    #[test]
    fn load_missing_explicit_file_fails() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(Config::load(Some(&tmp.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn load_invalid_toml_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("ferry.toml");
        std::fs::write(&path, "port = \"not a number\"").unwrap();
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn config_path_not_empty() {
        assert!(config_path().to_string_lossy().contains("ferry"));
    }
}
