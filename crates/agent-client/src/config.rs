use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CREDENTIALS_DIR: &str = "/usr/local/var/urbackup";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub endpoint: String,
    pub credentials_dir: PathBuf,
    pub command_timeout_ms: u64,
    pub status_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub status_poll_interval_ms: u64,
    pub read_chunk_bytes: usize,
    pub max_frame_length: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: agent_protocol::DEFAULT_AGENT_ADDR.to_string(),
            credentials_dir: PathBuf::from(DEFAULT_CREDENTIALS_DIR),
            command_timeout_ms: 10_000,
            status_timeout_ms: 5_000,
            poll_interval_ms: 100,
            status_poll_interval_ms: 10,
            read_chunk_bytes: 1024,
            max_frame_length: agent_protocol::framing::MAX_FRAME_LENGTH,
        }
    }
}

impl ClientConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_millis(self.status_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_interval_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.endpoint.trim().is_empty() {
            anyhow::bail!("endpoint cannot be empty");
        }
        if self.command_timeout_ms == 0 || self.status_timeout_ms == 0 {
            anyhow::bail!("timeouts must be greater than zero");
        }
        if self.poll_interval_ms == 0 || self.status_poll_interval_ms == 0 {
            anyhow::bail!("poll intervals must be greater than zero");
        }
        if self.read_chunk_bytes == 0 {
            anyhow::bail!("read_chunk_bytes must be greater than zero");
        }
        if self.max_frame_length < 1024 {
            anyhow::bail!(
                "max_frame_length must be at least 1024 bytes, got {}",
                self.max_frame_length
            );
        }
        Ok(())
    }
}

pub fn load_client_config(path: &Path) -> anyhow::Result<ClientConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: ClientConfig = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config {}", path.display()))?;
    config.validate()?;
    Ok(config)
}
