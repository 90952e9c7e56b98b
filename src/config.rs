//! Node configuration
//!
//! Loaded from `voice-node.toml` in the platform config directory (or an
//! explicit path). Every field has a default, so a missing file or a partial
//! one is fine.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::constants::*;
use crate::crypto::{XSalsa20Poly1305LiteMode, XSalsa20Poly1305Mode, XSalsa20Poly1305SuffixMode};
use crate::error::{Error, Result};
use crate::protocol::SpeakingFlags;

const CONFIG_FILE: &str = "voice-node.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub node: NodeConfig,
    pub voice: VoiceConfig,
    pub logging: LoggingConfig,
}

/// Process-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Size of the shared scheduling pool
    pub worker_threads: usize,
    /// Local address media sockets bind to
    pub bind_address: SocketAddr,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            worker_threads: DEFAULT_WORKER_THREADS,
            bind_address: SocketAddr::from(([0, 0, 0, 0], 0)),
        }
    }
}

/// Per-session voice settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Encryption modes in order of preference
    pub encryption_modes: Vec<String>,
    /// Mask sent with "speaking" notifications
    pub speaking_mask: SpeakingFlags,
    /// Pre-fetched frames held per session
    pub frame_queue_capacity: usize,
    /// Socket send buffer, in bytes
    pub send_buffer_size: usize,
    /// Ask the voice server for our external address before polling
    pub ip_discovery: bool,
    pub discovery_timeout_ms: u64,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            encryption_modes: vec![
                XSalsa20Poly1305LiteMode::NAME.to_string(),
                XSalsa20Poly1305SuffixMode::NAME.to_string(),
                XSalsa20Poly1305Mode::NAME.to_string(),
            ],
            speaking_mask: SpeakingFlags::MICROPHONE,
            frame_queue_capacity: FRAME_QUEUE_CAPACITY,
            send_buffer_size: DEFAULT_SEND_BUFFER_SIZE,
            ip_discovery: true,
            discovery_timeout_ms: 5_000,
        }
    }
}

impl VoiceConfig {
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Default config file location, if the platform has one
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "voice-node").map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&text)?;
        info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Load `path` (or the default location); a missing file yields defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        Self::load(&path)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    fn validate(&self) -> Result<()> {
        if self.node.worker_threads == 0 {
            return Err(Error::Config("node.worker_threads must be at least 1".into()));
        }
        if self.voice.encryption_modes.is_empty() {
            return Err(Error::Config("voice.encryption_modes must not be empty".into()));
        }
        if self.voice.frame_queue_capacity == 0 {
            return Err(Error::Config("voice.frame_queue_capacity must be at least 1".into()));
        }
        Ok(())
    }
}
