//! Typed view of the configuration tree.
//!
//! Every field has a default so a partial user file always deserializes.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Default port of the playback source HTTP endpoint.
pub const DEFAULT_SOURCE_PORT: u16 = 9100;
pub const DEFAULT_CLIENT_ID: &str = "1475071196708995145";
pub const DEFAULT_PAUSE_TIMEOUT: u64 = 30;
pub const DEFAULT_LOG_BUFFER_CAPACITY: usize = 500;
pub const DEFAULT_ARTWORK_TTL_DAYS: u64 = 30;
/// Highest IPC pipe / socket index the presence consumer listens on.
pub const MAX_PIPE_NUMBER: u8 = 9;
/// Only the first buttons are ever displayed.
pub const MAX_BUTTONS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PresenceConfig {
    pub source: SourceConfig,
    pub display: DisplayConfig,
    pub discord: DiscordConfig,
    pub logging: LoggingConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SourceConfig {
    /// `host[:port]`, empty when the source is discovered by other means.
    pub core_address: String,
}

impl SourceConfig {
    /// Splits `core_address` into host and port, defaulting the port.
    ///
    /// Returns `None` when no address is configured or the port is not a number.
    pub fn host_port(&self) -> Option<(String, u16)> {
        let address = self.core_address.trim();
        if address.is_empty() {
            return None;
        }
        match address.rsplit_once(':') {
            Some((host, port)) => port.parse().ok().map(|p| (host.to_string(), p)),
            None => Some((address.to_string(), DEFAULT_SOURCE_PORT)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub show_album: bool,
    pub show_artist: bool,
    pub show_cover_art: bool,
    pub show_progress: bool,
    /// Seconds before a paused session is cleared; 0 keeps it forever.
    pub pause_timeout: u64,
    pub buttons: Vec<ButtonConfig>,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            show_album: true,
            show_artist: true,
            show_cover_art: true,
            show_progress: true,
            pause_timeout: DEFAULT_PAUSE_TIMEOUT,
            buttons: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonConfig {
    pub label: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscordConfig {
    pub client_id: String,
    pub pipe_number: u8,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            client_id: DEFAULT_CLIENT_ID.to_string(),
            pipe_number: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub debug: bool,
    pub buffer_capacity: usize,
    pub enable_console: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            debug: false,
            buffer_capacity: DEFAULT_LOG_BUFFER_CAPACITY,
            enable_console: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub artwork_ttl_days: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            artwork_ttl_days: DEFAULT_ARTWORK_TTL_DAYS,
        }
    }
}

impl CacheConfig {
    pub fn artwork_ttl_ms(&self) -> i64 {
        (self.artwork_ttl_days as i64).saturating_mul(24 * 3600 * 1000)
    }
}

impl PresenceConfig {
    /// Checks the values the rest of the workspace relies on.
    pub fn validate(&self) -> Result<()> {
        if self.discord.pipe_number > MAX_PIPE_NUMBER {
            return Err(anyhow!(
                "discord.pipe_number must be between 0 and {}, got {}",
                MAX_PIPE_NUMBER,
                self.discord.pipe_number
            ));
        }

        let client_id = self.discord.client_id.trim();
        if client_id.is_empty() || !client_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(anyhow!(
                "discord.client_id must be a non-empty numeric id, got '{}'",
                self.discord.client_id
            ));
        }

        for (i, button) in self.display.buttons.iter().enumerate() {
            if button.label.trim().is_empty() {
                return Err(anyhow!("display.buttons[{}].label is empty", i));
            }
            if !button.url.starts_with("http") {
                return Err(anyhow!(
                    "display.buttons[{}].url must start with http, got '{}'",
                    i,
                    button.url
                ));
            }
        }

        if !self.source.core_address.trim().is_empty() && self.source.host_port().is_none() {
            return Err(anyhow!(
                "source.core_address '{}' is not host[:port]",
                self.source.core_address
            ));
        }

        Ok(())
    }
}
