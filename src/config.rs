//! Client Configuration
//!
//! Defaults suit a server running locally. Each field can be overridden from
//! the environment.

use tracing::warn;

use crate::debug::DebugWhen;

/// Default server endpoint.
pub const DEFAULT_SERVER_URL: &str = "ws://localhost:3141";

/// Protocol version this client speaks.
pub const API_VERSION: u32 = 1;

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// WebSocket endpoint of the game server.
    pub server_url: String,
    /// Protocol version the server must report in its `init` message.
    pub api_version: u32,
    /// What the default tracing sink logs.
    pub debug_console: DebugWhen,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            api_version: API_VERSION,
            debug_console: DebugWhen::Response,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables:
    /// `ARCANAR_SERVER_URL`, `ARCANAR_API_VERSION`, `ARCANAR_DEBUG_CONSOLE`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ClientConfig::from_env`] with a custom variable source.
    /// Unparsable values are logged and ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("ARCANAR_SERVER_URL").filter(|v| !v.trim().is_empty()) {
            config.server_url = url.trim().to_string();
        }
        if let Some(raw) = lookup("ARCANAR_API_VERSION") {
            match raw.trim().parse() {
                Ok(version) => config.api_version = version,
                Err(e) => warn!("Ignoring ARCANAR_API_VERSION={:?}: {}", raw, e),
            }
        }
        if let Some(raw) = lookup("ARCANAR_DEBUG_CONSOLE") {
            match raw.parse() {
                Ok(when) => config.debug_console = when,
                Err(e) => warn!("Ignoring ARCANAR_DEBUG_CONSOLE: {}", e),
            }
        }

        config
    }

    /// Replace the server URL.
    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = url.into();
        self
    }
}
