use serde::{Deserialize, Serialize};

use crate::error::ChannelAdapterError;

/// Connection settings for a Mattermost server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MattermostConfig {
    /// Server address: a bare `host[:port]` (plain HTTP) or a full URL.
    pub server: String,
    /// Per-request timeout for REST calls.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    15
}

impl Default for MattermostConfig {
    fn default() -> Self {
        Self {
            server: String::new(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl MattermostConfig {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            ..Self::default()
        }
    }

    /// Base URL for REST calls, without trailing slash.
    pub fn api_base_url(&self) -> Result<String, ChannelAdapterError> {
        let server = self.server.trim().trim_end_matches('/');
        if server.is_empty() {
            return Err(ChannelAdapterError::Config(
                "Mattermost server cannot be empty".to_string(),
            ));
        }
        if server.starts_with("http://") || server.starts_with("https://") {
            Ok(server.to_string())
        } else if server.contains("://") {
            Err(ChannelAdapterError::Config(format!(
                "unsupported scheme in server address '{}'",
                server
            )))
        } else {
            Ok(format!("http://{}", server))
        }
    }

    /// Websocket endpoint matching [`api_base_url`](Self::api_base_url).
    pub fn websocket_url(&self) -> Result<String, ChannelAdapterError> {
        let base = self.api_base_url()?;
        let ws = match base.strip_prefix("https://") {
            Some(rest) => format!("wss://{}", rest),
            None => format!("ws://{}", base.trim_start_matches("http://")),
        };
        Ok(format!("{}/api/v4/websocket", ws))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_host_defaults_to_http() {
        let cfg = MattermostConfig::new("chat.example.com:8065");
        assert_eq!(cfg.api_base_url().unwrap(), "http://chat.example.com:8065");
        assert_eq!(
            cfg.websocket_url().unwrap(),
            "ws://chat.example.com:8065/api/v4/websocket"
        );
        assert_eq!(cfg.request_timeout_secs, 15);
    }

    #[test]
    fn https_maps_to_wss() {
        let cfg = MattermostConfig::new("https://mm.example.com/");
        assert_eq!(cfg.api_base_url().unwrap(), "https://mm.example.com");
        assert_eq!(
            cfg.websocket_url().unwrap(),
            "wss://mm.example.com/api/v4/websocket"
        );
    }

    #[test]
    fn empty_or_foreign_scheme_rejected() {
        assert!(MattermostConfig::new("  ").api_base_url().is_err());
        assert!(MattermostConfig::new("ftp://mm").api_base_url().is_err());
    }
}
