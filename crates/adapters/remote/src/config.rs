//! Remote relay configuration.

use std::net::SocketAddr;

use serde::Deserialize;

/// How the local relay listener is exposed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelKind {
    /// Public TCP endpoint through an ngrok session.
    #[default]
    Ngrok,
    /// No tunnel; peers connect to the listener address directly.
    Direct,
}

/// Configuration for the remote relay.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub enabled: bool,
    /// Local address of the relay listener the tunnel forwards to.
    pub bind: SocketAddr,
    pub tunnel: TunnelKind,
    /// Tunnel auth token. Without it the ngrok tunnel is disabled.
    pub authtoken: Option<String>,
    /// Send delivered state back to paired peers.
    pub mirror_state: bool,
    /// How long a new connection may take to present its pairing token.
    pub pairing_timeout_ms: u64,
    pub max_frame_len: usize,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: SocketAddr::from(([127, 0, 0, 1], 0)),
            tunnel: TunnelKind::Ngrok,
            authtoken: None,
            mirror_state: true,
            pairing_timeout_ms: 5_000,
            max_frame_len: 65_536,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_default_to_ngrok_without_token() {
        let config = RemoteConfig::default();
        assert_eq!(config.tunnel, TunnelKind::Ngrok);
        assert!(config.authtoken.is_none());
        assert!(config.mirror_state);
    }

    #[test]
    fn should_parse_direct_tunnel() {
        let config: RemoteConfig = toml::from_str(
            r#"
            bind = "0.0.0.0:9010"
            tunnel = "direct"
            mirror_state = false
            "#,
        )
        .unwrap();
        assert_eq!(config.tunnel, TunnelKind::Direct);
        assert_eq!(config.bind.port(), 9010);
        assert!(!config.mirror_state);
        assert_eq!(config.max_frame_len, 65_536);
    }
}
