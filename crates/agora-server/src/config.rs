//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use agora_hub::HubConfig;
use agora_shared::constants::{DEFAULT_HTTP_PORT, DEFAULT_OUTBOUND_QUEUE_DEPTH};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) server, WebSocket included.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:4422`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `./agora.db`
    pub database_path: PathBuf,

    /// Frames buffered per chat connection before it is dropped as stalled.
    /// Env: `OUTBOUND_QUEUE_DEPTH`
    /// Default: `64`
    pub outbound_queue_depth: usize,

    /// Human-readable name for this instance, reported by `/info`.
    /// Env: `INSTANCE_NAME`
    /// Default: `"Agora Forum"`
    pub instance_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./agora.db"),
            outbound_queue_depth: DEFAULT_OUTBOUND_QUEUE_DEPTH,
            instance_name: "Agora Forum".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            if !path.is_empty() {
                config.database_path = PathBuf::from(path);
            }
        }

        if let Some(val) = lookup("OUTBOUND_QUEUE_DEPTH") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.outbound_queue_depth = n,
                _ => tracing::warn!(value = %val, "Invalid OUTBOUND_QUEUE_DEPTH, using default"),
            }
        }

        if let Some(name) = lookup("INSTANCE_NAME") {
            config.instance_name = name;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            outbound_queue_depth: self.outbound_queue_depth,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> ServerConfig {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, SocketAddr::from(([0, 0, 0, 0], 4422)));
        assert_eq!(config.outbound_queue_depth, 64);
    }

    #[test]
    fn test_env_overrides() {
        let config = from_pairs(&[
            ("HTTP_ADDR", "127.0.0.1:9000"),
            ("DATABASE_PATH", "/tmp/forum.db"),
            ("OUTBOUND_QUEUE_DEPTH", "8"),
        ]);
        assert_eq!(config.http_addr, SocketAddr::from(([127, 0, 0, 1], 9000)));
        assert_eq!(config.database_path, PathBuf::from("/tmp/forum.db"));
        assert_eq!(config.hub_config().outbound_queue_depth, 8);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = from_pairs(&[("HTTP_ADDR", "nope"), ("OUTBOUND_QUEUE_DEPTH", "0")]);
        assert_eq!(config.http_addr, ServerConfig::default().http_addr);
        assert_eq!(config.outbound_queue_depth, 64);
    }
}
