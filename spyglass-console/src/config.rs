//! Console client configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Top-level configuration for the console client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Target endpoint.
    pub network: NetworkConfig,
    /// Authentication and encryption.
    pub security: SecurityConfig,
    /// Optional HTTP tunnel in front of the endpoint.
    pub tunnel: TunnelConfig,
    /// Logging.
    pub logging: LoggingConfig,
}

/// Target endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// VNC server host.
    pub host: String,
    /// VNC server port.
    pub port: u16,
    /// Connection timeout in milliseconds.
    pub timeout_ms: u64,
}

/// Authentication and encryption.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// VNC password, when the server demands one.
    pub password: Option<String>,
    /// Run the protocol inside TLS.
    pub tls: bool,
    /// Accept any server certificate (self-signed endpoints).
    pub insecure: bool,
}

/// Optional HTTP CONNECT tunnel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Enable the tunnel.
    pub enabled: bool,
    /// Tunnel endpoint host.
    pub host: String,
    /// Tunnel endpoint port.
    pub port: u16,
    /// Console routing path.
    pub path: String,
    /// Session ticket, if the tunnel requires one.
    pub session: Option<String>,
}

/// Logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter.
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 5900,
            timeout_ms: 5000,
        }
    }
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".into(),
            port: 8000,
            path: "/console".into(),
            session: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl ConsoleConfig {
    /// Load from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
