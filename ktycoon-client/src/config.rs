//! Client configuration.

use ktycoon_protocol::{CodecKind, DEFAULT_HOST, DEFAULT_PORT, DEFAULT_TIMEOUT_SECS};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Where and how to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Server host name or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Applied to connect and to every blocking read and write.
    pub timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `host:port`, suitable for socket address resolution.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Base URL of the HTTP interface.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Facade configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub timeout_secs: u64,
    /// Use the binary protocol instead of HTTP.
    pub binary: bool,
    /// Return failures as errors instead of only recording them.
    pub exceptions: bool,
    pub codec: CodecKind,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            binary: false,
            exceptions: true,
            codec: CodecKind::default(),
        }
    }
}

impl ClientConfig {
    /// Defaults with `KT_*` environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("KT_HOST") {
            if !host.is_empty() {
                self.host = host;
            }
        }

        if let Some(port) = lookup("KT_PORT") {
            if let Ok(parsed) = port.parse() {
                self.port = parsed;
            }
        }

        if let Some(timeout) = lookup("KT_TIMEOUT") {
            if let Ok(secs) = timeout.parse() {
                self.timeout_secs = secs;
            }
        }

        if let Some(binary) = lookup("KT_BINARY") {
            if let Some(flag) = parse_flag(&binary) {
                self.binary = flag;
            }
        }

        if let Some(exceptions) = lookup("KT_EXCEPTIONS") {
            if let Some(flag) = parse_flag(&exceptions) {
                self.exceptions = flag;
            }
        }
    }

    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig::new(self.host.clone(), self.port)
            .with_timeout(Duration::from_secs(self.timeout_secs))
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
