//! # Configuration Management
//!
//! Centralized configuration for the CASTV2 protocol core.
//!
//! This module provides structured configuration for servers and clients,
//! including listen/connect parameters, framing limits, and logging options.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment-specific overrides (`CASTV2_*` variables)
//!
//! ## Security Considerations
//! - The wire format has no length ceiling of its own; `max_frame_size`
//!   bounds what a peer can make us allocate
//! - Cast devices present self-signed certificates, so client verification
//!   is opt-in

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::Level;

/// The only supported envelope protocol version (`CASTV2_1_0`)
pub const PROTOCOL_VERSION: i32 = 0;

/// Well-known CASTV2 service port
pub const DEFAULT_PORT: u16 = 8009;

/// Destination id addressing every channel on the receiving side
pub const BROADCAST_DESTINATION: &str = "*";

/// Default ceiling on a single frame body (64 KiB, the size cast receivers accept)
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Default depth of the per-connection outbound frame queue
pub const BACKPRESSURE_LIMIT: usize = 64;

/// Default capacity of client/server event channels
pub const EVENT_CAPACITY: usize = 256;

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    /// Server-specific configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Client-specific configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Transport configuration
    #[serde(default)]
    pub transport: TransportConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("CASTV2_BIND_ADDRESS") {
            config.server.bind_address = addr;
        }

        if let Ok(port) = std::env::var("CASTV2_PORT") {
            let port = port
                .parse::<u16>()
                .map_err(|e| ProtocolError::ConfigError(format!("Invalid CASTV2_PORT: {e}")))?;
            config.server.port = port;
            config.client.port = port;
        }

        if let Ok(size) = std::env::var("CASTV2_MAX_FRAME_SIZE") {
            if let Ok(val) = size.parse::<usize>() {
                config.transport.max_frame_size = val;
            }
        }

        if let Ok(limit) = std::env::var("CASTV2_BACKPRESSURE_LIMIT") {
            if let Ok(val) = limit.parse::<usize>() {
                config.transport.backpressure_limit = val;
            }
        }

        if let Ok(verify) = std::env::var("CASTV2_VERIFY_CERTIFICATES") {
            config.client.verify_certificates = matches!(verify.as_str(), "1" | "true" | "yes");
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.client.validate());
        errors.extend(self.transport.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Server-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Address to bind the listener to (e.g., "0.0.0.0")
    pub bind_address: String,

    /// Port to listen on
    pub port: u16,

    /// Capacity of the server event channel
    pub event_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: String::from("0.0.0.0"),
            port: DEFAULT_PORT,
            event_capacity: EVENT_CAPACITY,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.bind_address.is_empty() {
            errors.push("Server bind address cannot be empty".to_string());
        } else if self.bind_address.parse::<std::net::IpAddr>().is_err() {
            errors.push(format!(
                "Invalid server bind address: '{}' (expected an IP such as '0.0.0.0')",
                self.bind_address
            ));
        }

        if self.event_capacity == 0 {
            errors.push("Server event capacity must be greater than 0".to_string());
        }

        errors
    }
}

/// Client-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Port used when a connect call does not name one
    pub port: u16,

    /// Verify the device certificate against the native root store
    pub verify_certificates: bool,

    /// TLS server name to present; defaults to the connect host
    #[serde(default)]
    pub server_name: Option<String>,

    /// Capacity of the client event channel
    pub event_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            verify_certificates: false,
            server_name: None,
            event_capacity: EVENT_CAPACITY,
        }
    }
}

impl ClientConfig {
    /// Validate client configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.port == 0 {
            errors.push("Client port cannot be 0".to_string());
        }

        if let Some(name) = &self.server_name {
            if name.is_empty() {
                errors.push("Client server_name cannot be empty when set".to_string());
            }
        }

        if self.event_capacity == 0 {
            errors.push("Client event capacity must be greater than 0".to_string());
        }

        errors
    }
}

/// Transport configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    /// Maximum accepted frame body size in bytes
    pub max_frame_size: usize,

    /// Maximum number of frames queued for writing on one connection
    pub backpressure_limit: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
            backpressure_limit: BACKPRESSURE_LIMIT,
        }
    }
}

impl TransportConfig {
    /// Validate transport configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_frame_size == 0 {
            errors.push("Max frame size cannot be 0".to_string());
        } else if self.max_frame_size > u32::MAX as usize {
            errors.push(format!(
                "Max frame size too large: {} bytes (the length prefix is 32 bits)",
                self.max_frame_size
            ));
        }

        if self.backpressure_limit == 0 {
            errors.push("Backpressure limit must be greater than 0".to_string());
        } else if self.backpressure_limit > 1_000_000 {
            errors.push(format!(
                "Backpressure limit too large: {} (max recommended: 1,000,000)",
                self.backpressure_limit
            ));
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("castv2"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        if self.log_to_file {
            if let Some(ref path) = self.log_file_path {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
        }

        errors
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
