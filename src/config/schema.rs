//! Configuration schema definitions.
//!
//! The `server` and `serial` sections are optional at the serde level so that
//! a missing section is reported as a configuration error instead of being
//! silently defaulted.

use super::error::{ConfigError, ConfigResult};
use crate::port::SerialOptions;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP gateway configuration
    pub server: Option<ServerConfig>,
    /// Serial device configuration
    pub serial: Option<SerialConfig>,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    pub fn server(&self) -> ConfigResult<&ServerConfig> {
        self.server
            .as_ref()
            .ok_or_else(|| ConfigError::MissingRequired("server".to_string()))
    }

    pub fn serial(&self) -> ConfigResult<&SerialConfig> {
        self.serial
            .as_ref()
            .ok_or_else(|| ConfigError::MissingRequired("serial".to_string()))
    }

    /// Check everything startup depends on, so a bad file aborts before any
    /// hardware or socket is touched.
    pub fn validate(&self) -> ConfigResult<()> {
        self.server()?.bind_addr()?;
        self.serial()?.validate()?;
        Ok(())
    }
}

/// HTTP gateway configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to
    pub host: String,
    /// Port number for the HTTP server (0..=65535, required)
    pub port: Option<i64>,
    /// Directory holding the browser client build
    pub content_root: Option<PathBuf>,
    /// Directory holding `error400.html`, `error401.html`, `error404.html`
    pub views_dir: Option<PathBuf>,
    /// Where clients re-authenticate after a 401
    pub auth_server_uri: Option<String>,
    /// Forward accepted commands to the device
    pub forward_commands: bool,
    /// Appended to every forwarded command
    pub command_terminator: String,
    /// Upper bound for buffered request bodies
    pub max_body_bytes: usize,
}

pub const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024;

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: None,
            content_root: None,
            views_dir: None,
            auth_server_uri: None,
            forward_commands: true,
            command_terminator: "\n".to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl ServerConfig {
    /// Config for the given port with every other field defaulted.
    pub fn with_port(port: u16) -> Self {
        Self {
            port: Some(i64::from(port)),
            ..Self::default()
        }
    }

    /// The configured port, if present and in range.
    pub fn validated_port(&self) -> ConfigResult<u16> {
        let port = self
            .port
            .ok_or_else(|| ConfigError::MissingRequired("server.port".to_string()))?;
        u16::try_from(port)
            .map_err(|_| ConfigError::validation("server.port", format!("{port} is not in 0..=65535")))
    }

    /// Socket address the gateway binds to.
    pub fn bind_addr(&self) -> ConfigResult<SocketAddr> {
        let port = self.validated_port()?;
        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|_| ConfigError::validation("server.host", format!("'{}' is not an IP address", self.host)))?;
        Ok(SocketAddr::new(ip, port))
    }

    /// The auth server URI, ignoring an empty string.
    pub fn auth_server_uri(&self) -> Option<&str> {
        self.auth_server_uri.as_deref().filter(|uri| !uri.is_empty())
    }
}

/// Serial device configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Skip the device entirely
    pub disabled: bool,
    /// Device path, e.g. `/dev/ttyUSB0` or `COM3`
    pub device: String,
    /// Line settings (required unless disabled)
    pub options: Option<SerialOptions>,
    /// Connectivity probe written right after the first open
    pub handshake: String,
    /// Upper bound for one open
    pub open_timeout_ms: u64,
    /// Upper bound for one write
    pub write_timeout_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            device: String::new(),
            options: None,
            handshake: "Hello\n".to_string(),
            open_timeout_ms: 5000,
            write_timeout_ms: 2000,
        }
    }
}

impl SerialConfig {
    /// Enabled config for `device` with default options.
    pub fn for_device(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            options: Some(SerialOptions::default()),
            ..Self::default()
        }
    }

    /// Disabled config; nothing else is looked at.
    pub fn disabled() -> Self {
        Self {
            disabled: true,
            ..Self::default()
        }
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Device and options are only checked when the interface is enabled.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.disabled {
            return Ok(());
        }
        if self.device.trim().is_empty() {
            return Err(ConfigError::validation("serial.device", "missing/invalid device"));
        }
        if self.options.is_none() {
            return Err(ConfigError::validation("serial.options", "missing/invalid options"));
        }
        Ok(())
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. "info" or "turm_server=debug,info"
    pub level: String,
    /// Output format
    pub format: LogFormat,
    /// Log file path (optional, appended)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file: None,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Pretty format with colors
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}
