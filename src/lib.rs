//! Turm Server Library
//!
//! Serial device control exposed over HTTP: one device session per process,
//! and a command gateway that maps HTTP requests onto it.
//!
//! # Modules
//!
//! - `config`: Configuration management with TOML/JSON support
//! - `port`: Transport layer for the serial link (hardware and mock)
//! - `instance`: Once-per-process construction slot
//! - `session`: Device session owning the serial link
//! - `gateway`: HTTP router, error rendering and server lifecycle
//! - `logging`: Tracing subscriber setup

pub mod config;
pub mod gateway;
pub mod instance;
pub mod logging;
pub mod port;
pub mod session;

// Re-export commonly used types for convenience
pub use config::{Config, ConfigError, ConfigLoader, ConfigResult};
pub use gateway::{
    build_router, ClassifiedError, CommandGateway, ErrorClass, GatewayContext, GatewayError,
    GatewaySettings, ServerError, ServerVersion,
};
pub use port::{
    MockTransport, PortError, SerialLink, SerialOptions, SerialTransport, TokioSerialTransport,
};
pub use session::{DeviceSession, LinkStatus, SessionError, SessionStatus};
