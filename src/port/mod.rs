//! Transport layer for the serial device.
//!
//! Provides the transport traits, the tokio-serial implementation used in
//! production and a mock used by tests.

pub mod async_port;
pub mod error;
pub mod mock;
pub mod options;
pub mod traits;

pub use async_port::{TokioSerialLink, TokioSerialTransport};
pub use error::PortError;
pub use mock::{MockLink, MockTransport};
pub use options::{DataBits, FlowControl, Parity, SerialOptions, StopBits, DEFAULT_BAUD_RATE};
pub use traits::*;

/// Names of the serial ports currently present, for diagnostics.
pub fn available_port_names() -> Vec<String> {
    serialport::available_ports()
        .map(|ports| ports.into_iter().map(|p| p.port_name).collect())
        .unwrap_or_default()
}
