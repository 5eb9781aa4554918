//! Core traits for the serial transport.
//!
//! A `SerialTransport` knows how to open a device; the `SerialLink` it returns
//! owns the write side. Bytes arriving from the device and asynchronous
//! transport errors are not returned from calls: the transport pushes them as
//! [`LinkEvent`]s onto the channel handed to `open`, which the session drains.

use super::error::PortError;
use super::options::SerialOptions;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Something the device sent us, or something that went wrong in the background.
#[derive(Debug)]
pub enum LinkEvent {
    Data(Vec<u8>),
    Error(PortError),
}

/// Sending half of the per-link event channel.
pub type LinkEvents = mpsc::UnboundedSender<LinkEvent>;

/// An open connection to the device.
#[async_trait]
pub trait SerialLink: Send + std::fmt::Debug {
    /// Write the whole payload and wait for the driver to accept it.
    async fn write_all(&mut self, data: &[u8]) -> Result<(), PortError>;

    /// Release the device. Further writes fail with [`PortError::Closed`].
    async fn close(&mut self) -> Result<(), PortError>;
}

/// Factory for [`SerialLink`]s.
#[async_trait]
pub trait SerialTransport: Send + Sync + std::fmt::Debug {
    /// Open `device` with the given options.
    ///
    /// The transport keeps `events` for as long as the link lives and drops it
    /// once the link is closed or the open fails.
    async fn open(
        &self,
        device: &str,
        options: &SerialOptions,
        events: LinkEvents,
    ) -> Result<Box<dyn SerialLink>, PortError>;
}
