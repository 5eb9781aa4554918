//! Hardware transport built on tokio-serial.
//!
//! The stream is split on open: the write half stays in the returned link and
//! the read half moves into a background task that forwards everything it
//! reads as [`LinkEvent`]s.

use super::error::PortError;
use super::options::SerialOptions;
use super::traits::{LinkEvent, LinkEvents, SerialLink, SerialTransport};
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;
use tokio_serial::SerialStream;
use tracing::debug;

const READ_BUFFER_SIZE: usize = 1024;

/// Opens real serial devices.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSerialTransport;

impl TokioSerialTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SerialTransport for TokioSerialTransport {
    async fn open(
        &self,
        device: &str,
        options: &SerialOptions,
        events: LinkEvents,
    ) -> Result<Box<dyn SerialLink>, PortError> {
        let builder = tokio_serial::new(device, options.baud_rate)
            .data_bits(options.data_bits.into())
            .flow_control(options.flow_control.into())
            .parity(options.parity.into())
            .stop_bits(options.stop_bits.into());

        // The driver open blocks; off the runtime threads it can be timed out.
        let stream = tokio::task::spawn_blocking(move || SerialStream::open(&builder))
            .await
            .map_err(|e| PortError::Io(std::io::Error::other(e)))?
            .map_err(|e| PortError::from_open(device, e))?;
        let (reader, writer) = tokio::io::split(stream);
        let reader_task = tokio::spawn(forward_reads(device.to_string(), reader, events));

        Ok(Box::new(TokioSerialLink {
            name: device.to_string(),
            writer: Some(writer),
            reader_task,
        }))
    }
}

async fn forward_reads(name: String, mut reader: ReadHalf<SerialStream>, events: LinkEvents) {
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    loop {
        match reader.read(&mut buffer).await {
            Ok(0) => break,
            Ok(n) => {
                if events.send(LinkEvent::Data(buffer[..n].to_vec())).is_err() {
                    break;
                }
            }
            Err(e) => {
                let _ = events.send(LinkEvent::Error(PortError::Io(e)));
                break;
            }
        }
    }
    debug!(device = %name, "serial reader finished");
}

/// Link over a tokio-serial stream.
pub struct TokioSerialLink {
    name: String,
    writer: Option<WriteHalf<SerialStream>>,
    reader_task: JoinHandle<()>,
}

#[async_trait]
impl SerialLink for TokioSerialLink {
    async fn write_all(&mut self, data: &[u8]) -> Result<(), PortError> {
        let writer = self.writer.as_mut().ok_or(PortError::Closed)?;
        writer.write_all(data).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), PortError> {
        self.reader_task.abort();
        let mut writer = self.writer.take().ok_or(PortError::Closed)?;
        writer.shutdown().await?;
        Ok(())
    }
}

impl Drop for TokioSerialLink {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

impl std::fmt::Debug for TokioSerialLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioSerialLink")
            .field("name", &self.name)
            .field("open", &self.writer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_missing_device_fails_open() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = TokioSerialTransport::new()
            .open(
                "/dev/nonexistent_turm_port_12345",
                &SerialOptions::default(),
                tx,
            )
            .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_open_leaves_runtime_free() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport = TokioSerialTransport::new();
        let options = SerialOptions::default();
        let open = transport.open(
            "/dev/nonexistent_turm_port_12345",
            &options,
            tx,
        );
        let ticker = async {
            for _ in 0..3 {
                tokio::task::yield_now().await;
            }
        };

        // Both complete on a single-threaded runtime only if the open yields.
        let (result, ()) = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(open, ticker)
        })
        .await
        .unwrap();
        assert!(result.is_err());
    }
}
