//! Device session: owns the one serial link of this process.
//!
//! The link moves through `Closed -> Opening -> Open -> Closing -> Closed`.
//! While `Opening`, the state holds the cancellation handle of the pending
//! open, so a second open or a send cannot be issued, and `close` can reject
//! the pending open. `Closing` lasts until the hardware close returns, so the
//! device is never reopened while the driver still holds it. A disabled
//! session never leaves `Disabled`.
//!
//! Sends are serialized through an async mutex around the link, so two
//! payloads never interleave on the wire.

use crate::config::{ConfigError, SerialConfig};
use crate::instance::InstanceSlot;
use crate::port::{
    available_port_names, LinkEvent, PortError, SerialLink, SerialOptions, SerialTransport,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

static SESSION: InstanceSlot<DeviceSession> = InstanceSlot::new();

/// Errors raised by [`DeviceSession`].
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("serial session already created")]
    AlreadyInitialized,

    #[error("no serial session created yet")]
    NotInitialized,

    #[error("invalid serial configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("serial interface is disabled")]
    Disabled,

    #[error("open already pending on {device}, execute close() first")]
    AlreadyOpening { device: String },

    #[error("serial port {device} is already open")]
    AlreadyOpen { device: String },

    #[error("cannot open serial port {device}")]
    OpenFailed {
        device: String,
        #[source]
        source: PortError,
    },

    #[error("serial port {device} closed while opening pending")]
    ClosedWhileOpening { device: String },

    #[error("serial port {device} not open")]
    NotOpen { device: String },

    #[error("serial port {device} is still closing")]
    Closing { device: String },

    #[error("cannot write to serial port {device}")]
    WriteFailed {
        device: String,
        #[source]
        source: PortError,
    },
}

type SharedLink = Arc<tokio::sync::Mutex<Box<dyn SerialLink>>>;

enum LinkState {
    Disabled,
    Closed,
    Opening {
        attempt: u64,
        cancel: oneshot::Sender<()>,
    },
    Open {
        link: SharedLink,
    },
    Closing,
}

impl LinkState {
    fn status(&self) -> LinkStatus {
        match self {
            Self::Disabled => LinkStatus::Disabled,
            Self::Closed => LinkStatus::Closed,
            Self::Opening { .. } => LinkStatus::Opening,
            Self::Open { .. } => LinkStatus::Open,
            Self::Closing => LinkStatus::Closing,
        }
    }
}

/// Externally visible link state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    Disabled,
    Closed,
    Opening,
    Open,
    Closing,
}

/// Snapshot returned by [`DeviceSession::status`].
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub device: String,
    pub state: LinkStatus,
    pub bytes_written: u64,
    pub bytes_received: u64,
}

#[derive(Debug, Default)]
struct Counters {
    bytes_written: AtomicU64,
    bytes_received: AtomicU64,
}

/// Owner of the serial connection.
pub struct DeviceSession {
    device: String,
    options: SerialOptions,
    handshake: String,
    open_timeout: Duration,
    write_timeout: Duration,
    transport: Arc<dyn SerialTransport>,
    state: Mutex<LinkState>,
    attempts: AtomicU64,
    counters: Arc<Counters>,
}

impl DeviceSession {
    /// Create the process-wide session: validate, open, write the handshake.
    ///
    /// Fails with [`SessionError::AlreadyInitialized`] once a session exists.
    /// If open or handshake fails nothing is retained, and
    /// [`get_instance`](Self::get_instance) keeps failing.
    pub async fn create_instance(
        config: &SerialConfig,
        transport: Arc<dyn SerialTransport>,
    ) -> Result<Arc<Self>, SessionError> {
        SESSION
            .try_init(
                || SessionError::AlreadyInitialized,
                || Self::connect(config, transport),
            )
            .await
    }

    pub fn get_instance() -> Result<Arc<Self>, SessionError> {
        SESSION.get().ok_or(SessionError::NotInitialized)
    }

    /// Build a session without registering it as the process instance.
    ///
    /// An enabled session is opened and probed before it is returned; a
    /// disabled one is returned without touching the hardware.
    pub async fn connect(
        config: &SerialConfig,
        transport: Arc<dyn SerialTransport>,
    ) -> Result<Self, SessionError> {
        let session = Self::new(config, transport)?;
        if session.is_disabled() {
            warn!("serial interface disabled");
            return Ok(session);
        }

        session.open().await?;
        if let Err(e) = session.send(&session.handshake).await {
            // Release the device; the caller never sees this session.
            let _ = session.close().await;
            return Err(e);
        }
        info!(device = %session.device, "serial session init done");
        Ok(session)
    }

    /// Validate `config` and build a closed session. No I/O happens here.
    pub fn new(
        config: &SerialConfig,
        transport: Arc<dyn SerialTransport>,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        let state = if config.disabled {
            LinkState::Disabled
        } else {
            LinkState::Closed
        };

        Ok(Self {
            device: config.device.clone(),
            options: config.options.clone().unwrap_or_default(),
            handshake: config.handshake.clone(),
            open_timeout: config.open_timeout(),
            write_timeout: config.write_timeout(),
            transport,
            state: Mutex::new(state),
            attempts: AtomicU64::new(0),
            counters: Arc::new(Counters::default()),
        })
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn is_disabled(&self) -> bool {
        matches!(*self.state.lock(), LinkState::Disabled)
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            device: self.device.clone(),
            state: self.state.lock().status(),
            bytes_written: self.counters.bytes_written.load(Ordering::Relaxed),
            bytes_received: self.counters.bytes_received.load(Ordering::Relaxed),
        }
    }

    /// Open the device.
    ///
    /// Fails at once with `AlreadyOpening` while another open is pending and
    /// with `Closing` until a running close has released the device. A
    /// `close` issued meanwhile makes this fail with `ClosedWhileOpening`.
    pub async fn open(&self) -> Result<(), SessionError> {
        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        let (cancel_tx, cancel_rx) = oneshot::channel();
        {
            let mut state = self.state.lock();
            match &*state {
                LinkState::Disabled => return Err(SessionError::Disabled),
                LinkState::Opening { .. } => {
                    debug!(device = %self.device, "open rejected, another open is pending");
                    return Err(SessionError::AlreadyOpening {
                        device: self.device.clone(),
                    });
                }
                LinkState::Open { .. } => {
                    return Err(SessionError::AlreadyOpen {
                        device: self.device.clone(),
                    })
                }
                LinkState::Closing => {
                    debug!(device = %self.device, "open rejected, close still running");
                    return Err(SessionError::Closing {
                        device: self.device.clone(),
                    });
                }
                LinkState::Closed => {}
            }
            *state = LinkState::Opening {
                attempt,
                cancel: cancel_tx,
            };
        }

        // The event channel exists before the hardware call so nothing the
        // device sends right after opening is lost.
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        tokio::spawn(monitor_link(
            self.device.clone(),
            Arc::clone(&self.counters),
            events_rx,
        ));

        let opening = tokio::time::timeout(
            self.open_timeout,
            self.transport.open(&self.device, &self.options, events_tx),
        );
        let outcome = tokio::select! {
            result = opening => Some(result.unwrap_or_else(|_| Err(PortError::timeout(self.open_timeout)))),
            _ = cancel_rx => None,
        };

        let result = {
            let mut state = self.state.lock();
            let pending = matches!(&*state, LinkState::Opening { attempt: a, .. } if *a == attempt);
            match outcome {
                Some(Ok(link)) if pending => {
                    *state = LinkState::Open {
                        link: Arc::new(tokio::sync::Mutex::new(link)),
                    };
                    Ok(())
                }
                Some(Ok(link)) => Err(Some(link)),
                Some(Err(source)) if pending => {
                    *state = LinkState::Closed;
                    drop(state);
                    return Err(self.open_failed(source));
                }
                Some(Err(_)) | None => Err(None),
            }
        };

        match result {
            Ok(()) => {
                info!(device = %self.device, options = ?self.options, "serial port opened");
                Ok(())
            }
            Err(late_link) => {
                // Closed while the hardware call was in flight.
                if let Some(mut link) = late_link {
                    if let Err(e) = link.close().await {
                        debug!(device = %self.device, error = %e, "releasing late link failed");
                    }
                }
                warn!(device = %self.device, "serial port closed while opening pending");
                Err(SessionError::ClosedWhileOpening {
                    device: self.device.clone(),
                })
            }
        }
    }

    fn open_failed(&self, source: PortError) -> SessionError {
        if matches!(source, PortError::NotFound(_)) {
            warn!(
                device = %self.device,
                available = ?available_port_names(),
                "cannot open serial port: {}", source
            );
        } else {
            warn!(device = %self.device, "cannot open serial port: {}", source);
        }
        SessionError::OpenFailed {
            device: self.device.clone(),
            source,
        }
    }

    /// Close the device.
    ///
    /// A pending open is rejected with `ClosedWhileOpening`. An open link
    /// stays `Closing` until the hardware close returns. Failures of the
    /// hardware close are logged only; afterwards the session is closed.
    pub async fn close(&self) -> Result<(), SessionError> {
        let previous = {
            let mut state = self.state.lock();
            let next = match &*state {
                LinkState::Disabled | LinkState::Closed | LinkState::Closing => {
                    return Err(SessionError::NotOpen {
                        device: self.device.clone(),
                    });
                }
                LinkState::Opening { .. } => LinkState::Closed,
                LinkState::Open { .. } => LinkState::Closing,
            };
            std::mem::replace(&mut *state, next)
        };

        match previous {
            LinkState::Opening { cancel, .. } => {
                let _ = cancel.send(());
                info!(device = %self.device, "pending open cancelled by close");
            }
            LinkState::Open { link } => {
                // Waits for an in-flight send to finish.
                let mut link = link.lock().await;
                match link.close().await {
                    Ok(()) => info!(device = %self.device, "serial port closed"),
                    Err(e) => warn!(device = %self.device, error = %e, "cannot close serial port"),
                }
                drop(link);
                *self.state.lock() = LinkState::Closed;
            }
            LinkState::Disabled | LinkState::Closed | LinkState::Closing => {}
        }
        Ok(())
    }

    /// Write `payload` to the device and wait for the driver to accept it.
    pub async fn send(&self, payload: &str) -> Result<(), SessionError> {
        trace!(device = %self.device, payload, "send data");
        let link = self.open_link()?;
        let mut guard = link.lock().await;

        // A close may have slipped in while we waited for the writer.
        if !self.is_current(&link) {
            return Err(self.not_open());
        }

        match tokio::time::timeout(self.write_timeout, guard.write_all(payload.as_bytes())).await {
            Ok(Ok(())) => {
                self.counters
                    .bytes_written
                    .fetch_add(payload.len() as u64, Ordering::Relaxed);
                trace!(device = %self.device, "data sent successfully");
                Ok(())
            }
            Ok(Err(source)) => Err(self.write_failed(source)),
            Err(_) => Err(self.write_failed(PortError::timeout(self.write_timeout))),
        }
    }

    fn open_link(&self) -> Result<SharedLink, SessionError> {
        match &*self.state.lock() {
            LinkState::Open { link } => Ok(Arc::clone(link)),
            _ => Err(self.not_open()),
        }
    }

    fn is_current(&self, link: &SharedLink) -> bool {
        matches!(&*self.state.lock(), LinkState::Open { link: current } if Arc::ptr_eq(current, link))
    }

    fn not_open(&self) -> SessionError {
        debug!(device = %self.device, "send rejected, serial port not open");
        SessionError::NotOpen {
            device: self.device.clone(),
        }
    }

    fn write_failed(&self, source: PortError) -> SessionError {
        warn!(device = %self.device, error = %source, "write to serial port failed");
        SessionError::WriteFailed {
            device: self.device.clone(),
            source,
        }
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("device", &self.device)
            .field("state", &self.state.lock().status())
            .finish()
    }
}

/// Drain one link's events until the transport drops its sender.
///
/// Transport errors are reported but leave the session open; only `close`
/// changes the state.
async fn monitor_link(
    device: String,
    counters: Arc<Counters>,
    mut events: mpsc::UnboundedReceiver<LinkEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            LinkEvent::Data(bytes) => {
                counters
                    .bytes_received
                    .fetch_add(bytes.len() as u64, Ordering::Relaxed);
                debug!(
                    device = %device,
                    len = bytes.len(),
                    data = %String::from_utf8_lossy(&bytes),
                    "serial input"
                );
            }
            LinkEvent::Error(e) => warn!(device = %device, error = %e, "serial port error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::MockTransport;

    fn session_with(transport: &MockTransport) -> DeviceSession {
        DeviceSession::new(
            &SerialConfig::for_device("MOCK0"),
            Arc::new(transport.clone()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_new_does_not_touch_hardware() {
        let transport = MockTransport::new();
        let session = session_with(&transport);
        assert_eq!(session.status().state, LinkStatus::Closed);
        assert_eq!(transport.open_calls(), 0);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let result = DeviceSession::new(
            &SerialConfig::for_device(""),
            Arc::new(MockTransport::new()),
        );
        assert!(matches!(result, Err(SessionError::Config(_))));
    }

    #[tokio::test]
    async fn test_open_twice_reports_already_open() {
        let transport = MockTransport::new();
        let session = session_with(&transport);
        session.open().await.unwrap();
        assert!(matches!(
            session.open().await,
            Err(SessionError::AlreadyOpen { .. })
        ));
        assert_eq!(transport.open_calls(), 1);
    }

    #[tokio::test]
    async fn test_open_timeout() {
        let transport = MockTransport::new();
        transport.set_hold_open(true);
        let mut config = SerialConfig::for_device("MOCK0");
        config.open_timeout_ms = 20;
        let session = DeviceSession::new(&config, Arc::new(transport)).unwrap();

        match session.open().await {
            Err(SessionError::OpenFailed {
                source: PortError::Timeout(_),
                ..
            }) => {}
            other => panic!("expected open timeout, got {:?}", other),
        }
        assert_eq!(session.status().state, LinkStatus::Closed);
    }

    #[tokio::test]
    async fn test_counters_track_traffic() {
        let transport = MockTransport::new();
        let session = session_with(&transport);
        session.open().await.unwrap();
        session.send("COL 1 2 3\n").await.unwrap();

        assert!(transport.inject_data(b"OK\n"));
        for _ in 0..100 {
            if session.status().bytes_received == 3 {
                break;
            }
            tokio::task::yield_now().await;
        }

        let status = session.status();
        assert_eq!(status.bytes_written, 10);
        assert_eq!(status.bytes_received, 3);
    }

    #[test]
    fn test_error_messages_name_the_device() {
        let err = SessionError::NotOpen {
            device: "/dev/ttyUSB0".into(),
        };
        assert_eq!(err.to_string(), "serial port /dev/ttyUSB0 not open");

        let err = SessionError::AlreadyOpening {
            device: "COM3".into(),
        };
        assert!(err.to_string().contains("COM3"));
    }
}
