//! Mock transport for testing.
//!
//! `MockTransport` stands in for the hardware without a device attached. It
//! can be told to fail opens, to hold an open or a close pending until
//! released, to fail writes or closes, and it can push incoming data or transport errors onto the
//! most recently opened link.

use super::error::PortError;
use super::options::SerialOptions;
use super::traits::{LinkEvent, LinkEvents, SerialLink, SerialTransport};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct MockState {
    fail_open: bool,
    hold_open: bool,
    hold_close: bool,
    fail_write: bool,
    fail_close: bool,
    write_log: Vec<Vec<u8>>,
    open_calls: usize,
    close_calls: usize,
    last_options: Option<SerialOptions>,
    events: Option<LinkEvents>,
}

/// Scriptable in-memory transport.
///
/// Clones share state, so a test can keep one handle while the session owns
/// another.
///
/// # Example
/// ```
/// use turm_server::port::MockTransport;
///
/// let transport = MockTransport::new();
/// transport.set_fail_open(true);
/// assert_eq!(transport.open_calls(), 0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    gate: Arc<Notify>,
    close_gate: Arc<Notify>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following open fail as if the device were missing.
    pub fn set_fail_open(&self, fail: bool) {
        self.state.lock().fail_open = fail;
    }

    /// Keep opens pending until [`release_open`](Self::release_open) is called.
    pub fn set_hold_open(&self, hold: bool) {
        self.state.lock().hold_open = hold;
    }

    /// Let one held open complete.
    pub fn release_open(&self) {
        self.gate.notify_one();
    }

    /// Keep link closes pending until [`release_close`](Self::release_close)
    /// is called.
    pub fn set_hold_close(&self, hold: bool) {
        self.state.lock().hold_close = hold;
    }

    pub fn release_close(&self) {
        self.close_gate.notify_one();
    }

    /// Make every following write fail with a broken pipe.
    pub fn set_fail_write(&self, fail: bool) {
        self.state.lock().fail_write = fail;
    }

    /// Make every following close report an error.
    pub fn set_fail_close(&self, fail: bool) {
        self.state.lock().fail_close = fail;
    }

    /// Every payload written so far, across all links.
    pub fn write_log(&self) -> Vec<Vec<u8>> {
        self.state.lock().write_log.clone()
    }

    /// Written payloads decoded as UTF-8.
    pub fn written_text(&self) -> Vec<String> {
        self.write_log()
            .iter()
            .map(|w| String::from_utf8_lossy(w).into_owned())
            .collect()
    }

    pub fn open_calls(&self) -> usize {
        self.state.lock().open_calls
    }

    pub fn close_calls(&self) -> usize {
        self.state.lock().close_calls
    }

    /// Options passed to the most recent open.
    pub fn last_options(&self) -> Option<SerialOptions> {
        self.state.lock().last_options.clone()
    }

    /// Deliver bytes as if the device had sent them. Returns `false` when no
    /// link is listening.
    pub fn inject_data(&self, data: &[u8]) -> bool {
        self.push(LinkEvent::Data(data.to_vec()))
    }

    /// Deliver an asynchronous transport error.
    pub fn inject_error(&self, message: &str) -> bool {
        self.push(LinkEvent::Error(PortError::Io(std::io::Error::other(
            message.to_string(),
        ))))
    }

    fn push(&self, event: LinkEvent) -> bool {
        match &self.state.lock().events {
            Some(events) => events.send(event).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl SerialTransport for MockTransport {
    async fn open(
        &self,
        device: &str,
        options: &SerialOptions,
        events: LinkEvents,
    ) -> Result<Box<dyn SerialLink>, PortError> {
        let hold = {
            let mut state = self.state.lock();
            state.open_calls += 1;
            state.last_options = Some(options.clone());
            if state.fail_open {
                return Err(PortError::not_found(device));
            }
            state.hold_open
        };

        if hold {
            self.gate.notified().await;
        }

        self.state.lock().events = Some(events);
        Ok(Box::new(MockLink {
            name: device.to_string(),
            open: true,
            state: Arc::clone(&self.state),
            close_gate: Arc::clone(&self.close_gate),
        }))
    }
}

/// Link handed out by [`MockTransport`].
pub struct MockLink {
    name: String,
    open: bool,
    state: Arc<Mutex<MockState>>,
    close_gate: Arc<Notify>,
}

#[async_trait]
impl SerialLink for MockLink {
    async fn write_all(&mut self, data: &[u8]) -> Result<(), PortError> {
        if !self.open {
            return Err(PortError::Closed);
        }
        let mut state = self.state.lock();
        if state.fail_write {
            return Err(PortError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "mock write failure",
            )));
        }
        state.write_log.push(data.to_vec());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), PortError> {
        if !self.open {
            return Err(PortError::Closed);
        }
        self.open = false;
        let hold = self.state.lock().hold_close;
        if hold {
            self.close_gate.notified().await;
        }

        let mut state = self.state.lock();
        state.close_calls += 1;
        state.events = None;
        if state.fail_close {
            return Err(PortError::Io(std::io::Error::other("mock close failure")));
        }
        Ok(())
    }
}

impl std::fmt::Debug for MockLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockLink")
            .field("name", &self.name)
            .field("open", &self.open)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_open_write_close() {
        let transport = MockTransport::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut link = transport
            .open("MOCK0", &SerialOptions::default(), tx)
            .await
            .unwrap();

        link.write_all(b"Hello\n").await.unwrap();
        link.close().await.unwrap();

        assert_eq!(transport.written_text(), vec!["Hello\n".to_string()]);
        assert_eq!(transport.open_calls(), 1);
        assert_eq!(transport.close_calls(), 1);
        assert!(matches!(
            link.write_all(b"late").await,
            Err(PortError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_fail_open() {
        let transport = MockTransport::new();
        transport.set_fail_open(true);
        let (tx, _rx) = mpsc::unbounded_channel();

        let result = transport.open("MOCK0", &SerialOptions::default(), tx).await;
        assert!(matches!(result, Err(PortError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_inject_reaches_channel() {
        let transport = MockTransport::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _link = transport
            .open("MOCK0", &SerialOptions::default(), tx)
            .await
            .unwrap();

        assert!(transport.inject_data(b"ACK\r\n"));
        match rx.recv().await {
            Some(LinkEvent::Data(bytes)) => assert_eq!(bytes, b"ACK\r\n"),
            other => panic!("expected data event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_held_close_waits_for_release() {
        let transport = MockTransport::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut link = transport
            .open("MOCK0", &SerialOptions::default(), tx)
            .await
            .unwrap();
        transport.set_hold_close(true);

        let closing = tokio::spawn(async move { link.close().await });
        tokio::task::yield_now().await;
        assert_eq!(transport.close_calls(), 0);

        transport.release_close();
        closing.await.unwrap().unwrap();
        assert_eq!(transport.close_calls(), 1);
    }

    #[tokio::test]
    async fn test_inject_without_link() {
        let transport = MockTransport::new();
        assert!(!transport.inject_data(b"nobody listens"));
    }
}
