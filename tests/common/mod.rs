//! Shared test utilities for the turm server tests.
//!
//! - Sessions backed by [`MockTransport`]
//! - Router construction and in-process request helpers
//! - JSON body helpers

#![allow(dead_code)]

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use turm_server::config::SerialConfig;
use turm_server::gateway::{build_router, GatewayContext, GatewaySettings, ServerVersion};
use turm_server::port::MockTransport;
use turm_server::session::{DeviceSession, LinkStatus};

pub const MOCK_DEVICE: &str = "MOCK0";

/// A session on [`MOCK_DEVICE`] that has been opened and sent its handshake.
pub async fn open_session(transport: &MockTransport) -> Arc<DeviceSession> {
    let session = DeviceSession::connect(
        &SerialConfig::for_device(MOCK_DEVICE),
        Arc::new(transport.clone()),
    )
    .await
    .expect("mock session should open");
    Arc::new(session)
}

/// A closed session that has not touched the transport.
pub fn closed_session(transport: &MockTransport) -> Arc<DeviceSession> {
    Arc::new(
        DeviceSession::new(
            &SerialConfig::for_device(MOCK_DEVICE),
            Arc::new(transport.clone()),
        )
        .expect("valid mock config"),
    )
}

pub fn disabled_session() -> Arc<DeviceSession> {
    Arc::new(
        DeviceSession::new(&SerialConfig::disabled(), Arc::new(MockTransport::new()))
            .expect("disabled config is always valid"),
    )
}

/// Poll until the session reports `state`; panics after one second.
pub async fn wait_for_state(session: &DeviceSession, state: LinkStatus) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while session.status().state != state {
        assert!(
            tokio::time::Instant::now() < deadline,
            "session never reached {:?}, still {:?}",
            state,
            session.status().state
        );
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

pub fn router(session: Arc<DeviceSession>, settings: GatewaySettings) -> Router {
    build_router(GatewayContext::new(
        ServerVersion::current(),
        session,
        settings,
    ))
}

/// Builder for in-process requests.
pub struct TestRequest {
    method: Method,
    uri: String,
    accept: Option<&'static str>,
    body: Body,
}

impl TestRequest {
    pub fn get(uri: &str) -> Self {
        Self::new(Method::GET, uri)
    }

    pub fn put(uri: &str) -> Self {
        Self::new(Method::PUT, uri)
    }

    pub fn new(method: Method, uri: &str) -> Self {
        Self {
            method,
            uri: uri.to_string(),
            accept: None,
            body: Body::empty(),
        }
    }

    pub fn json(mut self) -> Self {
        self.accept = Some("application/json");
        self
    }

    pub fn html(mut self) -> Self {
        self.accept = Some("text/html,application/xhtml+xml");
        self
    }

    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    pub fn build(self) -> Request<Body> {
        let mut builder = Request::builder()
            .method(self.method)
            .uri(self.uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(accept) = self.accept {
            builder = builder.header(header::ACCEPT, accept);
        }
        builder.body(self.body).expect("valid test request")
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or_else(|e| {
            panic!(
                "body is not JSON ({e}): {}",
                String::from_utf8_lossy(&self.body)
            )
        })
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn content_type(&self) -> &str {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
    }
}

pub async fn call(router: &Router, request: TestRequest) -> TestResponse {
    let response = router
        .clone()
        .oneshot(request.build())
        .await
        .expect("router is infallible");
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body readable");
    TestResponse {
        status,
        headers,
        body,
    }
}

/// Assert the `{error, ts}` shape and return the timestamp.
pub fn assert_error_body(body: &Value, label: &str) -> String {
    assert_eq!(body["error"], label, "body: {body}");
    let ts = body["ts"].as_str().expect("ts is a string").to_string();
    assert!(
        chrono::DateTime::parse_from_rfc3339(&ts).is_ok(),
        "ts is not ISO-8601: {ts}"
    );
    assert_eq!(body.as_object().map(|o| o.len()), Some(2), "body: {body}");
    ts
}
