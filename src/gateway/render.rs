//! Turns handler failures into responses.
//!
//! Classified errors (400, 401, 404) are logged with a timestamp and the
//! redacted request body, then rendered as JSON or HTML depending on the
//! `Accept` header. Anything else becomes a bare 500 carrying only the
//! timestamp.

use super::error::{error_chain, ClassifiedError, Failure, GatewayError};
use super::{GatewayContext, GatewaySettings};
use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};
use std::net::SocketAddr;
use tracing::{debug, info, warn};

/// What the renderer needs to know about the request that failed.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub method: Method,
    pub path: String,
    pub accept: Option<String>,
    pub body: Bytes,
}

impl RequestMeta {
    pub fn accepts_json(&self) -> bool {
        self.accept
            .as_deref()
            .is_some_and(|accept| accept.contains("application/json"))
    }
}

/// ISO-8601 UTC timestamp with millisecond precision.
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Middleware: buffer the body, run the handler, render any failure it left
/// in the response extensions.
pub(crate) async fn classify_errors(
    State(ctx): State<GatewayContext>,
    request: Request,
    next: Next,
) -> Response {
    let (parts, body) = request.into_parts();
    let mut meta = RequestMeta {
        method: parts.method.clone(),
        path: parts.uri.path().to_string(),
        accept: parts
            .headers
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body: Bytes::new(),
    };

    let remote = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string());
    debug!(
        method = %meta.method,
        uri = %parts.uri,
        remote = remote.as_deref().unwrap_or("-"),
        "request"
    );

    meta.body = match axum::body::to_bytes(body, ctx.settings().max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            let err = ClassifiedError::bad_request(format!(
                "request {} {} fails, body not readable",
                meta.method, meta.path
            ))
            .with_cause(e);
            return render_failure(ctx.settings(), &meta, &err.into()).await;
        }
    };

    let request = Request::from_parts(parts, Body::from(meta.body.clone()));
    let mut response = next.run(request).await;
    match response.extensions_mut().remove::<Failure>() {
        Some(Failure(err)) => render_failure(ctx.settings(), &meta, &err).await,
        None => response,
    }
}

pub async fn render_failure(
    settings: &GatewaySettings,
    meta: &RequestMeta,
    err: &GatewayError,
) -> Response {
    match err {
        GatewayError::Classified(e) if e.class().is_rendered() => {
            render_classified(settings, meta, e).await
        }
        other => render_unclassified(meta, other),
    }
}

pub async fn render_classified(
    settings: &GatewaySettings,
    meta: &RequestMeta,
    err: &ClassifiedError,
) -> Response {
    let ts = timestamp();
    let class = err.class();
    let status = class.status_code();
    let cause = err.cause().map(|c| error_chain(c));
    info!(
        ts = %ts,
        method = %meta.method,
        path = %meta.path,
        body = %redact_body(&meta.path, &meta.body),
        cause = cause.as_deref().unwrap_or("-"),
        "{}",
        err
    );

    let mut response = if meta.accepts_json() {
        (status, Json(json!({ "error": class.label(), "ts": ts }))).into_response()
    } else {
        match render_view(settings, err, &ts).await {
            Ok(page) => (status, Html(page)).into_response(),
            Err(e) => {
                debug!(code = status.as_u16(), error = %e, "error view not available");
                (status, format!("{} ({})", class.fallback_text(), ts)).into_response()
            }
        }
    };

    if status == StatusCode::UNAUTHORIZED {
        if let Some(uri) = settings.auth_server_uri.as_deref().filter(|u| !u.is_empty()) {
            let challenge = format!(
                "Bearer authorization_uri=\"{uri}\", error=\"{}\", error_description=\"contact web-master with {ts}\"",
                class.label()
            );
            match HeaderValue::from_str(&challenge) {
                Ok(value) => {
                    response
                        .headers_mut()
                        .insert(header::WWW_AUTHENTICATE, value);
                }
                Err(e) => warn!(error = %e, "auth server uri not usable in a header"),
            }
        }
    }
    response
}

/// The generic 500 path; never exposes the error itself.
pub fn render_unclassified(meta: &RequestMeta, err: &GatewayError) -> Response {
    let ts = timestamp();
    warn!(
        ts = %ts,
        method = %meta.method,
        path = %meta.path,
        error = %error_chain(err),
        "Internal Server Error"
    );
    let status = StatusCode::INTERNAL_SERVER_ERROR;
    if meta.accepts_json() {
        (status, Json(json!({ "error": "Internal Server Error", "ts": ts }))).into_response()
    } else {
        (status, format!("Internal Server Error ({ts})")).into_response()
    }
}

async fn render_view(
    settings: &GatewaySettings,
    err: &ClassifiedError,
    ts: &str,
) -> std::io::Result<String> {
    let code = err.status_code().as_u16();
    match &settings.views_dir {
        Some(dir) => {
            let template = tokio::fs::read_to_string(dir.join(format!("error{code}.html"))).await?;
            Ok(template.replace("{{time}}", ts))
        }
        None => Ok(builtin_page(err, ts)),
    }
}

fn builtin_page(err: &ClassifiedError, ts: &str) -> String {
    let code = err.status_code().as_u16();
    let label = err.class().label();
    format!(
        "<!DOCTYPE html>\n<html>\n<head><title>{code} {label}</title></head>\n<body>\n\
         <h1>{code} {label}</h1>\n<p>{ts}</p>\n</body>\n</html>\n"
    )
}

/// Body as it may appear in the log.
///
/// On paths ending in `/auth` a `password` field is masked; a body there
/// that is not JSON is not logged at all.
pub fn redact_body(path: &str, body: &[u8]) -> String {
    if body.is_empty() {
        return String::new();
    }
    let sensitive = path.ends_with("/auth");
    match serde_json::from_slice::<Value>(body) {
        Ok(mut value) => {
            if sensitive {
                if let Some(Value::String(password)) = value.get_mut("password") {
                    *password = mask_secret(password);
                }
            }
            value.to_string()
        }
        Err(_) if sensitive => format!("<{} bytes>", body.len()),
        Err(_) => String::from_utf8_lossy(body).into_owned(),
    }
}

/// Keep the first character, mask the rest.
pub fn mask_secret(secret: &str) -> String {
    let mut chars = secret.chars();
    match (chars.next(), chars.clone().next()) {
        (None, _) => String::new(),
        (Some(_), None) => "*".to_string(),
        (Some(first), Some(_)) => std::iter::once(first).chain(chars.map(|_| '*')).collect(),
    }
}
