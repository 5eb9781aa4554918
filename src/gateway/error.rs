//! Request-boundary error taxonomy.
//!
//! Handlers fail with [`GatewayError`]. Its `IntoResponse` impl only attaches
//! the error to an empty response; the `classify_errors` middleware picks it
//! up and renders it with the request context it captured.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Kind of a classified failure; fixes the status code and label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    BadRequest,
    Authentication,
    NotFound,
    InternalServer,
}

impl ErrorClass {
    pub fn status_code(self) -> StatusCode {
        match self {
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::Authentication => StatusCode::UNAUTHORIZED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::InternalServer => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-visible label.
    pub fn label(self) -> &'static str {
        match self {
            Self::BadRequest => "Bad Request",
            Self::Authentication => "Unauthorized",
            Self::NotFound => "Not Found",
            Self::InternalServer => "Internal Server Error",
        }
    }

    /// Wording of the plain-text body used when no HTML view can be rendered.
    pub fn fallback_text(self) -> &'static str {
        match self {
            Self::BadRequest => "Bad request",
            Self::Authentication => "Unauthorized",
            Self::NotFound => "Not found",
            Self::InternalServer => "Internal Server Error",
        }
    }

    /// Only these are rendered by the classified path; everything else goes
    /// to the generic 500 handler.
    pub fn is_rendered(self) -> bool {
        !matches!(self, Self::InternalServer)
    }
}

/// A failure with a fixed HTTP status.
///
/// `message` and `cause` are logged but never sent to the client.
#[derive(Debug)]
pub struct ClassifiedError {
    class: ErrorClass,
    message: String,
    cause: Option<BoxError>,
}

impl ClassifiedError {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
            cause: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::BadRequest, message)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Authentication, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::NotFound, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::InternalServer, message)
    }

    pub fn with_cause(mut self, cause: impl Into<BoxError>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn class(&self) -> ErrorClass {
        self.class
    }

    pub fn status_code(&self) -> StatusCode {
        self.class.status_code()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) - {}",
            self.class.label(),
            self.class.status_code().as_u16(),
            self.message
        )
    }
}

impl std::error::Error for ClassifiedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|c| c as &(dyn std::error::Error + 'static))
    }
}

/// Anything a handler can fail with.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Classified(#[from] ClassifiedError),

    /// Never rendered with detail; always a bare 500.
    #[error("unclassified: {0}")]
    Unclassified(BoxError),
}

impl GatewayError {
    pub fn unclassified(err: impl Into<BoxError>) -> Self {
        Self::Unclassified(err.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Classified(e) if e.class().is_rendered() => e.status_code(),
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Response extension carrying a handler failure to the middleware.
#[derive(Debug, Clone)]
pub(crate) struct Failure(pub(crate) Arc<GatewayError>);

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let mut response = self.status_code().into_response();
        response.extensions_mut().insert(Failure(Arc::new(self)));
        response
    }
}

impl IntoResponse for ClassifiedError {
    fn into_response(self) -> Response {
        GatewayError::from(self).into_response()
    }
}

/// `err` followed by its sources, joined with ": ".
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut chain = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        chain.push_str(": ");
        chain.push_str(&cause.to_string());
        source = cause.source();
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_and_labels() {
        let cases = [
            (ErrorClass::BadRequest, 400, "Bad Request"),
            (ErrorClass::Authentication, 401, "Unauthorized"),
            (ErrorClass::NotFound, 404, "Not Found"),
            (ErrorClass::InternalServer, 500, "Internal Server Error"),
        ];
        for (class, code, label) in cases {
            assert_eq!(class.status_code().as_u16(), code);
            assert_eq!(class.label(), label);
        }
    }

    #[test]
    fn test_display_and_source() {
        let err = ClassifiedError::bad_request("Test").with_cause(std::io::Error::other("Cause"));
        assert_eq!(err.to_string(), "Bad Request (400) - Test");
        assert_eq!(error_chain(&err), "Bad Request (400) - Test: Cause");
        assert_eq!(err.cause().map(|c| c.to_string()).as_deref(), Some("Cause"));
    }

    #[test]
    fn test_internal_escalates() {
        let err = GatewayError::from(ClassifiedError::internal("boom"));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        let err = GatewayError::unclassified("raw failure");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_into_response_carries_failure() {
        let response = ClassifiedError::not_found("nothing here").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let failure = response.extensions().get::<Failure>().unwrap();
        assert!(matches!(&*failure.0, GatewayError::Classified(e) if e.class() == ErrorClass::NotFound));
    }
}
