use super::assets;
use super::error::{ClassifiedError, GatewayError};
use super::{GatewayContext, ServerVersion};
use crate::session::SessionStatus;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

// ---------- DTOs ----------
#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    #[serde(default)]
    pub command: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandResponse {
    pub status: String,
}

impl CommandResponse {
    pub fn ok() -> Self {
        Self {
            status: "OK".to_string(),
        }
    }
}

// ---------- Handlers ----------
pub(crate) async fn version(State(ctx): State<GatewayContext>) -> Json<ServerVersion> {
    Json(ctx.version().clone())
}

pub(crate) async fn status(State(ctx): State<GatewayContext>) -> Json<SessionStatus> {
    Json(ctx.session().status())
}

pub(crate) async fn command(
    State(ctx): State<GatewayContext>,
    body: Bytes,
) -> Result<Json<CommandResponse>, GatewayError> {
    let command = parse_command(&body)?;
    info!(command = %command, "command accepted");

    let settings = ctx.settings();
    let session = ctx.session();
    if settings.forward_commands && !session.is_disabled() {
        let payload = format!("{command}{}", settings.command_terminator);
        session.send(&payload).await.map_err(|e| {
            ClassifiedError::internal(format!("request PUT /cmd fails, command '{command}' not sent"))
                .with_cause(e)
        })?;
    } else {
        debug!(command = %command, "command not forwarded");
    }
    Ok(Json(CommandResponse::ok()))
}

/// Parsed, non-empty `command` of a `PUT /cmd` body.
pub fn parse_command(body: &[u8]) -> Result<String, ClassifiedError> {
    const INVALID: &str = "request PUT /cmd fails, invalid/missing body";
    if body.is_empty() {
        return Err(ClassifiedError::bad_request(INVALID));
    }
    let request: CommandRequest = serde_json::from_slice(body)
        .map_err(|e| ClassifiedError::bad_request(INVALID).with_cause(e))?;
    match request.command {
        Some(command) if !command.trim().is_empty() => Ok(command),
        _ => Err(ClassifiedError::bad_request(INVALID)),
    }
}

/// Always fails; exercises the error path end to end.
pub(crate) async fn test() -> Result<StatusCode, GatewayError> {
    Err(ClassifiedError::bad_request("Test")
        .with_cause(std::io::Error::other("Cause"))
        .into())
}

pub(crate) async fn fallback(
    State(ctx): State<GatewayContext>,
    method: Method,
    uri: Uri,
) -> Result<Response, GatewayError> {
    if method == Method::GET {
        if let Some(root) = &ctx.settings().content_root {
            if let Some(asset) = assets::locate(root, uri.path()).await {
                return Ok(asset.into_response());
            }
        }
    }
    Err(ClassifiedError::not_found(format!("request {} {} not handled", method, uri.path())).into())
}
