//! HTTP command gateway.
//!
//! Maps HTTP requests onto the device session and renders failures through
//! the classified error path.
//!
//! | Method | Path | |
//! |---|---|---|
//! | GET | `/version` | [`ServerVersion`] |
//! | GET | `/status` | [`SessionStatus`](crate::session::SessionStatus) |
//! | PUT | `/cmd` | `{"command": "..."}` → `{"status": "OK"}` |
//! | GET | `/test` | always 400 |
//! | GET | anything else | static content, else 404 |
//!
//! Lifecycle: `Created → Initialized → Started → Stopped`.

mod assets;
mod error;
mod render;
mod routes;

pub use assets::{content_type, locate, sanitize, Asset};
pub use error::{error_chain, BoxError, ClassifiedError, ErrorClass, GatewayError};
pub use render::{
    mask_secret, redact_body, render_classified, render_failure, render_unclassified, timestamp,
    RequestMeta,
};
pub use routes::{parse_command, CommandRequest, CommandResponse};

use crate::config::{ConfigError, ServerConfig, DEFAULT_MAX_BODY_BYTES};
use crate::instance::InstanceSlot;
use crate::session::DeviceSession;
use axum::routing::{get, put};
use axum::{middleware, Router};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

static GATEWAY: InstanceSlot<CommandGateway> = InstanceSlot::new();

/// Name reported by `GET /version`.
pub const SERVER_NAME: &str = "htl-turm-server";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerVersion {
    pub version: String,
    pub name: String,
}

impl ServerVersion {
    /// Version of this build.
    pub fn current() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            name: SERVER_NAME.to_string(),
        }
    }
}

/// Gateway lifecycle errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("gateway already created")]
    AlreadyInitialized,

    #[error("no gateway created yet")]
    NotInitialized,

    #[error("invalid server configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("cannot {operation} gateway in state {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("cannot bind {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP server failed")]
    Serve(#[source] std::io::Error),
}

/// Per-request behaviour taken from `[server]`.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub content_root: Option<PathBuf>,
    pub views_dir: Option<PathBuf>,
    pub auth_server_uri: Option<String>,
    pub forward_commands: bool,
    pub command_terminator: String,
    pub max_body_bytes: usize,
}

impl GatewaySettings {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            content_root: config.content_root.clone(),
            views_dir: config.views_dir.clone(),
            auth_server_uri: config.auth_server_uri().map(str::to_string),
            forward_commands: config.forward_commands,
            command_terminator: config.command_terminator.clone(),
            max_body_bytes: config.max_body_bytes,
        }
    }
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            content_root: None,
            views_dir: None,
            auth_server_uri: None,
            forward_commands: true,
            command_terminator: "\n".to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

/// Router state shared by all handlers.
#[derive(Clone)]
pub struct GatewayContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    version: ServerVersion,
    session: Arc<DeviceSession>,
    settings: GatewaySettings,
}

impl GatewayContext {
    pub fn new(version: ServerVersion, session: Arc<DeviceSession>, settings: GatewaySettings) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                version,
                session,
                settings,
            }),
        }
    }

    pub fn version(&self) -> &ServerVersion {
        &self.inner.version
    }

    pub fn session(&self) -> &Arc<DeviceSession> {
        &self.inner.session
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.inner.settings
    }
}

// ---------- Router Builder ----------
pub fn build_router(ctx: GatewayContext) -> Router {
    Router::new()
        .route("/version", get(routes::version))
        .route("/status", get(routes::status))
        .route("/cmd", put(routes::command))
        .route("/test", get(routes::test))
        // Known path, wrong method: classified 404 like any unknown path.
        .method_not_allowed_fallback(routes::fallback)
        .fallback(routes::fallback)
        .layer(middleware::from_fn_with_state(
            ctx.clone(),
            render::classify_errors,
        ))
        .with_state(ctx)
}

enum Lifecycle {
    Created,
    Initialized {
        addr: SocketAddr,
        settings: GatewaySettings,
    },
    Starting,
    Started {
        local_addr: SocketAddr,
        shutdown: oneshot::Sender<()>,
        task: JoinHandle<std::io::Result<()>>,
    },
    Stopped,
}

impl Lifecycle {
    fn name(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Initialized { .. } => "initialized",
            Self::Starting => "starting",
            Self::Started { .. } => "started",
            Self::Stopped => "stopped",
        }
    }
}

/// The HTTP server in front of the device session.
pub struct CommandGateway {
    version: ServerVersion,
    session: Arc<DeviceSession>,
    lifecycle: Mutex<Lifecycle>,
}

impl CommandGateway {
    /// Create the process-wide gateway.
    pub async fn create_instance(session: Arc<DeviceSession>) -> Result<Arc<Self>, ServerError> {
        GATEWAY
            .try_init(
                || ServerError::AlreadyInitialized,
                || async move { Ok(Self::new(session)) },
            )
            .await
    }

    pub fn get_instance() -> Result<Arc<Self>, ServerError> {
        GATEWAY.get().ok_or(ServerError::NotInitialized)
    }

    pub fn new(session: Arc<DeviceSession>) -> Self {
        Self {
            version: ServerVersion::current(),
            session,
            lifecycle: Mutex::new(Lifecycle::Created),
        }
    }

    pub fn version(&self) -> &ServerVersion {
        &self.version
    }

    /// Validate `config`; nothing is bound yet.
    pub fn init(&self, config: &ServerConfig) -> Result<(), ServerError> {
        let mut lifecycle = self.lifecycle.lock();
        if !matches!(*lifecycle, Lifecycle::Created) {
            return Err(ServerError::InvalidState {
                operation: "init",
                state: lifecycle.name(),
            });
        }
        let addr = config.bind_addr()?;
        *lifecycle = Lifecycle::Initialized {
            addr,
            settings: GatewaySettings::from_config(config),
        };
        info!(addr = %addr, "gateway init done");
        Ok(())
    }

    /// Bind and serve in a background task. Returns the bound address.
    ///
    /// Callable once; a bind failure leaves the gateway stopped.
    pub async fn start(&self) -> Result<SocketAddr, ServerError> {
        let (addr, settings) = {
            let mut lifecycle = self.lifecycle.lock();
            match std::mem::replace(&mut *lifecycle, Lifecycle::Starting) {
                Lifecycle::Initialized { addr, settings } => (addr, settings),
                other => {
                    let state = other.name();
                    *lifecycle = other;
                    return Err(ServerError::InvalidState {
                        operation: "start",
                        state,
                    });
                }
            }
        };

        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(source) => {
                warn!(addr = %addr, error = %source, "cannot start HTTP server");
                *self.lifecycle.lock() = Lifecycle::Stopped;
                return Err(ServerError::Bind { addr, source });
            }
        };
        let local_addr = match listener.local_addr() {
            Ok(local_addr) => local_addr,
            Err(e) => {
                *self.lifecycle.lock() = Lifecycle::Stopped;
                return Err(ServerError::Serve(e));
            }
        };

        let router = build_router(GatewayContext::new(
            self.version.clone(),
            Arc::clone(&self.session),
            settings,
        ));
        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
        });

        *self.lifecycle.lock() = Lifecycle::Started {
            local_addr,
            shutdown,
            task,
        };
        info!(addr = %local_addr, "HTTP server started");
        Ok(local_addr)
    }

    /// Stop accepting connections and wait for in-flight requests.
    pub async fn stop(&self) -> Result<(), ServerError> {
        let (shutdown, task) = {
            let mut lifecycle = self.lifecycle.lock();
            match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
                Lifecycle::Started { shutdown, task, .. } => (shutdown, task),
                other => {
                    let state = other.name();
                    *lifecycle = other;
                    return Err(ServerError::InvalidState {
                        operation: "stop",
                        state,
                    });
                }
            }
        };

        let _ = shutdown.send(());
        match task.await {
            Ok(Ok(())) => {
                info!("HTTP server stopped");
                Ok(())
            }
            Ok(Err(e)) => Err(ServerError::Serve(e)),
            Err(e) => Err(ServerError::Serve(std::io::Error::other(e))),
        }
    }

    /// Bound address while started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &*self.lifecycle.lock() {
            Lifecycle::Started { local_addr, .. } => Some(*local_addr),
            _ => None,
        }
    }

    pub fn state(&self) -> &'static str {
        self.lifecycle.lock().name()
    }
}

impl std::fmt::Debug for CommandGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandGateway")
            .field("version", &self.version)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_version() {
        let version = ServerVersion::current();
        assert_eq!(version.name, "htl-turm-server");
        assert_eq!(version.version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = ServerConfig::with_port(8080);
        config.auth_server_uri = Some(String::new());
        config.forward_commands = false;
        let settings = GatewaySettings::from_config(&config);
        assert_eq!(settings.auth_server_uri, None);
        assert!(!settings.forward_commands);
        assert_eq!(settings.max_body_bytes, DEFAULT_MAX_BODY_BYTES);
    }

    #[test]
    fn test_lifecycle_errors_name_the_state() {
        let err = ServerError::InvalidState {
            operation: "start",
            state: "started",
        };
        assert_eq!(err.to_string(), "cannot start gateway in state started");
    }
}
