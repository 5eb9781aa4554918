//! Configuration module.
//!
//! Configuration is read once at startup from TOML (or JSON, by file
//! extension) and is not reloaded at runtime.
//!
//! # Configuration Resolution
//!
//! 1. `--config <path>` on the command line
//! 2. `TURM_CONFIG` environment variable (explicit path)
//! 3. `./config.toml`
//! 4. `./config.json`
//!
//! A missing file is fatal: the device path has no sensible default.
//!
//! # Environment Overrides
//!
//! The pattern is `TURM_<SECTION>_<KEY>`:
//! - `TURM_SERVER_HOST`, `TURM_SERVER_PORT`
//! - `TURM_SERIAL_DEVICE`, `TURM_SERIAL_DISABLED`, `TURM_SERIAL_BAUD_RATE`
//! - `TURM_LOGGING_LEVEL`
//!
//! # Example
//!
//! ```rust,ignore
//! use turm_server::config::ConfigLoader;
//!
//! let config = ConfigLoader::load(None)?.into_config();
//! config.validate()?;
//! println!("HTTP port: {:?}", config.server()?.port);
//! ```

mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{resolve_config_path, ConfigLoader};
pub use schema::{
    Config, LogFormat, LoggingConfig, SerialConfig, ServerConfig, DEFAULT_MAX_BODY_BYTES,
};
