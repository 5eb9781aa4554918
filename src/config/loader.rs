//! Configuration loader with file resolution and environment override support.

use super::error::{ConfigError, ConfigResult};
use super::schema::{Config, SerialConfig, ServerConfig};
use std::path::{Path, PathBuf};

/// Environment variable prefix for overrides
const ENV_PREFIX: &str = "TURM";

/// Environment variable for explicit config path
const CONFIG_PATH_ENV: &str = "TURM_CONFIG";

/// Candidate file names in the working directory, in priority order.
const CONFIG_FILE_NAMES: [&str; 2] = ["config.toml", "config.json"];

/// Configuration loader with resolution and override logic.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// File the configuration was read from
    pub config_path: PathBuf,
    /// The loaded configuration
    pub config: Config,
}

impl ConfigLoader {
    /// Load configuration using standard resolution order.
    ///
    /// Resolution priority (highest to lowest):
    /// 1. `explicit` (the `--config` flag)
    /// 2. `TURM_CONFIG` environment variable
    /// 3. `./config.toml`
    /// 4. `./config.json`
    ///
    /// There are no built-in defaults for the device, so a missing file is an
    /// error. Environment variables override file values.
    pub fn load(explicit: Option<&Path>) -> ConfigResult<Self> {
        let path = resolve_config_path(explicit)?;
        Self::load_from(path)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut config = load_from_file(&path)?;
        apply_env_overrides(&mut config)?;

        Ok(Self {
            config_path: path,
            config,
        })
    }

    /// Get the loaded configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get a mutable reference to the configuration.
    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Consume the loader and return the configuration.
    pub fn into_config(self) -> Config {
        self.config
    }
}

/// Resolve the configuration file path.
pub fn resolve_config_path(explicit: Option<&Path>) -> ConfigResult<PathBuf> {
    if let Some(path) = explicit {
        return existing(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        return existing(PathBuf::from(path));
    }

    CONFIG_FILE_NAMES
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
        .ok_or_else(|| ConfigError::NotFound(PathBuf::from(CONFIG_FILE_NAMES[0])))
}

fn existing(path: PathBuf) -> ConfigResult<PathBuf> {
    if path.exists() {
        Ok(path)
    } else {
        Err(ConfigError::NotFound(path))
    }
}

/// Load configuration from a file; `.json` files are parsed as JSON, anything
/// else as TOML.
fn load_from_file(path: &Path) -> ConfigResult<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;

    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        Ok(serde_json::from_str(&content)?)
    } else {
        Ok(toml::from_str(&content)?)
    }
}

/// Apply environment variable overrides to the configuration.
///
/// Environment variables follow the pattern: `TURM_<SECTION>_<KEY>`
/// For example:
/// - `TURM_SERVER_PORT=8080`
/// - `TURM_SERIAL_DEVICE=/dev/ttyACM0`
/// - `TURM_LOGGING_LEVEL=debug`
fn apply_env_overrides(config: &mut Config) -> ConfigResult<()> {
    // Server overrides
    if let Ok(val) = std::env::var(format!("{}_SERVER_HOST", ENV_PREFIX)) {
        server_section(config).host = val;
    }
    if let Ok(val) = std::env::var(format!("{}_SERVER_PORT", ENV_PREFIX)) {
        let port = val.parse().map_err(|_| {
            ConfigError::env_parse(format!("{}_SERVER_PORT", ENV_PREFIX), "Invalid port number")
        })?;
        server_section(config).port = Some(port);
    }

    // Serial overrides
    if let Ok(val) = std::env::var(format!("{}_SERIAL_DEVICE", ENV_PREFIX)) {
        serial_section(config).device = val;
    }
    if let Ok(val) = std::env::var(format!("{}_SERIAL_DISABLED", ENV_PREFIX)) {
        serial_section(config).disabled = val.to_lowercase() == "true" || val == "1";
    }
    if let Ok(val) = std::env::var(format!("{}_SERIAL_BAUD_RATE", ENV_PREFIX)) {
        let baud = val.parse().map_err(|_| {
            ConfigError::env_parse(format!("{}_SERIAL_BAUD_RATE", ENV_PREFIX), "Invalid baud rate")
        })?;
        serial_section(config)
            .options
            .get_or_insert_with(Default::default)
            .baud_rate = baud;
    }

    // Logging overrides
    if let Ok(val) = std::env::var(format!("{}_LOGGING_LEVEL", ENV_PREFIX)) {
        config.logging.level = val;
    }

    Ok(())
}

fn server_section(config: &mut Config) -> &mut ServerConfig {
    config.server.get_or_insert_with(ServerConfig::default)
}

fn serial_section(config: &mut Config) -> &mut SerialConfig {
    config.serial.get_or_insert_with(SerialConfig::default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    #[serial]
    fn test_load_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "config.toml",
            "[server]\nport = 4711\n[serial]\ndisabled = true\n",
        );

        let loader = ConfigLoader::load(Some(&path)).unwrap();
        assert_eq!(loader.config_path, path);
        assert_eq!(loader.config().server().unwrap().port, Some(4711));
        assert!(loader.config().serial().unwrap().disabled);
    }

    #[test]
    #[serial]
    fn test_load_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "config.json",
            r#"{"server":{"port":4711},"serial":{"device":"/dev/ttyUSB0","options":{"baud_rate":115200}}}"#,
        );

        let config = ConfigLoader::load_from(&path).unwrap().into_config();
        config.validate().unwrap();
        assert_eq!(
            config.serial().unwrap().options.as_ref().unwrap().baud_rate,
            115200
        );
    }

    #[test]
    #[serial]
    fn test_missing_explicit_file() {
        let result = ConfigLoader::load(Some(Path::new("/nonexistent/turm/config.toml")));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    #[serial]
    fn test_unparsable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "config.toml", "[server\nport = ");
        assert!(matches!(
            ConfigLoader::load_from(&path),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    #[serial]
    fn test_env_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "config.toml", "[server]\nport = 4711\n");

        env::set_var("TURM_SERVER_PORT", "9999");
        env::set_var("TURM_SERIAL_DISABLED", "true");
        let loaded = ConfigLoader::load_from(&path);
        env::remove_var("TURM_SERVER_PORT");
        env::remove_var("TURM_SERIAL_DISABLED");

        let config = loaded.unwrap().into_config();
        assert_eq!(config.server().unwrap().port, Some(9999));
        assert!(config.serial().unwrap().disabled);
    }

    #[test]
    #[serial]
    fn test_env_override_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "config.toml", "[server]\nport = 4711\n");

        env::set_var("TURM_SERVER_PORT", "not-a-port");
        let loaded = ConfigLoader::load_from(&path);
        env::remove_var("TURM_SERVER_PORT");

        assert!(matches!(loaded, Err(ConfigError::EnvParseError { .. })));
    }

    #[test]
    #[serial]
    fn test_config_path_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "custom.toml", "[server]\nport = 1\n");

        env::set_var("TURM_CONFIG", &path);
        let resolved = resolve_config_path(None);
        env::remove_var("TURM_CONFIG");

        assert_eq!(resolved.unwrap(), path);
    }

    #[test]
    #[serial]
    fn test_example_config_is_valid() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config.example.toml");
        let config = ConfigLoader::load_from(&path).unwrap().into_config();
        config.validate().unwrap();
        assert_eq!(config.server().unwrap().validated_port().unwrap(), 4711);
    }
}
