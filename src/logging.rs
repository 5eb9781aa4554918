//! Tracing subscriber setup.

use crate::config::{ConfigError, ConfigResult, LogFormat, LoggingConfig};
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG`, when set, wins over
/// `logging.level`.
pub fn init_tracing(config: &LoggingConfig) -> ConfigResult<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => level_filter(&config.level)?,
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = match &config.file {
        None => match config.format {
            LogFormat::Pretty => builder.with_writer(std::io::stderr).try_init(),
            LogFormat::Compact => builder.compact().with_writer(std::io::stderr).try_init(),
        },
        Some(path) => {
            let builder = builder
                .with_ansi(false)
                .with_writer(Mutex::new(open_log_file(path)?));
            match config.format {
                LogFormat::Pretty => builder.try_init(),
                LogFormat::Compact => builder.compact().try_init(),
            }
        }
    };
    installed.map_err(|e| ConfigError::validation("logging", e.to_string()))
}

pub fn level_filter(level: &str) -> ConfigResult<EnvFilter> {
    EnvFilter::try_new(level).map_err(|e| ConfigError::validation("logging.level", e.to_string()))
}

fn open_log_file(path: &Path) -> ConfigResult<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| ConfigError::LogFile {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_filter() {
        assert!(level_filter("info").is_ok());
        assert!(level_filter("turm_server=debug,warn").is_ok());
        assert!(matches!(
            level_filter("turm_server=loud"),
            Err(ConfigError::ValidationError { ref key, .. }) if key == "logging.level"
        ));
    }

    #[test]
    fn test_log_file_is_appended() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.log");
        std::fs::write(&path, "earlier\n").unwrap();

        use std::io::Write;
        let mut file = open_log_file(&path).unwrap();
        file.write_all(b"later\n").unwrap();
        drop(file);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "earlier\nlater\n");

        let missing = dir.path().join("no/such/dir/server.log");
        assert!(matches!(
            open_log_file(&missing),
            Err(ConfigError::LogFile { .. })
        ));
    }
}
