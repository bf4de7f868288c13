//! Logging setup shared by the binaries
//!
//! Console output always; the daemon also appends plain-text lines to
//! `<log dir>/wwanctld.log`.

use crate::error::{WwanError, WwanResult};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable selecting the daemon log directory
pub const LOG_DIR_ENV: &str = "WWANCTL_LOG_DIR";

/// Used when neither the environment nor the executable's directory work
pub const SYSTEM_LOG_DIR: &str = "/var/log/wwanctl";

pub const DAEMON_LOG_FILE: &str = "wwanctld.log";

/// Install the global subscriber.
///
/// `RUST_LOG` overrides `level`. With `log_file` set, a second non-ANSI layer
/// appends to that file.
pub fn init_logging(level: &str, log_file: Option<&Path>) -> WwanResult<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "wwanctl={0},wwanctld={0},libwwanctl={0}",
            level
        ))
    });

    let console = fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_ansi(atty::is(atty::Stream::Stdout));

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                fmt::layer()
                    .with_target(false)
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()
        .map_err(|e| WwanError::ConfigError(format!("Failed to initialise logging: {}", e)))
}

/// Directory for the daemon log.
///
/// Order: `WWANCTL_LOG_DIR`, the configured directory, `logs/` next to the
/// executable if writable, then [`SYSTEM_LOG_DIR`].
pub fn resolve_log_dir(configured: Option<&Path>) -> PathBuf {
    if let Some(dir) = std::env::var_os(LOG_DIR_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(dir);
    }
    if let Some(dir) = configured {
        return dir.to_path_buf();
    }
    if let Some(dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|p| p.join("logs")))
    {
        if dir_writable(&dir) {
            return dir;
        }
    }
    PathBuf::from(SYSTEM_LOG_DIR)
}

/// Create `dir` if needed and return the daemon log file path inside it
pub fn prepare_log_file(dir: &Path) -> WwanResult<PathBuf> {
    fs::create_dir_all(dir).map_err(|e| {
        WwanError::ConfigError(format!("Cannot create log directory {}: {}", dir.display(), e))
    })?;
    Ok(dir.join(DAEMON_LOG_FILE))
}

fn dir_writable(dir: &Path) -> bool {
    if fs::create_dir_all(dir).is_err() {
        return false;
    }
    let probe = dir.join(".wwanctl-write-test");
    let writable = fs::write(&probe, b"").is_ok();
    let _ = fs::remove_file(&probe);
    writable
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    #[serial]
    fn test_env_wins() {
        let dir = TempDir::new().unwrap();
        std::env::set_var(LOG_DIR_ENV, dir.path());
        let resolved = resolve_log_dir(Some(Path::new("/nonexistent")));
        std::env::remove_var(LOG_DIR_ENV);
        assert_eq!(resolved, dir.path());
    }

    #[test]
    #[serial]
    fn test_configured_dir_without_env() {
        std::env::remove_var(LOG_DIR_ENV);
        assert_eq!(
            resolve_log_dir(Some(Path::new("/srv/wwan/logs"))),
            PathBuf::from("/srv/wwan/logs")
        );
    }

    #[test]
    #[serial]
    fn test_empty_env_is_ignored() {
        std::env::set_var(LOG_DIR_ENV, "");
        let resolved = resolve_log_dir(Some(Path::new("/srv/wwan/logs")));
        std::env::remove_var(LOG_DIR_ENV);
        assert_eq!(resolved, PathBuf::from("/srv/wwan/logs"));
    }

    #[test]
    fn test_prepare_log_file_creates_dir() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a/b");
        let file = prepare_log_file(&nested).unwrap();
        assert!(nested.is_dir());
        assert_eq!(file, nested.join(DAEMON_LOG_FILE));
    }

    #[test]
    fn test_dir_writable() {
        let dir = TempDir::new().unwrap();
        assert!(dir_writable(dir.path()));
        assert!(!dir.path().join(".wwanctl-write-test").exists());
    }
}
