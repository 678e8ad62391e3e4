//! Service configuration: a TOML file merged with command-line flags.

use qubesdbus_admin::DEFAULT_SOCKET;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default location of the service configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/qubes/qubes-dbus.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
struct ServiceSection {
    socket_path: PathBuf,
    system_bus: bool,
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET),
            system_bus: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
struct NotificationsSection {
    enabled: bool,
}

impl Default for NotificationsSection {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
struct ConfigFile {
    service: ServiceSection,
    notifications: NotificationsSection,
}

/// Effective service configuration after merging file and flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub socket_path: PathBuf,
    pub system_bus: bool,
    pub notifications: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ConfigFile::default().into()
    }
}

impl From<ConfigFile> for ServiceConfig {
    fn from(file: ConfigFile) -> Self {
        Self {
            socket_path: file.service.socket_path,
            system_bus: file.service.system_bus,
            notifications: file.notifications.enabled,
        }
    }
}

impl ServiceConfig {
    /// Load the configuration file. A missing file yields the defaults; a
    /// present but unreadable or invalid file is an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let file: ConfigFile = toml::from_str(&content)?;
        Ok(file.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServiceConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, ServiceConfig::default());
        assert_eq!(config.socket_path, PathBuf::from(DEFAULT_SOCKET));
        assert!(!config.system_bus);
        assert!(config.notifications);
    }

    #[test]
    fn full_file_is_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qubes-dbus.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(
            f,
            r#"[service]
socket_path = "/tmp/qubesd.sock"
system_bus = true

[notifications]
enabled = false
"#
        )
        .unwrap();

        let config = ServiceConfig::load(&path).unwrap();
        assert_eq!(config.socket_path, PathBuf::from("/tmp/qubesd.sock"));
        assert!(config.system_bus);
        assert!(!config.notifications);
    }

    #[test]
    fn partial_file_keeps_defaults_for_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qubes-dbus.toml");
        std::fs::write(&path, "[notifications]\nenabled = false\n").unwrap();

        let config = ServiceConfig::load(&path).unwrap();
        assert!(!config.notifications);
        assert_eq!(config.socket_path, PathBuf::from(DEFAULT_SOCKET));
    }

    #[test]
    fn invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qubes-dbus.toml");
        std::fs::write(&path, "service = \"not a table\"\n").unwrap();
        assert!(matches!(
            ServiceConfig::load(&path),
            Err(ConfigError::Parse(_))
        ));
    }
}
