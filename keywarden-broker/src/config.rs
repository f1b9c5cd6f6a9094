//! Broker-side client configuration.
//!
//! A TOML file names the transports to try, their timeouts, and the
//! per-operation caller allow-list. Loaded from an explicit path or the
//! platform configuration directory.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::bundle::BrokerOperation;
use crate::strategy::{IpcStrategy, TcpLoopbackStrategy, UnixSocketStrategy};
use crate::validator::CallValidator;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema.
    #[error("failed to parse config from {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// The allow-list names an operation this client doesn't know.
    #[error("unknown operation in allow list: {name}")]
    UnknownOperation { name: String },
}

/// Broker client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Path to the broker's Unix socket.
    pub socket_path: PathBuf,

    /// Loopback TCP port; 0 disables the TCP transport.
    #[serde(default)]
    pub loopback_port: u16,

    /// Per-attempt timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Allow-list: operation name -> caller package ids.
    #[serde(default)]
    pub allow: HashMap<String, Vec<String>>,

    /// Signing key pins: package id -> digest.
    #[serde(default)]
    pub signing_keys: HashMap<String, String>,
}

fn default_timeout_secs() -> u64 {
    5
}

impl Default for BrokerConfig {
    fn default() -> Self {
        let socket_path = project_dirs()
            .and_then(|d| d.runtime_dir().map(|r| r.join("keywarden-broker.sock")))
            .unwrap_or_else(|| PathBuf::from("/tmp/keywarden-broker.sock"));

        Self {
            socket_path,
            loopback_port: 0,
            timeout_secs: default_timeout_secs(),
            allow: HashMap::new(),
            signing_keys: HashMap::new(),
        }
    }
}

impl BrokerConfig {
    /// The per-attempt timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Build the preference-ordered transport list this config names.
    ///
    /// The Unix socket comes first; loopback TCP is only added when a
    /// port is configured.
    pub fn strategies(&self) -> Vec<IpcStrategy> {
        let mut strategies = vec![IpcStrategy::UnixSocket(
            UnixSocketStrategy::new(&self.socket_path).with_timeout(self.timeout()),
        )];
        if self.loopback_port != 0 {
            strategies.push(IpcStrategy::TcpLoopback(
                TcpLoopbackStrategy::new(self.loopback_port).with_timeout(self.timeout()),
            ));
        }
        strategies
    }

    /// Build the caller validator this config names.
    pub fn validator(&self) -> Result<CallValidator, ConfigError> {
        let mut validator = CallValidator::new();
        for (name, packages) in &self.allow {
            let operation: BrokerOperation =
                name.parse()
                    .map_err(|_| ConfigError::UnknownOperation { name: name.clone() })?;
            for package in packages {
                validator.allow(operation, package);
            }
        }
        for (package, digest) in &self.signing_keys {
            validator.pin_signing_key(package, digest);
        }
        Ok(validator)
    }
}

/// Load configuration from a specific path.
pub fn load_config_from(path: &Path) -> Result<BrokerConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load configuration from the default location, or fall back to
/// defaults when no file exists.
pub fn load_config() -> Result<BrokerConfig, ConfigError> {
    let config_path = project_dirs()
        .map(|d| d.config_dir().join("broker.toml"))
        .unwrap_or_else(|| PathBuf::from("keywarden-broker.toml"));

    if config_path.exists() {
        load_config_from(&config_path)
    } else {
        Ok(BrokerConfig::default())
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("dev", "keywarden", "keywarden")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_a_full_config() {
        let toml_text = r#"
            socket_path = "/run/keywarden/broker.sock"
            loopback_port = 48752
            timeout_secs = 2

            [allow]
            get_accounts = ["com.example.mail", "com.example.calendar"]
            acquire_token_silent = ["com.example.mail"]

            [signing_keys]
            "com.example.mail" = "sha256:abcd"
        "#;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broker.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(toml_text.as_bytes()).unwrap();

        let config = load_config_from(&path).unwrap();
        assert_eq!(config.loopback_port, 48752);
        assert_eq!(config.timeout(), Duration::from_secs(2));
        assert_eq!(config.strategies().len(), 2);

        let validator = config.validator().unwrap();
        let mail = crate::bundle::CallerIdentity::new("com.example.mail")
            .with_signing_key_digest("sha256:abcd");
        assert!(validator
            .validate(&mail, BrokerOperation::GetAccounts)
            .is_ok());
    }

    #[test]
    fn unknown_operation_is_rejected() {
        let mut config = BrokerConfig::default();
        config
            .allow
            .insert("frobnicate".to_string(), vec!["com.example.mail".to_string()]);
        assert!(matches!(
            config.validator(),
            Err(ConfigError::UnknownOperation { .. })
        ));
    }

    #[test]
    fn default_config_has_only_the_socket_transport() {
        let config = BrokerConfig::default();
        assert_eq!(config.strategies().len(), 1);
    }
}
