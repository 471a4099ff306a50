use rumqttc::MqttOptions;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use super::error::SessionError;

pub const DEFAULT_PORT: u16 = 1883;
const SETTINGS_DIR: &str = "mqtt-subscribe";
const SETTINGS_FILE: &str = "settings.toml";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Settings file {0} does not exist")]
    Missing(PathBuf),

    #[error("Unable to read settings file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Client tuning for the subscriber session.
///
/// Every field has a default, so an absent or partial settings file is fine.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MqttConfig {
    pub client_id: String,
    pub keep_alive_secs: u64,
    pub clean_session: bool,
    /// Capacity of the request channel between client handle and event loop
    pub request_capacity: usize,
    pub connect_timeout_secs: u64,
    pub ack_timeout_secs: u64,
    /// Time granted to flush outstanding packets after DISCONNECT is queued
    pub disconnect_grace_ms: u64,
    pub print_timestamps: bool,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            client_id: format!("mqtt-subscribe-{}", std::process::id()),
            keep_alive_secs: 30,
            clean_session: true,
            request_capacity: 10,
            connect_timeout_secs: 30,
            ack_timeout_secs: 10,
            disconnect_grace_ms: 250,
            print_timestamps: true,
        }
    }
}

impl MqttConfig {
    /// Loads client settings.
    ///
    /// An explicit path has to exist. Without one the per-user settings file is
    /// used when present, otherwise the defaults apply.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let path = match path {
            Some(path) if path.is_file() => path.to_path_buf(),
            Some(path) => return Err(SettingsError::Missing(path.to_path_buf())),
            None => match Self::default_path().filter(|p| p.is_file()) {
                Some(path) => path,
                None => {
                    debug!("No settings file found, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let contents = fs::read_to_string(&path).map_err(|source| SettingsError::Io {
            path: path.clone(),
            source,
        })?;
        let config = toml::from_str(&contents).map_err(|source| SettingsError::Parse {
            path: path.clone(),
            source,
        })?;
        info!("Loaded client settings from {}", path.display());
        Ok(config)
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(SETTINGS_DIR).join(SETTINGS_FILE))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs)
    }

    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_millis(self.disconnect_grace_ms)
    }

    pub fn mqtt_options(&self, broker: &BrokerAddress) -> MqttOptions {
        let mut options = MqttOptions::new(self.client_id.clone(), broker.host.clone(), broker.port);
        options
            .set_keep_alive(Duration::from_secs(self.keep_alive_secs.max(1)))
            .set_clean_session(self.clean_session);
        options
    }
}

/// Host and port extracted from a broker URI such as `tcp://localhost:1883`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
}

impl BrokerAddress {
    pub fn parse(uri: &str) -> Result<Self, SessionError> {
        let invalid = |reason: &str| SessionError::InvalidBroker {
            address: uri.to_string(),
            reason: reason.to_string(),
        };

        let rest = match uri.split_once("://") {
            Some((scheme, rest)) => match scheme.to_ascii_lowercase().as_str() {
                "tcp" | "mqtt" => rest,
                _ => return Err(invalid(&format!("unsupported scheme '{}'", scheme))),
            },
            None => uri,
        };
        let authority = rest.trim_end_matches('/');
        if authority.contains('/') {
            return Err(invalid("unexpected path"));
        }
        if authority.contains('@') {
            return Err(invalid("credentials in the broker URI are not supported"));
        }

        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let (host, tail) = bracketed
                .split_once(']')
                .ok_or_else(|| invalid("unterminated IPv6 address"))?;
            match tail {
                "" => (host, None),
                tail => match tail.strip_prefix(':') {
                    Some(port) => (host, Some(port)),
                    None => return Err(invalid("garbage after IPv6 address")),
                },
            }
        } else {
            match authority.rsplit_once(':') {
                Some((host, _)) if host.contains(':') => {
                    return Err(invalid("IPv6 addresses must be enclosed in brackets"))
                }
                Some((host, port)) => (host, Some(port)),
                None => (authority, None),
            }
        };

        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        let port = match port {
            Some(port) => port
                .parse::<u16>()
                .map_err(|_| invalid(&format!("invalid port '{}'", port)))?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
