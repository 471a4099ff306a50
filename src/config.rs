//! # Connection Target Resolution
//!
//! Decides which broker to connect to and which topic to subscribe to. Three
//! sources are consulted in a fixed order and the first one that yields both
//! values wins; later sources are not read at all:
//!
//! ```text
//! command line (exactly two values) ──► config.ini ──► environment
//! ```
//!
//! Sources are never merged. A source that only provides one of the two values
//! is treated exactly like a missing source and resolution moves on to the next.

use ini::Ini;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Environment variable holding the broker URI.
pub const SERVER_ENV: &str = "Mqtt_subscribe_server";
/// Environment variable holding the topic.
pub const TOPIC_ENV: &str = "Mqtt_subscribe_topics";
/// File read when no `--config` path is given.
pub const DEFAULT_CONFIG_FILE: &str = "config.ini";

const SERVER_KEY: &str = "server";
const TOPIC_KEY: &str = "topic";
const DEFAULT_SECTION: &str = "DEFAULT";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "no server or topic found: pass <broker_uri> <topic>, add `server` and `topic` to {}, or set {} and {}",
        .config_file.display(),
        SERVER_ENV,
        TOPIC_ENV
    )]
    NotFound { config_file: PathBuf },
}

/// Broker and topic of the single subscription this process runs.
///
/// Both fields are guaranteed to be non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    broker: String,
    topic: String,
}

impl ConnectionTarget {
    /// Returns `None` if either value is blank.
    pub fn new(broker: impl Into<String>, topic: impl Into<String>) -> Option<Self> {
        let broker = broker.into().trim().to_string();
        let topic = topic.into().trim().to_string();
        if broker.is_empty() || topic.is_empty() {
            return None;
        }
        Some(Self { broker, topic })
    }

    pub fn broker(&self) -> &str {
        &self.broker
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} [{}]", self.broker, self.topic)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Arguments,
    File,
    Environment,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigSource::Arguments => write!(f, "command-line arguments"),
            ConfigSource::File => write!(f, "configuration file"),
            ConfigSource::Environment => write!(f, "environment variables"),
        }
    }
}

/// Raw input for the resolver, captured once at startup.
///
/// Holding the environment values instead of reading them lazily keeps the
/// resolver free of process-global state.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    pub args: Vec<String>,
    pub config_file: PathBuf,
    pub env_server: Option<String>,
    pub env_topic: Option<String>,
}

impl ConfigSources {
    /// Captures the positional arguments and the current process environment.
    pub fn from_environment(args: Vec<String>, config_file: PathBuf) -> Self {
        Self {
            args,
            config_file,
            env_server: std::env::var(SERVER_ENV).ok(),
            env_topic: std::env::var(TOPIC_ENV).ok(),
        }
    }

    pub fn resolve(&self) -> Result<ConnectionTarget, ConfigError> {
        let found = self
            .try_source(ConfigSource::Arguments, || from_arguments(&self.args))
            .or_else(|| self.try_source(ConfigSource::File, || from_file(&self.config_file)))
            .or_else(|| {
                self.try_source(ConfigSource::Environment, || {
                    from_environment_values(self.env_server.as_deref(), self.env_topic.as_deref())
                })
            });

        found.ok_or_else(|| ConfigError::NotFound {
            config_file: self.config_file.clone(),
        })
    }

    fn try_source(
        &self,
        source: ConfigSource,
        read: impl FnOnce() -> Option<ConnectionTarget>,
    ) -> Option<ConnectionTarget> {
        match read() {
            Some(target) => {
                info!("Using {} ({})", source, target);
                Some(target)
            }
            None => {
                debug!("No complete configuration in {}", source);
                None
            }
        }
    }
}

pub fn from_arguments(args: &[String]) -> Option<ConnectionTarget> {
    match args {
        [broker, topic] => ConnectionTarget::new(broker.as_str(), topic.as_str()),
        _ => None,
    }
}

/// Reads `server` and `topic` from the default section of an INI file.
///
/// Keys before the first section header form the default section; an explicit
/// `[DEFAULT]` header is honoured as well. A `#` or `;` preceded by whitespace
/// starts an inline comment; quoted values are taken verbatim.
pub fn from_file(path: &Path) -> Option<ConnectionTarget> {
    if !path.is_file() {
        debug!("Config file {} not present", path.display());
        return None;
    }

    let ini = match Ini::load_from_file(path) {
        Ok(ini) => ini,
        Err(e) => {
            warn!("Ignoring unreadable config file {}: {}", path.display(), e);
            return None;
        }
    };

    let lookup = |key: &str| -> Option<String> {
        ini.general_section()
            .get(key)
            .filter(|value| !value.trim().is_empty())
            .or_else(|| ini.section(Some(DEFAULT_SECTION)).and_then(|s| s.get(key)))
            .map(str::to_string)
    };

    ConnectionTarget::new(lookup(SERVER_KEY)?, lookup(TOPIC_KEY)?)
}

pub fn from_environment_values(
    server: Option<&str>,
    topic: Option<&str>,
) -> Option<ConnectionTarget> {
    ConnectionTarget::new(server?, topic?)
}
