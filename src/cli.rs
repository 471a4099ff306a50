use clap::Parser;
use std::path::PathBuf;
use tracing::Level;

use crate::config::{ConfigSources, DEFAULT_CONFIG_FILE};

/// Subscribe to an MQTT topic and print every message received on it
///
/// Broker and topic come from the command line, from the `server` and `topic`
/// keys of an INI file, or from the Mqtt_subscribe_server and
/// Mqtt_subscribe_topics environment variables, in that order. Options go
/// before the broker and topic; everything after the broker is a value.
#[derive(Parser, Debug)]
#[command(name = "mqtt-subscribe")]
#[command(version)]
pub struct Args {
    /// Broker URI (e.g. tcp://broker.hivemq.com:1883) followed by the topic
    #[arg(value_name = "TARGET", allow_hyphen_values = true)]
    pub target: Vec<String>,

    /// INI file consulted when broker and topic are not given as arguments
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// TOML file with client settings (client id, keep-alive, timeouts)
    #[arg(short, long)]
    pub settings: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    /// Parses the process arguments.
    ///
    /// Usage errors exit with status 1 like every other startup failure;
    /// `--help` and `--version` exit 0.
    pub fn parse_or_exit() -> Self {
        Self::try_parse().unwrap_or_else(|e| {
            if !e.use_stderr() {
                e.exit()
            }
            let _ = e.print();
            std::process::exit(1)
        })
    }

    pub fn config_sources(&self) -> ConfigSources {
        ConfigSources::from_environment(self.target.clone(), self.config.clone())
    }

    pub fn log_level(&self) -> Level {
        match self.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    }
}
