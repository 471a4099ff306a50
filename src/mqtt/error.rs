//! Error definitions for the subscription lifecycle

use thiserror::Error;

/// Failures of a single broker session
///
/// Connection and subscription failures end the process. Unsubscribe and
/// disconnect failures only happen during teardown and are logged as warnings.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The broker URI could not be turned into a host and port
    #[error("Invalid broker address '{address}': {reason}")]
    InvalidBroker { address: String, reason: String },

    /// Broker unreachable, connection refused or no CONNACK in time
    #[error("Error connecting to MQTT broker: {0}")]
    Connection(String),

    /// Subscribe request rejected or never acknowledged
    #[error("Error subscribing to topic '{topic}': {reason}")]
    Subscription { topic: String, reason: String },

    #[error("Error unsubscribing from topic '{topic}': {reason}")]
    Unsubscription { topic: String, reason: String },

    #[error("Error disconnecting from MQTT broker: {0}")]
    Disconnection(String),

    /// Event loop failure while the subscription is active
    #[error("Connection interrupted: {0}")]
    Transport(String),
}
