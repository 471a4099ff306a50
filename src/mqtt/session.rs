//! Subscription lifecycle with statum state machine
//!
//! One subscriber owns the broker connection for the whole process. Each step
//! consumes the previous state, so a session can never be subscribed twice or
//! torn down before it was established.
//!
//! # State Machine
//!
//! ```text
//! Disconnected ──► Connecting ──► Connected ──► Subscribing ──► Subscribed
//!                                                                   │
//!                           Closed ◄── Unsubscribing ◄──────────────┘
//!                                                          (interrupt)
//! ```
//!
//! `Closed` is the final disconnected state. Connect and subscribe failures end
//! the lifecycle with an error; teardown failures are logged and ignored.

use statum::{machine, state};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::SessionError;
use super::message_manager::{MessageEvent, MessageHandler};
use super::mqtt_handler::MqttTransport;
use crate::config::ConnectionTarget;

/// Pause after a connection error before the event loop is polled again.
const RETRY_PAUSE: Duration = Duration::from_secs(1);

#[state]
#[derive(Debug, Clone)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Subscribing,
    Subscribed,
    Unsubscribing,
    Closed,
}

#[machine]
pub struct Subscriber<S: SessionState> {
    target: ConnectionTarget,
    transport: Box<dyn MqttTransport>,
    handler: Option<Box<dyn MessageHandler>>,
    messages_received: usize,
}

impl<S: SessionState> Subscriber<S> {
    pub fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    /// Number of messages handed to the handler so far.
    pub fn messages_received(&self) -> usize {
        self.messages_received
    }
}

impl Subscriber<Disconnected> {
    pub fn create(target: ConnectionTarget, transport: Box<dyn MqttTransport>) -> Self {
        debug!("Creating subscriber for {}", target);
        Self::new(target, transport, None, 0)
    }

    pub async fn connect(self) -> Result<Subscriber<Connected>, SessionError> {
        let mut connecting: Subscriber<Connecting> = self.transition();
        info!("Connecting to MQTT broker {}", connecting.target.broker());

        connecting.transport.connect().await?;
        debug!("CONNACK received from {}", connecting.target.broker());
        Ok(connecting.transition())
    }
}

impl Subscriber<Connected> {
    /// Subscribes to the target topic and registers `handler` for its messages.
    ///
    /// On failure the connection is closed before the error is returned.
    pub async fn subscribe(
        self,
        handler: Box<dyn MessageHandler>,
    ) -> Result<Subscriber<Subscribed>, SessionError> {
        let mut subscribing: Subscriber<Subscribing> = self.transition();
        let topic = subscribing.target.topic().to_string();
        info!("Subscribing to topic '{}'", topic);

        if let Err(e) = subscribing.transport.subscribe(&topic).await {
            if let Err(disconnect_err) = subscribing.transport.disconnect().await {
                warn!("{}", disconnect_err);
            }
            return Err(e);
        }

        subscribing.handler = Some(handler);
        info!("Subscribed to topic '{}'", topic);
        Ok(subscribing.transition())
    }
}

impl Subscriber<Subscribed> {
    fn dispatch(&mut self, event: &MessageEvent) {
        self.messages_received += 1;
        if let Some(handler) = &self.handler {
            handler.on_message(event);
        }
    }

    /// Dispatches incoming messages until `shutdown` is cancelled.
    ///
    /// Connection errors do not end the loop; the client reconnects on the
    /// next poll.
    pub async fn run_until_shutdown(
        mut self,
        shutdown: CancellationToken,
    ) -> Subscriber<Unsubscribing> {
        info!("Listening to topic '{}'", self.target.topic());

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,

                next = self.transport.next_message() => match next {
                    Ok(event) => self.dispatch(&event),
                    Err(e) => {
                        warn!("{}", e);
                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            _ = tokio::time::sleep(RETRY_PAUSE) => {}
                        }
                    }
                }
            }
        }

        info!("Shutdown requested after {} messages", self.messages_received);
        self.transition()
    }
}

impl Subscriber<Unsubscribing> {
    /// Unsubscribes and disconnects, each attempted exactly once.
    pub async fn shutdown(mut self) -> Subscriber<Closed> {
        let topic = self.target.topic().to_string();

        match self.transport.unsubscribe(&topic).await {
            Ok(()) => info!("Unsubscribed from topic '{}'", topic),
            Err(e) => warn!("{}", e),
        }

        match self.transport.disconnect().await {
            Ok(()) => info!("MQTT disconnected"),
            Err(e) => warn!("{}", e),
        }

        self.handler = None;
        self.transition()
    }
}
