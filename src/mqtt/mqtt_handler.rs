use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, Outgoing, Packet, QoS, SubscribeReasonCode,
};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use super::config::{BrokerAddress, MqttConfig};
use super::error::SessionError;
use super::message_manager::MessageEvent;

#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
    Reconnecting,
}

#[derive(Clone, Debug, Default)]
pub struct MqttStatus {
    pub connection_state: ConnectionState,
    pub messages_received: usize,
    pub last_activity: Option<chrono::DateTime<chrono::Local>>,
}

/// Broker operations the subscription lifecycle is built from.
///
/// Each call resolves once the broker has acknowledged the request (or the
/// attempt has definitively failed), which keeps the lifecycle strictly
/// sequential.
#[async_trait]
pub trait MqttTransport: Send {
    async fn connect(&mut self) -> Result<(), SessionError>;

    /// Subscribes with at-most-once delivery.
    async fn subscribe(&mut self, topic: &str) -> Result<(), SessionError>;

    /// Waits for the next publish, driving the connection in the meantime.
    async fn next_message(&mut self) -> Result<MessageEvent, SessionError>;

    async fn unsubscribe(&mut self, topic: &str) -> Result<(), SessionError>;

    /// Sends DISCONNECT and closes the connection after a bounded grace period.
    async fn disconnect(&mut self) -> Result<(), SessionError>;
}

/// [`MqttTransport`] backed by a rumqttc client and its event loop.
pub struct RumqttTransport {
    status: MqttStatus,
    client: AsyncClient,
    eventloop: EventLoop,
    pending: VecDeque<MessageEvent>,
    connect_timeout: Duration,
    ack_timeout: Duration,
    disconnect_grace: Duration,
}

impl RumqttTransport {
    pub fn new(broker: &BrokerAddress, config: &MqttConfig) -> Self {
        debug!("Creating MQTT client '{}' for {}", config.client_id, broker);
        let (client, eventloop) =
            AsyncClient::new(config.mqtt_options(broker), config.request_capacity.max(1));

        RumqttTransport {
            status: MqttStatus::default(),
            client,
            eventloop,
            pending: VecDeque::new(),
            connect_timeout: config.connect_timeout(),
            ack_timeout: config.ack_timeout(),
            disconnect_grace: config.disconnect_grace(),
        }
    }

    fn record_message(&mut self, event: &MessageEvent) {
        self.status.messages_received += 1;
        self.status.last_activity = Some(event.received_at());
    }

    /// Maps a failed connection attempt, keeping the broker's return code.
    fn connect_failure(error: ConnectionError) -> SessionError {
        match error {
            ConnectionError::ConnectionRefused(code) => {
                SessionError::Connection(format!("broker refused connection ({:?})", code))
            }
            other => SessionError::Connection(other.to_string()),
        }
    }

    /// Polls the event loop until `matcher` accepts an incoming packet.
    ///
    /// Publishes seen on the way are queued for [`MqttTransport::next_message`].
    async fn await_packet<T>(
        &mut self,
        mut matcher: impl FnMut(&Packet) -> Option<T> + Send,
    ) -> Result<T, rumqttc::ConnectionError> {
        loop {
            match self.eventloop.poll().await? {
                Event::Incoming(Packet::Publish(publish)) => {
                    let event = MessageEvent::from_publish(&publish);
                    self.record_message(&event);
                    self.pending.push_back(event);
                }
                Event::Incoming(packet) => match matcher(&packet) {
                    Some(value) => return Ok(value),
                    None => trace!("Skipping {:?}", packet),
                },
                Event::Outgoing(outgoing) => trace!("Outgoing {:?}", outgoing),
            }
        }
    }
}

#[async_trait]
impl MqttTransport for RumqttTransport {
    async fn connect(&mut self) -> Result<(), SessionError> {
        self.status.connection_state = ConnectionState::Connecting;
        let wait = timeout(
            self.connect_timeout,
            self.await_packet(|packet| match packet {
                // refused CONNACKs surface as ConnectionError::ConnectionRefused
                Packet::ConnAck(_) => Some(()),
                _ => None,
            }),
        )
        .await;

        let result = match wait {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(Self::connect_failure(e)),
            Err(_) => Err(SessionError::Connection(format!(
                "no CONNACK within {:?}",
                self.connect_timeout
            ))),
        };

        self.status.connection_state = match result {
            Ok(()) => ConnectionState::Connected,
            Err(_) => ConnectionState::Failed,
        };
        result
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), SessionError> {
        let failed = |reason: String| SessionError::Subscription {
            topic: topic.to_string(),
            reason,
        };

        self.client
            .subscribe(topic, QoS::AtMostOnce)
            .await
            .map_err(|e| failed(e.to_string()))?;

        let wait = timeout(
            self.ack_timeout,
            self.await_packet(|packet| match packet {
                Packet::SubAck(ack) => Some(ack.return_codes.clone()),
                _ => None,
            }),
        )
        .await;

        match wait {
            Ok(Ok(codes)) if codes.iter().any(|c| matches!(c, SubscribeReasonCode::Failure)) => {
                Err(failed("broker rejected the subscription".to_string()))
            }
            Ok(Ok(codes)) => {
                debug!("SUBACK for '{}': {:?}", topic, codes);
                Ok(())
            }
            Ok(Err(e)) => Err(failed(e.to_string())),
            Err(_) => Err(failed(format!("no SUBACK within {:?}", self.ack_timeout))),
        }
    }

    async fn next_message(&mut self) -> Result<MessageEvent, SessionError> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(event);
        }

        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let event = MessageEvent::from_publish(&publish);
                    self.record_message(&event);
                    return Ok(event);
                }
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if self.status.connection_state == ConnectionState::Reconnecting {
                        info!(
                            "Reconnected to MQTT broker (session present: {})",
                            ack.session_present
                        );
                    }
                    self.status.connection_state = ConnectionState::Connected;
                }
                Ok(event) => trace!("Event {:?}", event),
                Err(e) => {
                    self.status.connection_state = ConnectionState::Reconnecting;
                    return Err(SessionError::Transport(e.to_string()));
                }
            }
        }
    }

    async fn unsubscribe(&mut self, topic: &str) -> Result<(), SessionError> {
        let failed = |reason: String| SessionError::Unsubscription {
            topic: topic.to_string(),
            reason,
        };

        self.client
            .unsubscribe(topic)
            .await
            .map_err(|e| failed(e.to_string()))?;

        let wait = timeout(
            self.ack_timeout,
            self.await_packet(|packet| match packet {
                Packet::UnsubAck(_) => Some(()),
                _ => None,
            }),
        )
        .await;

        match wait {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(failed(e.to_string())),
            Err(_) => Err(failed(format!("no UNSUBACK within {:?}", self.ack_timeout))),
        }
    }

    async fn disconnect(&mut self) -> Result<(), SessionError> {
        self.client
            .disconnect()
            .await
            .map_err(|e| SessionError::Disconnection(e.to_string()))?;

        let eventloop = &mut self.eventloop;
        let flush = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                    Ok(event) => trace!("Flushing {:?}", event),
                    // the broker closes the socket once DISCONNECT arrives
                    Err(e) => {
                        debug!("Event loop closed: {}", e);
                        break;
                    }
                }
            }
        };

        if timeout(self.disconnect_grace, flush).await.is_err() {
            warn!(
                "DISCONNECT not flushed within {:?}, closing connection",
                self.disconnect_grace
            );
        }
        self.status.connection_state = ConnectionState::Disconnected;
        debug!(
            "Connection closed: {} messages received, last activity {:?}",
            self.status.messages_received, self.status.last_activity
        );
        Ok(())
    }
}
