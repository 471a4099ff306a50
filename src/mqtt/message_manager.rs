use chrono::{DateTime, Local, SecondsFormat};
use rumqttc::Publish;
use std::fmt;

/// A single publish received on the subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEvent {
    topic: String,
    payload: Vec<u8>,
    received_at: DateTime<Local>,
}

impl MessageEvent {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            received_at: Local::now(),
        }
    }

    pub fn from_publish(publish: &Publish) -> Self {
        Self::new(publish.topic.clone(), publish.payload.to_vec())
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn received_at(&self) -> DateTime<Local> {
        self.received_at
    }

    /// Formats the message as exactly one output line.
    ///
    /// The payload is decoded as lossy UTF-8; line breaks inside it are escaped.
    pub fn render(&self, with_timestamp: bool) -> String {
        let payload = String::from_utf8_lossy(self.payload())
            .replace('\r', "\\r")
            .replace('\n', "\\n");
        if with_timestamp {
            format!(
                "[{}] {}: {}",
                self.received_at.to_rfc3339_opts(SecondsFormat::Secs, false),
                self.topic,
                payload
            )
        } else {
            format!("{}: {}", self.topic, payload)
        }
    }
}

impl fmt::Display for MessageEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.render(true))
    }
}

/// Receiver for messages of the active subscription.
///
/// Called from the session loop that also drives the network connection, so an
/// implementation must return promptly and must not wait on anything unbounded.
pub trait MessageHandler: Send + Sync {
    fn on_message(&self, event: &MessageEvent);
}

impl<F> MessageHandler for F
where
    F: Fn(&MessageEvent) + Send + Sync,
{
    fn on_message(&self, event: &MessageEvent) {
        self(event)
    }
}

/// Prints every message as one line on stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrintHandler {
    with_timestamp: bool,
}

impl PrintHandler {
    pub fn new(with_timestamp: bool) -> Self {
        Self { with_timestamp }
    }
}

impl MessageHandler for PrintHandler {
    fn on_message(&self, event: &MessageEvent) {
        println!("{}", event.render(self.with_timestamp));
    }
}
