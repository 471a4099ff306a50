//! # MQTT Integration Module
//!
//! Everything needed to run one subscription against a broker: client settings,
//! message representation, the transport over rumqttc and the lifecycle state
//! machine that drives it.
//!
//! ```text
//! mqtt/
//! ├── config.rs           - Client settings and broker address parsing
//! ├── error.rs            - Session error taxonomy
//! ├── message_manager.rs  - Message events and handlers
//! ├── mqtt_handler.rs     - Transport trait and rumqttc implementation
//! └── session.rs          - Subscription lifecycle state machine
//! ```
//!
//! The lifecycle only talks to the broker through [`mqtt_handler::MqttTransport`],
//! so the state machine can be exercised without a running broker.

pub mod config;
pub mod error;
pub mod message_manager;
pub mod mqtt_handler;
pub mod session;
