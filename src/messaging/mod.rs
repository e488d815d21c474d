//! # Bus Substrate
//!
//! The message-bus coordination layer shared by every workcell service:
//! the standardized [`Envelope`] carried on every topic, the
//! [`TopicRegistry`] mapping symbolic keys to concrete topics, the
//! [`BusClient`] owning the MQTT session, and the [`Router`] binding
//! inbound topics to typed handlers.

pub mod client;
pub mod envelope;
pub mod errors;
pub mod payloads;
pub mod router;
pub mod topics;

pub use client::{
    BatchPublishResult, BusClient, ClientStatistics, ConnectionEvent, EnvelopePublisher,
};
pub use envelope::{Envelope, MessagePriority, MessageType, ServiceDescriptor};
pub use errors::{MessagingError, MessagingResult};
pub use payloads::Direction;
pub use router::{topic_matches, MessageHandler, Router};
pub use topics::{TopicDefinition, TopicRegistry};
