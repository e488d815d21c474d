//! # ios-core
//!
//! Message-bus coordination substrate and workflow engine for an automated
//! outbound/unloading workcell. Independent services (scheduler, barcode
//! gateway, motion controller, vision) interact exclusively over MQTT;
//! this crate provides the standardized envelope carried on every topic,
//! the registry mapping symbolic keys to concrete topics, the per-service
//! bus client (lifecycle, reconnect, subscribe, dispatch), the router
//! binding inbound topics to typed handlers, and the scheduler's workflow
//! state machine driving the outbound task end to end.
//!
//! External collaborators stay behind narrow contracts: the fieldbus
//! driver behind [`motion::Axis`], scanner sockets behind
//! [`coder::CoderGateway`], and the camera behind its bus topics.

pub mod coder;
pub mod config;
pub mod constants;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod messaging;
pub mod motion;
pub mod orchestration;
pub mod state_machine;
pub mod state_store;

pub use config::{ConfigLoader, ServiceConfig};
pub use error::{IosError, Result};
pub use messaging::{
    BusClient, Envelope, EnvelopePublisher, MessagePriority, MessageType, Router,
    ServiceDescriptor, TopicRegistry,
};
pub use orchestration::{OutboundTask, WorkflowEngine};
pub use state_machine::{TaskStatus, WorkflowEvent};
pub use state_store::StateStore;
