//! `fleetdash-middleware` – connectivity and command dispatch
//!
//! Owns the broker session, folds inbound vehicle traffic into a consistent
//! fleet view, and lets ordinary blocking callers send commands through the
//! session without ever touching it.
//!
//! # Modules
//!
//! - [`store`] – [`FleetStateStore`], the latest snapshot per vehicle.
//! - [`bus`] – topic-based publish/subscribe event bus built on Tokio
//!   broadcast channels.
//! - [`client`] – the [`ProtocolClient`] seam and its connection inputs.
//! - [`mqtt`] – the MQTT implementation of that seam.
//! - [`handoff`] – the command/completion pair used to cross into the
//!   connection worker.
//! - [`supervisor`] – [`ConnectionSupervisor`], owner of the worker thread.
//! - [`dispatcher`] – [`CommandDispatcher`], instant actions and orders with
//!   a deadline.
//!
//! # Wiring
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fleetdash_middleware::{
//!     ClientIdentity, CommandDispatcher, ConnectionSupervisor, Credentials, EventBus,
//!     FleetStateStore, MqttClientFactory,
//! };
//!
//! let supervisor = Arc::new(ConnectionSupervisor::new(
//!     Arc::new(FleetStateStore::new()),
//!     Arc::new(EventBus::default()),
//!     Arc::new(MqttClientFactory::new()),
//! ));
//! supervisor
//!     .connect("mqtt://localhost:1883", Credentials::default(), ClientIdentity::new("FleetDash", "Console"))
//!     .unwrap();
//!
//! let dispatcher = CommandDispatcher::new(Arc::clone(&supervisor));
//! dispatcher.emergency_stop("AGV-001");
//! supervisor.disconnect();
//! ```

pub mod bus;
pub mod client;
pub mod dispatcher;
pub mod handoff;
pub mod mqtt;
pub mod store;
pub mod supervisor;

pub use bus::{EventBus, Topic, TopicReceiver};
pub use client::{BrokerAddress, ClientEvent, ClientFactory, ClientIdentity, Credentials, ProtocolClient};
pub use dispatcher::{
    CommandDispatcher, HeaderChannel, HeaderSequence, MissionDispatchError, DEFAULT_DISPATCH_TIMEOUT,
    EMERGENCY_STOP,
};
pub use handoff::Completion;
pub use mqtt::{MqttClientFactory, MqttProtocolClient};
pub use store::FleetStateStore;
pub use supervisor::{ConnectionSupervisor, SupervisorStatus, DEFAULT_CONNECT_GRACE};
