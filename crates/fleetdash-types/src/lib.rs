//! `fleetdash-types` – shared data for the FleetDash supervisory dashboard.
//!
//! # Modules
//!
//! - [`protocol`] – the wire messages exchanged with vehicles over the broker
//!   (orders, instant actions, inbound state and connection messages).
//! - [`fleet`] – the in-memory view of the fleet: [`AgvSnapshot`],
//!   [`ErrorInfo`] and the [`Waypoint`] input accepted by the mission builder.
//!
//! The crate root holds the cross-cutting pieces: the [`FleetError`]
//! taxonomy for connection and dispatch failures, and the [`Event`] envelope
//! routed over the internal event bus.

pub mod fleet;
pub mod protocol;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use fleet::{AgvSnapshot, ErrorInfo, ErrorLevel, Position, Waypoint};
pub use protocol::{
    Action, ActionParameter, AgvPosition, BatteryState, BlockingType, Connection,
    ConnectionState, Edge, InstantActions, Node, NodePosition, Order, State, StateError,
    PROTOCOL_VERSION,
};

/// Lifecycle of the single broker session owned by the connection worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Connected => write!(f, "connected"),
        }
    }
}

/// Unified event wrapper for the fleet event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. `"fleetdash-middleware::supervisor"`
    pub source: String,
    pub payload: FleetEvent,
}

impl Event {
    /// Wrap `payload` in a fresh envelope stamped with the current time.
    pub fn new(source: impl Into<String>, payload: FleetEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data routed over the fleet event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum FleetEvent {
    /// A vehicle snapshot was created or mutated.
    SnapshotUpdated(AgvSnapshot),
    /// Every snapshot was discarded (teardown or lost broker session).
    FleetCleared,
    /// The broker session moved to a new state.
    SessionStateChanged(SessionState),
    /// A command was handed to the broker.
    CommandSent {
        serial: String,
        command: String,
        header_id: u32,
    },
    /// A command could not be confirmed.
    CommandFailed {
        serial: String,
        command: String,
        reason: String,
    },
}

/// Connection and dispatch failures.
///
/// These never cross the dispatcher's public boolean API; they are logged
/// there and surfaced only through the `try_*` variants.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FleetError {
    #[error("Invalid broker address '{address}': {reason}")]
    InvalidBrokerAddress { address: String, reason: String },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("A broker session is already active")]
    AlreadyConnected,

    #[error("Dispatch unavailable: {0}")]
    DispatchUnavailable(String),

    #[error("Dispatch not confirmed within {0:?}")]
    DispatchTimeout(Duration),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Worker channel error: {0}")]
    Channel(String),
}

impl From<serde_json::Error> for FleetError {
    fn from(e: serde_json::Error) -> Self {
        FleetError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_state_display() {
        assert_eq!(SessionState::Connected.to_string(), "connected");
        assert_eq!(SessionState::Disconnected.to_string(), "disconnected");
    }

    #[test]
    fn event_envelope_serializes_tagged_payload() {
        let event = Event::new("test", FleetEvent::SessionStateChanged(SessionState::Connecting));
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"sessionStateChanged""#));
        assert!(json.contains(r#""data":"connecting""#));

        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, event.id);
        assert!(matches!(
            back.payload,
            FleetEvent::SessionStateChanged(SessionState::Connecting)
        ));
    }

    #[test]
    fn fleet_cleared_serializes_without_data() {
        let json = serde_json::to_string(&FleetEvent::FleetCleared).unwrap();
        assert_eq!(json, r#"{"type":"fleetCleared"}"#);
    }

    #[test]
    fn fleet_error_display() {
        let err = FleetError::InvalidBrokerAddress {
            address: "localhost".to_string(),
            reason: "missing port".to_string(),
        };
        assert!(err.to_string().contains("localhost"));
        assert!(err.to_string().contains("missing port"));

        let err = FleetError::DispatchTimeout(Duration::from_secs(5));
        assert!(err.to_string().contains("5s"));
    }

    #[test]
    fn serde_error_converts_to_serialization() {
        let err: FleetError = serde_json::from_str::<Order>("{").unwrap_err().into();
        assert!(matches!(err, FleetError::Serialization(_)));
    }
}
