//! The dashboard's view of the fleet.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::{Connection, ConnectionState, State};

/// Severity attached to an error reported by a vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ErrorLevel {
    Warning,
    Error,
    Fatal,
}

impl std::fmt::Display for ErrorLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorLevel::Warning => write!(f, "WARNING"),
            ErrorLevel::Error => write!(f, "ERROR"),
            ErrorLevel::Fatal => write!(f, "FATAL"),
        }
    }
}

/// One entry of a vehicle's active error list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    /// When the dashboard observed the error.
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub error_type: String,
    pub description: String,
    pub severity: ErrorLevel,
}

/// Planar vehicle position (map frame or longitude/latitude).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Latest known state of one vehicle.
///
/// A snapshot is created with [`AgvSnapshot::new`] on the first message for
/// a serial and mutated in place afterwards.  Fields a message may omit have
/// their defaults fixed here, not at the read sites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgvSnapshot {
    pub serial: String,
    pub manufacturer: String,
    /// Last connection state the vehicle reported, empty until one arrives.
    pub connection_status: String,
    pub battery_percent: f64,
    pub operating_mode: String,
    pub position: Position,
    /// Heading in radians.
    pub heading: f64,
    pub last_update: DateTime<Utc>,
    /// Set once when the serial is first observed; stable sort key for listings.
    pub connect_timestamp: DateTime<Utc>,
    pub current_order_id: Option<String>,
    pub errors: Vec<ErrorInfo>,
}

impl AgvSnapshot {
    /// Zero-valued snapshot for a newly observed serial.
    pub fn new(serial: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            serial: serial.into(),
            manufacturer: String::new(),
            connection_status: String::new(),
            battery_percent: 0.0,
            operating_mode: String::new(),
            position: Position::default(),
            heading: 0.0,
            last_update: now,
            connect_timestamp: now,
            current_order_id: None,
            errors: Vec::new(),
        }
    }

    /// Fold an inbound [`State`] message into this snapshot.
    ///
    /// Position and heading are only replaced when the message carries an
    /// `agvPosition`; a missing `theta` counts as `0.0`.  `last_update` never
    /// moves backwards.
    pub fn apply_state(&mut self, state: &State, observed_at: DateTime<Utc>) {
        if !state.manufacturer.is_empty() {
            self.manufacturer = state.manufacturer.clone();
        }
        self.battery_percent = state.battery_state.battery_charge.clamp(0.0, 100.0);
        self.operating_mode = state.operating_mode.clone();

        if let Some(pos) = &state.agv_position {
            self.position = Position { x: pos.x, y: pos.y };
            self.heading = pos.theta.unwrap_or(0.0);
        }

        self.current_order_id = if state.order_id.is_empty() {
            None
        } else {
            Some(state.order_id.clone())
        };

        self.errors = state
            .errors
            .iter()
            .map(|e| ErrorInfo {
                timestamp: observed_at,
                error_type: e.error_type.clone(),
                description: e.error_description.clone(),
                severity: e.error_level,
            })
            .collect();

        self.touch(observed_at);
    }

    /// Record a vehicle-level connection message.
    pub fn apply_connection(&mut self, connection: &Connection, observed_at: DateTime<Utc>) {
        if !connection.manufacturer.is_empty() {
            self.manufacturer = connection.manufacturer.clone();
        }
        self.connection_status = connection.connection_state.to_string();
        self.touch(observed_at);
    }

    /// `true` when the vehicle last reported itself online.
    pub fn is_online(&self) -> bool {
        self.connection_status == ConnectionState::Online.to_string()
    }

    fn touch(&mut self, observed_at: DateTime<Utc>) {
        if observed_at > self.last_update {
            self.last_update = observed_at;
        }
    }
}

/// One mission waypoint as entered by an operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Waypoint {
    /// Unique within a mission.
    pub node_id: String,
    pub x: f64,
    pub y: f64,
    /// Radians, normalized to `[-π, π]`.
    pub theta: f64,
    /// 1-based input line the waypoint was parsed from, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

impl Waypoint {
    pub fn new(node_id: impl Into<String>, x: f64, y: f64, theta: f64) -> Self {
        Self {
            node_id: node_id.into(),
            x,
            y,
            theta,
            line: None,
        }
    }

    /// Euclidean distance to `other` in the x/y plane.
    pub fn distance_to(&self, other: &Waypoint) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }
}
