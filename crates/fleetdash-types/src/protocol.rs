//! Vehicle protocol messages.
//!
//! Field names follow the wire format (camelCase JSON).  Outbound messages
//! ([`Order`], [`InstantActions`]) are complete; inbound messages ([`State`],
//! [`Connection`]) model only the fields the dashboard consumes and default
//! everything else so that partial messages still decode.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fleet::ErrorLevel;

/// Protocol version stamped on every outbound message.
pub const PROTOCOL_VERSION: &str = "2.1.0";

// ─────────────────────────────────────────────────────────────────────────────
// Outbound: orders
// ─────────────────────────────────────────────────────────────────────────────

/// A sequenced mission for one vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub header_id: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "version")]
    pub protocol_version: String,
    pub manufacturer: String,
    pub serial_number: String,
    pub order_id: String,
    pub order_update_id: u32,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub node_id: String,
    pub sequence_id: u32,
    pub released: bool,
    pub node_position: NodePosition,
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePosition {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
    pub map_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub edge_id: String,
    pub sequence_id: u32,
    pub released: bool,
    pub start_node_id: String,
    pub end_node_id: String,
    pub actions: Vec<Action>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Outbound: instant actions
// ─────────────────────────────────────────────────────────────────────────────

/// How an action interacts with driving and other actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BlockingType {
    None,
    Soft,
    #[default]
    Hard,
}

impl std::fmt::Display for BlockingType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockingType::None => write!(f, "NONE"),
            BlockingType::Soft => write!(f, "SOFT"),
            BlockingType::Hard => write!(f, "HARD"),
        }
    }
}

impl std::str::FromStr for BlockingType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NONE" => Ok(BlockingType::None),
            "SOFT" => Ok(BlockingType::Soft),
            "HARD" => Ok(BlockingType::Hard),
            other => Err(format!("unknown blocking type '{other}' (expected NONE, SOFT or HARD)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionParameter {
    pub key: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    /// e.g. `"emergencyStop"`, `"startPause"`, `"cancelOrder"`
    pub action_type: String,
    pub action_id: String,
    pub blocking_type: BlockingType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_parameters: Option<Vec<ActionParameter>>,
}

/// Immediate, non-mission command message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstantActions {
    pub header_id: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "version")]
    pub protocol_version: String,
    pub manufacturer: String,
    pub serial_number: String,
    pub actions: Vec<Action>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Inbound: state
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BatteryState {
    pub battery_charge: f64,
    pub charging: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgvPosition {
    pub x: f64,
    pub y: f64,
    pub theta: Option<f64>,
    pub map_id: String,
    pub position_initialized: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateError {
    pub error_type: String,
    #[serde(default)]
    pub error_description: String,
    pub error_level: ErrorLevel,
}

/// Periodic vehicle state report (subset).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct State {
    pub header_id: u32,
    pub timestamp: Option<DateTime<Utc>>,
    pub version: String,
    pub manufacturer: String,
    pub serial_number: String,
    pub order_id: String,
    pub operating_mode: String,
    pub battery_state: BatteryState,
    pub agv_position: Option<AgvPosition>,
    pub errors: Vec<StateError>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Inbound: connection
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectionState {
    Online,
    Offline,
    #[serde(rename = "CONNECTIONBROKEN")]
    ConnectionBroken,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Online => write!(f, "ONLINE"),
            ConnectionState::Offline => write!(f, "OFFLINE"),
            ConnectionState::ConnectionBroken => write!(f, "CONNECTIONBROKEN"),
        }
    }
}

/// Vehicle connection report (retained last-will on the broker).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    #[serde(default)]
    pub header_id: u32,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub manufacturer: String,
    #[serde(default)]
    pub serial_number: String,
    pub connection_state: ConnectionState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_uses_wire_field_names() {
        let order = Order {
            header_id: 3,
            timestamp: Utc::now(),
            protocol_version: PROTOCOL_VERSION.to_string(),
            manufacturer: "Acme".to_string(),
            serial_number: "V1".to_string(),
            order_id: "ORDER-1".to_string(),
            order_update_id: 0,
            nodes: vec![Node {
                node_id: "a".to_string(),
                sequence_id: 0,
                released: true,
                node_position: NodePosition {
                    x: 1.0,
                    y: 2.0,
                    theta: 0.0,
                    map_id: "map".to_string(),
                },
                actions: vec![],
            }],
            edges: vec![],
        };
        let json = serde_json::to_value(&order).unwrap();
        assert_eq!(json["headerId"], 3);
        assert_eq!(json["version"], PROTOCOL_VERSION);
        assert_eq!(json["serialNumber"], "V1");
        assert_eq!(json["orderUpdateId"], 0);
        assert_eq!(json["nodes"][0]["nodePosition"]["mapId"], "map");
        assert_eq!(json["nodes"][0]["sequenceId"], 0);
        assert!(json.get("protocolVersion").is_none());
    }

    #[test]
    fn action_omits_absent_parameters() {
        let action = Action {
            action_type: "emergencyStop".to_string(),
            action_id: "id-1".to_string(),
            blocking_type: BlockingType::Hard,
            action_parameters: None,
        };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["blockingType"], "HARD");
        assert!(json.get("actionParameters").is_none());
    }

    #[test]
    fn blocking_type_parses_case_insensitively() {
        assert_eq!("soft".parse::<BlockingType>(), Ok(BlockingType::Soft));
        assert_eq!(" HARD ".parse::<BlockingType>(), Ok(BlockingType::Hard));
        assert!("firm".parse::<BlockingType>().is_err());
    }

    #[test]
    fn partial_state_decodes_with_defaults() {
        let raw = r#"{
            "headerId": 7,
            "manufacturer": "Acme",
            "serialNumber": "V1",
            "batteryState": {"batteryCharge": 55.0},
            "errors": [{"errorType": "bumper", "errorLevel": "FATAL"}]
        }"#;
        let state: State = serde_json::from_str(raw).unwrap();
        assert_eq!(state.header_id, 7);
        assert_eq!(state.battery_state.battery_charge, 55.0);
        assert!(state.agv_position.is_none());
        assert!(state.order_id.is_empty());
        assert_eq!(state.errors[0].error_level, ErrorLevel::Fatal);
        assert!(state.errors[0].error_description.is_empty());
    }

    #[test]
    fn connection_state_wire_names() {
        let conn: Connection =
            serde_json::from_str(r#"{"connectionState":"CONNECTIONBROKEN"}"#).unwrap();
        assert_eq!(conn.connection_state, ConnectionState::ConnectionBroken);
        assert_eq!(conn.connection_state.to_string(), "CONNECTIONBROKEN");
    }
}
