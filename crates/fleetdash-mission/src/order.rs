//! Order construction and order ids.
//!
//! For `N` waypoints the order has `N` nodes and `N − 1` edges.  Node `i`
//! gets `sequenceId = 2i`, edge `i` gets `sequenceId = 2i + 1` and joins
//! node `i` to node `i + 1`.  Every node and edge is released; the order is
//! a first issuance (`orderUpdateId = 0`).  `headerId` is left at `0` for
//! the dispatcher to stamp.

use chrono::{DateTime, Local, NaiveDateTime, Utc};
use fleetdash_types::{Edge, Node, NodePosition, Order, Waypoint, PROTOCOL_VERSION};
use serde::Serialize;

use crate::MissionError;

pub const DEFAULT_MAP_ID: &str = "map";
pub const DEFAULT_ORDER_PREFIX: &str = "ORDER";

/// Knobs for [`build_order_with`].
#[derive(Debug, Clone)]
pub struct OrderOptions {
    pub map_id: String,
    pub timestamp: DateTime<Utc>,
}

impl Default for OrderOptions {
    fn default() -> Self {
        Self {
            map_id: DEFAULT_MAP_ID.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Build an order on the default map, stamped now.
pub fn build_order(
    order_id: &str,
    manufacturer: &str,
    serial: &str,
    waypoints: &[Waypoint],
) -> Result<Order, MissionError> {
    build_order_with(order_id, manufacturer, serial, waypoints, &OrderOptions::default())
}

pub fn build_order_with(
    order_id: &str,
    manufacturer: &str,
    serial: &str,
    waypoints: &[Waypoint],
    options: &OrderOptions,
) -> Result<Order, MissionError> {
    if waypoints.is_empty() {
        return Err(MissionError::EmptyWaypoints);
    }

    let nodes = waypoints
        .iter()
        .zip((0u32..).step_by(2))
        .map(|(wp, sequence_id)| Node {
            node_id: wp.node_id.clone(),
            sequence_id,
            released: true,
            node_position: NodePosition {
                x: wp.x,
                y: wp.y,
                theta: wp.theta,
                map_id: options.map_id.clone(),
            },
            actions: Vec::new(),
        })
        .collect();

    let edges = waypoints
        .windows(2)
        .zip((1u32..).step_by(2))
        .map(|(pair, sequence_id)| Edge {
            edge_id: format!("{}_{}", pair[0].node_id, pair[1].node_id),
            sequence_id,
            released: true,
            start_node_id: pair[0].node_id.clone(),
            end_node_id: pair[1].node_id.clone(),
            actions: Vec::new(),
        })
        .collect();

    Ok(Order {
        header_id: 0,
        timestamp: options.timestamp,
        protocol_version: PROTOCOL_VERSION.to_string(),
        manufacturer: manufacturer.to_string(),
        serial_number: serial.to_string(),
        order_id: order_id.to_string(),
        order_update_id: 0,
        nodes,
        edges,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Order ids
// ─────────────────────────────────────────────────────────────────────────────

/// `{prefix}-YYYYMMDD-HHMMSS` in local time.
///
/// Two calls within the same second return the same id.
pub fn generate_order_id(prefix: &str) -> String {
    generate_order_id_at(prefix, Local::now().naive_local())
}

pub fn generate_order_id_at(prefix: &str, at: NaiveDateTime) -> String {
    format!("{prefix}-{}", at.format("%Y%m%d-%H%M%S"))
}

/// `true` iff `order_id`, once trimmed, is non-empty and made only of ASCII
/// letters, digits, `-` and `_`.
pub fn validate_order_id(order_id: &str) -> bool {
    let trimmed = order_id.trim();
    !trimmed.is_empty()
        && trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

// ─────────────────────────────────────────────────────────────────────────────
// Summary
// ─────────────────────────────────────────────────────────────────────────────

/// Headline numbers for an order, shown before and after dispatch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissionSummary {
    pub order_id: String,
    pub target_agv: String,
    pub total_nodes: usize,
    pub total_edges: usize,
    pub released_nodes: usize,
    pub released_edges: usize,
    pub first_node: Option<String>,
    pub last_node: Option<String>,
}

impl From<&Order> for MissionSummary {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.order_id.clone(),
            target_agv: order.serial_number.clone(),
            total_nodes: order.nodes.len(),
            total_edges: order.edges.len(),
            released_nodes: order.nodes.iter().filter(|n| n.released).count(),
            released_edges: order.edges.iter().filter(|e| e.released).count(),
            first_node: order.nodes.first().map(|n| n.node_id.clone()),
            last_node: order.nodes.last().map(|n| n.node_id.clone()),
        }
    }
}

impl std::fmt::Display for MissionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} → {}: {} nodes, {} edges",
            self.order_id, self.target_agv, self.total_nodes, self.total_edges
        )?;
        if let (Some(first), Some(last)) = (&self.first_node, &self.last_node) {
            write!(f, " ({first} … {last})")?;
        }
        Ok(())
    }
}
