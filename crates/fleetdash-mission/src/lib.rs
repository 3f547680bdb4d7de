//! `fleetdash-mission` – turning operator input into vehicle orders.
//!
//! Everything here is pure and synchronous: no network state, no clock other
//! than the one read by the `*_now`-style convenience wrappers.
//!
//! # Modules
//!
//! - [`waypoints`] – parse `nodeId,x,y,theta` text, validate a waypoint
//!   list, and format it back for display or storage.
//! - [`order`] – build a sequenced [`Order`][fleetdash_types::Order] from
//!   waypoints, generate and check order ids, summarise an order.
//!
//! # Example
//!
//! ```rust
//! use fleetdash_mission::{build_order, parse_waypoints};
//!
//! let waypoints = parse_waypoints("pickup,10.5,20.3,0.0\ndropoff,15.2,25.1,1.57").unwrap();
//! let order = build_order("ORDER-1", "Acme", "V1", &waypoints).unwrap();
//!
//! assert_eq!(order.nodes.len(), 2);
//! assert_eq!(order.edges.len(), 1);
//! assert_eq!(order.edges[0].sequence_id, 1);
//! ```

pub mod order;
pub mod waypoints;

use thiserror::Error;

pub use order::{
    build_order, build_order_with, generate_order_id, generate_order_id_at, validate_order_id,
    MissionSummary, OrderOptions, DEFAULT_MAP_ID, DEFAULT_ORDER_PREFIX,
};
pub use waypoints::{
    format_waypoints, normalize_theta, parse_waypoints, preview_rows, validate, PreviewRow,
    ValidationWarning, COORDINATE_LIMIT, DEFAULT_MAX_NODES, MIN_NODE_SPACING,
};

/// User-correctable problems with mission input.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MissionError {
    #[error("Line {line}: {reason}")]
    Format { line: usize, reason: String },

    #[error("No waypoints found in input")]
    EmptyInput,

    #[error("Line {line}: coordinates ({x}, {y}) out of range (max ±{limit}m)")]
    Range { line: usize, x: f64, y: f64, limit: f64 },

    #[error("Duplicate node IDs found: {}", .0.join(", "))]
    DuplicateIds(Vec<String>),

    #[error("Too many nodes: {count} (maximum: {max})")]
    Capacity { count: usize, max: usize },

    #[error("Cannot build an order without waypoints")]
    EmptyWaypoints,

    #[error("Invalid order id '{0}': use letters, digits, '-' or '_'")]
    InvalidOrderId(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_cite_details() {
        let e = MissionError::Format {
            line: 3,
            reason: "expected 4 values".to_string(),
        };
        assert_eq!(e.to_string(), "Line 3: expected 4 values");

        let e = MissionError::DuplicateIds(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(e.to_string(), "Duplicate node IDs found: a, b");

        let e = MissionError::Capacity { count: 101, max: 100 };
        assert_eq!(e.to_string(), "Too many nodes: 101 (maximum: 100)");
    }
}
