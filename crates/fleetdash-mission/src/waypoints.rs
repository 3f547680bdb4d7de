//! Waypoint text input.
//!
//! One waypoint per line, `nodeId,x,y,theta`, blank lines ignored.  Line
//! numbers in errors are 1-based positions in the raw input, so they match
//! what the operator sees in their editor.
//!
//! | Check | Where | Outcome |
//! |---|---|---|
//! | 4 fields, non-empty id, finite numbers | [`parse_waypoints`] | [`MissionError::Format`] |
//! | `|x|`, `|y|` ≤ [`COORDINATE_LIMIT`] | [`parse_waypoints`], [`validate`] | [`MissionError::Range`] |
//! | unique node ids | [`parse_waypoints`] | [`MissionError::DuplicateIds`] |
//! | at most `max_nodes` waypoints | [`validate`] | [`MissionError::Capacity`] |
//! | consecutive spacing ≥ [`MIN_NODE_SPACING`] | [`validate`] | [`ValidationWarning`] |

use std::collections::HashMap;
use std::f64::consts::{PI, TAU};

use fleetdash_types::Waypoint;
use serde::Serialize;

use crate::MissionError;

/// Sanity bound on coordinates, in metres.
pub const COORDINATE_LIMIT: f64 = 1000.0;

/// Consecutive waypoints closer than this trigger a warning.
pub const MIN_NODE_SPACING: f64 = 0.1;

/// Node ceiling used when no configured value is supplied.
pub const DEFAULT_MAX_NODES: usize = 100;

/// Wrap `theta` into `[-π, π]` by whole turns.  In-range values are
/// returned untouched; anything else lands in `(-π, π]`.
pub fn normalize_theta(theta: f64) -> f64 {
    if (-PI..=PI).contains(&theta) {
        return theta;
    }
    PI - (PI - theta).rem_euclid(TAU)
}

/// Parse operator input into waypoints.
pub fn parse_waypoints(text: &str) -> Result<Vec<Waypoint>, MissionError> {
    let mut waypoints = Vec::new();

    for (index, raw) in text.lines().enumerate() {
        let line = index + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }

        let fields: Vec<&str> = trimmed.split(',').map(str::trim).collect();
        let [node_id, x, y, theta] = fields.as_slice() else {
            return Err(MissionError::Format {
                line,
                reason: format!(
                    "expected 4 values (nodeId,x,y,theta), got {}",
                    fields.len()
                ),
            });
        };

        if node_id.is_empty() {
            return Err(MissionError::Format {
                line,
                reason: "node ID cannot be empty".to_string(),
            });
        }

        let x = parse_number(x, "x", line)?;
        let y = parse_number(y, "y", line)?;
        let theta = parse_number(theta, "theta", line)?;
        check_range(x, y, line)?;

        waypoints.push(Waypoint {
            node_id: (*node_id).to_string(),
            x,
            y,
            theta: normalize_theta(theta),
            line: Some(line),
        });
    }

    if waypoints.is_empty() {
        return Err(MissionError::EmptyInput);
    }

    let duplicates = duplicate_ids(&waypoints);
    if !duplicates.is_empty() {
        return Err(MissionError::DuplicateIds(duplicates));
    }

    Ok(waypoints)
}

fn parse_number(field: &str, name: &str, line: usize) -> Result<f64, MissionError> {
    match field.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        Ok(_) => Err(MissionError::Format {
            line,
            reason: format!("{name} must be a finite number, got '{field}'"),
        }),
        Err(e) => Err(MissionError::Format {
            line,
            reason: format!("invalid number for {name} '{field}': {e}"),
        }),
    }
}

fn check_range(x: f64, y: f64, line: usize) -> Result<(), MissionError> {
    if x.abs() > COORDINATE_LIMIT || y.abs() > COORDINATE_LIMIT {
        return Err(MissionError::Range {
            line,
            x,
            y,
            limit: COORDINATE_LIMIT,
        });
    }
    Ok(())
}

/// Ids occurring more than once, in order of first appearance.
fn duplicate_ids(waypoints: &[Waypoint]) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for wp in waypoints {
        *counts.entry(wp.node_id.as_str()).or_default() += 1;
    }
    let mut duplicates: Vec<String> = Vec::new();
    for wp in waypoints {
        if counts[wp.node_id.as_str()] > 1 && !duplicates.contains(&wp.node_id) {
            duplicates.push(wp.node_id.clone());
        }
    }
    duplicates
}

// ─────────────────────────────────────────────────────────────────────────────
// Validation
// ─────────────────────────────────────────────────────────────────────────────

/// Non-fatal finding; the mission may still be sent.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationWarning {
    TooClose { from: String, to: String, distance: f64 },
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationWarning::TooClose { from, to, distance } => {
                write!(f, "Nodes '{from}' and '{to}' are very close ({distance:.2}m)")
            }
        }
    }
}

/// Check a waypoint list against the node ceiling and the coordinate bound,
/// then collect spacing warnings.
///
/// Waypoints loaded from storage never went through [`parse_waypoints`], so
/// the range check is repeated here.
pub fn validate(
    waypoints: &[Waypoint],
    max_nodes: usize,
) -> Result<Vec<ValidationWarning>, MissionError> {
    if waypoints.is_empty() {
        return Err(MissionError::EmptyWaypoints);
    }
    if waypoints.len() > max_nodes {
        return Err(MissionError::Capacity {
            count: waypoints.len(),
            max: max_nodes,
        });
    }
    for (index, wp) in waypoints.iter().enumerate() {
        check_range(wp.x, wp.y, wp.line.unwrap_or(index + 1))?;
    }

    Ok(waypoints
        .windows(2)
        .filter_map(|pair| {
            let distance = pair[0].distance_to(&pair[1]);
            (distance < MIN_NODE_SPACING).then(|| ValidationWarning::TooClose {
                from: pair[0].node_id.clone(),
                to: pair[1].node_id.clone(),
                distance,
            })
        })
        .collect())
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

/// Inverse of [`parse_waypoints`]: one `nodeId,x,y,theta` line per waypoint.
///
/// Numbers are written in their shortest round-trip form, so parsing the
/// result reproduces the same values.
pub fn format_waypoints(waypoints: &[Waypoint]) -> String {
    waypoints
        .iter()
        .map(|wp| format!("{},{},{},{}", wp.node_id, wp.x, wp.y, wp.theta))
        .collect::<Vec<_>>()
        .join("\n")
}

/// One row of a mission preview table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewRow {
    /// 1-based position in the mission.
    pub order: usize,
    pub node_id: String,
    pub x: String,
    pub y: String,
    pub theta: String,
    pub line: Option<usize>,
}

pub fn preview_rows(waypoints: &[Waypoint]) -> Vec<PreviewRow> {
    waypoints
        .iter()
        .enumerate()
        .map(|(i, wp)| PreviewRow {
            order: i + 1,
            node_id: wp.node_id.clone(),
            x: format!("{:.2}", wp.x),
            y: format!("{:.2}", wp.y),
            theta: format!("{:.3}", wp.theta),
            line: wp.line,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pickup_dropoff() {
        let wps = parse_waypoints("pickup,10.5,20.3,0.0\ndropoff,15.2,25.1,1.57").unwrap();
        assert_eq!(wps.len(), 2);
        assert_eq!(wps[0].node_id, "pickup");
        assert_eq!(wps[0].x, 10.5);
        assert_eq!(wps[1].theta, 1.57);
        assert_eq!(wps[1].line, Some(2));
    }

    #[test]
    fn blank_lines_are_skipped_but_counted() {
        let wps = parse_waypoints("\n  \na, 1, 2, 0\n\nb,3,4,0\n").unwrap();
        assert_eq!(wps.len(), 2);
        assert_eq!(wps[0].line, Some(3));
        assert_eq!(wps[1].line, Some(5));
    }

    #[test]
    fn wrong_field_count_cites_line() {
        let err = parse_waypoints("a,0,0,0\nb,1,1").unwrap_err();
        match err {
            MissionError::Format { line, reason } => {
                assert_eq!(line, 2);
                assert!(reason.contains("got 3"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn bad_number_cites_line() {
        let err = parse_waypoints("a,zero,0,0").unwrap_err();
        assert!(matches!(err, MissionError::Format { line: 1, .. }));
    }

    #[test]
    fn non_finite_numbers_are_rejected() {
        assert!(matches!(
            parse_waypoints("a,inf,0,0"),
            Err(MissionError::Format { .. })
        ));
        assert!(matches!(
            parse_waypoints("a,0,0,NaN"),
            Err(MissionError::Format { .. })
        ));
    }

    #[test]
    fn empty_node_id_is_rejected() {
        assert!(matches!(
            parse_waypoints(" ,0,0,0"),
            Err(MissionError::Format { line: 1, .. })
        ));
    }

    #[test]
    fn empty_input_is_rejected() {
        assert_eq!(parse_waypoints(""), Err(MissionError::EmptyInput));
        assert_eq!(parse_waypoints("\n \n\t\n"), Err(MissionError::EmptyInput));
    }

    #[test]
    fn far_coordinates_are_a_range_error() {
        let err = parse_waypoints("far,5000,0,0").unwrap_err();
        assert!(matches!(err, MissionError::Range { line: 1, .. }));
        assert!(parse_waypoints("edge,1000,-1000,0").is_ok());
    }

    #[test]
    fn duplicate_ids_are_named() {
        let err = parse_waypoints("a,0,0,0\na,1,1,0").unwrap_err();
        assert_eq!(err, MissionError::DuplicateIds(vec!["a".to_string()]));

        let err = parse_waypoints("b,0,0,0\na,1,1,0\nb,2,2,0\na,3,3,0\nc,4,4,0").unwrap_err();
        assert_eq!(
            err,
            MissionError::DuplicateIds(vec!["b".to_string(), "a".to_string()])
        );
    }

    #[test]
    fn theta_is_normalized() {
        let wps = parse_waypoints("a,0,0,7.0\nb,1,1,-7.0").unwrap();
        assert!((wps[0].theta - (7.0 - TAU)).abs() < 1e-12);
        assert!((wps[1].theta - (-7.0 + TAU)).abs() < 1e-12);
        for wp in &wps {
            assert!((-PI..=PI).contains(&wp.theta));
        }
    }

    #[test]
    fn normalize_keeps_in_range_values() {
        assert_eq!(normalize_theta(0.0), 0.0);
        assert_eq!(normalize_theta(PI), PI);
        assert_eq!(normalize_theta(-PI), -PI);
        let wrapped = normalize_theta(5.0 * PI);
        assert!((-PI..=PI).contains(&wrapped));
        assert!((wrapped.cos() + 1.0).abs() < 1e-9);
    }

    #[test]
    fn huge_theta_wraps_without_stalling() {
        let wps = parse_waypoints("a,0,0,1e20\nb,0,1,-1e20").unwrap();
        for wp in &wps {
            assert!((-PI..=PI).contains(&wp.theta), "theta {} out of range", wp.theta);
        }
        assert!((-PI..=PI).contains(&normalize_theta(1e12)));
        assert!((-PI..=PI).contains(&normalize_theta(f64::MAX)));
    }

    #[test]
    fn reparsing_formatted_output_is_stable() {
        let input = "a,0.1,-2.25,3.5\nb,999.999,0,-4\nc,1e-3,7,12.566";
        let first = parse_waypoints(input).unwrap();
        let second = parse_waypoints(&format_waypoints(&first)).unwrap();

        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.node_id, b.node_id);
            assert!((a.x - b.x).abs() < 1e-12);
            assert!((a.y - b.y).abs() < 1e-12);
            assert!((a.theta - b.theta).abs() < 1e-12);
        }
    }

    #[test]
    fn validate_enforces_capacity() {
        let wps: Vec<Waypoint> = (0..3)
            .map(|i| Waypoint::new(format!("n{i}"), f64::from(i), 0.0, 0.0))
            .collect();
        assert_eq!(
            validate(&wps, 2),
            Err(MissionError::Capacity { count: 3, max: 2 })
        );
        assert_eq!(validate(&wps, 3), Ok(vec![]));
    }

    #[test]
    fn validate_warns_on_close_neighbours() {
        let wps = vec![
            Waypoint::new("a", 0.0, 0.0, 0.0),
            Waypoint::new("b", 0.05, 0.0, 0.0),
            Waypoint::new("c", 5.0, 0.0, 0.0),
        ];
        let warnings = validate(&wps, DEFAULT_MAX_NODES).unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(
            warnings[0].to_string(),
            "Nodes 'a' and 'b' are very close (0.05m)"
        );
    }

    #[test]
    fn validate_rechecks_range_and_emptiness() {
        let wps = vec![Waypoint::new("far", 5000.0, 0.0, 0.0)];
        assert!(matches!(
            validate(&wps, DEFAULT_MAX_NODES),
            Err(MissionError::Range { line: 1, .. })
        ));
        assert_eq!(validate(&[], DEFAULT_MAX_NODES), Err(MissionError::EmptyWaypoints));
    }

    #[test]
    fn preview_formats_numbers() {
        let wps = parse_waypoints("a,1.234,5,0.12345").unwrap();
        let rows = preview_rows(&wps);
        assert_eq!(rows[0].order, 1);
        assert_eq!(rows[0].x, "1.23");
        assert_eq!(rows[0].y, "5.00");
        assert_eq!(rows[0].theta, "0.123");
        assert_eq!(rows[0].line, Some(1));
    }
}
