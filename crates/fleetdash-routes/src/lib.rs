//! `fleetdash-routes` – saved mission routes.
//!
//! Operators save a waypoint list under a name and dispatch it again later.
//! Routes are owned by the user who saved them: names are unique per owner
//! and only the owner may delete a route.
//!
//! # Storage layout
//!
//! A single SQLite table `mission_routes` is created (if it does not already
//! exist):
//!
//! | column      | type    | description                                   |
//! |-------------|---------|-----------------------------------------------|
//! | id          | INTEGER | autoincrement primary key                     |
//! | name        | TEXT    | trimmed route name, unique per `created_by`   |
//! | description | TEXT    | free text, may be empty                       |
//! | route_data  | TEXT    | JSON array of waypoints                       |
//! | created_by  | TEXT    | owning user                                   |
//! | created_at  | TEXT    | RFC-3339 creation timestamp (UTC)             |
//! | updated_at  | TEXT    | RFC-3339 last-update timestamp (UTC)          |
//!
//! # Example
//!
//! ```rust
//! use fleetdash_routes::RouteStore;
//! use fleetdash_types::Waypoint;
//!
//! let store = RouteStore::open_in_memory().unwrap();
//! let waypoints = vec![
//!     Waypoint::new("pickup", 10.5, 20.3, 0.0),
//!     Waypoint::new("dropoff", 15.2, 25.1, 1.57),
//! ];
//!
//! let id = store.save("Dock loop", "", &waypoints, "operator").unwrap();
//! assert_eq!(store.load(id).unwrap().waypoints, waypoints);
//!
//! // Only the owner can delete it.
//! assert!(store.delete(id, "someone_else").is_err());
//! store.delete(id, "operator").unwrap();
//! ```

use std::path::Path;

use chrono::{SecondsFormat, Utc};
use fleetdash_types::Waypoint;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum RouteStoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Route data is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Route not found: {0}")]
    NotFound(i64),
    #[error("Route '{name}' already exists for user '{created_by}'")]
    DuplicateName { name: String, created_by: String },
    #[error("Route {id} is not owned by '{user}'")]
    NotOwned { id: i64, user: String },
    #[error("Route name cannot be empty")]
    EmptyName,
    #[error("Route has no waypoints")]
    EmptyRoute,
}

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

/// A saved route including its waypoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedRoute {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub waypoints: Vec<Waypoint>,
    pub created_by: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Listing entry; the waypoints stay in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteSummary {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub created_by: String,
    pub created_at: String,
    pub updated_at: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// RouteStore
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite-backed saved-route storage.
pub struct RouteStore {
    conn: Connection,
}

const SUMMARY_COLUMNS: &str = "id, name, description, created_by, created_at, updated_at";

impl RouteStore {
    /// Open (or create) a persistent route database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RouteStoreError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Open a temporary in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self, RouteStoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), RouteStoreError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS mission_routes (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                name        TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                route_data  TEXT NOT NULL,
                created_by  TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_mission_routes_owner_name
                ON mission_routes (created_by, name);",
        )?;
        Ok(())
    }

    /// Save `waypoints` under `name` for `created_by` and return the new id.
    pub fn save(
        &self,
        name: &str,
        description: &str,
        waypoints: &[Waypoint],
        created_by: &str,
    ) -> Result<i64, RouteStoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RouteStoreError::EmptyName);
        }
        if waypoints.is_empty() {
            return Err(RouteStoreError::EmptyRoute);
        }

        let data = serde_json::to_string(waypoints)?;
        let now = timestamp();
        let inserted = self.conn.execute(
            "INSERT INTO mission_routes (name, description, route_data, created_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![name, description.trim(), data, created_by, now, now],
        );
        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                warn!(name, created_by, "route name already taken");
                return Err(RouteStoreError::DuplicateName {
                    name: name.to_string(),
                    created_by: created_by.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        }
        let id = self.conn.last_insert_rowid();
        info!(id, name, created_by, nodes = waypoints.len(), "route saved");
        Ok(id)
    }

    /// Fetch a route with its waypoints.
    pub fn load(&self, id: i64) -> Result<SavedRoute, RouteStoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, name, description, route_data, created_by, created_at, updated_at
                 FROM mission_routes WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()?
            .ok_or(RouteStoreError::NotFound(id))?;

        let (id, name, description, data, created_by, created_at, updated_at) = row;
        Ok(SavedRoute {
            id,
            name,
            description,
            waypoints: serde_json::from_str(&data)?,
            created_by,
            created_at,
            updated_at,
        })
    }

    /// Routes newest first, optionally only those of `created_by`.
    pub fn list(&self, created_by: Option<&str>) -> Result<Vec<RouteSummary>, RouteStoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SUMMARY_COLUMNS} FROM mission_routes
             WHERE ?1 IS NULL OR created_by = ?1
             ORDER BY updated_at DESC, id DESC"
        ))?;
        let rows = stmt.query_map(params![created_by], row_to_summary)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(RouteStoreError::Sqlite)
    }

    /// Routes whose name or description contains `query`
    /// (case-insensitive for ASCII), newest first.
    pub fn search(
        &self,
        query: &str,
        created_by: Option<&str>,
    ) -> Result<Vec<RouteSummary>, RouteStoreError> {
        let pattern = format!("%{}%", query.trim());
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SUMMARY_COLUMNS} FROM mission_routes
             WHERE (name LIKE ?1 OR description LIKE ?1)
               AND (?2 IS NULL OR created_by = ?2)
             ORDER BY updated_at DESC, id DESC"
        ))?;
        let rows = stmt.query_map(params![pattern, created_by], row_to_summary)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(RouteStoreError::Sqlite)
    }

    /// Delete route `id`.  Only its owner may do so.
    pub fn delete(&self, id: i64, created_by: &str) -> Result<(), RouteStoreError> {
        let owner: Option<String> = self
            .conn
            .query_row(
                "SELECT created_by FROM mission_routes WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        match owner {
            None => Err(RouteStoreError::NotFound(id)),
            Some(owner) if owner != created_by => {
                warn!(id, user = created_by, "refusing to delete a route owned by someone else");
                Err(RouteStoreError::NotOwned {
                    id,
                    user: created_by.to_string(),
                })
            }
            Some(_) => {
                self.conn
                    .execute("DELETE FROM mission_routes WHERE id = ?1", params![id])?;
                info!(id, user = created_by, "route deleted");
                Ok(())
            }
        }
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn row_to_summary(row: &rusqlite::Row<'_>) -> rusqlite::Result<RouteSummary> {
    Ok(RouteSummary {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        created_by: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
