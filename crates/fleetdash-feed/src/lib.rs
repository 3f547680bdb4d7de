//! `fleetdash-feed` – read-only fleet feed for dashboard clients
//!
//! Boots a lightweight HTTP + WebSocket server (default port `8765`) that:
//!
//! 1. **Answers** plain HTTP `GET` requests with the current fleet snapshot
//!    as JSON (`/` or `/fleet` for every vehicle, `/fleet/{serial}` for one).
//!
//! 2. **Streams** every fleet event bus message to connected WebSocket
//!    clients, after an initial full snapshot frame.
//!
//! 3. **Accepts** one upstream request: `{"op":"snapshot"}` re-sends the
//!    full snapshot.
//!
//! The feed never sends commands; dispatch stays with the CLI.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fleetdash_middleware::{EventBus, FleetStateStore};
//! use fleetdash_feed::FleetFeedServer;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = Arc::new(FleetStateStore::new());
//!     let bus = Arc::new(EventBus::default());
//!     FleetFeedServer::new(store, bus)
//!         .run()
//!         .await
//!         .expect("fleet feed failed");
//! }
//! ```

pub mod server;

pub use server::{FeedError, FleetFeedServer, DEFAULT_PORT};
