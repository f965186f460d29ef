//! # passerelle-store
//!
//! Durable bridge metadata, backed by SQLite.
//!
//! Holds everything the synchronization core must persist before acting
//! on it again: per-account session flags, per-portal revision counters,
//! ghost profiles, the locally cached backup snapshots consumed by the
//! history importer, and the message cache used for read-receipt fan-out.
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers per domain
//! model.

pub mod accounts;
pub mod database;
pub mod ghosts;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod portals;
pub mod snapshots;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
