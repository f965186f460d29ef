//! Core state-synchronization engine of the passerelle bridge.
//!
//! Ties the pieces together: the connection lifecycle manager
//! ([`connection`]), the one-time history importer ([`backfill`]), the
//! group state synchronizer ([`groups`]) and the event router
//! ([`router`]), all sharing one [`SharedDb`] handle and a per-portal
//! lock arena ([`locks`]).  [`bridge::spawn_engine`] assembles the
//! whole pipeline for one account.

pub mod backfill;
pub mod bridge;
pub mod config;
pub mod connection;
pub mod groups;
pub mod locks;
pub mod router;

mod error;

use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use tracing_subscriber::{fmt, EnvFilter};

pub use bridge::{spawn_engine, EngineEvent, EngineHandle};
pub use config::SyncConfig;
pub use error::SyncError;

use passerelle_store::Database;

/// The database handle shared by every engine component.  rusqlite
/// connections are not `Sync`, so access goes through a std mutex; every
/// holder keeps its critical sections short and never awaits while
/// holding the guard.
pub type SharedDb = Arc<Mutex<Database>>;

/// Install the global tracing subscriber.  `RUST_LOG` wins when set.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("passerelle_sync=debug,passerelle_store=info,warn"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

/// Convert an author-origin millisecond timestamp to UTC.  Out-of-range
/// values (a malformed remote clock) collapse to "now" rather than
/// failing the whole frame.
pub(crate) fn millis_to_utc(ms: u64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms as i64)
        .single()
        .unwrap_or_else(Utc::now)
}
