//! CRUD operations for [`Ghost`] records.

use chrono::{DateTime, Duration, Utc};
use rusqlite::params;

use passerelle_types::UserId;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Ghost;

impl Database {
    /// Insert a ghost if it does not exist yet.
    pub fn ensure_ghost(&self, user_id: UserId) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO ghosts (user_id) VALUES (?1)",
            params![user_id.to_string()],
        )?;
        Ok(())
    }

    /// Fetch a single ghost.
    pub fn get_ghost(&self, user_id: UserId) -> Result<Ghost> {
        self.conn()
            .query_row(
                "SELECT user_id, display_name, avatar_ref, profile_fetched_at
                 FROM ghosts
                 WHERE user_id = ?1",
                params![user_id.to_string()],
                row_to_ghost,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Store a freshly fetched profile and stamp the fetch time.
    pub fn update_ghost_profile(
        &self,
        user_id: UserId,
        display_name: Option<&str>,
        avatar_ref: Option<&str>,
        fetched_at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn().execute(
            "UPDATE ghosts SET
                 display_name       = ?2,
                 avatar_ref         = ?3,
                 profile_fetched_at = ?4
             WHERE user_id = ?1",
            params![
                user_id.to_string(),
                display_name,
                avatar_ref,
                fetched_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Whether the ghost's profile is stale enough to refetch.  Unknown
    /// ghosts always need a fetch.
    pub fn ghost_needs_profile_fetch(
        &self,
        user_id: UserId,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        match self.get_ghost(user_id) {
            Ok(ghost) => Ok(match ghost.profile_fetched_at {
                Some(fetched) => now - fetched > max_age,
                None => true,
            }),
            Err(StoreError::NotFound) => Ok(true),
            Err(e) => Err(e),
        }
    }
}

/// Map a `rusqlite::Row` to a [`Ghost`].
fn row_to_ghost(row: &rusqlite::Row<'_>) -> rusqlite::Result<Ghost> {
    let user_id_str: String = row.get(0)?;
    let display_name: Option<String> = row.get(1)?;
    let avatar_ref: Option<String> = row.get(2)?;
    let fetched_str: Option<String> = row.get(3)?;

    let user_id = UserId::parse(&user_id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let profile_fetched_at = fetched_str
        .map(|s| DateTime::parse_from_rfc3339(&s).map(|dt| dt.with_timezone(&Utc)))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Ghost {
        user_id,
        display_name,
        avatar_ref,
        profile_fetched_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn user(n: u128) -> UserId {
        UserId(Uuid::from_u128(n))
    }

    #[test]
    fn ghost_profile_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let id = user(1);

        db.ensure_ghost(id).unwrap();
        let ghost = db.get_ghost(id).unwrap();
        assert!(ghost.display_name.is_none());

        let now = Utc::now();
        db.update_ghost_profile(id, Some("Amélie"), Some("avatar/1"), now)
            .unwrap();
        let ghost = db.get_ghost(id).unwrap();
        assert_eq!(ghost.display_name.as_deref(), Some("Amélie"));
        assert_eq!(ghost.avatar_ref.as_deref(), Some("avatar/1"));
    }

    #[test]
    fn profile_fetch_staleness() {
        let db = Database::open_in_memory().unwrap();
        let id = user(2);
        let now = Utc::now();
        let max_age =
            Duration::from_std(passerelle_types::constants::PROFILE_REFETCH_INTERVAL).unwrap();

        // Unknown ghost: fetch.
        assert!(db.ghost_needs_profile_fetch(id, max_age, now).unwrap());

        db.ensure_ghost(id).unwrap();
        // Known but never fetched: fetch.
        assert!(db.ghost_needs_profile_fetch(id, max_age, now).unwrap());

        db.update_ghost_profile(id, None, None, now).unwrap();
        // Freshly fetched: no fetch.
        assert!(!db.ghost_needs_profile_fetch(id, max_age, now).unwrap());
        // Two days later: stale again.
        assert!(db
            .ghost_needs_profile_fetch(id, max_age, now + Duration::hours(48))
            .unwrap());
    }
}
