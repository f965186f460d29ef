//! CRUD operations for [`Portal`] records.
//!
//! The `revision` column mirrors the remote network's authoritative
//! group-state version and must never regress; [`Database::set_revision`]
//! enforces that at the SQL level.  Callers serialize writes per portal
//! key (see the sync crate's lock arena), so read-modify-write here is
//! safe.

use chrono::{DateTime, Utc};
use rusqlite::params;

use passerelle_types::group::GroupMember;
use passerelle_types::{ChatId, PortalKey, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Portal;

/// SQL-side representation of a portal key.
fn key_columns(key: &PortalKey) -> (String, String) {
    let receiver = key
        .receiver
        .map(|r| r.to_string())
        .unwrap_or_default();
    (key.chat.to_string(), receiver)
}

impl Database {
    /// Insert a portal if it does not exist yet.
    pub fn ensure_portal(&self, key: &PortalKey) -> Result<()> {
        let (chat_id, receiver) = key_columns(key);
        self.conn().execute(
            "INSERT OR IGNORE INTO portals (chat_id, receiver) VALUES (?1, ?2)",
            params![chat_id, receiver],
        )?;
        Ok(())
    }

    /// Fetch a single portal by key.
    pub fn get_portal(&self, key: &PortalKey) -> Result<Portal> {
        let (chat_id, receiver) = key_columns(key);
        self.conn()
            .query_row(
                "SELECT chat_id, receiver, revision, last_sync, name, topic, avatar_ref,
                        expiration_timer, announcement_only, members
                 FROM portals
                 WHERE chat_id = ?1 AND receiver = ?2",
                params![chat_id, receiver],
                row_to_portal,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Advance the portal's revision.  The `MAX` guard makes regression
    /// impossible even under a misbehaving caller.
    pub fn set_revision(&self, key: &PortalKey, revision: u32) -> Result<()> {
        let (chat_id, receiver) = key_columns(key);
        self.conn().execute(
            "UPDATE portals SET revision = MAX(revision, ?3)
             WHERE chat_id = ?1 AND receiver = ?2",
            params![chat_id, receiver, revision],
        )?;
        Ok(())
    }

    /// Record when the portal's group state was last synchronized.
    pub fn set_portal_last_sync(&self, key: &PortalKey, at: DateTime<Utc>) -> Result<()> {
        let (chat_id, receiver) = key_columns(key);
        self.conn().execute(
            "UPDATE portals SET last_sync = ?3 WHERE chat_id = ?1 AND receiver = ?2",
            params![chat_id, receiver, at.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Persist scalar metadata fields.  `None` fields are left untouched.
    pub fn update_portal_meta(
        &self,
        key: &PortalKey,
        name: Option<&str>,
        topic: Option<&str>,
        avatar_ref: Option<&str>,
        expiration_timer: Option<u32>,
        announcement_only: Option<bool>,
    ) -> Result<()> {
        let (chat_id, receiver) = key_columns(key);
        self.conn().execute(
            "UPDATE portals SET
                 name              = COALESCE(?3, name),
                 topic             = COALESCE(?4, topic),
                 avatar_ref        = COALESCE(?5, avatar_ref),
                 expiration_timer  = COALESCE(?6, expiration_timer),
                 announcement_only = COALESCE(?7, announcement_only)
             WHERE chat_id = ?1 AND receiver = ?2",
            params![
                chat_id,
                receiver,
                name,
                topic,
                avatar_ref,
                expiration_timer,
                announcement_only,
            ],
        )?;
        Ok(())
    }

    /// Replace the stored membership list wholesale.
    pub fn set_portal_members(&self, key: &PortalKey, members: &[GroupMember]) -> Result<()> {
        let (chat_id, receiver) = key_columns(key);
        let json = serde_json::to_string(members)?;
        self.conn().execute(
            "UPDATE portals SET members = ?3 WHERE chat_id = ?1 AND receiver = ?2",
            params![chat_id, receiver, json],
        )?;
        Ok(())
    }

    /// Delete a portal by key.  Returns `true` if a row was deleted.
    pub fn delete_portal(&self, key: &PortalKey) -> Result<bool> {
        let (chat_id, receiver) = key_columns(key);
        let affected = self.conn().execute(
            "DELETE FROM portals WHERE chat_id = ?1 AND receiver = ?2",
            params![chat_id, receiver],
        )?;
        Ok(affected > 0)
    }
}

/// Map a `rusqlite::Row` to a [`Portal`].
fn row_to_portal(row: &rusqlite::Row<'_>) -> rusqlite::Result<Portal> {
    let chat_id_str: String = row.get(0)?;
    let receiver_str: String = row.get(1)?;
    let revision: u32 = row.get(2)?;
    let last_sync_str: Option<String> = row.get(3)?;
    let name: Option<String> = row.get(4)?;
    let topic: Option<String> = row.get(5)?;
    let avatar_ref: Option<String> = row.get(6)?;
    let expiration_timer: Option<u32> = row.get(7)?;
    let announcement_only: bool = row.get(8)?;
    let members_json: String = row.get(9)?;

    let text_err = |col, e: Box<dyn std::error::Error + Send + Sync>| {
        rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, e)
    };

    let chat = ChatId::parse(&chat_id_str).map_err(|e| text_err(0, Box::new(e)))?;
    let receiver = if receiver_str.is_empty() {
        None
    } else {
        Some(UserId::parse(&receiver_str).map_err(|e| text_err(1, Box::new(e)))?)
    };

    let last_sync = last_sync_str
        .map(|s| DateTime::parse_from_rfc3339(&s).map(|dt| dt.with_timezone(&Utc)))
        .transpose()
        .map_err(|e| text_err(3, Box::new(e)))?;

    let members: Vec<GroupMember> =
        serde_json::from_str(&members_json).map_err(|e| text_err(9, Box::new(e)))?;

    Ok(Portal {
        key: PortalKey { chat, receiver },
        revision,
        last_sync,
        name,
        topic,
        avatar_ref,
        expiration_timer,
        announcement_only,
        members,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use passerelle_types::group::GroupRole;
    use passerelle_types::{GroupId, MemberRef};
    use uuid::Uuid;

    fn group_key(name: &str) -> PortalKey {
        PortalKey::group(GroupId(name.to_string()))
    }

    #[test]
    fn portal_lifecycle() {
        let db = Database::open_in_memory().unwrap();
        let key = group_key("g1");

        db.ensure_portal(&key).unwrap();
        let portal = db.get_portal(&key).unwrap();
        assert_eq!(portal.revision, 0);
        assert!(portal.members.is_empty());

        db.update_portal_meta(&key, Some("Salon"), None, None, Some(3600), None)
            .unwrap();
        let portal = db.get_portal(&key).unwrap();
        assert_eq!(portal.name.as_deref(), Some("Salon"));
        assert_eq!(portal.expiration_timer, Some(3600));

        assert!(db.delete_portal(&key).unwrap());
        assert!(matches!(db.get_portal(&key), Err(StoreError::NotFound)));
    }

    #[test]
    fn revision_never_regresses() {
        let db = Database::open_in_memory().unwrap();
        let key = group_key("g2");
        db.ensure_portal(&key).unwrap();

        db.set_revision(&key, 7).unwrap();
        assert_eq!(db.get_portal(&key).unwrap().revision, 7);

        // A stale write must not move the counter backwards.
        db.set_revision(&key, 4).unwrap();
        assert_eq!(db.get_portal(&key).unwrap().revision, 7);

        db.set_revision(&key, 9).unwrap();
        assert_eq!(db.get_portal(&key).unwrap().revision, 9);
    }

    #[test]
    fn members_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let key = group_key("g3");
        db.ensure_portal(&key).unwrap();

        let members = vec![GroupMember {
            member: MemberRef::Primary(UserId(Uuid::from_u128(1))),
            role: GroupRole::Administrator,
        }];
        db.set_portal_members(&key, &members).unwrap();
        assert_eq!(db.get_portal(&key).unwrap().members, members);
    }

    #[test]
    fn direct_and_group_keys_do_not_clash() {
        let db = Database::open_in_memory().unwrap();
        let a = UserId(Uuid::from_u128(1));
        let b = UserId(Uuid::from_u128(2));
        let direct = PortalKey::direct(a, b);
        let group = group_key("g4");

        db.ensure_portal(&direct).unwrap();
        db.ensure_portal(&group).unwrap();

        assert_eq!(db.get_portal(&direct).unwrap().key, direct);
        assert_eq!(db.get_portal(&group).unwrap().key, group);
    }
}
