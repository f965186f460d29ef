//! Persistence of locally cached backup snapshots.
//!
//! A snapshot is a per-conversation, time-bounded cache of prehistory
//! obtained out-of-band (device-to-device transfer).  Items are stored
//! newest-first as one JSON blob.  Only the history importer mutates
//! these rows: it either deletes a snapshot after the final page or
//! trims the consumed time range.

use rusqlite::params;

use passerelle_types::{ChatId, PortalKey, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::SnapshotItem;

fn key_columns(key: &PortalKey) -> (String, String) {
    let receiver = key
        .receiver
        .map(|r| r.to_string())
        .unwrap_or_default();
    (key.chat.to_string(), receiver)
}

impl Database {
    /// Store (or replace) the cached snapshot for a conversation.
    /// `items` must be ordered newest-first.
    pub fn put_snapshot(&self, key: &PortalKey, items: &[SnapshotItem]) -> Result<()> {
        let (chat_id, receiver) = key_columns(key);
        let json = serde_json::to_string(items)?;
        self.conn().execute(
            "INSERT OR REPLACE INTO backup_snapshots (chat_id, receiver, items)
             VALUES (?1, ?2, ?3)",
            params![chat_id, receiver, json],
        )?;
        Ok(())
    }

    /// Load the cached snapshot for a conversation, newest-first.
    /// Returns `None` when the conversation has no importable prehistory.
    pub fn get_snapshot(&self, key: &PortalKey) -> Result<Option<Vec<SnapshotItem>>> {
        let (chat_id, receiver) = key_columns(key);
        let row = self.conn().query_row(
            "SELECT items FROM backup_snapshots WHERE chat_id = ?1 AND receiver = ?2",
            params![chat_id, receiver],
            |row| row.get::<_, String>(0),
        );

        match row {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(other) => Err(StoreError::Sqlite(other)),
        }
    }

    /// Every conversation that still holds importable prehistory.
    pub fn snapshot_portals(&self) -> Result<Vec<PortalKey>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT chat_id, receiver FROM backup_snapshots")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut keys = Vec::new();
        for row in rows {
            let (chat_id, receiver) = row?;
            let chat = ChatId::parse(&chat_id)?;
            let receiver = if receiver.is_empty() {
                None
            } else {
                Some(UserId::parse(&receiver)?)
            };
            keys.push(PortalKey { chat, receiver });
        }
        Ok(keys)
    }

    /// Delete the snapshot for a conversation.  Returns `true` if a row
    /// was deleted.
    pub fn delete_snapshot(&self, key: &PortalKey) -> Result<bool> {
        let (chat_id, receiver) = key_columns(key);
        let affected = self.conn().execute(
            "DELETE FROM backup_snapshots WHERE chat_id = ?1 AND receiver = ?2",
            params![chat_id, receiver],
        )?;
        Ok(affected > 0)
    }

    /// Drop the already-consumed newer portion of a snapshot, keeping
    /// only items strictly older than `cutoff_ms`.  Deletes the row when
    /// nothing remains; returns how many items are left.
    pub fn trim_snapshot_newer_than(&self, key: &PortalKey, cutoff_ms: u64) -> Result<usize> {
        let Some(items) = self.get_snapshot(key)? else {
            return Ok(0);
        };

        let remaining: Vec<SnapshotItem> = items
            .into_iter()
            .filter(|item| item.timestamp_ms < cutoff_ms)
            .collect();

        if remaining.is_empty() {
            self.delete_snapshot(key)?;
        } else {
            self.put_snapshot(key, &remaining)?;
        }
        Ok(remaining.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SnapshotAuthor, SnapshotDirection};
    use passerelle_types::{GroupId, UserId};
    use uuid::Uuid;

    fn item(ts: u64) -> SnapshotItem {
        SnapshotItem {
            author: SnapshotAuthor::known(UserId(Uuid::from_u128(1))),
            timestamp_ms: ts,
            direction: SnapshotDirection::Outgoing,
            body: Some(format!("m{ts}")),
            reactions: Vec::new(),
        }
    }

    fn key() -> PortalKey {
        PortalKey::group(GroupId("g".into()))
    }

    #[test]
    fn snapshot_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let key = key();

        assert!(db.get_snapshot(&key).unwrap().is_none());

        let items = vec![item(300), item(200), item(100)];
        db.put_snapshot(&key, &items).unwrap();
        assert_eq!(db.get_snapshot(&key).unwrap().unwrap(), items);

        assert!(db.delete_snapshot(&key).unwrap());
        assert!(db.get_snapshot(&key).unwrap().is_none());
    }

    #[test]
    fn snapshot_portals_lists_every_key() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.snapshot_portals().unwrap().is_empty());

        let direct = PortalKey::direct(UserId(Uuid::from_u128(2)), UserId(Uuid::from_u128(1)));
        db.put_snapshot(&key(), &[item(100)]).unwrap();
        db.put_snapshot(&direct, &[item(200)]).unwrap();

        let portals = db.snapshot_portals().unwrap();
        assert_eq!(portals.len(), 2);
        assert!(portals.contains(&key()));
        assert!(portals.contains(&direct));
    }

    #[test]
    fn trim_keeps_older_remainder() {
        let db = Database::open_in_memory().unwrap();
        let key = key();
        db.put_snapshot(&key, &[item(300), item(200), item(100)])
            .unwrap();

        // The page covering [200, 300] was consumed.
        let left = db.trim_snapshot_newer_than(&key, 200).unwrap();
        assert_eq!(left, 1);
        assert_eq!(db.get_snapshot(&key).unwrap().unwrap(), vec![item(100)]);

        // Consuming the rest removes the row entirely.
        let left = db.trim_snapshot_newer_than(&key, 100).unwrap();
        assert_eq!(left, 0);
        assert!(db.get_snapshot(&key).unwrap().is_none());
    }
}
