//! Message cache: (room, sender, origin timestamp) triples.
//!
//! This is not the room system's timeline — only the minimal index the
//! router needs to fan read/delivery receipts out over prior messages
//! and to resolve which room a receipt's referenced timestamp lives in.

use rusqlite::params;

use passerelle_types::{ChatId, PortalKey, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::CachedMessage;

fn key_columns(key: &PortalKey) -> (String, String) {
    let receiver = key
        .receiver
        .map(|r| r.to_string())
        .unwrap_or_default();
    (key.chat.to_string(), receiver)
}

impl Database {
    /// Record a message for later receipt fan-out.  Duplicate delivery is
    /// expected; re-inserting the same triple is a no-op.
    pub fn cache_message(&self, message: &CachedMessage) -> Result<()> {
        let (chat_id, receiver) = key_columns(&message.portal);
        self.conn().execute(
            "INSERT OR IGNORE INTO messages (chat_id, receiver, sender, timestamp_ms)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                chat_id,
                receiver,
                message.sender.to_string(),
                message.timestamp_ms as i64,
            ],
        )?;
        Ok(())
    }

    /// All cached messages of a room inside `[since_ms, until_ms]`,
    /// oldest first.
    pub fn cached_messages_in_range(
        &self,
        portal: &PortalKey,
        since_ms: u64,
        until_ms: u64,
    ) -> Result<Vec<CachedMessage>> {
        let (chat_id, receiver) = key_columns(portal);
        let mut stmt = self.conn().prepare(
            "SELECT chat_id, receiver, sender, timestamp_ms
             FROM messages
             WHERE chat_id = ?1 AND receiver = ?2
               AND timestamp_ms >= ?3 AND timestamp_ms <= ?4
             ORDER BY timestamp_ms ASC",
        )?;

        let rows = stmt.query_map(
            params![chat_id, receiver, since_ms as i64, until_ms as i64],
            row_to_cached_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Find the room a message lives in, by its derivable identity.
    /// Used when a receipt arrives without any room context.
    pub fn find_cached_message(
        &self,
        sender: UserId,
        timestamp_ms: u64,
    ) -> Result<Option<CachedMessage>> {
        let row = self.conn().query_row(
            "SELECT chat_id, receiver, sender, timestamp_ms
             FROM messages
             WHERE sender = ?1 AND timestamp_ms = ?2",
            params![sender.to_string(), timestamp_ms as i64],
            row_to_cached_message,
        );

        match row {
            Ok(msg) => Ok(Some(msg)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(other) => Err(StoreError::Sqlite(other)),
        }
    }

    /// Drop all cached messages of a room (chat delete / resync).
    pub fn delete_cached_messages(&self, portal: &PortalKey) -> Result<usize> {
        let (chat_id, receiver) = key_columns(portal);
        let affected = self.conn().execute(
            "DELETE FROM messages WHERE chat_id = ?1 AND receiver = ?2",
            params![chat_id, receiver],
        )?;
        Ok(affected)
    }
}

fn row_to_cached_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<CachedMessage> {
    let chat_id_str: String = row.get(0)?;
    let receiver_str: String = row.get(1)?;
    let sender_str: String = row.get(2)?;
    let timestamp_ms: i64 = row.get(3)?;

    let text_err = |col, e: Box<dyn std::error::Error + Send + Sync>| {
        rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, e)
    };

    let chat = ChatId::parse(&chat_id_str).map_err(|e| text_err(0, Box::new(e)))?;
    let receiver = if receiver_str.is_empty() {
        None
    } else {
        Some(UserId::parse(&receiver_str).map_err(|e| text_err(1, Box::new(e)))?)
    };
    let sender = UserId::parse(&sender_str).map_err(|e| text_err(2, Box::new(e)))?;

    Ok(CachedMessage {
        portal: PortalKey { chat, receiver },
        sender,
        timestamp_ms: timestamp_ms as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use passerelle_types::GroupId;
    use uuid::Uuid;

    fn user(n: u128) -> UserId {
        UserId(Uuid::from_u128(n))
    }

    fn key() -> PortalKey {
        PortalKey::group(GroupId("g".into()))
    }

    #[test]
    fn cache_and_query_range() {
        let db = Database::open_in_memory().unwrap();
        let portal = key();

        for ts in [100u64, 200, 300] {
            db.cache_message(&CachedMessage {
                portal: portal.clone(),
                sender: user(1),
                timestamp_ms: ts,
            })
            .unwrap();
        }

        let hits = db.cached_messages_in_range(&portal, 150, 300).unwrap();
        assert_eq!(
            hits.iter().map(|m| m.timestamp_ms).collect::<Vec<_>>(),
            vec![200, 300]
        );
    }

    #[test]
    fn duplicate_delivery_is_ignored() {
        let db = Database::open_in_memory().unwrap();
        let msg = CachedMessage {
            portal: key(),
            sender: user(1),
            timestamp_ms: 42,
        };
        db.cache_message(&msg).unwrap();
        db.cache_message(&msg).unwrap();
        assert_eq!(db.cached_messages_in_range(&key(), 0, 100).unwrap().len(), 1);
    }

    #[test]
    fn find_by_derivable_identity() {
        let db = Database::open_in_memory().unwrap();
        let msg = CachedMessage {
            portal: key(),
            sender: user(2),
            timestamp_ms: 777,
        };
        db.cache_message(&msg).unwrap();

        let found = db.find_cached_message(user(2), 777).unwrap().unwrap();
        assert_eq!(found.portal, key());
        assert!(db.find_cached_message(user(2), 778).unwrap().is_none());
    }
}
