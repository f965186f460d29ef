//! CRUD operations for [`Account`] records and the per-account alias
//! mapping table.

use chrono::{DateTime, Utc};
use rusqlite::params;

use passerelle_types::{AliasId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Account;

impl Database {
    /// Insert an account if it does not exist yet.
    pub fn ensure_account(&self, user_id: UserId) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO accounts (user_id, history_imported, last_contact_sync)
             VALUES (?1, 0, NULL)",
            params![user_id.to_string()],
        )?;
        Ok(())
    }

    /// Fetch a single account.
    pub fn get_account(&self, user_id: UserId) -> Result<Account> {
        self.conn()
            .query_row(
                "SELECT user_id, history_imported, last_contact_sync
                 FROM accounts
                 WHERE user_id = ?1",
                params![user_id.to_string()],
                row_to_account,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Mark the one-time history import as completed.
    pub fn set_history_imported(&self, user_id: UserId) -> Result<()> {
        self.conn().execute(
            "UPDATE accounts SET history_imported = 1 WHERE user_id = ?1",
            params![user_id.to_string()],
        )?;
        Ok(())
    }

    /// Record when the contact list was last synchronized.
    pub fn set_last_contact_sync(&self, user_id: UserId, at: DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            "UPDATE accounts SET last_contact_sync = ?2 WHERE user_id = ?1",
            params![user_id.to_string(), at.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Remove an account and all of its device-learned alias mappings.
    /// Called on logout, together with remote session revocation.
    pub fn delete_account(&self, user_id: UserId) -> Result<bool> {
        self.conn().execute(
            "DELETE FROM alias_mappings WHERE account = ?1",
            params![user_id.to_string()],
        )?;
        let affected = self.conn().execute(
            "DELETE FROM accounts WHERE user_id = ?1",
            params![user_id.to_string()],
        )?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Alias mappings
    // ------------------------------------------------------------------

    /// Record that `account` has learned `alias` denotes `user_id`.
    pub fn set_alias_mapping(
        &self,
        account: UserId,
        alias: AliasId,
        user_id: UserId,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO alias_mappings (account, alias_id, user_id)
             VALUES (?1, ?2, ?3)",
            params![
                account.to_string(),
                alias.to_string(),
                user_id.to_string()
            ],
        )?;
        Ok(())
    }

    /// Resolve a secondary alias to a primary identifier, if this account
    /// has learned the mapping.
    pub fn resolve_alias(&self, account: UserId, alias: AliasId) -> Result<Option<UserId>> {
        let row = self
            .conn()
            .query_row(
                "SELECT user_id FROM alias_mappings
                 WHERE account = ?1 AND alias_id = ?2",
                params![account.to_string(), alias.to_string()],
                |row| row.get::<_, String>(0),
            );

        match row {
            Ok(s) => Ok(Some(UserId::parse(&s)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(other) => Err(StoreError::Sqlite(other)),
        }
    }
}

/// Map a `rusqlite::Row` to an [`Account`].
fn row_to_account(row: &rusqlite::Row<'_>) -> rusqlite::Result<Account> {
    let user_id_str: String = row.get(0)?;
    let history_imported: bool = row.get(1)?;
    let last_sync_str: Option<String> = row.get(2)?;

    let user_id = UserId::parse(&user_id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let last_contact_sync = last_sync_str
        .map(|s| DateTime::parse_from_rfc3339(&s).map(|dt| dt.with_timezone(&Utc)))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Account {
        user_id,
        history_imported,
        last_contact_sync,
    })
}
