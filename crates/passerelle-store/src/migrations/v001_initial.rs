//! v001 -- Initial schema creation.
//!
//! Creates the six core tables: `accounts`, `portals`, `ghosts`,
//! `alias_mappings`, `backup_snapshots`, and `messages`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Accounts (one per logged-in remote account)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS accounts (
    user_id           TEXT PRIMARY KEY NOT NULL,  -- stable account UUID
    history_imported  INTEGER NOT NULL DEFAULT 0, -- boolean 0/1
    last_contact_sync TEXT                        -- RFC 3339, nullable
);

-- ----------------------------------------------------------------
-- Portals (one per remote conversation)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS portals (
    chat_id           TEXT NOT NULL,              -- "direct:<uuid>" / "group:<id>"
    receiver          TEXT NOT NULL DEFAULT '',   -- owning account UUID, '' for groups
    revision          INTEGER NOT NULL DEFAULT 0, -- group revision, non-decreasing
    last_sync         TEXT,                       -- RFC 3339, nullable
    name              TEXT,
    topic             TEXT,
    avatar_ref        TEXT,
    expiration_timer  INTEGER,                    -- seconds, nullable
    announcement_only INTEGER NOT NULL DEFAULT 0,
    members           TEXT NOT NULL DEFAULT '[]', -- JSON membership list

    PRIMARY KEY (chat_id, receiver)
);

-- ----------------------------------------------------------------
-- Ghosts (remote-user shadows, shared between rooms)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS ghosts (
    user_id            TEXT PRIMARY KEY NOT NULL,
    display_name       TEXT,
    avatar_ref         TEXT,
    profile_fetched_at TEXT                       -- RFC 3339, nullable
);

-- ----------------------------------------------------------------
-- Alias mappings (secondary identifier -> primary, per account)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS alias_mappings (
    account  TEXT NOT NULL,                       -- local account UUID
    alias_id TEXT NOT NULL,                       -- "ALIAS:<uuid>"
    user_id  TEXT NOT NULL,                       -- mapped primary UUID

    PRIMARY KEY (account, alias_id)
);

-- ----------------------------------------------------------------
-- Backup snapshots (cached prehistory, consumed by the importer)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS backup_snapshots (
    chat_id  TEXT NOT NULL,
    receiver TEXT NOT NULL DEFAULT '',
    items    TEXT NOT NULL,                       -- JSON array, newest first

    PRIMARY KEY (chat_id, receiver)
);

-- ----------------------------------------------------------------
-- Message cache (for read-receipt fan-out)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    chat_id      TEXT NOT NULL,
    receiver     TEXT NOT NULL DEFAULT '',
    sender       TEXT NOT NULL,                   -- author UUID
    timestamp_ms INTEGER NOT NULL,                -- author-origin millis

    PRIMARY KEY (sender, timestamp_ms, receiver)
);

CREATE INDEX IF NOT EXISTS idx_messages_chat_ts
    ON messages(chat_id, receiver, timestamp_ms DESC);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
