//! Domain model structs persisted in the local database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use passerelle_types::group::GroupMember;
use passerelle_types::{AliasId, PortalKey, UserId};

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

/// One logged-in remote account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    /// Stable account identifier.
    pub user_id: UserId,
    /// Whether the one-time history import has completed.  Persisted
    /// before the importer reports success onward.
    pub history_imported: bool,
    /// When the contact list was last synchronized from the account's
    /// other devices.
    pub last_contact_sync: Option<DateTime<Utc>>,
}

impl Account {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            history_imported: false,
            last_contact_sync: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Portal
// ---------------------------------------------------------------------------

/// One bridged room, keyed by (conversation, owning account).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Portal {
    pub key: PortalKey,
    /// Remote group revision.  Monotonically non-decreasing; only
    /// meaningful for group conversations.
    pub revision: u32,
    pub last_sync: Option<DateTime<Utc>>,
    pub name: Option<String>,
    pub topic: Option<String>,
    pub avatar_ref: Option<String>,
    /// Disappearing-message timer in seconds.
    pub expiration_timer: Option<u32>,
    pub announcement_only: bool,
    pub members: Vec<GroupMember>,
}

impl Portal {
    pub fn new(key: PortalKey) -> Self {
        Self {
            key,
            revision: 0,
            last_sync: None,
            name: None,
            topic: None,
            avatar_ref: None,
            expiration_timer: None,
            announcement_only: false,
            members: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Ghost
// ---------------------------------------------------------------------------

/// Shadow of a remote account inside the room system.  Shared between
/// rooms, not owned by any single one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ghost {
    pub user_id: UserId,
    pub display_name: Option<String>,
    pub avatar_ref: Option<String>,
    /// Used to avoid redundant profile refetches.
    pub profile_fetched_at: Option<DateTime<Utc>>,
}

impl Ghost {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            display_name: None,
            avatar_ref: None,
            profile_fetched_at: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Backup snapshot items
// ---------------------------------------------------------------------------

/// Author reference inside a snapshot item.  Either side may be missing
/// (e.g. a deleted account leaves only an alias, or nothing at all).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotAuthor {
    pub user_id: Option<UserId>,
    pub alias: Option<AliasId>,
}

impl SnapshotAuthor {
    pub fn known(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            alias: None,
        }
    }
}

/// Whether a snapshot item was received or locally sent, with the
/// direction-specific delivery metadata.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SnapshotDirection {
    /// Received from another participant; carries the server-assigned
    /// sequence number and the read flag.
    Incoming { server_seq: u64, read: bool },
    /// Sent by the local account; carries only the local send timestamp.
    Outgoing,
}

/// A reaction attached to a snapshot item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotReaction {
    pub author: SnapshotAuthor,
    pub emoji: String,
    pub timestamp_ms: u64,
}

/// One cached history item.  Snapshots store items newest-first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotItem {
    pub author: SnapshotAuthor,
    /// Author-origin send timestamp in milliseconds.
    pub timestamp_ms: u64,
    pub direction: SnapshotDirection,
    pub body: Option<String>,
    pub reactions: Vec<SnapshotReaction>,
}

// ---------------------------------------------------------------------------
// Message cache
// ---------------------------------------------------------------------------

/// A cached (room, sender, timestamp) triple for read-receipt fan-out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CachedMessage {
    pub portal: PortalKey,
    pub sender: UserId,
    pub timestamp_ms: u64,
}
