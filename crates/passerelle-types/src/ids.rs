//! Identifier scheme: stable, re-derivable external IDs for messages and
//! rooms, computed from remote-network primitives.
//!
//! No component ever allocates a sequence number or consults a lookup
//! table to address a prior message.  Reactions, edits and deletions all
//! recompute the target [`MessageId`] locally from the pair
//! (author account identifier, author-origin send timestamp), so two
//! independent computations of the same pair must always yield the same
//! string.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::IdParseError;

// ---------------------------------------------------------------------------
// Account identifiers
// ---------------------------------------------------------------------------

/// The primary, stable identifier of a remote account.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn parse(s: &str) -> Result<Self, IdParseError> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A secondary, phone-derived alias identifier for a remote account.
///
/// An alias may later be confirmed (via a device-level mapping) to denote
/// the same account as some [`UserId`]; until then it is addressed as its
/// own identity.  Rendered with an `ALIAS:` prefix so the two namespaces
/// can never collide.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct AliasId(pub Uuid);

impl AliasId {
    pub fn parse(s: &str) -> Result<Self, IdParseError> {
        let raw = s.strip_prefix("ALIAS:").unwrap_or(s);
        Ok(Self(Uuid::parse_str(raw)?))
    }
}

impl fmt::Display for AliasId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ALIAS:{}", self.0)
    }
}

/// Either side of the dual-identifier scheme.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MemberRef {
    Primary(UserId),
    Alias(AliasId),
}

impl fmt::Display for MemberRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberRef::Primary(u) => write!(f, "{u}"),
            MemberRef::Alias(a) => write!(f, "{a}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Conversation identifiers
// ---------------------------------------------------------------------------

/// Opaque identifier of a remote group conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct GroupId(pub String);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A remote conversation: either a direct chat with one account or a
/// group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ChatId {
    Direct(UserId),
    Group(GroupId),
}

impl ChatId {
    pub fn is_group(&self) -> bool {
        matches!(self, ChatId::Group(_))
    }

    pub fn parse(s: &str) -> Result<Self, IdParseError> {
        if let Some(raw) = s.strip_prefix("group:") {
            return Ok(ChatId::Group(GroupId(raw.to_string())));
        }
        if let Some(raw) = s.strip_prefix("direct:") {
            return Ok(ChatId::Direct(UserId::parse(raw)?));
        }
        Err(IdParseError::UnknownChatPrefix(
            s.split(':').next().unwrap_or_default().to_string(),
        ))
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatId::Direct(user) => write!(f, "direct:{user}"),
            ChatId::Group(group) => write!(f, "group:{group}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Portal key
// ---------------------------------------------------------------------------

/// Composite key of a bridged room: the conversation plus the owning
/// account (empty for groups, which are shared between all local
/// accounts).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PortalKey {
    pub chat: ChatId,
    pub receiver: Option<UserId>,
}

impl PortalKey {
    /// Key for a direct chat, always scoped to the owning account.
    pub fn direct(other: UserId, receiver: UserId) -> Self {
        Self {
            chat: ChatId::Direct(other),
            receiver: Some(receiver),
        }
    }

    /// Key for a group chat, shared across local accounts.
    pub fn group(group: GroupId) -> Self {
        Self {
            chat: ChatId::Group(group),
            receiver: None,
        }
    }
}

impl fmt::Display for PortalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.receiver {
            Some(receiver) => write!(f, "{}|{receiver}", self.chat),
            None => write!(f, "{}|", self.chat),
        }
    }
}

// ---------------------------------------------------------------------------
// Message identifier
// ---------------------------------------------------------------------------

/// Derived message identifier: `"<author uuid>|<origin timestamp ms>"`.
///
/// Never stored as a source of truth.  Collisions require the remote
/// network to reuse a timestamp for one author, which it guarantees not
/// to do.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MessageId(String);

impl MessageId {
    /// Compute the identifier for a message sent by `author` at
    /// `timestamp_ms` (author-origin milliseconds).
    pub fn from_parts(author: UserId, timestamp_ms: u64) -> Self {
        Self(format!("{author}|{timestamp_ms}"))
    }

    /// Recover the (author, timestamp) pair from an identifier string.
    pub fn parse(s: &str) -> Result<(UserId, u64), IdParseError> {
        let (author, ts) = s.split_once('|').ok_or(IdParseError::MissingSeparator)?;
        Ok((UserId::parse(author)?, ts.parse::<u64>()?))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
