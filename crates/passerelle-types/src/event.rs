//! Normalized events handed to the room system.
//!
//! Every variant carries the portal key and the sender identity; targets
//! of reactions, edits and deletions are derived [`MessageId`]s, never
//! database lookups, so the room system must tolerate references to
//! not-yet-known messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::envelope::{AttachmentRef, EmbeddedPayload, ReceiptKind};
use crate::group::{GroupMeta, GroupRole};
use crate::ids::{MemberRef, MessageId, PortalKey, UserId};

/// The closed set of event kinds the room system consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NormalizedEvent {
    NewMessage(MessageEvent),
    Edit(EditEvent),
    Reaction(ReactionEvent),
    ReactionRemoval(ReactionEvent),
    Deletion(DeletionEvent),
    ReadReceipt(ReceiptEvent),
    DeliveryReceipt(ReceiptEvent),
    TypingStart(TypingEvent),
    TypingStop(TypingEvent),
    MembershipChange(MembershipChangeEvent),
    MetadataChange(MetadataChangeEvent),
    ChatResync(ChatEvent),
    ChatDelete(ChatEvent),
}

impl NormalizedEvent {
    pub fn portal(&self) -> &PortalKey {
        match self {
            NormalizedEvent::NewMessage(e) => &e.portal,
            NormalizedEvent::Edit(e) => &e.portal,
            NormalizedEvent::Reaction(e) | NormalizedEvent::ReactionRemoval(e) => &e.portal,
            NormalizedEvent::Deletion(e) => &e.portal,
            NormalizedEvent::ReadReceipt(e) | NormalizedEvent::DeliveryReceipt(e) => &e.portal,
            NormalizedEvent::TypingStart(e) | NormalizedEvent::TypingStop(e) => &e.portal,
            NormalizedEvent::MembershipChange(e) => &e.portal,
            NormalizedEvent::MetadataChange(e) => &e.portal,
            NormalizedEvent::ChatResync(e) | NormalizedEvent::ChatDelete(e) => &e.portal,
        }
    }
}

/// A new message for the room timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEvent {
    pub portal: PortalKey,
    pub sender: UserId,
    /// Derived identifier; collaborators may recompute it from
    /// (sender, timestamp).
    pub id: MessageId,
    pub timestamp: DateTime<Utc>,
    pub body: Option<String>,
    pub attachments: Vec<AttachmentRef>,
    pub embed: Option<EmbeddedPayload>,
    /// Disappearing-message timer in effect, seconds.
    pub expiration_timer: Option<u32>,
    /// Create the room on first reference when it is not yet known.
    pub create_portal: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditEvent {
    pub portal: PortalKey,
    pub sender: UserId,
    /// Identifier of the message being replaced.
    pub target: MessageId,
    pub timestamp: DateTime<Utc>,
    pub body: Option<String>,
    pub attachments: Vec<AttachmentRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionEvent {
    pub portal: PortalKey,
    pub sender: UserId,
    pub target: MessageId,
    pub emoji: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionEvent {
    pub portal: PortalKey,
    pub sender: UserId,
    pub target: MessageId,
    pub timestamp: DateTime<Utc>,
}

/// One receipt for one referenced message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptEvent {
    pub portal: PortalKey,
    pub sender: UserId,
    pub target: MessageId,
    pub kind: ReceiptKind,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingEvent {
    pub portal: PortalKey,
    pub sender: UserId,
    /// For a start signal: when consumers must consider the indicator
    /// stale even without an explicit stop.  Stop signals carry none.
    pub expires_at: Option<DateTime<Utc>>,
}

/// What happened to one member in a membership-change batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum MemberChange {
    Joined { role: GroupRole },
    Left,
    RoleChanged { role: GroupRole },
    Invited,
    InviteRevoked,
    Knocked,
    KnockRetracted,
    KnockApproved { role: GroupRole },
    Banned,
    Unbanned,
}

/// One entry of a membership-change batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipEntry {
    pub member: MemberRef,
    pub change: MemberChange,
    /// Synthetic duplicate emitted under a mapped primary identifier to
    /// collapse a dual-identity; excluded from the visible timeline.
    pub hidden: bool,
}

/// The membership half of one applied group delta (or snapshot).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipChangeEvent {
    pub portal: PortalKey,
    /// The acting account, when the delta names one.
    pub sender: Option<UserId>,
    /// Revision the room is at after this batch.
    pub revision: u32,
    pub entries: Vec<MembershipEntry>,
    /// Snapshot replace: membership not listed here must be dropped.
    pub replace_all: bool,
    pub timestamp: DateTime<Utc>,
}

/// The scalar-metadata half of one applied group delta (or snapshot).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataChangeEvent {
    pub portal: PortalKey,
    pub sender: Option<UserId>,
    pub revision: u32,
    pub meta: GroupMeta,
    pub timestamp: DateTime<Utc>,
}

/// Account-level chat lifecycle events from sync messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatEvent {
    pub portal: PortalKey,
    pub sender: UserId,
    pub timestamp: DateTime<Utc>,
}
