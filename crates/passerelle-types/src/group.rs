//! Authoritative group-state shapes: full snapshots and numbered
//! incremental deltas.
//!
//! A delta is numbered by the revision it produces and is only ever
//! applied in ascending revision order.  Intermediate states must remain
//! observable, so deltas are never coalesced.

use serde::{Deserialize, Serialize};

use crate::ids::{GroupId, MemberRef};

/// A member's role inside a group.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum GroupRole {
    Default,
    Administrator,
}

/// Who is allowed to perform a guarded group operation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccessLevel {
    Anyone,
    Member,
    Administrator,
    Nobody,
}

/// One member entry of a snapshot or delta.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupMember {
    pub member: MemberRef,
    pub role: GroupRole,
}

/// Scalar metadata fields of a group.  In a delta, `None` means
/// "unchanged"; in a snapshot the values are authoritative.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupMeta {
    pub title: Option<String>,
    pub description: Option<String>,
    pub avatar_ref: Option<String>,
    /// Disappearing-message timer in seconds; `Some(0)` disables it.
    pub expiration_timer: Option<u32>,
    pub announcement_only: Option<bool>,
    /// Who may modify title/description/avatar.
    pub attribute_access: Option<AccessLevel>,
    /// Who may invite new members.
    pub member_access: Option<AccessLevel>,
}

impl GroupMeta {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.avatar_ref.is_none()
            && self.expiration_timer.is_none()
            && self.announcement_only.is_none()
            && self.attribute_access.is_none()
            && self.member_access.is_none()
    }
}

/// One ordered membership/metadata change, numbered by the revision it
/// brings the group to.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupDelta {
    /// The revision this delta produces when applied.
    pub revision: u32,
    pub members_added: Vec<GroupMember>,
    pub members_removed: Vec<MemberRef>,
    pub role_changes: Vec<GroupMember>,
    pub invites_added: Vec<MemberRef>,
    pub invites_removed: Vec<MemberRef>,
    pub join_requests_added: Vec<MemberRef>,
    pub join_requests_removed: Vec<MemberRef>,
    /// Join requests approved into full membership.
    pub join_requests_promoted: Vec<GroupMember>,
    pub bans_added: Vec<MemberRef>,
    pub bans_removed: Vec<MemberRef>,
    pub meta: GroupMeta,
}

impl GroupDelta {
    pub fn new(revision: u32) -> Self {
        Self {
            revision,
            ..Default::default()
        }
    }
}

/// Full authoritative group state at one revision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupSnapshot {
    pub group_id: GroupId,
    pub revision: u32,
    pub members: Vec<GroupMember>,
    pub invites: Vec<MemberRef>,
    pub join_requests: Vec<MemberRef>,
    pub bans: Vec<MemberRef>,
    pub meta: GroupMeta,
}
