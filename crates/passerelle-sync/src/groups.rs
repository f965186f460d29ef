//! Group state catch-up: incremental delta replay with full-snapshot
//! fallback.
//!
//! The portal's `revision` column is the single source of truth for how
//! far the local copy has advanced.  Revision is persisted after every
//! applied delta, so an interruption at any point leaves the portal at
//! the last fully applied revision and a later catch-up resumes from
//! there.  Deltas are never coalesced: each one produces its own
//! membership batch and metadata record so intermediate states stay
//! observable.
//!
//! Callers must hold the portal's lock (see [`crate::locks`]) across the
//! whole catch-up.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use passerelle_store::Database;
use passerelle_types::group::{GroupDelta, GroupSnapshot};
use passerelle_types::event::{
    MemberChange, MembershipChangeEvent, MembershipEntry, MetadataChangeEvent, NormalizedEvent,
};
use passerelle_types::{GroupId, MemberRef, PortalKey, UserId};

use crate::error::SyncError;
use crate::SharedDb;

/// Remote authority for group state.  Implemented over the transport's
/// storage-service API; faked in tests.
#[async_trait]
pub trait GroupSource: Send + Sync {
    /// Fetch the full current state of a group.
    async fn fetch_snapshot(&self, group: &GroupId) -> anyhow::Result<GroupSnapshot>;

    /// Fetch the ordered deltas producing revisions `from..=to`.
    async fn fetch_deltas(
        &self,
        group: &GroupId,
        from: u32,
        to: u32,
    ) -> anyhow::Result<Vec<GroupDelta>>;
}

/// Drives portals' group state towards the remote authority's revision.
pub struct GroupSynchronizer<S: GroupSource> {
    db: SharedDb,
    source: Arc<S>,
    account: UserId,
    shutdown: watch::Receiver<bool>,
}

impl<S: GroupSource> GroupSynchronizer<S> {
    pub fn new(
        db: SharedDb,
        source: Arc<S>,
        account: UserId,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            db,
            source,
            account,
            shutdown,
        }
    }

    /// Advance a group portal from revision `from` to revision `to`.
    ///
    /// Idempotent: a no-op when `from >= to`.  Unknown local state
    /// (`from == 0`) or a delta-fetch failure resolves via a full
    /// snapshot replace; a failing snapshot fetch is a hard error and
    /// leaves applied progress intact.
    pub async fn catch_up(
        &self,
        portal: &PortalKey,
        from: u32,
        to: u32,
        timestamp: DateTime<Utc>,
    ) -> Result<Vec<NormalizedEvent>, SyncError> {
        if from >= to {
            debug!(portal = %portal, from, to, "Group already caught up");
            return Ok(Vec::new());
        }
        let group = match &portal.chat {
            passerelle_types::ChatId::Group(group) => group.clone(),
            passerelle_types::ChatId::Direct(_) => {
                debug!(portal = %portal, "Direct chats carry no group state");
                return Ok(Vec::new());
            }
        };

        {
            let db = self.db.lock().map_err(|_| SyncError::LockPoisoned)?;
            db.ensure_portal(portal)?;
        }

        if from == 0 {
            return self.resync_from_snapshot(portal, &group, timestamp).await;
        }

        let deltas = match self.source.fetch_deltas(&group, from + 1, to).await {
            Ok(deltas) => deltas,
            Err(e) => {
                warn!(
                    portal = %portal,
                    from,
                    to,
                    error = %e,
                    "Delta fetch failed, resyncing from snapshot"
                );
                return self.resync_from_snapshot(portal, &group, timestamp).await;
            }
        };

        let mut events = Vec::new();
        for delta in deltas {
            if *self.shutdown.borrow() {
                info!(portal = %portal, "Catch-up cancelled between deltas");
                return Err(SyncError::Cancelled);
            }
            if delta.revision <= from || delta.revision > to {
                debug!(
                    portal = %portal,
                    revision = delta.revision,
                    "Skipping out-of-range delta"
                );
                continue;
            }
            events.extend(self.apply_delta(portal, &delta, None, timestamp)?);
        }

        let db = self.db.lock().map_err(|_| SyncError::LockPoisoned)?;
        db.set_portal_last_sync(portal, timestamp)?;
        Ok(events)
    }

    /// Apply one delta carried inline by a message, after the portal has
    /// been caught up to `delta.revision - 1`.
    pub fn apply_embedded_delta(
        &self,
        portal: &PortalKey,
        delta: &GroupDelta,
        sender: Option<UserId>,
        timestamp: DateTime<Utc>,
    ) -> Result<Vec<NormalizedEvent>, SyncError> {
        {
            let db = self.db.lock().map_err(|_| SyncError::LockPoisoned)?;
            db.ensure_portal(portal)?;
            if db.get_portal(portal)?.revision >= delta.revision {
                debug!(
                    portal = %portal,
                    revision = delta.revision,
                    "Embedded delta already applied"
                );
                return Ok(Vec::new());
            }
        }
        self.apply_delta(portal, delta, sender, timestamp)
    }

    /// Replace the local copy with the authoritative snapshot.
    async fn resync_from_snapshot(
        &self,
        portal: &PortalKey,
        group: &GroupId,
        timestamp: DateTime<Utc>,
    ) -> Result<Vec<NormalizedEvent>, SyncError> {
        let snapshot = self
            .source
            .fetch_snapshot(group)
            .await
            .map_err(|e| SyncError::GroupFetch(e.to_string()))?;
        info!(
            portal = %portal,
            revision = snapshot.revision,
            members = snapshot.members.len(),
            "Replacing group state from snapshot"
        );

        let db = self.db.lock().map_err(|_| SyncError::LockPoisoned)?;

        let mut entries = Vec::new();
        for member in &snapshot.members {
            self.push_entries(
                &db,
                &mut entries,
                member.member,
                MemberChange::Joined { role: member.role },
            );
        }
        for invited in &snapshot.invites {
            self.push_entries(&db, &mut entries, *invited, MemberChange::Invited);
        }
        for knocking in &snapshot.join_requests {
            self.push_entries(&db, &mut entries, *knocking, MemberChange::Knocked);
        }
        for banned in &snapshot.bans {
            self.push_entries(&db, &mut entries, *banned, MemberChange::Banned);
        }

        db.set_portal_members(portal, &snapshot.members)?;
        self.persist_meta(&db, portal, &snapshot.meta)?;
        db.set_revision(portal, snapshot.revision)?;
        db.set_portal_last_sync(portal, timestamp)?;

        let mut events = vec![NormalizedEvent::MembershipChange(MembershipChangeEvent {
            portal: portal.clone(),
            sender: None,
            revision: snapshot.revision,
            entries,
            replace_all: true,
            timestamp,
        })];
        if !snapshot.meta.is_empty() {
            events.push(NormalizedEvent::MetadataChange(MetadataChangeEvent {
                portal: portal.clone(),
                sender: None,
                revision: snapshot.revision,
                meta: snapshot.meta.clone(),
                timestamp,
            }));
        }
        Ok(events)
    }

    /// Apply one delta: mutate the stored membership list, persist the
    /// produced revision, and emit this delta's own event batch.
    fn apply_delta(
        &self,
        portal: &PortalKey,
        delta: &GroupDelta,
        sender: Option<UserId>,
        timestamp: DateTime<Utc>,
    ) -> Result<Vec<NormalizedEvent>, SyncError> {
        let db = self.db.lock().map_err(|_| SyncError::LockPoisoned)?;
        let mut members = db.get_portal(portal)?.members;
        let mut entries = Vec::new();

        for added in &delta.members_added {
            if !members.iter().any(|m| m.member == added.member) {
                members.push(added.clone());
            }
            self.push_entries(
                &db,
                &mut entries,
                added.member,
                MemberChange::Joined { role: added.role },
            );
        }
        for removed in &delta.members_removed {
            members.retain(|m| m.member != *removed);
            self.push_entries(&db, &mut entries, *removed, MemberChange::Left);
        }
        for changed in &delta.role_changes {
            if let Some(existing) = members.iter_mut().find(|m| m.member == changed.member) {
                existing.role = changed.role;
            }
            self.push_entries(
                &db,
                &mut entries,
                changed.member,
                MemberChange::RoleChanged { role: changed.role },
            );
        }
        for invited in &delta.invites_added {
            self.push_entries(&db, &mut entries, *invited, MemberChange::Invited);
        }
        for revoked in &delta.invites_removed {
            self.push_entries(&db, &mut entries, *revoked, MemberChange::InviteRevoked);
        }
        for knocking in &delta.join_requests_added {
            self.push_entries(&db, &mut entries, *knocking, MemberChange::Knocked);
        }
        for retracted in &delta.join_requests_removed {
            self.push_entries(&db, &mut entries, *retracted, MemberChange::KnockRetracted);
        }
        for promoted in &delta.join_requests_promoted {
            if !members.iter().any(|m| m.member == promoted.member) {
                members.push(promoted.clone());
            }
            self.push_entries(
                &db,
                &mut entries,
                promoted.member,
                MemberChange::KnockApproved {
                    role: promoted.role,
                },
            );
        }
        for banned in &delta.bans_added {
            members.retain(|m| m.member != *banned);
            self.push_entries(&db, &mut entries, *banned, MemberChange::Banned);
        }
        for unbanned in &delta.bans_removed {
            self.push_entries(&db, &mut entries, *unbanned, MemberChange::Unbanned);
        }

        db.set_portal_members(portal, &members)?;
        self.persist_meta(&db, portal, &delta.meta)?;
        db.set_revision(portal, delta.revision)?;
        debug!(portal = %portal, revision = delta.revision, "Applied group delta");

        let mut events = vec![NormalizedEvent::MembershipChange(MembershipChangeEvent {
            portal: portal.clone(),
            sender,
            revision: delta.revision,
            entries,
            replace_all: false,
            timestamp,
        })];
        if !delta.meta.is_empty() {
            events.push(NormalizedEvent::MetadataChange(MetadataChangeEvent {
                portal: portal.clone(),
                sender,
                revision: delta.revision,
                meta: delta.meta.clone(),
                timestamp,
            }));
        }
        Ok(events)
    }

    /// Emit the entry for one member reference, plus a hidden synthetic
    /// duplicate under the mapped primary identifier when the reference
    /// is an alias the local account can resolve.
    fn push_entries(
        &self,
        db: &Database,
        entries: &mut Vec<MembershipEntry>,
        member: MemberRef,
        change: MemberChange,
    ) {
        entries.push(MembershipEntry {
            member,
            change: change.clone(),
            hidden: false,
        });
        if let MemberRef::Alias(alias) = member {
            if let Ok(Some(primary)) = db.resolve_alias(self.account, alias) {
                entries.push(MembershipEntry {
                    member: MemberRef::Primary(primary),
                    change,
                    hidden: true,
                });
            }
        }
    }

    fn persist_meta(
        &self,
        db: &Database,
        portal: &PortalKey,
        meta: &passerelle_types::group::GroupMeta,
    ) -> Result<(), SyncError> {
        if meta.is_empty() {
            return Ok(());
        }
        db.update_portal_meta(
            portal,
            meta.title.as_deref(),
            meta.description.as_deref(),
            meta.avatar_ref.as_deref(),
            meta.expiration_timer,
            meta.announcement_only,
        )?;
        Ok(())
    }
}
