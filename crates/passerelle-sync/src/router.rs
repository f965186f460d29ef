//! Translation of raw remote frames into normalized room-system events.
//!
//! Classification of a content envelope follows a fixed precedence:
//! deletion beats reaction beats message content beats a metadata-only
//! group change.  Targets of reactions, edits and deletions are computed
//! from the identifier scheme, never looked up, so a reference to a
//! message this bridge has never seen still routes deterministically.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use passerelle_store::CachedMessage;
use passerelle_types::constants::PROFILE_REFETCH_INTERVAL;
use passerelle_types::envelope::{
    ContentEnvelope, EditEnvelope, ReceiptEnvelope, ReceiptKind, RemoteFrame, SyncEnvelope,
    SyncPayload, TargetRef, TypingAction, TypingEnvelope,
};
use passerelle_types::event::{
    ChatEvent, DeletionEvent, EditEvent, MessageEvent, NormalizedEvent, ReactionEvent,
    ReceiptEvent, TypingEvent,
};
use passerelle_types::{ChatId, MessageId, PortalKey, UserId};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::groups::{GroupSource, GroupSynchronizer};
use crate::locks::PortalLocks;
use crate::{millis_to_utc, SharedDb};

/// What a content envelope turns into, decided by precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Deletion,
    Reaction,
    ReactionRemoval,
    Message,
    /// No user-visible content; only an embedded group change.
    MetadataOnly,
    /// Nothing actionable at all.
    Ignored,
}

/// Decide what one content envelope is.  Pure; remote clients may set
/// several markers at once and the precedence resolves the ambiguity.
pub fn classify(envelope: &ContentEnvelope) -> ContentKind {
    if envelope.deletion.is_some() {
        return ContentKind::Deletion;
    }
    if let Some(reaction) = &envelope.reaction {
        return if reaction.remove {
            ContentKind::ReactionRemoval
        } else {
            ContentKind::Reaction
        };
    }
    if envelope.body.is_some()
        || !envelope.attachments.is_empty()
        || envelope.embed.is_some()
        || envelope.required_version.is_some()
        || envelope.expiration_timer_update
    {
        return ContentKind::Message;
    }
    if envelope.group_context.is_some() {
        return ContentKind::MetadataOnly;
    }
    ContentKind::Ignored
}

/// A remote user's profile as fetched on demand.
#[derive(Debug, Clone, Default)]
pub struct RemoteProfile {
    pub display_name: Option<String>,
    pub avatar_ref: Option<String>,
}

/// Boundary for on-demand profile fetches, consulted when a message
/// sender's cached profile has gone stale.
#[async_trait]
pub trait ProfileSource: Send + Sync {
    async fn fetch_profile(&self, user: &UserId) -> anyhow::Result<RemoteProfile>;
}

/// Turns decrypted remote frames into ordered normalized events, keeping
/// group portals caught up along the way.
pub struct EventRouter<S: GroupSource, P: ProfileSource> {
    db: SharedDb,
    account: UserId,
    config: SyncConfig,
    groups: GroupSynchronizer<S>,
    profiles: Arc<P>,
    locks: PortalLocks,
}

impl<S: GroupSource, P: ProfileSource> EventRouter<S, P> {
    pub fn new(
        db: SharedDb,
        account: UserId,
        config: SyncConfig,
        source: Arc<S>,
        profiles: Arc<P>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let groups = GroupSynchronizer::new(db.clone(), source, account, shutdown);
        Self {
            db,
            account,
            config,
            groups,
            profiles,
            locks: PortalLocks::new(),
        }
    }

    /// Translate one frame.  Events come out in causal order: group
    /// catch-up batches first, then the content event itself.
    pub async fn handle_frame(&self, frame: RemoteFrame) -> Result<Vec<NormalizedEvent>, SyncError> {
        match frame {
            RemoteFrame::Content(envelope) => self.handle_content(envelope).await,
            RemoteFrame::Edit(envelope) => self.handle_edit(envelope).await,
            RemoteFrame::Typing(envelope) => self.handle_typing(envelope).await,
            RemoteFrame::Receipt(envelope) => self.handle_receipt(envelope),
            RemoteFrame::Sync(envelope) => self.handle_sync(envelope).await,
        }
    }

    async fn handle_content(
        &self,
        envelope: ContentEnvelope,
    ) -> Result<Vec<NormalizedEvent>, SyncError> {
        let Some(sender) = envelope.sender else {
            debug!("Content envelope without sender, dropping");
            return Ok(Vec::new());
        };
        let Some(portal) = self.portal_for_content(&envelope, sender) else {
            debug!(sender = %sender, "Content envelope without conversation, dropping");
            return Ok(Vec::new());
        };
        let timestamp = millis_to_utc(envelope.timestamp_ms);

        // Everything for this room, catch-up included, runs under its
        // lock so live translation cannot interleave with a resync.
        let _guard = self.locks.lock(&portal).await;
        let mut events = Vec::new();

        if let Some(context) = &envelope.group_context {
            let known = {
                let db = self.db.lock().map_err(|_| SyncError::LockPoisoned)?;
                db.ensure_portal(&portal)?;
                db.get_portal(&portal)?.revision
            };
            match &context.change {
                Some(change) => {
                    // The envelope carries revision r itself; close the
                    // gap up to r - 1 first, then apply the carried one.
                    events.extend(
                        self.groups
                            .catch_up(
                                &portal,
                                known,
                                context.revision.saturating_sub(1),
                                timestamp,
                            )
                            .await?,
                    );
                    events.extend(self.groups.apply_embedded_delta(
                        &portal,
                        change,
                        Some(sender),
                        timestamp,
                    )?);
                }
                None => {
                    events.extend(
                        self.groups
                            .catch_up(&portal, known, context.revision, timestamp)
                            .await?,
                    );
                }
            }
        }

        match classify(&envelope) {
            ContentKind::Deletion => {
                // Checked by classify.
                if let Some(target) = envelope.deletion {
                    events.push(NormalizedEvent::Deletion(DeletionEvent {
                        portal: portal.clone(),
                        sender,
                        target: self.derive_target(sender, target),
                        timestamp,
                    }));
                }
            }
            ContentKind::Reaction | ContentKind::ReactionRemoval => {
                if let Some(reaction) = envelope.reaction {
                    let event = ReactionEvent {
                        portal: portal.clone(),
                        sender,
                        target: self.derive_target(sender, reaction.target),
                        emoji: reaction.emoji,
                        timestamp,
                    };
                    events.push(if reaction.remove {
                        NormalizedEvent::ReactionRemoval(event)
                    } else {
                        NormalizedEvent::Reaction(event)
                    });
                }
            }
            ContentKind::Message => {
                let id = MessageId::from_parts(sender, envelope.timestamp_ms);
                let needs_profile = {
                    let db = self.db.lock().map_err(|_| SyncError::LockPoisoned)?;
                    db.ensure_portal(&portal)?;
                    db.ensure_ghost(sender)?;
                    db.cache_message(&CachedMessage {
                        portal: portal.clone(),
                        sender,
                        timestamp_ms: envelope.timestamp_ms,
                    })?;
                    db.ghost_needs_profile_fetch(
                        sender,
                        Duration::milliseconds(PROFILE_REFETCH_INTERVAL.as_millis() as i64),
                        Utc::now(),
                    )?
                };
                if needs_profile {
                    self.refresh_ghost_profile(sender).await;
                }
                events.push(NormalizedEvent::NewMessage(MessageEvent {
                    portal: portal.clone(),
                    sender,
                    id,
                    timestamp,
                    body: envelope.body,
                    attachments: envelope.attachments,
                    embed: envelope.embed,
                    expiration_timer: envelope.expiration_timer,
                    create_portal: true,
                }));
            }
            ContentKind::MetadataOnly => {
                // The catch-up above already emitted the change batches.
            }
            ContentKind::Ignored => {
                debug!(portal = %portal, sender = %sender, "Empty content envelope");
            }
        }
        Ok(events)
    }

    async fn handle_edit(&self, envelope: EditEnvelope) -> Result<Vec<NormalizedEvent>, SyncError> {
        let portal = self.portal_for_chat(&envelope.chat, envelope.sender);
        let _guard = self.locks.lock(&portal).await;
        Ok(vec![NormalizedEvent::Edit(EditEvent {
            portal,
            sender: envelope.sender,
            target: self.derive_target(envelope.sender, envelope.target),
            timestamp: millis_to_utc(envelope.timestamp_ms),
            body: envelope.content.body,
            attachments: envelope.content.attachments,
        })])
    }

    async fn handle_typing(
        &self,
        envelope: TypingEnvelope,
    ) -> Result<Vec<NormalizedEvent>, SyncError> {
        let portal = self.portal_for_chat(&envelope.chat, envelope.sender);
        let timestamp = millis_to_utc(envelope.timestamp_ms);
        let event = match envelope.action {
            TypingAction::Started => NormalizedEvent::TypingStart(TypingEvent {
                portal,
                sender: envelope.sender,
                expires_at: Some(
                    timestamp
                        + Duration::milliseconds(self.config.typing_timeout.as_millis() as i64),
                ),
            }),
            TypingAction::Stopped => NormalizedEvent::TypingStop(TypingEvent {
                portal,
                sender: envelope.sender,
                expires_at: None,
            }),
        };
        Ok(vec![event])
    }

    /// A receipt frame carries no room context: each referenced timestamp
    /// resolves through the message cache, and references to unknown
    /// messages are skipped.
    fn handle_receipt(&self, envelope: ReceiptEnvelope) -> Result<Vec<NormalizedEvent>, SyncError> {
        let author = envelope.target_author.unwrap_or(self.account);
        let timestamp = millis_to_utc(envelope.timestamp_ms);
        let db = self.db.lock().map_err(|_| SyncError::LockPoisoned)?;

        let mut events = Vec::new();
        for target_ms in envelope.target_timestamps {
            let Some(cached) = db.find_cached_message(author, target_ms)? else {
                debug!(
                    author = %author,
                    timestamp = target_ms,
                    "Receipt for unknown message, skipping"
                );
                continue;
            };
            let event = ReceiptEvent {
                portal: cached.portal,
                sender: envelope.sender,
                target: MessageId::from_parts(author, target_ms),
                kind: envelope.kind,
                timestamp,
            };
            events.push(match envelope.kind {
                ReceiptKind::Read => NormalizedEvent::ReadReceipt(event),
                ReceiptKind::Delivery => NormalizedEvent::DeliveryReceipt(event),
            });
        }
        Ok(events)
    }

    async fn handle_sync(&self, envelope: SyncEnvelope) -> Result<Vec<NormalizedEvent>, SyncError> {
        let timestamp = millis_to_utc(envelope.timestamp_ms);
        match envelope.payload {
            SyncPayload::Contacts { count } => {
                info!(count, "Contact list pushed from another device");
                let db = self.db.lock().map_err(|_| SyncError::LockPoisoned)?;
                db.ensure_account(self.account)?;
                db.set_last_contact_sync(self.account, timestamp)?;
                Ok(Vec::new())
            }
            SyncPayload::ChatResync { chat } => {
                let portal = self.portal_for_chat(&chat, self.account);
                Ok(vec![NormalizedEvent::ChatResync(ChatEvent {
                    portal,
                    sender: self.account,
                    timestamp,
                })])
            }
            SyncPayload::ChatDelete { chat } => {
                let portal = self.portal_for_chat(&chat, self.account);
                let _guard = self.locks.lock(&portal).await;
                {
                    let db = self.db.lock().map_err(|_| SyncError::LockPoisoned)?;
                    db.delete_cached_messages(&portal)?;
                    if !db.delete_portal(&portal)? {
                        warn!(portal = %portal, "Chat delete for unknown room");
                    }
                }
                Ok(vec![NormalizedEvent::ChatDelete(ChatEvent {
                    portal,
                    sender: self.account,
                    timestamp,
                })])
            }
            SyncPayload::ReadMark { chat, up_to_ms } => {
                // Another device read the room: fan one read receipt out
                // per cached message at or before the mark.
                let portal = self.portal_for_chat(&chat, self.account);
                let db = self.db.lock().map_err(|_| SyncError::LockPoisoned)?;
                let events = db
                    .cached_messages_in_range(&portal, 0, up_to_ms)?
                    .into_iter()
                    .map(|cached| {
                        NormalizedEvent::ReadReceipt(ReceiptEvent {
                            portal: cached.portal,
                            sender: self.account,
                            target: MessageId::from_parts(cached.sender, cached.timestamp_ms),
                            kind: ReceiptKind::Read,
                            timestamp,
                        })
                    })
                    .collect();
                Ok(events)
            }
        }
    }

    /// The room a content envelope belongs to: its group context wins,
    /// then its chat field, scoped to the local account for direct chats.
    fn portal_for_content(&self, envelope: &ContentEnvelope, sender: UserId) -> Option<PortalKey> {
        if let Some(context) = &envelope.group_context {
            return Some(PortalKey::group(context.group_id.clone()));
        }
        envelope
            .chat
            .as_ref()
            .map(|chat| self.portal_for_chat(chat, sender))
    }

    fn portal_for_chat(&self, chat: &ChatId, direct_peer_fallback: UserId) -> PortalKey {
        match chat {
            ChatId::Group(group) => PortalKey::group(group.clone()),
            ChatId::Direct(peer) => {
                // A direct chat received from our own device names the
                // peer; one received from the peer names us.
                let other = if *peer == self.account {
                    direct_peer_fallback
                } else {
                    *peer
                };
                PortalKey::direct(other, self.account)
            }
        }
    }

    /// Derive the identifier of a referenced message; the reference's
    /// author defaults to the envelope sender.
    fn derive_target(&self, sender: UserId, target: TargetRef) -> MessageId {
        MessageId::from_parts(target.author.unwrap_or(sender), target.timestamp_ms)
    }

    /// Refetch a stale ghost profile and stamp the fetch time.  Failures
    /// are logged and never fail the frame.
    async fn refresh_ghost_profile(&self, user: UserId) {
        let profile = match self.profiles.fetch_profile(&user).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!(user = %user, error = %e, "Profile fetch failed");
                return;
            }
        };
        let Ok(db) = self.db.lock() else {
            warn!(user = %user, "Database lock poisoned during profile refresh");
            return;
        };
        if let Err(e) = db.update_ghost_profile(
            user,
            profile.display_name.as_deref(),
            profile.avatar_ref.as_deref(),
            Utc::now(),
        ) {
            warn!(user = %user, error = %e, "Failed to store refreshed profile");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex as StdMutex};

    use async_trait::async_trait;
    use passerelle_store::Database;
    use passerelle_types::envelope::{GroupContext, ReactionMarker};
    use passerelle_types::group::{GroupDelta, GroupMember, GroupRole, GroupSnapshot};
    use passerelle_types::{GroupId, MemberRef};
    use uuid::Uuid;

    fn user(n: u128) -> UserId {
        UserId(Uuid::from_u128(n))
    }

    fn group_portal() -> PortalKey {
        PortalKey::group(GroupId("g".into()))
    }

    struct FakeSource {
        deltas: Vec<GroupDelta>,
    }

    #[async_trait]
    impl GroupSource for FakeSource {
        async fn fetch_snapshot(&self, group: &GroupId) -> anyhow::Result<GroupSnapshot> {
            Ok(GroupSnapshot {
                group_id: group.clone(),
                revision: self.deltas.iter().map(|d| d.revision).max().unwrap_or(0),
                members: Vec::new(),
                invites: Vec::new(),
                join_requests: Vec::new(),
                bans: Vec::new(),
                meta: Default::default(),
            })
        }

        async fn fetch_deltas(
            &self,
            _group: &GroupId,
            from: u32,
            to: u32,
        ) -> anyhow::Result<Vec<GroupDelta>> {
            Ok(self
                .deltas
                .iter()
                .filter(|d| d.revision >= from && d.revision <= to)
                .cloned()
                .collect())
        }
    }

    #[derive(Default)]
    struct FakeProfiles {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ProfileSource for FakeProfiles {
        async fn fetch_profile(&self, _user: &UserId) -> anyhow::Result<RemoteProfile> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(RemoteProfile {
                display_name: Some("Ami".into()),
                avatar_ref: None,
            })
        }
    }

    fn router_with_profiles(
        deltas: Vec<GroupDelta>,
    ) -> (
        EventRouter<FakeSource, FakeProfiles>,
        SharedDb,
        Arc<FakeProfiles>,
    ) {
        let db: SharedDb = Arc::new(StdMutex::new(Database::open_in_memory().unwrap()));
        db.lock().unwrap().ensure_account(user(1)).unwrap();
        let profiles = Arc::new(FakeProfiles::default());
        let (_tx, rx) = watch::channel(false);
        (
            EventRouter::new(
                db.clone(),
                user(1),
                SyncConfig::default(),
                Arc::new(FakeSource { deltas }),
                profiles.clone(),
                rx,
            ),
            db,
            profiles,
        )
    }

    fn router(deltas: Vec<GroupDelta>) -> (EventRouter<FakeSource, FakeProfiles>, SharedDb) {
        let (router, db, _profiles) = router_with_profiles(deltas);
        (router, db)
    }

    fn member_delta(revision: u32, added: UserId) -> GroupDelta {
        let mut d = GroupDelta::new(revision);
        d.members_added = vec![GroupMember {
            member: MemberRef::Primary(added),
            role: GroupRole::Default,
        }];
        d
    }

    #[test]
    fn classification_precedence() {
        let mut envelope = ContentEnvelope {
            deletion: Some(TargetRef {
                author: None,
                timestamp_ms: 1,
            }),
            reaction: Some(ReactionMarker {
                emoji: "x".into(),
                remove: false,
                target: TargetRef {
                    author: None,
                    timestamp_ms: 1,
                },
            }),
            body: Some("text".into()),
            ..Default::default()
        };
        assert_eq!(classify(&envelope), ContentKind::Deletion);

        envelope.deletion = None;
        assert_eq!(classify(&envelope), ContentKind::Reaction);

        if let Some(r) = envelope.reaction.as_mut() {
            r.remove = true;
        }
        assert_eq!(classify(&envelope), ContentKind::ReactionRemoval);

        envelope.reaction = None;
        assert_eq!(classify(&envelope), ContentKind::Message);

        envelope.body = None;
        envelope.group_context = Some(GroupContext {
            group_id: GroupId("g".into()),
            revision: 3,
            change: Some(GroupDelta::new(3)),
        });
        assert_eq!(classify(&envelope), ContentKind::MetadataOnly);

        envelope.group_context = None;
        assert_eq!(classify(&envelope), ContentKind::Ignored);

        // A timer update alone still counts as message content.
        envelope.expiration_timer_update = true;
        assert_eq!(classify(&envelope), ContentKind::Message);
    }

    #[tokio::test]
    async fn message_embedding_future_revision_catches_up_first() {
        // Local copy is at revision 4; the message carries revision 7
        // with its own change, so the gap [5, 6] closes first.
        let (router, db) = router(vec![member_delta(5, user(3)), member_delta(6, user(4))]);
        {
            let db = db.lock().unwrap();
            db.ensure_portal(&group_portal()).unwrap();
            db.set_revision(&group_portal(), 4).unwrap();
        }

        let frame = RemoteFrame::Content(ContentEnvelope {
            sender: Some(user(2)),
            timestamp_ms: 1_000,
            body: Some("bonjour".into()),
            group_context: Some(GroupContext {
                group_id: GroupId("g".into()),
                revision: 7,
                change: Some(member_delta(7, user(5))),
            }),
            ..Default::default()
        });

        let events = router.handle_frame(frame).await.unwrap();

        let revisions: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                NormalizedEvent::MembershipChange(b) => Some(b.revision),
                _ => None,
            })
            .collect();
        assert_eq!(revisions, vec![5, 6, 7]);

        // The carried change names the message sender as the actor.
        let carried = events.iter().find_map(|e| match e {
            NormalizedEvent::MembershipChange(b) if b.revision == 7 => Some(b),
            _ => None,
        });
        assert_eq!(carried.and_then(|b| b.sender), Some(user(2)));

        // The message itself comes after every group batch.
        assert!(matches!(
            events.last(),
            Some(NormalizedEvent::NewMessage(m)) if m.body.as_deref() == Some("bonjour")
        ));

        assert_eq!(
            db.lock().unwrap().get_portal(&group_portal()).unwrap().revision,
            7
        );
    }

    #[tokio::test]
    async fn reaction_to_unseen_message_derives_target() {
        // Nothing about the target exists locally; the identifier still
        // comes out right.
        let (router, _db) = router(Vec::new());
        let author = user(9);

        let frame = RemoteFrame::Content(ContentEnvelope {
            sender: Some(user(2)),
            timestamp_ms: 2_000,
            chat: Some(ChatId::Group(GroupId("g".into()))),
            reaction: Some(ReactionMarker {
                emoji: "👍".into(),
                remove: false,
                target: TargetRef {
                    author: Some(author),
                    timestamp_ms: 555,
                },
            }),
            ..Default::default()
        });

        let events = router.handle_frame(frame).await.unwrap();
        assert_eq!(events.len(), 1);
        let NormalizedEvent::Reaction(reaction) = &events[0] else {
            panic!("expected a reaction");
        };
        assert_eq!(reaction.target, MessageId::from_parts(author, 555));
    }

    #[tokio::test]
    async fn deletion_target_author_falls_back_to_sender() {
        let (router, _db) = router(Vec::new());
        let frame = RemoteFrame::Content(ContentEnvelope {
            sender: Some(user(2)),
            timestamp_ms: 2_000,
            chat: Some(ChatId::Group(GroupId("g".into()))),
            deletion: Some(TargetRef {
                author: None,
                timestamp_ms: 700,
            }),
            ..Default::default()
        });

        let events = router.handle_frame(frame).await.unwrap();
        let NormalizedEvent::Deletion(deletion) = &events[0] else {
            panic!("expected a deletion");
        };
        assert_eq!(deletion.target, MessageId::from_parts(user(2), 700));
    }

    #[tokio::test]
    async fn new_message_is_cached_for_receipts() {
        let (router, db) = router(Vec::new());
        let frame = RemoteFrame::Content(ContentEnvelope {
            sender: Some(user(2)),
            timestamp_ms: 3_000,
            chat: Some(ChatId::Group(GroupId("g".into()))),
            body: Some("salut".into()),
            ..Default::default()
        });

        router.handle_frame(frame).await.unwrap();

        let cached = db
            .lock()
            .unwrap()
            .find_cached_message(user(2), 3_000)
            .unwrap();
        assert_eq!(cached.unwrap().portal, group_portal());
    }

    #[tokio::test]
    async fn stale_ghost_profile_is_refetched_once() {
        let (router, db, profiles) = router_with_profiles(Vec::new());
        let frame = |ts| {
            RemoteFrame::Content(ContentEnvelope {
                sender: Some(user(2)),
                timestamp_ms: ts,
                chat: Some(ChatId::Group(GroupId("g".into()))),
                body: Some("salut".into()),
                ..Default::default()
            })
        };

        // First sighting: unknown ghost, fetched and stored.
        router.handle_frame(frame(1_000)).await.unwrap();
        assert_eq!(profiles.calls.load(Ordering::SeqCst), 1);
        let ghost = db.lock().unwrap().get_ghost(user(2)).unwrap();
        assert_eq!(ghost.display_name.as_deref(), Some("Ami"));
        assert!(ghost.profile_fetched_at.is_some());

        // Second message inside the refetch interval: no new fetch.
        router.handle_frame(frame(2_000)).await.unwrap();
        assert_eq!(profiles.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn typing_start_expires_stop_does_not() {
        let (router, _db) = router(Vec::new());
        let start = RemoteFrame::Typing(TypingEnvelope {
            sender: user(2),
            timestamp_ms: 10_000,
            chat: ChatId::Group(GroupId("g".into())),
            action: TypingAction::Started,
        });
        let stop = RemoteFrame::Typing(TypingEnvelope {
            sender: user(2),
            timestamp_ms: 12_000,
            chat: ChatId::Group(GroupId("g".into())),
            action: TypingAction::Stopped,
        });

        let events = router.handle_frame(start).await.unwrap();
        let NormalizedEvent::TypingStart(typing) = &events[0] else {
            panic!("expected typing start");
        };
        assert_eq!(
            typing.expires_at,
            Some(millis_to_utc(10_000) + Duration::seconds(15))
        );

        let events = router.handle_frame(stop).await.unwrap();
        let NormalizedEvent::TypingStop(typing) = &events[0] else {
            panic!("expected typing stop");
        };
        assert!(typing.expires_at.is_none());
    }

    #[tokio::test]
    async fn receipt_fans_out_over_cached_messages() {
        let (router, db) = router(Vec::new());
        for ts in [100u64, 200] {
            db.lock()
                .unwrap()
                .cache_message(&CachedMessage {
                    portal: group_portal(),
                    sender: user(1),
                    timestamp_ms: ts,
                })
                .unwrap();
        }

        let frame = RemoteFrame::Receipt(ReceiptEnvelope {
            sender: user(2),
            timestamp_ms: 5_000,
            kind: ReceiptKind::Read,
            target_author: None,
            // 300 was never seen and must be skipped.
            target_timestamps: vec![100, 200, 300],
        });

        let events = router.handle_frame(frame).await.unwrap();
        assert_eq!(events.len(), 2);
        for (event, ts) in events.iter().zip([100u64, 200]) {
            let NormalizedEvent::ReadReceipt(receipt) = event else {
                panic!("expected read receipts");
            };
            assert_eq!(receipt.portal, group_portal());
            assert_eq!(receipt.target, MessageId::from_parts(user(1), ts));
        }
    }

    #[tokio::test]
    async fn contact_sync_updates_bookkeeping() {
        let (router, db) = router(Vec::new());
        let frame = RemoteFrame::Sync(SyncEnvelope {
            timestamp_ms: 9_000,
            payload: SyncPayload::Contacts { count: 12 },
        });

        let events = router.handle_frame(frame).await.unwrap();
        assert!(events.is_empty());
        assert!(db
            .lock()
            .unwrap()
            .get_account(user(1))
            .unwrap()
            .last_contact_sync
            .is_some());
    }

    #[tokio::test]
    async fn chat_delete_drops_portal_and_cache() {
        let (router, db) = router(Vec::new());
        {
            let db = db.lock().unwrap();
            db.ensure_portal(&group_portal()).unwrap();
            db.cache_message(&CachedMessage {
                portal: group_portal(),
                sender: user(2),
                timestamp_ms: 100,
            })
            .unwrap();
        }

        let frame = RemoteFrame::Sync(SyncEnvelope {
            timestamp_ms: 9_000,
            payload: SyncPayload::ChatDelete {
                chat: ChatId::Group(GroupId("g".into())),
            },
        });

        let events = router.handle_frame(frame).await.unwrap();
        assert!(matches!(&events[0], NormalizedEvent::ChatDelete(_)));

        let db = db.lock().unwrap();
        assert!(db.get_portal(&group_portal()).is_err());
        assert!(db.find_cached_message(user(2), 100).unwrap().is_none());
    }

    #[tokio::test]
    async fn read_mark_fans_out_up_to_timestamp() {
        let (router, db) = router(Vec::new());
        for ts in [100u64, 200, 300] {
            db.lock()
                .unwrap()
                .cache_message(&CachedMessage {
                    portal: group_portal(),
                    sender: user(2),
                    timestamp_ms: ts,
                })
                .unwrap();
        }

        let frame = RemoteFrame::Sync(SyncEnvelope {
            timestamp_ms: 9_000,
            payload: SyncPayload::ReadMark {
                chat: ChatId::Group(GroupId("g".into())),
                up_to_ms: 200,
            },
        });

        let events = router.handle_frame(frame).await.unwrap();
        assert_eq!(events.len(), 2);
        assert!(events
            .iter()
            .all(|e| matches!(e, NormalizedEvent::ReadReceipt(_))));
    }

    #[tokio::test]
    async fn senderless_content_is_dropped() {
        let (router, _db) = router(Vec::new());
        let frame = RemoteFrame::Content(ContentEnvelope {
            sender: None,
            timestamp_ms: 1_000,
            chat: Some(ChatId::Group(GroupId("g".into()))),
            body: Some("orphan".into()),
            ..Default::default()
        });
        let events = router.handle_frame(frame).await.unwrap();
        assert!(events.is_empty());
    }
}
