//! One-time history import ("backfill") from locally cached backup
//! snapshots.
//!
//! Snapshots are consumed exactly once, in one pass or in successive
//! paginated passes, and then deleted.  The heart of the module is the
//! stream-order reconciliation: incoming items carry a server-assigned
//! sequence number, outgoing items only a local send timestamp, and the
//! importer computes a total order that interleaves both correctly.

use std::collections::HashSet;

use chrono::Utc;
use tracing::{debug, info};

use passerelle_store::{Database, SnapshotAuthor, SnapshotDirection, SnapshotItem};
use passerelle_store::CachedMessage;
use passerelle_types::event::{MessageEvent, ReactionEvent};
use passerelle_types::{MessageId, PortalKey, UserId};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::{millis_to_utc, SharedDb};

/// Which way a paginated backfill request travels from its anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationDirection {
    /// Towards older history.
    Backward,
    /// Towards newer history.
    Forward,
}

/// One imported message with its reconciled position.
#[derive(Debug, Clone)]
pub struct BackfillMessage {
    pub event: MessageEvent,
    /// Synthetic total-order value; ascending across the chunk and
    /// across successive chunks for the same room.
    pub stream_order: i64,
    pub reactions: Vec<ReactionEvent>,
}

/// Result of one `fetch_messages` call.
#[derive(Debug, Clone, Default)]
pub struct BackfillChunk {
    /// Chronologically ordered (by stream order) messages.
    pub messages: Vec<BackfillMessage>,
    /// Whether another page remains in the requested direction.
    pub has_more: bool,
    /// Whether the room should be marked read after insertion.
    pub mark_read: bool,
}

/// Consumes cached backup snapshots into ordered message chunks.
pub struct HistoryImporter {
    db: SharedDb,
    account: UserId,
    config: SyncConfig,
}

impl HistoryImporter {
    pub fn new(db: SharedDb, account: UserId, config: SyncConfig) -> Self {
        Self {
            db,
            account,
            config,
        }
    }

    /// Fetch one page of importable prehistory for a conversation.
    ///
    /// A missing snapshot is not an error: the conversation simply has
    /// no importable prehistory and an empty chunk is returned.
    pub fn fetch_messages(
        &self,
        portal: &PortalKey,
        anchor: Option<u64>,
        direction: PaginationDirection,
        count: usize,
    ) -> Result<BackfillChunk, SyncError> {
        let db = self.db.lock().map_err(|_| SyncError::LockPoisoned)?;

        let Some(items) = db.get_snapshot(portal)? else {
            debug!(portal = %portal, "No cached snapshot, nothing to import");
            return Ok(BackfillChunk::default());
        };

        // Items are stored newest-first.  Select the page in that order,
        // then reverse into chronological order for emission.
        let eligible: Vec<&SnapshotItem> = match direction {
            PaginationDirection::Backward => items
                .iter()
                .filter(|item| anchor.map_or(true, |a| item.timestamp_ms < a))
                .collect(),
            PaginationDirection::Forward => items
                .iter()
                .filter(|item| anchor.map_or(true, |a| item.timestamp_ms > a))
                .collect(),
        };

        let page: Vec<SnapshotItem> = match direction {
            // Backward: the newest `count` of what is left.
            PaginationDirection::Backward => {
                eligible.iter().take(count).map(|&i| i.clone()).collect()
            }
            // Forward: the oldest `count` of what is newer than the anchor.
            PaginationDirection::Forward => {
                let skip = eligible.len().saturating_sub(count);
                eligible.iter().skip(skip).map(|&i| i.clone()).collect()
            }
        };
        let has_more_raw = eligible.len() > page.len();

        // Read state derives from the first item encountered in stored
        // order: an outgoing item means the local account was caught up.
        let mark_read = match page.first().map(|item| item.direction) {
            Some(SnapshotDirection::Incoming { read, .. }) => read,
            Some(SnapshotDirection::Outgoing) => true,
            None => false,
        };

        let chronological: Vec<&SnapshotItem> = items.iter().rev().collect();
        let page_keys: HashSet<u64> = page.iter().map(|item| item.timestamp_ms).collect();
        let messages = self.reconcile(&db, portal, &chronological, &page_keys, anchor);

        for message in &messages {
            db.cache_message(&CachedMessage {
                portal: portal.clone(),
                sender: message.event.sender,
                timestamp_ms: message.event.timestamp.timestamp_millis() as u64,
            })?;
        }

        // Trim or delete the snapshot; the importer is its only owner.
        let has_more = match direction {
            PaginationDirection::Backward => {
                if !self.config.paginate_backward || !has_more_raw {
                    db.delete_snapshot(portal)?;
                    info!(portal = %portal, "Snapshot fully consumed, deleted");
                    false
                } else {
                    let oldest_consumed = page
                        .last()
                        .map(|item| item.timestamp_ms)
                        .unwrap_or(u64::MAX);
                    // Keep the oldest consumed incoming item around: its
                    // sequence number is the upper ordering bound for
                    // outgoing items at the top of the next page.  The
                    // anchor filter keeps it out of later pages.
                    let cutoff = items
                        .iter()
                        .filter(|item| {
                            item.timestamp_ms >= oldest_consumed
                                && matches!(item.direction, SnapshotDirection::Incoming { .. })
                        })
                        .map(|item| item.timestamp_ms)
                        .min()
                        .map(|ts| ts.saturating_add(1))
                        .unwrap_or(oldest_consumed);
                    db.trim_snapshot_newer_than(portal, cutoff)?;
                    true
                }
            }
            PaginationDirection::Forward => {
                let newest_consumed = page
                    .first()
                    .map(|item| item.timestamp_ms)
                    .unwrap_or(0);
                let remaining: Vec<SnapshotItem> = items
                    .iter()
                    .filter(|item| item.timestamp_ms > newest_consumed)
                    .cloned()
                    .collect();
                if remaining.is_empty() {
                    db.delete_snapshot(portal)?;
                    info!(portal = %portal, "Snapshot fully consumed, deleted");
                    false
                } else {
                    db.put_snapshot(portal, &remaining)?;
                    true
                }
            }
        };

        Ok(BackfillChunk {
            messages,
            has_more,
            mark_read,
        })
    }

    /// Every conversation that still holds importable prehistory.
    pub fn pending_portals(&self) -> Result<Vec<PortalKey>, SyncError> {
        let db = self.db.lock().map_err(|_| SyncError::LockPoisoned)?;
        Ok(db.snapshot_portals()?)
    }

    /// Page size used when draining snapshots.
    pub fn page_size(&self) -> usize {
        self.config.backfill_count
    }

    /// Persist the completed-import flag.  Must be called before success
    /// is reported onward.
    pub fn mark_imported(&self) -> Result<(), SyncError> {
        let db = self.db.lock().map_err(|_| SyncError::LockPoisoned)?;
        db.ensure_account(self.account)?;
        db.set_history_imported(self.account)?;
        Ok(())
    }

    /// Reconcile stream-order values over the whole remaining snapshot
    /// and emit the items selected for the current page.
    ///
    /// Ordering must run over `chronological` in full, not just the
    /// page: an outgoing item at the top of a page takes its position
    /// from the incoming item that follows it, which may sit on an
    /// already-consumed page.
    fn reconcile(
        &self,
        db: &Database,
        portal: &PortalKey,
        chronological: &[&SnapshotItem],
        page: &HashSet<u64>,
        anchor: Option<u64>,
    ) -> Vec<BackfillMessage> {
        let now_ms = Utc::now().timestamp_millis();

        // Running lower bound: the most recently seen incoming sequence
        // number.
        let mut last_incoming: Option<i64> = None;
        let mut ordered: Vec<(i64, &SnapshotItem)> = Vec::with_capacity(page.len());

        for (index, item) in chronological.iter().enumerate() {
            let order = match item.direction {
                SnapshotDirection::Incoming { server_seq, .. } => {
                    last_incoming = Some(server_seq as i64);
                    server_seq as i64
                }
                SnapshotDirection::Outgoing => {
                    // No server sequence of its own: slot in just below
                    // the next incoming item, but never at or below the
                    // previous one.  With no incoming item left at all,
                    // fall back to the pagination anchor, then to wall
                    // clock.
                    let next_seq = chronological[index + 1..]
                        .iter()
                        .find_map(|later| match later.direction {
                            SnapshotDirection::Incoming { server_seq, .. } => {
                                Some(server_seq as i64)
                            }
                            SnapshotDirection::Outgoing => None,
                        })
                        .unwrap_or_else(|| anchor.map(|a| a as i64).unwrap_or(now_ms));
                    let mut order = next_seq - 1;
                    if let Some(bound) = last_incoming {
                        order = order.max(bound + 1);
                    }
                    order
                }
            };
            if page.contains(&item.timestamp_ms) {
                ordered.push((order, *item));
            }
        }

        // Stable: equal orders keep their chronological arrangement.
        ordered.sort_by_key(|(order, _)| *order);

        let mut messages = Vec::with_capacity(ordered.len());
        for (stream_order, item) in ordered {
            let Some(author) = self.resolve_author(db, &item.author) else {
                debug!(
                    portal = %portal,
                    timestamp = item.timestamp_ms,
                    "Dropping item with unresolvable author"
                );
                continue;
            };

            let reactions = item
                .reactions
                .iter()
                .filter_map(|reaction| {
                    let Some(reactor) = self.resolve_author(db, &reaction.author) else {
                        debug!(portal = %portal, "Dropping reaction with unresolvable author");
                        return None;
                    };
                    Some(ReactionEvent {
                        portal: portal.clone(),
                        sender: reactor,
                        target: MessageId::from_parts(author, item.timestamp_ms),
                        emoji: reaction.emoji.clone(),
                        timestamp: millis_to_utc(reaction.timestamp_ms),
                    })
                })
                .collect();

            messages.push(BackfillMessage {
                event: MessageEvent {
                    portal: portal.clone(),
                    sender: author,
                    id: MessageId::from_parts(author, item.timestamp_ms),
                    timestamp: millis_to_utc(item.timestamp_ms),
                    body: item.body.clone(),
                    attachments: Vec::new(),
                    embed: None,
                    expiration_timer: None,
                    create_portal: false,
                },
                stream_order,
                reactions,
            });
        }
        messages
    }

    /// Resolve a snapshot author to a durable primary identifier, via
    /// the account's device-learned alias mappings when needed.
    fn resolve_author(&self, db: &Database, author: &SnapshotAuthor) -> Option<UserId> {
        if let Some(user_id) = author.user_id {
            return Some(user_id);
        }
        let alias = author.alias?;
        db.resolve_alias(self.account, alias).ok().flatten()
    }
}
