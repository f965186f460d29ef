//! Glue between the connection task and the translation layers.
//!
//! One spawned loop per account session drains the connection's event
//! channel: raw frames go through the event router, state transitions
//! are forwarded as-is, and the one-time history import runs as its own
//! task when the connection requests it.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use passerelle_types::event::NormalizedEvent;
use passerelle_types::{BridgeState, UserId};

use crate::backfill::{HistoryImporter, PaginationDirection};
use crate::config::SyncConfig;
use crate::connection::{
    spawn_connection, ConnectionCommand, ConnectionEvent, ConnectionHandle, Transport,
};
use crate::error::SyncError;
use crate::groups::GroupSource;
use crate::router::{EventRouter, ProfileSource};
use crate::SharedDb;

/// One outward-facing engine signal: a bridge state transition or a
/// normalized event ready for the room system.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    State(BridgeState),
    Event(NormalizedEvent),
}

/// Handle to a running engine: commands in, engine events out.
pub struct EngineHandle {
    pub commands: mpsc::Sender<ConnectionCommand>,
    pub events: mpsc::Receiver<EngineEvent>,
    /// Flip to `true` to stop the connection task; the bridge loop ends
    /// when the connection's event channel closes.
    pub shutdown: watch::Sender<bool>,
}

/// Spawn the full engine for one account: the connection task, the
/// event router and the history importer, wired together by the bridge
/// loop.
pub fn spawn_engine<T, S, P>(
    account: UserId,
    transport: Arc<T>,
    groups: Arc<S>,
    profiles: Arc<P>,
    db: SharedDb,
    config: SyncConfig,
) -> EngineHandle
where
    T: Transport,
    S: GroupSource + 'static,
    P: ProfileSource + 'static,
{
    let ConnectionHandle {
        commands,
        events,
        shutdown,
    } = spawn_connection(account, transport, db.clone(), config.clone());

    let router = EventRouter::new(
        db.clone(),
        account,
        config.clone(),
        groups,
        profiles,
        shutdown.subscribe(),
    );
    let importer = Arc::new(HistoryImporter::new(db, account, config));

    let (engine_tx, engine_rx) = mpsc::channel(256);
    tokio::spawn(async move {
        bridge_loop(account, events, router, importer, engine_tx).await;
        debug!(account = %account, "Bridge loop terminated");
    });

    EngineHandle {
        commands,
        events: engine_rx,
        shutdown,
    }
}

async fn bridge_loop<S, P>(
    account: UserId,
    mut events: mpsc::Receiver<ConnectionEvent>,
    router: EventRouter<S, P>,
    importer: Arc<HistoryImporter>,
    engine_tx: mpsc::Sender<EngineEvent>,
) where
    S: GroupSource + 'static,
    P: ProfileSource + 'static,
{
    while let Some(event) = events.recv().await {
        match event {
            ConnectionEvent::State(state) => {
                forward(&engine_tx, EngineEvent::State(state)).await;
            }

            ConnectionEvent::Frame(frame) => match router.handle_frame(frame).await {
                Ok(translated) => {
                    for event in translated {
                        forward(&engine_tx, EngineEvent::Event(event)).await;
                    }
                }
                // A bad frame never tears the session down.
                Err(e) => warn!(account = %account, error = %e, "Frame translation failed"),
            },

            ConnectionEvent::ImportRequested => {
                info!(account = %account, "Scheduling one-time history import");
                let importer = importer.clone();
                let engine_tx = engine_tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = run_import(&importer, &engine_tx).await {
                        warn!(account = %account, error = %e, "History import failed");
                    }
                });
            }
        }
    }
}

/// Drain every pending snapshot into engine events, then persist the
/// completed-import flag.
async fn run_import(
    importer: &HistoryImporter,
    engine_tx: &mpsc::Sender<EngineEvent>,
) -> Result<(), SyncError> {
    for portal in importer.pending_portals()? {
        let mut anchor = None;
        loop {
            let chunk = importer.fetch_messages(
                &portal,
                anchor,
                PaginationDirection::Backward,
                importer.page_size(),
            )?;
            anchor = chunk
                .messages
                .iter()
                .map(|m| m.event.timestamp.timestamp_millis() as u64)
                .min()
                .or(anchor);
            for message in chunk.messages {
                forward(
                    engine_tx,
                    EngineEvent::Event(NormalizedEvent::NewMessage(message.event)),
                )
                .await;
                for reaction in message.reactions {
                    forward(
                        engine_tx,
                        EngineEvent::Event(NormalizedEvent::Reaction(reaction)),
                    )
                    .await;
                }
            }
            if !chunk.has_more {
                break;
            }
        }
        debug!(portal = %portal, "Snapshot import finished");
    }
    importer.mark_imported()?;
    Ok(())
}

async fn forward(engine_tx: &mpsc::Sender<EngineEvent>, event: EngineEvent) {
    if engine_tx.send(event).await.is_err() {
        debug!("Engine event receiver dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::time::timeout;
    use uuid::Uuid;

    use passerelle_store::{Database, SnapshotAuthor, SnapshotDirection, SnapshotItem};
    use passerelle_types::envelope::{ContentEnvelope, RemoteFrame};
    use passerelle_types::group::{GroupDelta, GroupSnapshot};
    use passerelle_types::{ChatId, GroupId, PortalKey, TransportStatus};

    use crate::connection::TransportEvent;
    use crate::router::RemoteProfile;

    fn user(n: u128) -> UserId {
        UserId(Uuid::from_u128(n))
    }

    fn portal() -> PortalKey {
        PortalKey::group(GroupId("g".into()))
    }

    struct ScriptedTransport {
        sessions: StdMutex<VecDeque<anyhow::Result<mpsc::Receiver<TransportEvent>>>>,
    }

    impl ScriptedTransport {
        fn new(
            sessions: Vec<anyhow::Result<mpsc::Receiver<TransportEvent>>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                sessions: StdMutex::new(sessions.into()),
            })
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn connect(&self) -> anyhow::Result<mpsc::Receiver<TransportEvent>> {
            self.sessions
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(anyhow::anyhow!("no session scripted")))
        }

        async fn disconnect(&self) {}
    }

    struct FakeGroups;

    #[async_trait]
    impl GroupSource for FakeGroups {
        async fn fetch_snapshot(&self, group: &GroupId) -> anyhow::Result<GroupSnapshot> {
            Ok(GroupSnapshot {
                group_id: group.clone(),
                revision: 0,
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
            _from: u32,
            _to: u32,
        ) -> anyhow::Result<Vec<GroupDelta>> {
            Ok(Vec::new())
        }
    }

    struct FakeProfiles;

    #[async_trait]
    impl ProfileSource for FakeProfiles {
        async fn fetch_profile(&self, _user: &UserId) -> anyhow::Result<RemoteProfile> {
            Ok(RemoteProfile::default())
        }
    }

    #[tokio::test]
    async fn connect_imports_then_routes_live_frames() {
        let account = user(1);
        let peer = user(2);

        let db: SharedDb = Arc::new(StdMutex::new(Database::open_in_memory().unwrap()));
        {
            let guard = db.lock().unwrap();
            guard.ensure_account(account).unwrap();
            guard
                .put_snapshot(
                    &portal(),
                    &[SnapshotItem {
                        author: SnapshotAuthor::known(peer),
                        timestamp_ms: 100,
                        direction: SnapshotDirection::Incoming {
                            server_seq: 10,
                            read: true,
                        },
                        body: Some("ancien".into()),
                        reactions: Vec::new(),
                    }],
                )
                .unwrap();
        }

        let (tx, rx) = mpsc::channel(16);
        let transport = ScriptedTransport::new(vec![Ok(rx)]);
        let mut handle = spawn_engine(
            account,
            transport,
            Arc::new(FakeGroups),
            Arc::new(FakeProfiles),
            db.clone(),
            SyncConfig::default(),
        );

        tx.send(TransportEvent::Status {
            status: TransportStatus::Connected,
            error: None,
        })
        .await
        .unwrap();
        tx.send(TransportEvent::Frame(RemoteFrame::Content(ContentEnvelope {
            sender: Some(peer),
            timestamp_ms: 5_000,
            chat: Some(ChatId::Group(GroupId("g".into()))),
            body: Some("nouveau".into()),
            ..Default::default()
        })))
        .await
        .unwrap();

        // Both the imported message and the live one come out, plus the
        // Connected state.
        let mut saw_connected = false;
        let mut bodies = Vec::new();
        while bodies.len() < 2 {
            let event = timeout(Duration::from_secs(2), handle.events.recv())
                .await
                .expect("timed out waiting for engine event")
                .expect("engine channel closed");
            match event {
                EngineEvent::State(BridgeState::Connected) => saw_connected = true,
                EngineEvent::Event(NormalizedEvent::NewMessage(m)) => {
                    bodies.push(m.body.unwrap_or_default())
                }
                _ => {}
            }
        }
        assert!(saw_connected);
        assert!(bodies.contains(&"ancien".to_string()));
        assert!(bodies.contains(&"nouveau".to_string()));

        // The completed import gets persisted by the background task.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            if db.lock().unwrap().get_account(account).unwrap().history_imported {
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "import flag never set"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn shutdown_closes_engine_events() {
        let transport = ScriptedTransport::new(vec![Err(anyhow::anyhow!("down"))]);
        let mut handle = spawn_engine(
            user(1),
            transport,
            Arc::new(FakeGroups),
            Arc::new(FakeProfiles),
            Arc::new(StdMutex::new(Database::open_in_memory().unwrap())),
            SyncConfig {
                backoff_min: Duration::from_secs(30),
                ..SyncConfig::default()
            },
        );

        handle.shutdown.send(true).unwrap();

        // The bridge loop drains whatever raced the shutdown, then the
        // channel closes.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            match timeout(Duration::from_millis(250), handle.events.recv()).await {
                Ok(None) => break,
                Ok(Some(_)) => {}
                Err(_) => {}
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "engine channel never closed"
            );
        }
    }
}
