//! Connection lifecycle management.
//!
//! One background task per logged-in account owns the transport session
//! and forwards status transitions and raw frames outward through typed
//! channels.  The task implements the disconnect-debouncing state
//! machine and the reconnect/backoff loop; it never blocks on downstream
//! consumers beyond the bounded event channel.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, warn};

use passerelle_types::envelope::RemoteFrame;
use passerelle_types::{BridgeState, TransportStatus, UserId};

use crate::config::SyncConfig;
use crate::SharedDb;

// ---------------------------------------------------------------------------
// Transport boundary
// ---------------------------------------------------------------------------

/// One event from the transport collaborator: either a status transition
/// (using exactly the [`TransportStatus`] vocabulary) or a decrypted
/// inbound frame.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Status {
        status: TransportStatus,
        error: Option<String>,
    },
    Frame(RemoteFrame),
}

/// The duplex session boundary.  `connect` yields the event stream of
/// one session attempt; the transport performs its own short-interval
/// reconnects internally and reports them as `Disconnected`/`Connected`
/// status events on the same stream.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self) -> anyhow::Result<mpsc::Receiver<TransportEvent>>;
    async fn disconnect(&self);
}

// ---------------------------------------------------------------------------
// Command / event types
// ---------------------------------------------------------------------------

/// Commands sent *into* the connection task.
#[derive(Debug)]
pub enum ConnectionCommand {
    /// Gracefully stop the session and report `CleanShutdown`.
    Disconnect,
}

/// Events sent *from* the connection task to the application.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Debounced, outward-facing bridge state.
    State(BridgeState),
    /// A raw inbound frame, to be handed to the event router.
    Frame(RemoteFrame),
    /// The one-time history import must be scheduled.  Always emitted
    /// before the `Connected` state it belongs to, so no live message is
    /// handled ahead of the queued import.
    ImportRequested,
}

/// Handle to a spawned connection task.
pub struct ConnectionHandle {
    pub commands: mpsc::Sender<ConnectionCommand>,
    pub events: mpsc::Receiver<ConnectionEvent>,
    /// Flip to `true` to abort retry/backoff immediately, with no
    /// further signals.
    pub shutdown: watch::Sender<bool>,
}

/// Spawn the connection lifecycle task for one account session.
pub fn spawn_connection<T: Transport>(
    account: UserId,
    transport: Arc<T>,
    db: SharedDb,
    config: SyncConfig,
) -> ConnectionHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel::<ConnectionCommand>(16);
    let (event_tx, event_rx) = mpsc::channel::<ConnectionEvent>(256);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        run(account, transport, db, config, cmd_rx, event_tx, shutdown_rx).await;
        debug!(account = %account, "Connection task terminated");
    });

    ConnectionHandle {
        commands: cmd_tx,
        events: event_rx,
        shutdown: shutdown_tx,
    }
}

enum LoopOutcome {
    /// The transport stream ended; re-establish with backoff.
    Reconnect,
    /// Terminal: stop without reconnecting.
    Stop,
}

async fn run<T: Transport>(
    account: UserId,
    transport: Arc<T>,
    db: SharedDb,
    config: SyncConfig,
    mut cmd_rx: mpsc::Receiver<ConnectionCommand>,
    event_tx: mpsc::Sender<ConnectionEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut backoff = config.backoff_min;

    loop {
        emit(&event_tx, ConnectionEvent::State(BridgeState::Connecting)).await;

        let stream = tokio::select! {
            _ = shutdown_rx.changed() => return,
            res = transport.connect() => match res {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(
                        account = %account,
                        error = %e,
                        retry_in = ?backoff,
                        "Session establishment failed"
                    );
                    tokio::select! {
                        // Cancellation aborts the retry loop immediately,
                        // with no further signals.
                        _ = shutdown_rx.changed() => return,
                        _ = sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(config.backoff_max);
                    continue;
                }
            }
        };

        backoff = config.backoff_min;
        info!(account = %account, "Transport session established");

        match event_loop(
            account,
            &transport,
            &db,
            &config,
            &mut cmd_rx,
            &event_tx,
            &mut shutdown_rx,
            stream,
        )
        .await
        {
            LoopOutcome::Reconnect => continue,
            LoopOutcome::Stop => return,
        }
    }
}

/// A raw `Disconnected` signal waiting out its grace window.
struct PendingDisconnect {
    deadline: Instant,
    error: Option<String>,
}

#[allow(clippy::too_many_arguments)]
async fn event_loop<T: Transport>(
    account: UserId,
    transport: &Arc<T>,
    db: &SharedDb,
    config: &SyncConfig,
    cmd_rx: &mut mpsc::Receiver<ConnectionCommand>,
    event_tx: &mpsc::Sender<ConnectionEvent>,
    shutdown_rx: &mut watch::Receiver<bool>,
    mut stream: mpsc::Receiver<TransportEvent>,
) -> LoopOutcome {
    let mut pending: Option<PendingDisconnect> = None;

    loop {
        let debounce_deadline = pending
            .as_ref()
            .map(|p| p.deadline)
            .unwrap_or_else(Instant::now);

        tokio::select! {
            _ = shutdown_rx.changed() => return LoopOutcome::Stop,

            cmd = cmd_rx.recv() => {
                // A dropped command channel counts as a disconnect request.
                if cmd.is_some() {
                    info!(account = %account, "Disconnect requested");
                }
                transport.disconnect().await;
                emit(event_tx, ConnectionEvent::State(BridgeState::CleanShutdown)).await;
                return LoopOutcome::Stop;
            }

            _ = sleep_until(debounce_deadline), if pending.is_some() => {
                // Grace window elapsed: report exactly one transient
                // disconnect, carrying the last known error.
                let expired = pending.take().unwrap_or(PendingDisconnect {
                    deadline: debounce_deadline,
                    error: None,
                });
                debug!(account = %account, "Disconnect debounce window expired");
                emit(
                    event_tx,
                    ConnectionEvent::State(BridgeState::TransientDisconnect {
                        error: expired.error,
                    }),
                )
                .await;
            }

            ev = stream.recv() => match ev {
                None => {
                    warn!(account = %account, "Transport stream ended, reconnecting");
                    return LoopOutcome::Reconnect;
                }

                // The debounce window suspends only status *reporting*;
                // frames keep flowing.
                Some(TransportEvent::Frame(frame)) => {
                    emit(event_tx, ConnectionEvent::Frame(frame)).await;
                }

                Some(TransportEvent::Status { status, error }) => {
                    // Any status other than `Disconnected` abandons
                    // debouncing and is processed immediately.
                    if status != TransportStatus::Disconnected {
                        pending = None;
                    }

                    match status {
                        TransportStatus::Disconnected => {
                            match pending.as_mut() {
                                Some(p) => {
                                    // Keep waiting; the window is NOT reset.
                                    if error.is_some() {
                                        p.error = error;
                                    }
                                }
                                None => {
                                    pending = Some(PendingDisconnect {
                                        deadline: Instant::now() + config.disconnect_debounce,
                                        error,
                                    });
                                }
                            }
                        }
                        TransportStatus::Connected => {
                            if needs_history_import(db, account) {
                                emit(event_tx, ConnectionEvent::ImportRequested).await;
                            }
                            emit(event_tx, ConnectionEvent::State(BridgeState::Connected)).await;
                        }
                        TransportStatus::LoggedOut => {
                            info!(account = %account, "Session rejected, purging local state");
                            purge_account(db, account);
                            transport.disconnect().await;
                            emit(
                                event_tx,
                                ConnectionEvent::State(BridgeState::LoggedOut { error }),
                            )
                            .await;
                            return LoopOutcome::Stop;
                        }
                        TransportStatus::TransientError => {
                            emit(
                                event_tx,
                                ConnectionEvent::State(BridgeState::TransientDisconnect { error }),
                            )
                            .await;
                        }
                        TransportStatus::FatalError => {
                            // Reported, but retrying continues.
                            emit(
                                event_tx,
                                ConnectionEvent::State(BridgeState::FatalError { error }),
                            )
                            .await;
                        }
                        TransportStatus::CleanShutdown => {
                            emit(event_tx, ConnectionEvent::State(BridgeState::CleanShutdown)).await;
                            return LoopOutcome::Stop;
                        }
                    }
                }
            }
        }
    }
}

async fn emit(event_tx: &mpsc::Sender<ConnectionEvent>, event: ConnectionEvent) {
    if event_tx.send(event).await.is_err() {
        debug!("Event receiver dropped");
    }
}

/// Whether the account still needs its one-time history import.  Store
/// failures default to `false` so a broken database cannot trigger a
/// duplicate import.
fn needs_history_import(db: &SharedDb, account: UserId) -> bool {
    let Ok(guard) = db.lock() else {
        warn!(account = %account, "Database lock poisoned");
        return false;
    };
    if let Err(e) = guard.ensure_account(account) {
        warn!(account = %account, error = %e, "Failed to ensure account row");
        return false;
    }
    match guard.get_account(account) {
        Ok(record) => !record.history_imported,
        Err(e) => {
            warn!(account = %account, error = %e, "Failed to read account row");
            false
        }
    }
}

fn purge_account(db: &SharedDb, account: UserId) {
    let Ok(guard) = db.lock() else {
        warn!(account = %account, "Database lock poisoned during purge");
        return;
    };
    if let Err(e) = guard.delete_account(account) {
        warn!(account = %account, error = %e, "Failed to purge account state");
    }
}
