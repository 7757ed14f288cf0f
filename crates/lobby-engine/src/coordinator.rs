//! The single serialized mutator of lobby state.
//!
//! Every register, unregister and broadcast goes through one bounded channel
//! and is handled to completion before the next is received. A failing
//! request is logged and skipped; the loop only stops on shutdown or when
//! every handle has been dropped.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use lobby_core::{ConnectionId, LobbyError, LobbyId, Message, SystemAction};
use lobby_store::PersistenceGateway;

use crate::queue::{Outbound, OutboundQueue};
use crate::registry::SessionRegistry;

/// Work item for the coordinator.
#[derive(Debug)]
pub enum Request {
    Register {
        identity: String,
        lobby_id: LobbyId,
        queue: OutboundQueue,
    },
    Unregister {
        identity: String,
        lobby_id: LobbyId,
        connection_id: ConnectionId,
    },
    Broadcast {
        lobby_id: LobbyId,
        message: Message,
    },
}

impl Request {
    fn kind(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Unregister { .. } => "unregister",
            Self::Broadcast { .. } => "broadcast",
        }
    }
}

/// Cloneable submission side of the coordinator.
///
/// Submissions wait for channel space rather than dropping requests.
#[derive(Clone, Debug)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<Request>,
}

impl CoordinatorHandle {
    pub async fn submit(&self, request: Request) -> Result<(), LobbyError> {
        self.tx.send(request).await.map_err(|_| LobbyError::CoordinatorClosed)
    }

    pub async fn register(
        &self,
        identity: impl Into<String>,
        lobby_id: LobbyId,
        queue: OutboundQueue,
    ) -> Result<(), LobbyError> {
        self.submit(Request::Register {
            identity: identity.into(),
            lobby_id,
            queue,
        })
        .await
    }

    pub async fn unregister(
        &self,
        identity: impl Into<String>,
        lobby_id: LobbyId,
        connection_id: ConnectionId,
    ) -> Result<(), LobbyError> {
        self.submit(Request::Unregister {
            identity: identity.into(),
            lobby_id,
            connection_id,
        })
        .await
    }

    pub async fn broadcast(&self, message: Message) -> Result<(), LobbyError> {
        self.submit(Request::Broadcast {
            lobby_id: message.lobby_id.clone(),
            message,
        })
        .await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

pub struct Coordinator {
    registry: Arc<SessionRegistry>,
    gateway: Arc<dyn PersistenceGateway>,
    rx: mpsc::Receiver<Request>,
    /// Used for join/leave notices; weak so the loop does not keep its own
    /// channel open.
    resubmit: mpsc::WeakSender<Request>,
}

impl Coordinator {
    /// Start the loop on the current runtime.
    pub fn spawn(
        registry: Arc<SessionRegistry>,
        gateway: Arc<dyn PersistenceGateway>,
        buffer: usize,
        shutdown: CancellationToken,
    ) -> (CoordinatorHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let coordinator = Self {
            registry,
            gateway,
            rx,
            resubmit: tx.downgrade(),
        };
        let task = tokio::spawn(coordinator.run(shutdown));
        (CoordinatorHandle { tx }, task)
    }

    async fn run(mut self, shutdown: CancellationToken) {
        info!("coordinator started");
        loop {
            let request = tokio::select! {
                () = shutdown.cancelled() => break,
                request = self.rx.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };

            let kind = request.kind();
            if let Err(e) = self.handle(request) {
                match e {
                    LobbyError::LobbyNotFound(_) | LobbyError::MemberNotFound(_) => {
                        debug!(request = kind, error = %e, "request dropped");
                    }
                    _ => {
                        warn!(request = kind, error = %e, error_kind = e.error_kind(), "request failed");
                    }
                }
            }
        }
        info!("coordinator stopped");
    }

    fn handle(&self, request: Request) -> Result<(), LobbyError> {
        match request {
            Request::Register {
                identity,
                lobby_id,
                queue,
            } => self.handle_register(&identity, &lobby_id, queue),
            Request::Unregister {
                identity,
                lobby_id,
                connection_id,
            } => self.handle_unregister(&identity, &lobby_id, &connection_id),
            Request::Broadcast { lobby_id, message } => self.handle_broadcast(&lobby_id, message),
        }
    }

    #[instrument(skip(self, identity, queue), fields(email = %identity, lobby_id = %lobby_id))]
    fn handle_register(&self, identity: &str, lobby_id: &LobbyId, queue: OutboundQueue) -> Result<(), LobbyError> {
        let session = self.registry.lookup(lobby_id)?;
        let connection_id = queue.connection_id().clone();
        if let Some(previous) = session.attach_queue(identity, queue)? {
            debug!(replaced = %previous.connection_id(), "superseded earlier connection");
        }

        let welcome = Message::system(SystemAction::Welcome, lobby_id.clone(), identity, session.presence());
        let history = session.history_snapshot();
        let replayed = history.len();
        let delivered = session
            .push_to(identity, Outbound::Message(Arc::new(welcome)))
            .and_then(|()| {
                if history.is_empty() {
                    Ok(())
                } else {
                    session.push_to(identity, Outbound::Replay(history))
                }
            });
        if let Err(e) = delivered {
            warn!(error = %e, "connection evicted during welcome");
        }

        if session.ever_joined_count() == session.capacity() && session.mark_started() {
            info!(capacity = session.capacity(), "lobby started");
        }

        info!(
            connection_id = %connection_id,
            active = session.active_count(),
            replayed,
            "member connected"
        );

        let joined = Message::system(SystemAction::UserJoined, lobby_id.clone(), identity, session.presence());
        self.notify(lobby_id, joined);
        Ok(())
    }

    #[instrument(skip(self, identity), fields(email = %identity, lobby_id = %lobby_id))]
    fn handle_unregister(
        &self,
        identity: &str,
        lobby_id: &LobbyId,
        connection_id: &ConnectionId,
    ) -> Result<(), LobbyError> {
        let session = self.registry.lookup(lobby_id)?;
        if !session.detach_connection(identity, connection_id) && session.live_connection(identity).is_some() {
            debug!(connection_id = %connection_id, "stale unregister for superseded connection");
            return Ok(());
        }
        session.mark_inactive(identity)?;
        info!(active = session.active_count(), "member disconnected");

        let left = Message::system(SystemAction::UserLeft, lobby_id.clone(), identity, session.presence());
        self.notify(lobby_id, left);
        Ok(())
    }

    #[instrument(skip(self, message), fields(lobby_id = %lobby_id))]
    fn handle_broadcast(&self, lobby_id: &LobbyId, message: Message) -> Result<(), LobbyError> {
        let session = self.registry.lookup(lobby_id)?;

        if message.is_chat() {
            session.append_history(message.clone());
            if let Some(author) = message.author.as_deref() {
                // Synchronous SQLite write on the loop task; WAL keeps it short
                // and broadcasts for a lobby must stay in append order.
                if let Err(e) = self.gateway.append(lobby_id, author, &message.content, message.timestamp) {
                    warn!(error = %e, email = %author, "failed to persist chat message");
                }
            }
        }

        for (identity, reason) in session.fan_out(Arc::new(message)) {
            warn!(email = %identity, reason = reason.error_kind(), "evicted unresponsive connection");
        }
        Ok(())
    }

    /// Submit a broadcast without waiting on the loop's own channel.
    fn notify(&self, lobby_id: &LobbyId, message: Message) {
        let Some(tx) = self.resubmit.upgrade() else {
            debug!("coordinator closing; notice dropped");
            return;
        };
        let request = Request::Broadcast {
            lobby_id: lobby_id.clone(),
            message,
        };
        tokio::spawn(async move {
            if tx.send(request).await.is_err() {
                debug!("coordinator closed before notice was delivered");
            }
        });
    }
}
