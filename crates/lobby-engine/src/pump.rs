//! Per-connection reader/writer tasks.
//!
//! The transport is abstracted as a stream and a sink of [`Frame`]s so the
//! pumps run the same over a websocket or an in-memory channel.

use std::fmt::Display;
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use lobby_core::message::decode_chat;
use lobby_core::{ConnectionId, LobbyError, LobbyId, Message};

use crate::coordinator::CoordinatorHandle;
use crate::queue::{outbound_queue, Outbound, OutboundReceiver};

/// Transport-level frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Ping,
    Pong,
    Close,
}

/// Who is on the other end of a connection.
#[derive(Clone, Debug)]
pub struct ConnectionContext {
    pub identity: String,
    pub lobby_id: LobbyId,
    pub connection_id: ConnectionId,
}

impl ConnectionContext {
    pub fn new(identity: impl Into<String>, lobby_id: LobbyId) -> Self {
        Self {
            identity: identity.into(),
            lobby_id,
            connection_id: ConnectionId::new(),
        }
    }
}

/// Running pump pair for one connection.
#[derive(Debug)]
pub struct PumpHandles {
    pub inbound: JoinHandle<()>,
    pub outbound: JoinHandle<()>,
    /// Cancelled when either side stops.
    pub closed: CancellationToken,
}

impl PumpHandles {
    /// Wait until both pumps have exited.
    pub async fn join(self) {
        let _ = self.inbound.await;
        let _ = self.outbound.await;
    }
}

/// Attach a connection to its lobby and start its pumps.
///
/// The outbound pump starts first so the welcome frames have a reader, then
/// the register request is submitted, and only then does the inbound pump
/// start; every request from this connection is therefore ordered after its
/// registration.
///
/// Cancelling `closed` (or a parent of it) tears the connection down.
pub async fn serve_connection<S, K, E>(
    stream: S,
    sink: K,
    ctx: ConnectionContext,
    coordinator: CoordinatorHandle,
    queue_capacity: usize,
    heartbeat: Duration,
    closed: CancellationToken,
) -> Result<PumpHandles, LobbyError>
where
    S: Stream<Item = Result<Frame, E>> + Send + Unpin + 'static,
    E: Display + Send + 'static,
    K: Sink<Frame> + Send + Unpin + 'static,
    K::Error: Display + Send,
{
    let (queue, receiver) = outbound_queue(ctx.connection_id.clone(), queue_capacity);

    let outbound = tokio::spawn(run_outbound(sink, receiver, ctx.clone(), closed.clone(), heartbeat));

    if let Err(e) = coordinator
        .register(ctx.identity.clone(), ctx.lobby_id.clone(), queue)
        .await
    {
        closed.cancel();
        return Err(e);
    }

    let inbound = tokio::spawn(run_inbound(stream, ctx, coordinator, closed.clone()));
    Ok(PumpHandles {
        inbound,
        outbound,
        closed,
    })
}

/// Read frames and forward chat messages to the coordinator.
///
/// Any receive or decode error ends the pump. Exactly one unregister is
/// submitted on exit.
pub async fn run_inbound<S, E>(
    mut stream: S,
    ctx: ConnectionContext,
    coordinator: CoordinatorHandle,
    closed: CancellationToken,
) where
    S: Stream<Item = Result<Frame, E>> + Unpin,
    E: Display,
{
    loop {
        let frame = tokio::select! {
            () = closed.cancelled() => break,
            frame = stream.next() => frame,
        };

        match frame {
            Some(Ok(Frame::Text(raw))) => match decode_chat(&raw, &ctx.lobby_id, &ctx.identity) {
                Ok(message) => {
                    if coordinator.broadcast(message).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!(email = %ctx.identity, error = %e, "undecodable frame, closing");
                    break;
                }
            },
            Some(Ok(Frame::Ping | Frame::Pong)) => {}
            Some(Ok(Frame::Close)) | None => {
                debug!(email = %ctx.identity, "connection closed by peer");
                break;
            }
            Some(Err(e)) => {
                debug!(email = %ctx.identity, error = %e, "receive failed");
                break;
            }
        }
    }

    closed.cancel();
    if let Err(e) = coordinator
        .unregister(ctx.identity.clone(), ctx.lobby_id.clone(), ctx.connection_id.clone())
        .await
    {
        warn!(email = %ctx.identity, error = %e, "could not unregister connection");
    }
}

/// Drain the outbound queue onto the connection, with periodic pings.
///
/// Stops when the queue is closed, a write fails, or the connection is
/// cancelled. Never unregisters; it cancels `closed` so the inbound pump does.
pub async fn run_outbound<K>(
    mut sink: K,
    mut queue: OutboundReceiver,
    ctx: ConnectionContext,
    closed: CancellationToken,
    heartbeat: Duration,
) where
    K: Sink<Frame> + Unpin,
    K::Error: Display,
{
    let mut ping_interval = tokio::time::interval(heartbeat);
    ping_interval.tick().await; // first tick is immediate

    loop {
        let item = tokio::select! {
            () = closed.cancelled() => break,
            _ = ping_interval.tick() => {
                if let Err(e) = sink.send(Frame::Ping).await {
                    debug!(email = %ctx.identity, error = %e, "ping failed");
                    break;
                }
                trace!(connection_id = %ctx.connection_id, "sent ping");
                continue;
            }
            item = queue.recv() => item,
        };

        let Some(item) = item else {
            debug!(email = %ctx.identity, "outbound queue closed");
            break;
        };
        if let Err(e) = write_item(&mut sink, item).await {
            debug!(email = %ctx.identity, error = %e, "write failed");
            break;
        }
    }

    let _ = sink.send(Frame::Close).await;
    let _ = sink.close().await;
    closed.cancel();
}

async fn write_item<K>(sink: &mut K, item: Outbound) -> Result<(), String>
where
    K: Sink<Frame> + Unpin,
    K::Error: Display,
{
    match item {
        Outbound::Message(message) => write_message(sink, &message).await,
        Outbound::Replay(messages) => {
            for message in &messages {
                write_message(sink, message).await?;
            }
            Ok(())
        }
    }
}

async fn write_message<K>(sink: &mut K, message: &Message) -> Result<(), String>
where
    K: Sink<Frame> + Unpin,
    K::Error: Display,
{
    let json = message.to_json().map_err(|e| e.to_string())?;
    sink.send(Frame::Text(json)).await.map_err(|e| e.to_string())
}
