//! Per-connection bounded outbound queue.
//!
//! The sending half lives inside the [`Session`](crate::session::Session) while
//! the connection is attached; dropping it is what closes the queue, so it is
//! deliberately not `Clone`.

use std::sync::Arc;

use lobby_core::{ConnectionId, LobbyError, Message};
use tokio::sync::mpsc;

/// An item waiting to be written to a connection.
#[derive(Clone, Debug)]
pub enum Outbound {
    Message(Arc<Message>),
    /// History replay, written frame by frame in order. Occupies a single
    /// queue slot so a long history cannot saturate a fresh connection.
    Replay(Vec<Message>),
}

#[derive(Debug)]
pub struct OutboundQueue {
    connection_id: ConnectionId,
    tx: mpsc::Sender<Outbound>,
}

#[derive(Debug)]
pub struct OutboundReceiver {
    rx: mpsc::Receiver<Outbound>,
}

/// Create a bounded queue for one connection.
pub fn outbound_queue(connection_id: ConnectionId, capacity: usize) -> (OutboundQueue, OutboundReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (OutboundQueue { connection_id, tx }, OutboundReceiver { rx })
}

impl OutboundQueue {
    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    /// Non-blocking push. Fails when the consumer is backed up or gone.
    pub fn try_push(&self, item: Outbound) -> Result<(), LobbyError> {
        self.tx.try_send(item).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => LobbyError::QueueSaturated,
            mpsc::error::TrySendError::Closed(_) => LobbyError::QueueClosed,
        })
    }
}

impl OutboundReceiver {
    /// Next item, or `None` once the queue was detached and drained.
    pub async fn recv(&mut self) -> Option<Outbound> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lobby_core::LobbyId;

    fn chat(content: &str) -> Outbound {
        Outbound::Message(Arc::new(Message::chat(LobbyId::from_raw("lobby-q"), "a", content)))
    }

    #[tokio::test]
    async fn fifo_order() {
        let (queue, mut rx) = outbound_queue(ConnectionId::new(), 8);
        queue.try_push(chat("one")).unwrap();
        queue.try_push(chat("two")).unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        match (first, second) {
            (Outbound::Message(a), Outbound::Message(b)) => {
                assert_eq!(a.content, "one");
                assert_eq!(b.content, "two");
            }
            other => panic!("unexpected items: {other:?}"),
        }
    }

    #[test]
    fn full_queue_is_saturated() {
        let (queue, _rx) = outbound_queue(ConnectionId::new(), 2);
        queue.try_push(chat("1")).unwrap();
        queue.try_push(chat("2")).unwrap();
        assert_eq!(queue.try_push(chat("3")), Err(LobbyError::QueueSaturated));
    }

    #[test]
    fn dropped_receiver_is_closed() {
        let (queue, rx) = outbound_queue(ConnectionId::new(), 2);
        drop(rx);
        assert_eq!(queue.try_push(chat("x")), Err(LobbyError::QueueClosed));
    }

    #[tokio::test]
    async fn dropping_queue_ends_stream_after_drain() {
        let (queue, mut rx) = outbound_queue(ConnectionId::new(), 4);
        queue.try_push(chat("last")).unwrap();
        drop(queue);
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }
}
