//! The lobby aggregate: membership, live outbound queues and chat history.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use lobby_core::{ConnectionId, LobbyError, LobbyId, Message, Presence};

use crate::config::MemberRetention;
use crate::queue::{Outbound, OutboundQueue};

/// A participant ever admitted to a lobby. Rows are never removed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MemberState {
    pub identity: String,
    pub joined_at: DateTime<Utc>,
    pub active: bool,
    pub last_seen: DateTime<Utc>,
}

struct AttachedQueue {
    identity: String,
    queue: OutboundQueue,
}

#[derive(Default)]
struct SessionState {
    /// Join order.
    members: Vec<MemberState>,
    queues: Vec<AttachedQueue>,
    history: Vec<Message>,
    started: bool,
}

impl SessionState {
    fn member_mut(&mut self, identity: &str) -> Option<&mut MemberState> {
        self.members.iter_mut().find(|m| m.identity == identity)
    }

    fn queue_position(&self, identity: &str) -> Option<usize> {
        self.queues.iter().position(|q| q.identity == identity)
    }
}

/// One bounded chat room.
///
/// Every operation takes this session's own lock; sessions never contend
/// with each other.
pub struct Session {
    id: LobbyId,
    capacity: usize,
    created_at: DateTime<Utc>,
    state: RwLock<SessionState>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .field("created_at", &self.created_at)
            .field("ever_joined", &self.ever_joined_count())
            .field("started", &self.is_started())
            .finish()
    }
}

impl Session {
    pub fn new(id: LobbyId, capacity: usize) -> Self {
        Self {
            id,
            capacity,
            created_at: Utc::now(),
            state: RwLock::new(SessionState::default()),
        }
    }

    pub fn id(&self) -> &LobbyId {
        &self.id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Admit `identity`, or reactivate it if already a member.
    pub fn admit_member(&self, identity: &str) -> Result<MemberState, LobbyError> {
        let mut state = self.state.write();
        let now = Utc::now();
        if let Some(member) = state.member_mut(identity) {
            member.active = true;
            member.last_seen = now;
            return Ok(member.clone());
        }
        if state.members.len() >= self.capacity {
            return Err(LobbyError::Full {
                lobby_id: self.id.clone(),
                capacity: self.capacity,
            });
        }
        let member = MemberState {
            identity: identity.to_string(),
            joined_at: now,
            active: true,
            last_seen: now,
        };
        state.members.push(member.clone());
        Ok(member)
    }

    /// Install the live queue for a member's connection and mark it active.
    ///
    /// Returns the queue it replaced, if the member was already connected.
    /// Dropping that queue closes it.
    pub fn attach_queue(&self, identity: &str, queue: OutboundQueue) -> Result<Option<OutboundQueue>, LobbyError> {
        let mut state = self.state.write();
        let member = state
            .member_mut(identity)
            .ok_or_else(|| LobbyError::MemberNotFound(identity.to_string()))?;
        member.active = true;
        member.last_seen = Utc::now();

        let attached = AttachedQueue {
            identity: identity.to_string(),
            queue,
        };
        match state.queue_position(identity) {
            Some(pos) => Ok(Some(std::mem::replace(&mut state.queues[pos], attached).queue)),
            None => {
                state.queues.push(attached);
                Ok(None)
            }
        }
    }

    /// Remove and close a member's queue. Returns whether one was attached.
    pub fn detach_queue(&self, identity: &str) -> bool {
        let mut state = self.state.write();
        match state.queue_position(identity) {
            Some(pos) => {
                state.queues.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Like [`detach_queue`](Self::detach_queue), but only if the attached
    /// queue belongs to `connection_id`.
    pub fn detach_connection(&self, identity: &str, connection_id: &ConnectionId) -> bool {
        let mut state = self.state.write();
        match state.queue_position(identity) {
            Some(pos) if state.queues[pos].queue.connection_id() == connection_id => {
                state.queues.remove(pos);
                true
            }
            _ => false,
        }
    }

    /// Connection currently attached for `identity`.
    pub fn live_connection(&self, identity: &str) -> Option<ConnectionId> {
        let state = self.state.read();
        state
            .queue_position(identity)
            .map(|pos| state.queues[pos].queue.connection_id().clone())
    }

    pub fn mark_inactive(&self, identity: &str) -> Result<(), LobbyError> {
        let mut state = self.state.write();
        let member = state
            .member_mut(identity)
            .ok_or_else(|| LobbyError::MemberNotFound(identity.to_string()))?;
        member.active = false;
        member.last_seen = Utc::now();
        Ok(())
    }

    pub fn member(&self, identity: &str) -> Option<MemberState> {
        self.state.read().members.iter().find(|m| m.identity == identity).cloned()
    }

    pub fn is_member(&self, identity: &str) -> bool {
        self.state.read().members.iter().any(|m| m.identity == identity)
    }

    /// Whether `identity` is a member that may still rejoin under `retention`.
    pub fn can_rejoin(&self, identity: &str, retention: MemberRetention, now: DateTime<Utc>) -> bool {
        self.state
            .read()
            .members
            .iter()
            .find(|m| m.identity == identity)
            .is_some_and(|m| m.active || retention.allows_rejoin(m.last_seen, now))
    }

    pub fn active_count(&self) -> usize {
        self.state.read().members.iter().filter(|m| m.active).count()
    }

    /// Active members in join order.
    pub fn active_members(&self) -> Vec<String> {
        self.state
            .read()
            .members
            .iter()
            .filter(|m| m.active)
            .map(|m| m.identity.clone())
            .collect()
    }

    /// Members ever admitted; governs admission, never decreases.
    pub fn ever_joined_count(&self) -> usize {
        self.state.read().members.len()
    }

    pub fn has_spare_capacity(&self) -> bool {
        self.ever_joined_count() < self.capacity
    }

    pub fn attached_count(&self) -> usize {
        self.state.read().queues.len()
    }

    pub fn presence(&self) -> Presence {
        let state = self.state.read();
        let active_members: Vec<String> = state
            .members
            .iter()
            .filter(|m| m.active)
            .map(|m| m.identity.clone())
            .collect();
        Presence {
            active_count: active_members.len(),
            capacity: self.capacity,
            active_members,
        }
    }

    pub fn append_history(&self, message: Message) {
        self.state.write().history.push(message);
    }

    /// Copy of the history for replay.
    pub fn history_snapshot(&self) -> Vec<Message> {
        self.state.read().history.clone()
    }

    pub fn history_len(&self) -> usize {
        self.state.read().history.len()
    }

    /// One-way transition. Returns `true` only on the call that flipped it.
    pub fn mark_started(&self) -> bool {
        let mut state = self.state.write();
        if state.started {
            return false;
        }
        state.started = true;
        true
    }

    pub fn is_started(&self) -> bool {
        self.state.read().started
    }

    /// Non-blocking push onto one member's queue. On failure the queue is
    /// detached and closed, and the error is returned.
    pub fn push_to(&self, identity: &str, item: Outbound) -> Result<(), LobbyError> {
        let mut state = self.state.write();
        let pos = state
            .queue_position(identity)
            .ok_or_else(|| LobbyError::MemberNotFound(identity.to_string()))?;
        if let Err(e) = state.queues[pos].queue.try_push(item) {
            state.queues.remove(pos);
            return Err(e);
        }
        Ok(())
    }

    /// Push `message` onto every attached queue. Queues that are full or
    /// closed are detached and closed; their identities are returned.
    pub fn fan_out(&self, message: Arc<Message>) -> Vec<(String, LobbyError)> {
        let mut state = self.state.write();
        let mut evicted = Vec::new();
        state.queues.retain(|attached| {
            match attached.queue.try_push(Outbound::Message(Arc::clone(&message))) {
                Ok(()) => true,
                Err(e) => {
                    evicted.push((attached.identity.clone(), e));
                    false
                }
            }
        });
        evicted
    }
}
