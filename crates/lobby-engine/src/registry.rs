//! Owns every lobby and enforces the one-used-lobby-at-a-time admission rule.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, info, instrument};

use lobby_core::{LobbyError, LobbyId};

use crate::config::MemberRetention;
use crate::session::{MemberState, Session};

/// Result of a successful login.
#[derive(Clone, Debug)]
pub struct Admission {
    pub session: Arc<Session>,
    pub member: MemberState,
    /// The identity was already a member of this lobby.
    pub reconnected: bool,
}

/// Process-wide set of lobbies.
///
/// Lobby ids are time-ordered, so iteration follows creation order.
pub struct SessionRegistry {
    sessions: RwLock<BTreeMap<LobbyId, Arc<Session>>>,
    capacity: usize,
    retention: MemberRetention,
}

impl SessionRegistry {
    pub fn new(capacity: usize, retention: MemberRetention) -> Self {
        Self {
            sessions: RwLock::new(BTreeMap::new()),
            capacity: capacity.max(1),
            retention,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn retention(&self) -> MemberRetention {
        self.retention
    }

    /// A lobby that can take a new member, creating one if none exists.
    ///
    /// Fails with [`LobbyError::Capacity`] when a used-up lobby exists, even
    /// if all of its members have since disconnected.
    pub fn get_or_create_admission_target(&self) -> Result<Arc<Session>, LobbyError> {
        let mut sessions = self.sessions.write();
        if let Some(session) = sessions.values().find(|s| s.has_spare_capacity()) {
            return Ok(Arc::clone(session));
        }
        if !sessions.is_empty() {
            return Err(LobbyError::Capacity);
        }

        let session = Arc::new(Session::new(LobbyId::new(), self.capacity));
        info!(lobby_id = %session.id(), capacity = self.capacity, "lobby created");
        sessions.insert(session.id().clone(), Arc::clone(&session));
        Ok(session)
    }

    pub fn lookup(&self, id: &LobbyId) -> Result<Arc<Session>, LobbyError> {
        self.sessions
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| LobbyError::LobbyNotFound(id.clone()))
    }

    /// The lobby `identity` belongs to and may still rejoin.
    pub fn find_by_member(&self, identity: &str) -> Option<Arc<Session>> {
        let now = Utc::now();
        self.sessions
            .read()
            .values()
            .find(|s| s.can_rejoin(identity, self.retention, now))
            .cloned()
    }

    /// First lobby with spare capacity.
    pub fn list_admissible(&self) -> Option<Arc<Session>> {
        self.sessions.read().values().find(|s| s.has_spare_capacity()).cloned()
    }

    /// Most recently created lobby.
    pub fn most_recent(&self) -> Option<Arc<Session>> {
        self.sessions.read().values().next_back().cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Admit `identity`: rejoin its existing lobby, or take a seat in the
    /// current admission target.
    #[instrument(skip(self), fields(email = %identity))]
    pub fn login(&self, identity: &str) -> Result<Admission, LobbyError> {
        if let Some(session) = self.find_by_member(identity) {
            let member = session.admit_member(identity)?;
            debug!(lobby_id = %session.id(), "member rejoined");
            return Ok(Admission {
                session,
                member,
                reconnected: true,
            });
        }

        if self.sessions.read().values().any(|s| s.is_member(identity)) {
            return Err(LobbyError::MembershipExpired(identity.to_string()));
        }

        let session = self.get_or_create_admission_target()?;
        let member = session.admit_member(identity)?;
        info!(
            lobby_id = %session.id(),
            ever_joined = session.ever_joined_count(),
            capacity = session.capacity(),
            "member admitted"
        );
        Ok(Admission {
            session,
            member,
            reconnected: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(capacity: usize) -> SessionRegistry {
        SessionRegistry::new(capacity, MemberRetention::Forever)
    }

    #[test]
    fn creates_first_lobby_lazily() {
        let reg = registry(2);
        assert!(reg.is_empty());
        let s = reg.get_or_create_admission_target().unwrap();
        assert_eq!(reg.len(), 1);
        assert_eq!(s.capacity(), 2);
        assert!(s.id().as_str().starts_with("lobby-"));
    }

    #[test]
    fn reuses_lobby_with_spare_capacity() {
        let reg = registry(2);
        let first = reg.get_or_create_admission_target().unwrap();
        first.admit_member("a").unwrap();
        let second = reg.get_or_create_admission_target().unwrap();
        assert_eq!(first.id(), second.id());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn used_lobby_blocks_new_lobby_even_when_empty() {
        let reg = registry(1);
        let s = reg.get_or_create_admission_target().unwrap();
        s.admit_member("a").unwrap();
        s.mark_inactive("a").unwrap();
        assert_eq!(s.active_count(), 0);

        assert_eq!(reg.get_or_create_admission_target().unwrap_err(), LobbyError::Capacity);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn lookup_unknown() {
        let reg = registry(2);
        let id = LobbyId::from_raw("lobby-missing");
        assert_eq!(reg.lookup(&id).unwrap_err(), LobbyError::LobbyNotFound(id));
    }

    #[test]
    fn find_by_member_returns_owning_lobby() {
        let reg = registry(2);
        let admission = reg.login("a@example.com").unwrap();
        let found = reg.find_by_member("a@example.com").unwrap();
        assert_eq!(found.id(), admission.session.id());
        assert!(reg.find_by_member("b@example.com").is_none());
    }

    #[test]
    fn list_admissible_and_most_recent() {
        let reg = registry(1);
        assert!(reg.list_admissible().is_none());
        assert!(reg.most_recent().is_none());

        let admission = reg.login("a").unwrap();
        assert!(reg.list_admissible().is_none());
        assert_eq!(reg.most_recent().unwrap().id(), admission.session.id());
    }

    #[test]
    fn login_reconnect_rejoins_same_lobby() {
        let reg = registry(2);
        let first = reg.login("a").unwrap();
        assert!(!first.reconnected);
        first.session.mark_inactive("a").unwrap();

        let again = reg.login("a").unwrap();
        assert!(again.reconnected);
        assert!(again.member.active);
        assert_eq!(again.session.id(), first.session.id());
        assert_eq!(again.session.ever_joined_count(), 1);
    }

    #[test]
    fn login_after_lobby_used_up() {
        let reg = registry(2);
        reg.login("a").unwrap();
        reg.login("b").unwrap();

        assert_eq!(reg.login("c").unwrap_err(), LobbyError::Capacity);
        assert!(reg.login("a").unwrap().reconnected);
    }

    #[test]
    fn expired_member_cannot_rejoin() {
        let reg = SessionRegistry::new(2, MemberRetention::Expire { after_secs: 0 });
        let admission = reg.login("a").unwrap();
        admission.session.mark_inactive("a").unwrap();

        assert!(reg.find_by_member("a").is_none());
        assert_eq!(
            reg.login("a").unwrap_err(),
            LobbyError::MembershipExpired("a".into())
        );
        assert!(admission.session.is_member("a"));
    }

    #[test]
    fn concurrent_logins_create_one_lobby() {
        let reg = Arc::new(registry(8));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let reg = Arc::clone(&reg);
                std::thread::spawn(move || reg.login(&format!("user{i}")).unwrap())
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.most_recent().unwrap().ever_joined_count(), 8);
    }
}
