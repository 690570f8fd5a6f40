//! Registry of live connections
//!
//! The only mutation surface other components get: lookup by id, username,
//! or address, single sends, and best-effort broadcast to an explicit set.
//! Nobody outside this module iterates the raw map.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use uuid::Uuid;

use super::session::Session;

#[derive(Default)]
pub struct ClientRegistry {
    clients: DashMap<Uuid, Arc<Session>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: Arc<Session>) {
        self.clients.insert(session.id, session);
    }

    pub fn remove(&self, id: Uuid) -> Option<Arc<Session>> {
        self.clients.remove(&id).map(|(_, s)| s)
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<Session>> {
        self.clients.get(&id).map(|s| s.value().clone())
    }

    /// Username comparison is case-insensitive, matching login rules.
    pub fn find_by_username(&self, username: &str) -> Option<Arc<Session>> {
        self.clients.iter().find_map(|entry| {
            let session = entry.value();
            match session.username() {
                Some(name) if name.eq_ignore_ascii_case(username) => Some(session.clone()),
                _ => None,
            }
        })
    }

    pub fn find_by_addr(&self, addr: SocketAddr) -> Option<Arc<Session>> {
        self.clients
            .iter()
            .find(|entry| entry.value().addr == addr)
            .map(|entry| entry.value().clone())
    }

    pub fn count(&self) -> usize {
        self.clients.len()
    }

    /// Send one frame to every named participant still in `battle_id`,
    /// optionally excluding the sender. Targets that vanished or left the
    /// battle between roster lookup and send are skipped silently.
    pub fn send_to_battle(
        &self,
        battle_id: &str,
        participants: &[String],
        exclude: Option<&str>,
        frame: Bytes,
    ) {
        for name in participants {
            if exclude.is_some_and(|ex| ex.eq_ignore_ascii_case(name)) {
                continue;
            }
            let Some(target) = self.find_by_username(name) else {
                continue;
            };
            if target.current_battle().as_deref() == Some(battle_id) {
                target.send_frame(frame.clone());
            }
        }
    }

    /// Broadcast to every connection currently browsing the battle list.
    pub fn send_to_lobby_viewers(&self, frame: Bytes) {
        use super::session::SessionState;
        for entry in self.clients.iter() {
            let session = entry.value();
            let state = session.lock().state;
            if matches!(state, SessionState::ChatLobby | SessionState::BattleLobby) {
                session.send_frame(frame.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::session::Outgoing;
    use crate::store::accounts::UserProfile;

    fn session_with_user(addr: &str, name: &str) -> (Arc<Session>, tokio::sync::mpsc::Receiver<Outgoing>) {
        let (session, rx) = Session::new(addr.parse().unwrap());
        session.lock().user = Some(UserProfile {
            username: name.into(),
            rank: 1,
        });
        (session, rx)
    }

    #[test]
    fn username_lookup_is_case_insensitive() {
        let registry = ClientRegistry::new();
        let (session, _rx) = session_with_user("10.0.0.1:1000", "Commander");
        registry.insert(session.clone());

        assert!(registry.find_by_username("commander").is_some());
        assert!(registry.find_by_username("COMMANDER").is_some());
        assert!(registry.find_by_username("nobody").is_none());
        assert_eq!(registry.count(), 1);

        registry.remove(session.id);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn battle_send_skips_sender_and_departed_peers() {
        let registry = ClientRegistry::new();

        let (a, mut rx_a) = session_with_user("10.0.0.1:1001", "alpha");
        a.lock().current_battle = Some("b1".into());
        let (b, mut rx_b) = session_with_user("10.0.0.1:1002", "bravo");
        b.lock().current_battle = Some("b1".into());
        let (c, mut rx_c) = session_with_user("10.0.0.1:1003", "charlie");
        c.lock().current_battle = Some("other".into());

        registry.insert(a);
        registry.insert(b);
        registry.insert(c);

        let roster = vec![
            "alpha".to_owned(),
            "bravo".to_owned(),
            "charlie".to_owned(),
            "ghost".to_owned(),
        ];
        registry.send_to_battle("b1", &roster, Some("alpha"), Bytes::from_static(b"x"));

        assert!(rx_a.try_recv().is_err(), "sender must not be echoed");
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_c.try_recv().is_err(), "peer in another battle skipped");
    }
}
