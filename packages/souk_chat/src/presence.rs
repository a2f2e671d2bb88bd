//! Which peers are online right now, as last reported by `user_status`.
//!
//! Presence is not persisted: the set is emptied whenever the connection
//! drops and rebuilt from the server's pushes after the next connect.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use souk_protocol::{PeerId, PresenceStatus, ServerEvent};
use tokio::sync::watch;
use tracing::debug;

use crate::bus::{Event, EventKind, Subscription};
use crate::connection::ConnectionManager;
use crate::lock;

/// Set of online peers with idempotent updates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceSet {
    online: HashSet<PeerId>,
}

impl PresenceSet {
    /// Apply one status report. Returns whether membership changed.
    pub fn apply(&mut self, peer: &PeerId, status: PresenceStatus) -> bool {
        match status {
            PresenceStatus::Online => self.online.insert(peer.clone()),
            PresenceStatus::Offline => self.online.remove(peer),
        }
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.online.contains(peer)
    }

    pub fn len(&self) -> usize {
        self.online.len()
    }

    pub fn is_empty(&self) -> bool {
        self.online.is_empty()
    }

    pub fn clear(&mut self) {
        self.online.clear();
    }

    pub fn sorted(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.online.iter().cloned().collect();
        peers.sort();
        peers
    }
}

struct State {
    set: Mutex<PresenceSet>,
    count_tx: watch::Sender<usize>,
}

impl State {
    fn apply(&self, peer: &PeerId, status: PresenceStatus) {
        let count = {
            let mut set = lock(&self.set);
            if !set.apply(peer, status) {
                return;
            }
            set.len()
        };
        debug!(peer = %peer, %status, online = count, "presence changed");
        self.count_tx.send_replace(count);
    }

    fn reset(&self) {
        lock(&self.set).clear();
        self.count_tx.send_replace(0);
    }
}

pub struct PresenceRegistry {
    state: Arc<State>,
    _subscriptions: Vec<Subscription>,
}

impl PresenceRegistry {
    pub fn attach(connection: &ConnectionManager) -> Self {
        let (count_tx, _) = watch::channel(0);
        let state = Arc::new(State {
            set: Mutex::new(PresenceSet::default()),
            count_tx,
        });

        let on_status = {
            let state = state.clone();
            connection.subscribe(EventKind::UserStatus, move |event| {
                if let Event::Server(ServerEvent::UserStatus(update)) = event {
                    state.apply(&update.user_id, update.status);
                }
                Ok(())
            })
        };
        let on_disconnect = {
            let state = state.clone();
            connection.subscribe(EventKind::Disconnected, move |_| {
                state.reset();
                Ok(())
            })
        };

        Self {
            state,
            _subscriptions: vec![on_status, on_disconnect],
        }
    }

    pub fn is_online(&self, peer: &PeerId) -> bool {
        lock(&self.state.set).contains(peer)
    }

    pub fn online_peers(&self) -> Vec<PeerId> {
        lock(&self.state.set).sorted()
    }

    /// Number of online peers, updated on every membership change.
    pub fn watch_count(&self) -> watch::Receiver<usize> {
        self.state.count_tx.subscribe()
    }

    pub fn reset(&self) {
        self.state.reset();
    }
}
