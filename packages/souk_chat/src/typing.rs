//! Typing indicators.
//!
//! Locally, every keystroke re-sends `typing_start` and re-arms a debounce
//! timer; `typing_stop` goes out when the timer expires or the input is
//! emptied. Each arm bumps a per-peer generation and the expiry only fires if
//! its generation is still current, so a timer that was replaced while its
//! task was already waking up cannot emit a stale stop.
//!
//! Remotely, `user_typing` sets the peer's state as-is. There is no expiry on
//! the remote side: a lost stop leaves the peer shown as typing until the
//! next update.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use souk_protocol::{ClientEvent, PeerId, ServerEvent, TypingPayload};
use tracing::{debug, trace};

use crate::bus::{Event, EventKind, Subscription};
use crate::connection::ConnectionManager;
use crate::lock;
use crate::timer::ScheduledTask;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TypingState {
    pub active: bool,
}

#[derive(Default)]
struct LocalTyping {
    active: bool,
    generation: u64,
    timer: ScheduledTask,
}

struct Local {
    connection: Arc<ConnectionManager>,
    own_id: PeerId,
    debounce: Duration,
    peers: Mutex<HashMap<PeerId, LocalTyping>>,
}

impl Local {
    fn payload(&self, peer: &PeerId) -> TypingPayload {
        TypingPayload {
            user_id: self.own_id.clone(),
            receiver_id: peer.clone(),
        }
    }

    fn emit_start(&self, peer: &PeerId) {
        self.connection
            .send(ClientEvent::TypingStart(self.payload(peer)));
    }

    fn emit_stop(&self, peer: &PeerId) {
        self.connection
            .send(ClientEvent::TypingStop(self.payload(peer)));
    }

    fn expire(&self, peer: &PeerId, generation: u64) {
        let fire = {
            let mut peers = lock(&self.peers);
            match peers.get_mut(peer) {
                Some(entry) if entry.generation == generation && entry.active => {
                    entry.active = false;
                    true
                }
                _ => false,
            }
        };
        if fire {
            debug!(peer = %peer, "typing debounce expired");
            self.emit_stop(peer);
        }
    }
}

pub struct TypingCoordinator {
    local: Arc<Local>,
    remote: Arc<Mutex<HashMap<PeerId, TypingState>>>,
    _subscription: Subscription,
}

impl TypingCoordinator {
    pub fn attach(connection: Arc<ConnectionManager>, own_id: PeerId, debounce: Duration) -> Self {
        let remote: Arc<Mutex<HashMap<PeerId, TypingState>>> = Arc::default();

        let subscription = {
            let remote = remote.clone();
            let own_id = own_id.clone();
            connection.subscribe(EventKind::UserTyping, move |event| {
                let Event::Server(ServerEvent::UserTyping(update)) = event else {
                    return Ok(());
                };
                if update.receiver_id.as_ref().is_some_and(|r| *r != own_id) {
                    trace!(peer = %update.user_id, "typing update for another recipient");
                    return Ok(());
                }
                lock(&remote).insert(
                    update.user_id.clone(),
                    TypingState {
                        active: update.is_typing,
                    },
                );
                Ok(())
            })
        };

        Self {
            local: Arc::new(Local {
                connection,
                own_id,
                debounce,
                peers: Mutex::new(HashMap::new()),
            }),
            remote,
            _subscription: subscription,
        }
    }

    /// Report the current content of the compose box for `peer`.
    ///
    /// Must be called from within a tokio runtime (the debounce timer is a task).
    pub fn input_changed(&self, peer: &PeerId, content: &str) {
        if content.is_empty() {
            {
                let mut peers = lock(&self.local.peers);
                let entry = peers.entry(peer.clone()).or_default();
                entry.timer.cancel();
                entry.generation += 1;
                entry.active = false;
            }
            self.local.emit_stop(peer);
            return;
        }

        {
            let mut peers = lock(&self.local.peers);
            let entry = peers.entry(peer.clone()).or_default();
            if !entry.active {
                entry.active = true;
                debug!(peer = %peer, "typing started");
            }
            entry.generation += 1;

            let generation = entry.generation;
            let local = self.local.clone();
            let target = peer.clone();
            entry
                .timer
                .arm(self.local.debounce, move || local.expire(&target, generation));
        }
        self.local.emit_start(peer);
    }

    /// The conversation with `peer` was closed: end any typing burst now.
    pub fn stop(&self, peer: &PeerId) {
        let was_active = match lock(&self.local.peers).remove(peer) {
            Some(mut entry) => {
                entry.timer.cancel();
                entry.active
            }
            None => false,
        };
        if was_active {
            self.local.emit_stop(peer);
        }
    }

    /// Cancel every pending timer. Active bursts are closed with a
    /// `typing_stop` while the connection is still up.
    pub fn shutdown(&self) {
        let active: Vec<PeerId> = {
            let mut peers = lock(&self.local.peers);
            let active = peers
                .iter()
                .filter(|(_, entry)| entry.active)
                .map(|(peer, _)| peer.clone())
                .collect();
            for entry in peers.values_mut() {
                entry.timer.cancel();
            }
            peers.clear();
            active
        };
        if self.local.connection.is_connected() {
            for peer in &active {
                self.local.emit_stop(peer);
            }
        }
    }

    pub fn local_state(&self, peer: &PeerId) -> TypingState {
        TypingState {
            active: lock(&self.local.peers)
                .get(peer)
                .is_some_and(|entry| entry.active),
        }
    }

    pub fn remote_state(&self, peer: &PeerId) -> TypingState {
        lock(&self.remote).get(peer).copied().unwrap_or_default()
    }

    pub fn is_peer_typing(&self, peer: &PeerId) -> bool {
        self.remote_state(peer).active
    }
}

impl Drop for TypingCoordinator {
    fn drop(&mut self) {
        for entry in lock(&self.local.peers).values_mut() {
            entry.timer.cancel();
        }
    }
}
