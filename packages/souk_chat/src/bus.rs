//! Event Bus
//!
//! Per-event handler collections with RAII unsubscription. Dispatch snapshots
//! the handler list for the event kind before invoking anything, so handlers
//! may subscribe or unsubscribe (themselves or others) while a dispatch pass
//! is in progress. A handler that errors or panics is logged and the
//! remaining handlers still run.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, Weak};

use souk_protocol::ServerEvent;
use tracing::{error, trace, warn};

use crate::error::HandlerError;
use crate::lock;

/// Everything a subscriber can observe: connection lifecycle plus server pushes.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Connected,
    Disconnected,
    Server(ServerEvent),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connected => EventKind::Connected,
            Self::Disconnected => EventKind::Disconnected,
            Self::Server(event) => EventKind::from(event),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    HandshakeAck,
    HandshakeError,
    MessageSent,
    MessageError,
    NewMessage,
    UserTyping,
    UserStatus,
    NotificationCreated,
}

impl From<&ServerEvent> for EventKind {
    fn from(event: &ServerEvent) -> Self {
        match event {
            ServerEvent::HandshakeAck(_) => Self::HandshakeAck,
            ServerEvent::HandshakeError(_) => Self::HandshakeError,
            ServerEvent::MessageSent(_) => Self::MessageSent,
            ServerEvent::MessageError(_) => Self::MessageError,
            ServerEvent::NewMessage(_) => Self::NewMessage,
            ServerEvent::UserTyping(_) => Self::UserTyping,
            ServerEvent::UserStatus(_) => Self::UserStatus,
            ServerEvent::NotificationCreated(_) => Self::NotificationCreated,
        }
    }
}

pub type Handler = Arc<dyn Fn(&Event) -> Result<(), HandlerError> + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: HashMap<EventKind, Vec<(u64, Handler)>>,
}

/// Result of one dispatch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event kind. The handler stays registered
    /// until the returned [`Subscription`] is dropped or unsubscribed.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&Event) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let mut registry = lock(&self.registry);
        registry.next_id += 1;
        let id = registry.next_id;
        registry
            .handlers
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        trace!(?kind, id, "handler subscribed");

        Subscription {
            registry: Arc::downgrade(&self.registry),
            kind,
            id,
        }
    }

    /// Deliver an event to every handler registered for its kind.
    pub fn dispatch(&self, event: &Event) -> DispatchReport {
        let kind = event.kind();
        let snapshot: Vec<(u64, Handler)> = lock(&self.registry)
            .handlers
            .get(&kind)
            .cloned()
            .unwrap_or_default();

        let mut report = DispatchReport::default();
        for (id, handler) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    warn!(?kind, handler = id, error = %e, "event handler failed");
                }
                Err(_) => {
                    report.failed += 1;
                    error!(?kind, handler = id, "event handler panicked");
                }
            }
        }
        report
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        lock(&self.registry)
            .handlers
            .get(&kind)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

/// Keeps a handler registered. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes the handler immediately"]
pub struct Subscription {
    registry: Weak<Mutex<Registry>>,
    kind: EventKind,
    id: u64,
}

impl Subscription {
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Explicit form of dropping the subscription.
    pub fn unsubscribe(self) {}

    fn remove(&self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut registry = lock(&registry);
        if let Some(list) = registry.handlers.get_mut(&self.kind) {
            list.retain(|(id, _)| *id != self.id);
            if list.is_empty() {
                registry.handlers.remove(&self.kind);
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.remove();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use souk_protocol::{PeerId, PresenceStatus, UserStatusPayload};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn status_event() -> Event {
        Event::Server(ServerEvent::UserStatus(UserStatusPayload {
            user_id: PeerId::from("c"),
            status: PresenceStatus::Online,
        }))
    }

    fn counter_handler(
        counter: Arc<AtomicUsize>,
    ) -> impl Fn(&Event) -> Result<(), HandlerError> + Send + Sync + 'static {
        move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn dispatch_reaches_every_handler_of_the_kind() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let _a = bus.subscribe(EventKind::UserStatus, counter_handler(hits.clone()));
        let _b = bus.subscribe(EventKind::UserStatus, counter_handler(hits.clone()));
        let _other = bus.subscribe(EventKind::Connected, counter_handler(hits.clone()));

        let report = bus.dispatch(&status_event());
        assert_eq!(report.delivered, 2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let sub = bus.subscribe(EventKind::UserStatus, counter_handler(hits.clone()));
        assert_eq!(bus.handler_count(EventKind::UserStatus), 1);

        sub.unsubscribe();
        assert_eq!(bus.handler_count(EventKind::UserStatus), 0);
        bus.dispatch(&status_event());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failing_and_panicking_handlers_do_not_block_others() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let _err = bus.subscribe(EventKind::UserStatus, |_| Err(HandlerError::new("boom")));
        let _panic = bus.subscribe(EventKind::UserStatus, |_| panic!("handler bug"));
        let _ok = bus.subscribe(EventKind::UserStatus, counter_handler(hits.clone()));

        let report = bus.dispatch(&status_event());
        assert_eq!(report, DispatchReport { delivered: 1, failed: 2 });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handler_may_unsubscribe_during_dispatch() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let slot_in_handler = slot.clone();
        let sub = bus.subscribe(EventKind::UserStatus, move |_| {
            lock(&slot_in_handler).take();
            Ok(())
        });
        *lock(&slot) = Some(sub);
        let _counter = bus.subscribe(EventKind::UserStatus, counter_handler(hits.clone()));

        let report = bus.dispatch(&status_event());
        assert_eq!(report.delivered, 2);
        assert_eq!(bus.handler_count(EventKind::UserStatus), 1);

        bus.dispatch(&status_event());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn handler_may_subscribe_during_dispatch() {
        let bus = EventBus::new();
        let spawned: Arc<Mutex<Vec<Subscription>>> = Arc::new(Mutex::new(Vec::new()));

        let bus_in_handler = bus.clone();
        let spawned_in_handler = spawned.clone();
        let _sub = bus.subscribe(EventKind::UserStatus, move |_| {
            let sub = bus_in_handler.subscribe(EventKind::UserStatus, |_| Ok(()));
            lock(&spawned_in_handler).push(sub);
            Ok(())
        });

        // The handler added mid-pass is not part of the snapshot.
        assert_eq!(bus.dispatch(&status_event()).delivered, 1);
        assert_eq!(bus.handler_count(EventKind::UserStatus), 2);
    }

    #[test]
    fn subscription_outliving_bus_is_harmless() {
        let bus = EventBus::new();
        let sub = bus.subscribe(EventKind::Connected, |_| Ok(()));
        drop(bus);
        drop(sub);
    }

    #[test]
    fn lifecycle_kinds() {
        assert_eq!(Event::Connected.kind(), EventKind::Connected);
        assert_eq!(Event::Disconnected.kind(), EventKind::Disconnected);
        assert_eq!(status_event().kind(), EventKind::UserStatus);
    }
}
