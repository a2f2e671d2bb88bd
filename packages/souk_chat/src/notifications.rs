//! Unread notification queue and badge counter.
//!
//! Live `notification_created` pushes pass through the [`NotificationDedupGate`]
//! before they are queued (newest first). The queue is seeded and mutated
//! through the REST collaborator; a failed call leaves local state as it was.

use std::sync::{Arc, Mutex};

use souk_protocol::{Notification, NotificationCreatedPayload, NotificationId, ServerEvent};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::api::ChatApi;
use crate::bus::{Event, EventKind, Subscription};
use crate::connection::ConnectionManager;
use crate::error::ApiError;
use crate::lock;
use crate::session::{GateDecision, NotificationDedupGate};

#[derive(Default)]
struct Queue {
    items: Vec<Notification>,
    unread: u64,
}

struct State {
    queue: Mutex<Queue>,
    unread_tx: watch::Sender<u64>,
}

impl State {
    fn update<R>(&self, f: impl FnOnce(&mut Queue) -> R) -> R {
        let (result, unread) = {
            let mut queue = lock(&self.queue);
            let result = f(&mut queue);
            (result, queue.unread)
        };
        self.unread_tx.send_if_modified(|current| {
            let changed = *current != unread;
            *current = unread;
            changed
        });
        result
    }

    fn on_created(&self, gate: &NotificationDedupGate, created: &NotificationCreatedPayload) {
        let mut notification = created.notification.clone();
        notification.source_peer_id = created
            .sender_id
            .clone()
            .or_else(|| notification.sender_hint());

        if gate.gate(&notification) == GateDecision::Drop {
            debug!(id = %notification.id, "chat notification for open conversation suppressed");
            return;
        }
        self.update(|queue| {
            queue.items.insert(0, notification);
            queue.unread += 1;
        });
    }
}

pub struct NotificationCenter {
    api: Arc<dyn ChatApi>,
    state: Arc<State>,
    _subscription: Subscription,
}

impl NotificationCenter {
    pub fn attach(
        connection: &ConnectionManager,
        gate: NotificationDedupGate,
        api: Arc<dyn ChatApi>,
    ) -> Self {
        let (unread_tx, _) = watch::channel(0);
        let state = Arc::new(State {
            queue: Mutex::new(Queue::default()),
            unread_tx,
        });

        let subscription = {
            let state = state.clone();
            connection.subscribe(EventKind::NotificationCreated, move |event| {
                if let Event::Server(ServerEvent::NotificationCreated(created)) = event {
                    state.on_created(&gate, created);
                }
                Ok(())
            })
        };

        Self {
            api,
            state,
            _subscription: subscription,
        }
    }

    /// Replace the queue with the server's unread list.
    pub async fn refresh(&self) -> Result<(), ApiError> {
        let unread = self.api.unread_notifications().await?;
        info!(count = unread.data.len(), total = unread.total_count, "notifications refreshed");
        self.state.update(|queue| {
            queue.items = unread.data;
            queue.unread = unread.total_count;
        });
        Ok(())
    }

    /// Mark one notification read on the server and drop it from the queue.
    pub async fn mark_read(&self, id: &NotificationId) -> Result<(), ApiError> {
        self.api.mark_notification_read(id).await?;
        self.state.update(|queue| {
            let already_read = queue
                .items
                .iter()
                .find(|n| &n.id == id)
                .is_some_and(|n| n.is_read);
            queue.items.retain(|n| &n.id != id);
            if !already_read {
                queue.unread = queue.unread.saturating_sub(1);
            }
        });
        Ok(())
    }

    pub async fn mark_all_read(&self) -> Result<(), ApiError> {
        self.api.mark_all_notifications_read().await?;
        self.state.update(|queue| {
            queue.items.clear();
            queue.unread = 0;
        });
        Ok(())
    }

    pub async fn delete(&self, id: &NotificationId) -> Result<(), ApiError> {
        self.api.delete_notification(id).await?;
        self.state.update(|queue| {
            let Some(pos) = queue.items.iter().position(|n| &n.id == id) else {
                return;
            };
            let removed = queue.items.remove(pos);
            if !removed.is_read {
                queue.unread = queue.unread.saturating_sub(1);
            }
        });
        Ok(())
    }

    /// Empty the queue locally without telling the server.
    pub fn clear(&self) {
        self.state.update(|queue| {
            queue.items.clear();
            queue.unread = 0;
        });
    }

    /// Queued notifications, newest first.
    pub fn notifications(&self) -> Vec<Notification> {
        lock(&self.state.queue).items.clone()
    }

    pub fn unread_count(&self) -> u64 {
        lock(&self.state.queue).unread
    }

    pub fn watch_unread(&self) -> watch::Receiver<u64> {
        self.state.unread_tx.subscribe()
    }
}
