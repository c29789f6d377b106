//! Subscriber registry and fan-out.
//!
//! Each subscriber gets a bounded queue. The hub only ever `try_send`s into
//! those queues, so a slow or dead subscriber can never stall a broadcast:
//! a closed or full queue gets that subscriber dropped from the set. The
//! connection task on the other end of the queue owns the actual socket.

use crate::anchors::AnchorRegistry;
use crate::broadcast::messages::{InitialSetup, ServerMessage};
use crate::core::types::PositionEstimate;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

/// Default per-subscriber queue depth.
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

/// Opaque subscriber handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A registered subscriber's receiving end.
///
/// The handshake message is already queued when this is returned. The
/// receiver yields `None` once the hub has dropped the subscriber.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriberId,
    pub receiver: mpsc::Receiver<String>,
}

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub pruned: usize,
}

/// Live subscriber set.
pub struct BroadcastHub {
    initial_setup: InitialSetup,
    queue_capacity: usize,
    subscribers: Mutex<HashMap<SubscriberId, mpsc::Sender<String>>>,
}

impl BroadcastHub {
    /// Create a hub whose handshake describes `registry`.
    pub fn new(registry: &AnchorRegistry) -> Self {
        Self::with_capacity(registry, DEFAULT_QUEUE_CAPACITY)
    }

    /// Create a hub with a custom per-subscriber queue depth.
    pub fn with_capacity(registry: &AnchorRegistry, queue_capacity: usize) -> Self {
        Self {
            initial_setup: InitialSetup::from_registry(registry),
            queue_capacity: queue_capacity.max(1),
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    /// The handshake sent to every new subscriber.
    pub fn initial_setup(&self) -> &InitialSetup {
        &self.initial_setup
    }

    /// Register a subscriber and queue its handshake.
    ///
    /// Registration and the handshake happen under the set lock, so any update
    /// broadcast afterwards is queued behind the handshake.
    pub async fn subscribe(&self) -> Subscription {
        let (tx, receiver) = mpsc::channel(self.queue_capacity);
        let id = SubscriberId::new();

        let mut subscribers = self.subscribers.lock().await;
        match ServerMessage::InitialSetup(self.initial_setup.clone()).to_json() {
            Ok(json) => {
                // A fresh queue always has room.
                let _ = tx.try_send(json);
            }
            Err(e) => tracing::error!("Failed to serialize initial setup: {}", e),
        }
        subscribers.insert(id, tx);

        tracing::info!(
            subscriber = %id,
            total = subscribers.len(),
            "Subscriber connected"
        );

        Subscription { id, receiver }
    }

    /// Remove a subscriber. Removing an unknown id is a no-op.
    pub async fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.subscribers.lock().await;
        let removed = subscribers.remove(&id).is_some();
        if removed {
            tracing::info!(
                subscriber = %id,
                total = subscribers.len(),
                "Subscriber disconnected"
            );
        }
        removed
    }

    /// Send a position update to every subscriber.
    pub async fn broadcast(&self, estimate: &PositionEstimate) -> BroadcastReport {
        self.broadcast_message(&ServerMessage::PositionUpdate(estimate.clone()))
            .await
    }

    /// Send any message to every subscriber, dropping the ones that fail.
    pub async fn broadcast_message(&self, message: &ServerMessage) -> BroadcastReport {
        let json = match message.to_json() {
            Ok(json) => json,
            Err(e) => {
                tracing::error!("Failed to serialize broadcast message: {}", e);
                return BroadcastReport::default();
            }
        };

        let mut report = BroadcastReport::default();
        let mut subscribers = self.subscribers.lock().await;

        subscribers.retain(|id, tx| match tx.try_send(json.clone()) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(subscriber = %id, "Subscriber queue full, dropping subscriber");
                report.pruned += 1;
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(subscriber = %id, "Subscriber gone, dropping");
                report.pruned += 1;
                false
            }
        });

        tracing::debug!(
            delivered = report.delivered,
            pruned = report.pruned,
            "Broadcast complete"
        );
        report
    }

    /// Number of registered subscribers.
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }

    /// Whether `id` is still registered.
    pub async fn is_subscribed(&self, id: SubscriberId) -> bool {
        self.subscribers.lock().await.contains_key(&id)
    }
}
