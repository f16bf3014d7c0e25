// ABOUTME: Broadcast registry of live push connections plus its bounded work queue.
// ABOUTME: Failed deliveries evict the connection; the queue drops when full.

use crate::error::SinkError;
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub type ConnectionId = Uuid;

/// One client push connection.
#[async_trait]
pub trait PushSink: Send + Sync {
    /// Deliver one text message. An error means the connection is dead.
    async fn send(&self, payload: &str) -> Result<(), SinkError>;
}

/// The live set of push connections.
#[derive(Default)]
pub struct BroadcastRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<dyn PushSink>>>,
}

impl BroadcastRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, sink: Arc<dyn PushSink>) -> ConnectionId {
        let id = Uuid::new_v4();
        let mut connections = self.connections.write().await;
        connections.insert(id, sink);
        tracing::info!(connection = %id, total = connections.len(), "Push connection registered");
        id
    }

    /// Remove a connection. Unknown ids are ignored.
    pub async fn unregister(&self, id: ConnectionId) {
        let mut connections = self.connections.write().await;
        if connections.remove(&id).is_some() {
            tracing::info!(connection = %id, total = connections.len(), "Push connection removed");
        }
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// Deliver to every connection. Connections that fail are evicted and
    /// never retried. Returns the number of successful deliveries.
    pub async fn broadcast_all(&self, payload: &str) -> usize {
        let targets: Vec<(ConnectionId, Arc<dyn PushSink>)> = self
            .connections
            .read()
            .await
            .iter()
            .map(|(id, sink)| (*id, sink.clone()))
            .collect();
        if targets.is_empty() {
            return 0;
        }

        let results = join_all(targets.iter().map(|(id, sink)| async move {
            (*id, sink.send(payload).await)
        }))
        .await;

        let mut delivered = 0;
        for (id, result) in results {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::debug!(connection = %id, error = %e, "Delivery failed, evicting");
                    self.unregister(id).await;
                }
            }
        }
        delivered
    }

    /// Deliver to one connection, evicting it on failure.
    pub async fn send_one(&self, id: ConnectionId, payload: &str) -> bool {
        let Some(sink) = self.connections.read().await.get(&id).cloned() else {
            return false;
        };
        match sink.send(payload).await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(connection = %id, error = %e, "Delivery failed, evicting");
                self.unregister(id).await;
                false
            }
        }
    }
}

/// Producer side of the broadcast work queue. Cheap to clone.
#[derive(Clone)]
pub struct BroadcastQueue {
    tx: mpsc::Sender<String>,
    dropped: Arc<AtomicU64>,
}

impl BroadcastQueue {
    /// Queue one message for fan-out without waiting. When the queue is full
    /// the message is dropped and counted.
    pub fn push(&self, payload: String) -> bool {
        match self.tx.try_send(payload) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(dropped, "Broadcast queue full, dropping message");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("Broadcast dispatcher gone, dropping message");
                false
            }
        }
    }

    /// Messages dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Consumer side: drains the queue into the registry.
pub struct BroadcastDispatcher {
    rx: mpsc::Receiver<String>,
    registry: Arc<BroadcastRegistry>,
}

impl BroadcastDispatcher {
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = self.rx.recv() => match next {
                    Some(payload) => {
                        self.registry.broadcast_all(&payload).await;
                    }
                    None => break,
                },
            }
        }
        tracing::debug!("Broadcast dispatcher stopped");
    }
}

/// Build a queue of at most `capacity` pending messages feeding `registry`.
pub fn work_queue(
    capacity: usize,
    registry: Arc<BroadcastRegistry>,
) -> (BroadcastQueue, BroadcastDispatcher) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        BroadcastQueue {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        BroadcastDispatcher { rx, registry },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSink;
    use std::time::Duration;

    #[tokio::test]
    async fn test_broadcast_with_no_connections() {
        let registry = BroadcastRegistry::new();
        assert_eq!(registry.broadcast_all(r#"{"type":"x"}"#).await, 0);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_failed_connection_is_evicted() {
        let registry = BroadcastRegistry::new();
        let good = RecordingSink::new();
        let bad = RecordingSink::broken();
        registry.register(good.clone()).await;
        registry.register(bad.clone()).await;

        assert_eq!(registry.broadcast_all("first").await, 1);
        assert_eq!(registry.len().await, 1);

        // Repairing the sink does not bring it back.
        bad.broken.store(false, Ordering::SeqCst);
        assert_eq!(registry.broadcast_all("second").await, 1);
        assert_eq!(good.messages(), vec!["first", "second"]);
        assert!(bad.messages().is_empty());
    }

    #[tokio::test]
    async fn test_send_one_and_unregister() {
        let registry = BroadcastRegistry::new();
        let a = RecordingSink::new();
        let b = RecordingSink::new();
        let id_a = registry.register(a.clone()).await;
        registry.register(b.clone()).await;

        assert!(registry.send_one(id_a, "hello").await);
        assert_eq!(a.messages(), vec!["hello"]);
        assert!(b.messages().is_empty());

        registry.unregister(id_a).await;
        registry.unregister(id_a).await;
        assert_eq!(registry.len().await, 1);
        assert!(!registry.send_one(id_a, "gone").await);
    }

    #[tokio::test]
    async fn test_send_one_failure_evicts() {
        let registry = BroadcastRegistry::new();
        let id = registry.register(RecordingSink::broken()).await;
        assert!(!registry.send_one(id, "snapshot").await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_queue_drops_when_full() {
        let registry = Arc::new(BroadcastRegistry::new());
        let (queue, _dispatcher) = work_queue(2, registry);
        assert!(queue.push("a".to_string()));
        assert!(queue.push("b".to_string()));
        assert!(!queue.push("c".to_string()));
        assert_eq!(queue.dropped(), 1);
    }

    #[tokio::test]
    async fn test_dispatcher_fans_out_until_cancelled() {
        let registry = Arc::new(BroadcastRegistry::new());
        let sink = RecordingSink::new();
        registry.register(sink.clone()).await;

        let (queue, dispatcher) = work_queue(8, registry);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(dispatcher.run(cancel.clone()));

        queue.push("one".to_string());
        queue.push("two".to_string());
        for _ in 0..50 {
            if sink.messages().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(sink.messages(), vec!["one", "two"]);

        cancel.cancel();
        task.await.unwrap();
    }
}
