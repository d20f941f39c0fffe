//! Dual-substrate signal transport: the durable room log is the source
//! of truth, the broadcast channel a latency optimization. Reconciling
//! against the log on session start is what closes the race where an
//! offer was published before this side subscribed.

use crate::config::CallConfig;
use crate::error::CallError;
use relay_bus::{SignalBus, SignalStore};
use signal_proto::{ParticipantId, SignalKind, SignalMessage};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct SignalTransport {
    bus: Arc<dyn SignalBus>,
    store: Arc<dyn SignalStore>,
    retry_limit: usize,
    retry_delay: std::time::Duration,
}

impl SignalTransport {
    pub fn new(bus: Arc<dyn SignalBus>, store: Arc<dyn SignalStore>, config: &CallConfig) -> Self {
        Self {
            bus,
            store,
            retry_limit: config.publish_retry_limit.max(1),
            retry_delay: config.publish_retry_delay,
        }
    }

    /// Publish a signal: durable write first (retried with doubling
    /// delay up to the configured bound), then best-effort broadcast.
    pub async fn publish(&self, message: &SignalMessage) -> Result<(), CallError> {
        let mut delay = self.retry_delay;
        let mut last_error = String::new();
        let mut stored = false;
        for attempt in 1..=self.retry_limit {
            match self.store.insert(message.clone()).await {
                Ok(()) => {
                    stored = true;
                    break;
                }
                Err(err) => {
                    warn!(
                        target: "call::transport",
                        room = %message.room_id,
                        message_id = %message.id,
                        attempt,
                        error = %err,
                        "durable signal write failed"
                    );
                    last_error = err.to_string();
                    if attempt < self.retry_limit {
                        sleep(delay).await;
                        delay = (delay * 2).min(std::time::Duration::from_secs(2));
                    }
                }
            }
        }
        if !stored {
            return Err(CallError::TransportUnavailable(last_error));
        }

        if let Err(err) = self.bus.publish(&message.room_id, message.clone()) {
            // No live subscriber yet, or the relay hiccuped; the durable
            // log covers delivery either way.
            debug!(
                target: "call::transport",
                room = %message.room_id,
                message_id = %message.id,
                error = %err,
                "broadcast skipped"
            );
        }
        Ok(())
    }

    /// Attach to the ephemeral channel for a room. The caller filters to
    /// its own participant id.
    pub fn subscribe(&self, room_id: &str) -> broadcast::Receiver<SignalMessage> {
        self.bus.subscribe(room_id)
    }

    /// Fetch the most recent signal of `kind` addressed to `local` from
    /// the durable log, to be fed through the same intake as a live
    /// broadcast message.
    pub async fn reconcile(
        &self,
        room_id: &str,
        local: &ParticipantId,
        kind: SignalKind,
    ) -> Result<Option<SignalMessage>, CallError> {
        let entries = self
            .store
            .list_room(room_id)
            .await
            .map_err(|err| CallError::TransportUnavailable(err.to_string()))?;
        Ok(entries
            .into_iter()
            .filter(|m| m.kind == kind && &m.receiver_id == local)
            .max_by_key(|m| m.created_at))
    }

    /// Delete all durable signals for a room. Best-effort: failure is
    /// logged and swallowed so teardown always completes.
    pub async fn purge(&self, room_id: &str) {
        if let Err(err) = self.store.purge_room(room_id).await {
            warn!(
                target: "call::transport",
                room = %room_id,
                error = %err,
                "durable signal purge failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use relay_bus::{LocalSignalBus, MemorySignalStore, StoreError, StoreResult};
    use serde_json::json;
    use signal_proto::SessionDescription;

    fn config() -> CallConfig {
        CallConfig {
            publish_retry_delay: std::time::Duration::from_millis(5),
            ..CallConfig::default()
        }
    }

    fn offer(id: &str, created_at: i64) -> SignalMessage {
        let mut message = SignalMessage::offer(
            "u1-u2",
            "u1",
            "u2",
            &SessionDescription(json!({"sdp": "v=0"})),
        );
        message.id = id.to_string();
        message.created_at = created_at;
        message
    }

    /// Store that fails a configured number of inserts before recovering.
    struct FlakyStore {
        inner: MemorySignalStore,
        failures_left: Mutex<usize>,
    }

    impl FlakyStore {
        fn new(failures: usize) -> Self {
            Self {
                inner: MemorySignalStore::new(),
                failures_left: Mutex::new(failures),
            }
        }
    }

    #[async_trait]
    impl SignalStore for FlakyStore {
        async fn insert(&self, message: SignalMessage) -> StoreResult<()> {
            {
                let mut left = self.failures_left.lock();
                if *left > 0 {
                    *left -= 1;
                    return Err(StoreError::Unavailable("injected".into()));
                }
            }
            self.inner.insert(message).await
        }

        async fn list_room(&self, room_id: &str) -> StoreResult<Vec<SignalMessage>> {
            self.inner.list_room(room_id).await
        }

        async fn purge_room(&self, room_id: &str) -> StoreResult<()> {
            self.inner.purge_room(room_id).await
        }
    }

    #[tokio::test]
    async fn publish_reaches_store_and_live_subscribers() {
        let bus = Arc::new(LocalSignalBus::new());
        let store = Arc::new(MemorySignalStore::new());
        let transport = SignalTransport::new(bus, store.clone(), &config());

        let mut sub = transport.subscribe("u1-u2");
        transport.publish(&offer("m1", 1)).await.unwrap();

        assert_eq!(sub.recv().await.unwrap().id, "m1");
        assert_eq!(store.list_room("u1-u2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn publish_retries_durable_write_then_succeeds() {
        let bus = Arc::new(LocalSignalBus::new());
        let store = Arc::new(FlakyStore::new(2));
        let transport = SignalTransport::new(bus, store.clone(), &config());

        transport.publish(&offer("m1", 1)).await.unwrap();
        assert_eq!(store.list_room("u1-u2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn publish_gives_up_after_bounded_retries() {
        let bus = Arc::new(LocalSignalBus::new());
        let store = Arc::new(FlakyStore::new(10));
        let transport = SignalTransport::new(bus, store, &config());

        let err = transport.publish(&offer("m1", 1)).await.unwrap_err();
        assert!(matches!(err, CallError::TransportUnavailable(_)));
    }

    #[tokio::test]
    async fn reconcile_picks_most_recent_matching_signal() {
        let bus = Arc::new(LocalSignalBus::new());
        let store = Arc::new(MemorySignalStore::new());
        let transport = SignalTransport::new(bus, store.clone(), &config());

        store.insert(offer("m1", 10)).await.unwrap();
        store.insert(offer("m2", 20)).await.unwrap();
        let mut not_for_us = offer("m3", 30);
        not_for_us.receiver_id = "u3".into();
        store.insert(not_for_us).await.unwrap();

        let found = transport
            .reconcile("u1-u2", &"u2".to_string(), SignalKind::Offer)
            .await
            .unwrap()
            .expect("offer found");
        assert_eq!(found.id, "m2");

        let answer = transport
            .reconcile("u1-u2", &"u2".to_string(), SignalKind::Answer)
            .await
            .unwrap();
        assert!(answer.is_none());
    }
}
