//! Collaborator surfaces for the call-signaling engine: the ephemeral
//! broadcast relay, the durable room-scoped signal log, and the identity
//! service. In-process implementations back the test suites and any
//! deployment that keeps both peers inside one process; production
//! deployments implement these traits over their own relay and storage.

use async_trait::async_trait;
use parking_lot::RwLock;
use signal_proto::{ParticipantId, RoomId, SignalMessage};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::broadcast;

const DEFAULT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus channel closed")]
    Closed,
    #[error("bus transport error: {0}")]
    Transport(String),
}

pub type BusResult<T> = Result<T, BusError>;

/// Ephemeral broadcast substrate: at-most-once, reaches only currently
/// subscribed listeners. Topics are room identifiers.
pub trait SignalBus: Send + Sync {
    fn subscribe(&self, room_id: &str) -> broadcast::Receiver<SignalMessage>;
    fn publish(&self, room_id: &str, message: SignalMessage) -> BusResult<()>;
}

/// In-memory bus for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct LocalSignalBus {
    topics: RwLock<HashMap<String, broadcast::Sender<SignalMessage>>>,
}

impl LocalSignalBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender_for(&self, room_id: &str) -> broadcast::Sender<SignalMessage> {
        let mut guard = self.topics.write();
        guard
            .entry(room_id.to_string())
            .or_insert_with(|| broadcast::channel(DEFAULT_CHANNEL_CAPACITY).0)
            .clone()
    }
}

impl SignalBus for LocalSignalBus {
    fn subscribe(&self, room_id: &str) -> broadcast::Receiver<SignalMessage> {
        self.sender_for(room_id).subscribe()
    }

    fn publish(&self, room_id: &str, message: SignalMessage) -> BusResult<()> {
        self.sender_for(room_id)
            .send(message)
            .map(|_| ())
            .map_err(|_| BusError::Closed)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("signal store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Durable room-scoped signal log. `insert` is a keyed upsert on the
/// message id, so re-publishing the same message (offer retries) never
/// duplicates log entries.
#[async_trait]
pub trait SignalStore: Send + Sync {
    async fn insert(&self, message: SignalMessage) -> StoreResult<()>;
    async fn list_room(&self, room_id: &str) -> StoreResult<Vec<SignalMessage>>;
    async fn purge_room(&self, room_id: &str) -> StoreResult<()>;
}

/// In-memory store for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct MemorySignalStore {
    rooms: RwLock<HashMap<RoomId, Vec<SignalMessage>>>,
}

impl MemorySignalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SignalStore for MemorySignalStore {
    async fn insert(&self, message: SignalMessage) -> StoreResult<()> {
        let mut rooms = self.rooms.write();
        let entries = rooms.entry(message.room_id.clone()).or_default();
        match entries.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => *existing = message,
            None => entries.push(message),
        }
        Ok(())
    }

    async fn list_room(&self, room_id: &str) -> StoreResult<Vec<SignalMessage>> {
        Ok(self
            .rooms
            .read()
            .get(room_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn purge_room(&self, room_id: &str) -> StoreResult<()> {
        self.rooms.write().remove(room_id);
        Ok(())
    }
}

/// Identity collaborator: who the local participant is, as authenticated
/// by the surrounding product's auth service.
pub trait Identity: Send + Sync {
    fn current_user_id(&self) -> ParticipantId;
}

/// Fixed identity, for tests and for callers that resolve the user once
/// at startup.
#[derive(Debug, Clone)]
pub struct StaticIdentity(ParticipantId);

impl StaticIdentity {
    pub fn new(id: impl Into<ParticipantId>) -> Self {
        Self(id.into())
    }
}

impl Identity for StaticIdentity {
    fn current_user_id(&self) -> ParticipantId {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use signal_proto::{SessionDescription, SignalKind};

    fn offer(room: &str, id_suffix: &str) -> SignalMessage {
        let mut message = SignalMessage::offer(
            room,
            "u1",
            "u2",
            &SessionDescription(json!({"sdp": "v=0"})),
        );
        message.id = format!("m-{id_suffix}");
        message
    }

    #[tokio::test]
    async fn local_bus_round_trip() {
        let bus = LocalSignalBus::new();
        let mut sub = bus.subscribe("u1-u2");
        bus.publish("u1-u2", offer("u1-u2", "1")).expect("publish ok");
        let received = sub.recv().await.expect("receive ok");
        assert_eq!(received.id, "m-1");
        assert_eq!(received.kind, SignalKind::Offer);
    }

    #[tokio::test]
    async fn local_bus_without_subscribers_reports_closed() {
        let bus = LocalSignalBus::new();
        let err = bus.publish("u1-u2", offer("u1-u2", "1")).unwrap_err();
        assert!(matches!(err, BusError::Closed));
    }

    #[tokio::test]
    async fn local_bus_does_not_cross_rooms() {
        let bus = LocalSignalBus::new();
        let mut other = bus.subscribe("u1-u3");
        let _keep_alive = bus.subscribe("u1-u2");
        bus.publish("u1-u2", offer("u1-u2", "1")).expect("publish ok");
        assert!(matches!(
            other.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn memory_store_upserts_by_id() {
        let store = MemorySignalStore::new();
        let first = offer("u1-u2", "1");
        let mut retried = first.clone();
        retried.created_at += 1;
        store.insert(first).await.unwrap();
        store.insert(retried.clone()).await.unwrap();

        let entries = store.list_room("u1-u2").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].created_at, retried.created_at);
    }

    #[tokio::test]
    async fn memory_store_purge_empties_room() {
        let store = MemorySignalStore::new();
        store.insert(offer("u1-u2", "1")).await.unwrap();
        store.insert(offer("u1-u3", "2")).await.unwrap();
        store.purge_room("u1-u2").await.unwrap();
        assert!(store.list_room("u1-u2").await.unwrap().is_empty());
        assert_eq!(store.list_room("u1-u3").await.unwrap().len(), 1);
    }
}
