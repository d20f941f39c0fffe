//! Explicit session registry keyed by room. Owns the handle for every
//! live call, enforces the one-session-per-room rule, and carries the
//! applied-signal dedup set contract that makes intake idempotent
//! across delivery paths.

use crate::config::CallConfig;
use crate::error::CallError;
use crate::media::MediaEngine;
use crate::session::{
    CallRole, CallSession, CallSessionHandle, CallState, SessionDriver, SharedSessionView,
};
use crate::transport::SignalTransport;
use parking_lot::{Mutex, RwLock};
use relay_bus::{Identity, SignalBus, SignalStore};
use signal_proto::{epoch_millis, RoomId};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

/// Message ids already applied by a session. Guarantees idempotent
/// processing whether a signal arrived via broadcast, via
/// reconciliation, or via both.
#[derive(Debug, Default)]
pub(crate) struct AppliedSignals(HashSet<String>);

impl AppliedSignals {
    /// Records the id; `true` exactly once per id.
    pub(crate) fn first_delivery(&mut self, id: &str) -> bool {
        self.0.insert(id.to_string())
    }
}

pub(crate) struct SessionEntry {
    generation: u64,
    handle: Arc<CallSessionHandle>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

pub(crate) struct RegistryInner {
    identity: Arc<dyn Identity>,
    transport: SignalTransport,
    config: CallConfig,
    rooms: RwLock<HashMap<RoomId, SessionEntry>>,
    generation: AtomicU64,
}

/// Removes one session's registry entry at teardown. Generation-guarded
/// so a replaced session can never evict its successor.
pub(crate) struct RegistryRelease {
    inner: Arc<RegistryInner>,
    room_id: RoomId,
    generation: u64,
}

impl RegistryRelease {
    pub(crate) fn release(self) {
        let mut rooms = self.inner.rooms.write();
        if rooms
            .get(&self.room_id)
            .is_some_and(|entry| entry.generation == self.generation)
        {
            rooms.remove(&self.room_id);
        }
    }
}

/// Entry point of the subsystem: creates, looks up, and tears down call
/// sessions. One registry per client, owned by the caller; nothing in
/// here is process-global.
#[derive(Clone)]
pub struct CallRegistry {
    inner: Arc<RegistryInner>,
}

impl CallRegistry {
    pub fn new(
        identity: Arc<dyn Identity>,
        bus: Arc<dyn SignalBus>,
        store: Arc<dyn SignalStore>,
        config: CallConfig,
    ) -> Self {
        let transport = SignalTransport::new(bus, store, &config);
        Self {
            inner: Arc::new(RegistryInner {
                identity,
                transport,
                config,
                rooms: RwLock::new(HashMap::new()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Place a call to `remote_id`. Acquires local media, publishes the
    /// offer, and schedules retries until an answer arrives.
    pub async fn start_call(
        &self,
        remote_id: &str,
        media: Arc<dyn MediaEngine>,
    ) -> Result<Arc<CallSessionHandle>, CallError> {
        self.begin_session(remote_id, media, CallRole::Initiator)
            .await
    }

    /// Accept a call from `remote_id`. Acquires local media and
    /// reconciles the durable log for an offer published before this
    /// side subscribed.
    pub async fn accept_call(
        &self,
        remote_id: &str,
        media: Arc<dyn MediaEngine>,
    ) -> Result<Arc<CallSessionHandle>, CallError> {
        self.begin_session(remote_id, media, CallRole::Responder)
            .await
    }

    pub fn session(&self, room_id: &str) -> Option<Arc<CallSessionHandle>> {
        self.inner
            .rooms
            .read()
            .get(room_id)
            .map(|entry| entry.handle.clone())
    }

    pub fn active_rooms(&self) -> Vec<RoomId> {
        self.inner.rooms.read().keys().cloned().collect()
    }

    /// Hang up every live session and wait for their teardowns. For
    /// client shutdown; afterwards the registry is empty.
    pub async fn shutdown(&self) {
        let entries: Vec<SessionEntry> = {
            let mut rooms = self.inner.rooms.write();
            rooms.drain().map(|(_, entry)| entry).collect()
        };
        for entry in entries {
            entry.handle.hang_up();
            let driver = entry.driver.lock().take();
            if let Some(driver) = driver {
                let _ = driver.await;
            }
        }
    }

    async fn begin_session(
        &self,
        remote_id: &str,
        media: Arc<dyn MediaEngine>,
        role: CallRole,
    ) -> Result<Arc<CallSessionHandle>, CallError> {
        let local_id = self.inner.identity.current_user_id();
        let room_id = signal_proto::room_id(&local_id, remote_id);

        // A new attempt first cancels any prior session for the room.
        let previous = {
            let mut rooms = self.inner.rooms.write();
            rooms.remove(&room_id)
        };
        if let Some(entry) = previous {
            info!(
                target: "call::registry",
                room = %room_id,
                "replacing existing session for room"
            );
            entry.handle.hang_up();
            let driver = entry.driver.lock().take();
            if let Some(driver) = driver {
                let _ = driver.await;
            }
        }

        media.acquire_local_media().await?;

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(SharedSessionView::new(role));

        let handle = Arc::new(CallSessionHandle::new(
            room_id.clone(),
            local_id.clone(),
            remote_id.to_string(),
            shared.clone(),
            inbox_tx.clone(),
            events_rx,
        ));

        let session = CallSession {
            room_id: room_id.clone(),
            local_participant_id: local_id,
            remote_participant_id: remote_id.to_string(),
            role,
            state: CallState::Idle,
            created_at: epoch_millis(),
            connected_at: None,
        };

        let driver = SessionDriver::new(
            session,
            shared,
            media,
            self.inner.transport.clone(),
            &self.inner.config,
            inbox_tx,
            events_tx,
            RegistryRelease {
                inner: self.inner.clone(),
                room_id: room_id.clone(),
                generation,
            },
        );

        // The entry goes in before the driver starts so an immediate
        // teardown finds it.
        self.inner.rooms.write().insert(
            room_id.clone(),
            SessionEntry {
                generation,
                handle: handle.clone(),
                driver: Mutex::new(None),
            },
        );
        let join = tokio::spawn(driver.run(inbox_rx));
        {
            let rooms = self.inner.rooms.read();
            if let Some(entry) = rooms.get(&room_id) {
                if entry.generation == generation {
                    *entry.driver.lock() = Some(join);
                }
            }
        }

        info!(
            target: "call::registry",
            room = %room_id,
            ?role,
            "call session created"
        );
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applied_signals_reports_first_delivery_once() {
        let mut seen = AppliedSignals::default();
        assert!(seen.first_delivery("m1"));
        assert!(!seen.first_delivery("m1"));
        assert!(seen.first_delivery("m2"));
    }
}
