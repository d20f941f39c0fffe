//! In-memory media engine used by the test suites, kept next to the
//! trait the way mock transports live next to real ones.

use super::{MediaEngine, MediaError, PathEvent, TrackKind};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use signal_proto::{PathCandidate, SessionDescription};
use tokio::sync::broadcast;

#[derive(Debug, Default)]
struct ScriptedState {
    acquired: bool,
    releases: u32,
    offers_created: u32,
    answers_created: u32,
    remote_description: Option<SessionDescription>,
    remote_applications: u32,
    candidates: Vec<PathCandidate>,
    resets: u32,
    track_toggles: Vec<(TrackKind, bool)>,
}

/// Media engine whose behavior is driven by the test: descriptions are
/// synthesized, path events are emitted on demand, and every call is
/// recorded for assertions.
pub struct ScriptedMediaEngine {
    label: String,
    deny_access: bool,
    state: Mutex<ScriptedState>,
    path_tx: broadcast::Sender<PathEvent>,
    candidate_tx: broadcast::Sender<PathCandidate>,
}

impl ScriptedMediaEngine {
    pub fn new(label: impl Into<String>) -> Self {
        let (path_tx, _) = broadcast::channel(16);
        let (candidate_tx, _) = broadcast::channel(16);
        Self {
            label: label.into(),
            deny_access: false,
            state: Mutex::new(ScriptedState::default()),
            path_tx,
            candidate_tx,
        }
    }

    /// An engine whose device acquisition is refused, for the
    /// permission-denied path.
    pub fn denying(label: impl Into<String>) -> Self {
        let mut engine = Self::new(label);
        engine.deny_access = true;
        engine
    }

    /// Simulate a path-state report from the engine.
    pub fn emit_path(&self, event: PathEvent) {
        let _ = self.path_tx.send(event);
    }

    /// Simulate gathering a local path candidate.
    pub fn emit_local_candidate(&self, candidate: PathCandidate) {
        let _ = self.candidate_tx.send(candidate);
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.state.lock().remote_description.clone()
    }

    pub fn remote_applications(&self) -> u32 {
        self.state.lock().remote_applications
    }

    pub fn applied_candidates(&self) -> Vec<PathCandidate> {
        self.state.lock().candidates.clone()
    }

    pub fn offers_created(&self) -> u32 {
        self.state.lock().offers_created
    }

    pub fn media_acquired(&self) -> bool {
        self.state.lock().acquired
    }

    pub fn media_releases(&self) -> u32 {
        self.state.lock().releases
    }

    pub fn resets(&self) -> u32 {
        self.state.lock().resets
    }

    pub fn track_toggles(&self) -> Vec<(TrackKind, bool)> {
        self.state.lock().track_toggles.clone()
    }
}

#[async_trait]
impl MediaEngine for ScriptedMediaEngine {
    async fn acquire_local_media(&self) -> Result<(), MediaError> {
        if self.deny_access {
            return Err(MediaError::AccessDenied("permission refused".into()));
        }
        self.state.lock().acquired = true;
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, MediaError> {
        let mut state = self.state.lock();
        state.offers_created += 1;
        Ok(SessionDescription(json!({
            "type": "offer",
            "sdp": format!("{}-offer-{}", self.label, state.offers_created),
        })))
    }

    async fn create_answer(&self) -> Result<SessionDescription, MediaError> {
        let mut state = self.state.lock();
        if state.remote_description.is_none() {
            return Err(MediaError::Engine(
                "answer requested without a remote description".into(),
            ));
        }
        state.answers_created += 1;
        Ok(SessionDescription(json!({
            "type": "answer",
            "sdp": format!("{}-answer-{}", self.label, state.answers_created),
        })))
    }

    async fn apply_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MediaError> {
        let mut state = self.state.lock();
        state.remote_applications += 1;
        state.remote_description = Some(description);
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: PathCandidate) -> Result<(), MediaError> {
        self.state.lock().candidates.push(candidate);
        Ok(())
    }

    async fn reset(&self) -> Result<(), MediaError> {
        let mut state = self.state.lock();
        state.resets += 1;
        state.remote_description = None;
        state.candidates.clear();
        Ok(())
    }

    async fn set_track_enabled(&self, kind: TrackKind, enabled: bool) -> Result<(), MediaError> {
        self.state.lock().track_toggles.push((kind, enabled));
        Ok(())
    }

    async fn release_local_media(&self) {
        let mut state = self.state.lock();
        state.acquired = false;
        state.releases += 1;
    }

    fn path_events(&self) -> broadcast::Receiver<PathEvent> {
        self.path_tx.subscribe()
    }

    fn local_candidates(&self) -> broadcast::Receiver<PathCandidate> {
        self.candidate_tx.subscribe()
    }
}
