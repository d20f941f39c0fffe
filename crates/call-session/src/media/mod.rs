//! Control interface for the external media engine. The engine owns
//! codecs, candidate gathering, and the transport that carries media
//! bytes; the session engine only drives description lifecycle, track
//! attachment, and observes path state.

use async_trait::async_trait;
use signal_proto::{PathCandidate, SessionDescription};
use thiserror::Error;
use tokio::sync::broadcast;

pub mod scripted;

pub use scripted::ScriptedMediaEngine;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("media device access denied: {0}")]
    AccessDenied(String),
    #[error("media engine failure: {0}")]
    Engine(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Path state reported by the engine. External signals, not signaling
/// messages: `Connected` drives the `Negotiating → Connected`
/// transition, `Failed` is the unrecoverable failure path,
/// `Disconnected` means the remote side went away mid-call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathEvent {
    Connected,
    Disconnected,
    Failed,
}

#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Obtain the local capture resource. May suspend while the user
    /// decides on a permission prompt.
    async fn acquire_local_media(&self) -> Result<(), MediaError>;

    async fn create_offer(&self) -> Result<SessionDescription, MediaError>;

    /// Produce an answer description. Only valid once a remote offer has
    /// been applied.
    async fn create_answer(&self) -> Result<SessionDescription, MediaError>;

    async fn apply_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MediaError>;

    async fn add_remote_candidate(&self, candidate: PathCandidate) -> Result<(), MediaError>;

    /// Discard the current negotiation attempt so a fresh one can begin.
    async fn reset(&self) -> Result<(), MediaError>;

    /// Attach or detach a local track mid-call (mute, camera off).
    async fn set_track_enabled(&self, kind: TrackKind, enabled: bool) -> Result<(), MediaError>;

    /// Release the local capture resource. Called exactly once at
    /// session teardown.
    async fn release_local_media(&self);

    fn path_events(&self) -> broadcast::Receiver<PathEvent>;

    /// Locally gathered path candidates, to be relayed to the peer as
    /// they appear.
    fn local_candidates(&self) -> broadcast::Receiver<PathCandidate>;
}
