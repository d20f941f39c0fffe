//! Peer-to-peer call establishment over an unreliable signaling relay.
//!
//! Two participants that share no direct channel exchange session
//! descriptions and path candidates through a best-effort broadcast
//! relay backed by a durable room-scoped log. This crate owns the
//! signaling protocol on top of that relay: offer/answer negotiation,
//! candidate buffering, offer retries, the race where both sides dial
//! at once, and the race where a signal lands before its receiver has
//! subscribed. The media stack itself (codecs, candidate gathering, the
//! bytes on the wire) lives behind the [`media::MediaEngine`] trait.
//!
//! Entry point is [`CallRegistry`]: one per client, holding at most one
//! live session per room.

pub mod config;
pub mod error;
pub mod events;
pub mod media;
pub mod negotiation;
pub mod registry;
mod retry;
pub mod session;
pub mod transport;

pub use config::CallConfig;
pub use error::{CallError, EndReason, FailReason};
pub use events::CallEvent;
pub use media::{MediaEngine, MediaError, PathEvent, TrackKind};
pub use registry::CallRegistry;
pub use session::{CallRole, CallSession, CallSessionHandle, CallState};
pub use transport::SignalTransport;
