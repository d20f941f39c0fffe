//! Shared wire definitions for call signaling.
//! Keeping this in a dedicated crate allows the relay plumbing and the
//! session engine to agree on the message shape without pulling in
//! heavier runtime code.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Participant identity as issued by the identity service.
pub type ParticipantId = String;

/// Room identifier shared by both participants of a call.
pub type RoomId = String;

/// Derive the room identifier for a pair of participants. The result is
/// order-independent: both sides compute the same value without
/// coordination.
pub fn room_id(a: &str, b: &str) -> RoomId {
    if a <= b {
        format!("{a}-{b}")
    } else {
        format!("{b}-{a}")
    }
}

/// Unix-epoch milliseconds, used for `SignalMessage::created_at`.
pub fn epoch_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Opaque session-description value produced and consumed by the media
/// engine. The signaling layer never inspects its contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionDescription(pub Value);

/// Opaque network-path candidate value. Carried verbatim between peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathCandidate(pub Value);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalKind {
    Offer,
    Answer,
    Candidate,
    EndCall,
}

/// The wire unit exchanged through the broadcast relay and the durable
/// log. `id` is globally unique and is the key for idempotent
/// de-duplication on the receiving side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalMessage {
    pub id: String,
    pub room_id: RoomId,
    pub sender_id: ParticipantId,
    pub receiver_id: ParticipantId,
    #[serde(rename = "type")]
    pub kind: SignalKind,
    pub payload: Value,
    pub created_at: i64,
}

impl SignalMessage {
    fn new(
        room_id: &str,
        sender_id: &str,
        receiver_id: &str,
        kind: SignalKind,
        payload: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            room_id: room_id.to_string(),
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            kind,
            payload,
            created_at: epoch_millis(),
        }
    }

    pub fn offer(
        room_id: &str,
        sender_id: &str,
        receiver_id: &str,
        description: &SessionDescription,
    ) -> Self {
        Self::new(
            room_id,
            sender_id,
            receiver_id,
            SignalKind::Offer,
            description.0.clone(),
        )
    }

    pub fn answer(
        room_id: &str,
        sender_id: &str,
        receiver_id: &str,
        description: &SessionDescription,
    ) -> Self {
        Self::new(
            room_id,
            sender_id,
            receiver_id,
            SignalKind::Answer,
            description.0.clone(),
        )
    }

    pub fn candidate(
        room_id: &str,
        sender_id: &str,
        receiver_id: &str,
        candidate: &PathCandidate,
    ) -> Self {
        Self::new(
            room_id,
            sender_id,
            receiver_id,
            SignalKind::Candidate,
            candidate.0.clone(),
        )
    }

    pub fn end_call(room_id: &str, sender_id: &str, receiver_id: &str) -> Self {
        Self::new(
            room_id,
            sender_id,
            receiver_id,
            SignalKind::EndCall,
            Value::Object(Default::default()),
        )
    }

    /// The payload as a session description, for Offer/Answer messages.
    pub fn description(&self) -> Option<SessionDescription> {
        match self.kind {
            SignalKind::Offer | SignalKind::Answer => {
                Some(SessionDescription(self.payload.clone()))
            }
            _ => None,
        }
    }

    /// The payload as a path candidate, for Candidate messages.
    pub fn path_candidate(&self) -> Option<PathCandidate> {
        match self.kind {
            SignalKind::Candidate => Some(PathCandidate(self.payload.clone())),
            _ => None,
        }
    }
}
