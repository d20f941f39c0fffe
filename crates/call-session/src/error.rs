use crate::media::MediaError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CallError {
    /// Device permission refused. Fatal for the attempt: the session is
    /// never created.
    #[error("media access denied: {0}")]
    MediaAccessDenied(String),
    /// A second remote description reached the negotiation engine within
    /// one attempt. Protocol violation; the offending message is dropped.
    #[error("duplicate negotiation: remote description already applied")]
    DuplicateNegotiation,
    /// The negotiation window elapsed without reaching a connected path.
    #[error("negotiation timed out")]
    NegotiationTimeout,
    /// The relay rejected a publish after bounded retries.
    #[error("signal transport unavailable: {0}")]
    TransportUnavailable(String),
    /// Any other media-engine failure mid-call.
    #[error("media engine failure: {0}")]
    Media(String),
}

impl From<MediaError> for CallError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::AccessDenied(reason) => CallError::MediaAccessDenied(reason),
            MediaError::Engine(reason) => CallError::Media(reason),
        }
    }
}

/// Why a session reached `Ended`. A remote `EndCall` is a clean
/// termination, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    LocalHangup,
    RemoteEnded,
}

/// Why a session reached `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailReason {
    NegotiationTimeout,
    PathFailed,
    Transport,
}
