//! Offer/answer bookkeeping around the media engine: set-once
//! description guards per negotiation attempt and candidate buffering
//! until a remote description exists.

use crate::error::CallError;
use crate::media::MediaEngine;
use signal_proto::{PathCandidate, SessionDescription};
use std::sync::Arc;
use tracing::debug;

pub struct NegotiationEngine {
    media: Arc<dyn MediaEngine>,
    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,
    pending_candidates: Vec<PathCandidate>,
}

impl NegotiationEngine {
    pub fn new(media: Arc<dyn MediaEngine>) -> Self {
        Self {
            media,
            local_description: None,
            remote_description: None,
            pending_candidates: Vec::new(),
        }
    }

    pub fn local_description(&self) -> Option<&SessionDescription> {
        self.local_description.as_ref()
    }

    pub fn has_remote_description(&self) -> bool {
        self.remote_description.is_some()
    }

    /// Create and record the local offer. At most one local description
    /// per attempt; retries re-publish this same description.
    pub async fn create_local_offer(&mut self) -> Result<SessionDescription, CallError> {
        if self.local_description.is_some() {
            return Err(CallError::Media(
                "local description already created for this attempt".into(),
            ));
        }
        let description = self.media.create_offer().await?;
        self.local_description = Some(description.clone());
        Ok(description)
    }

    /// Create and record the local answer. Requires an applied remote
    /// offer.
    pub async fn create_local_answer(&mut self) -> Result<SessionDescription, CallError> {
        if self.remote_description.is_none() {
            return Err(CallError::Media(
                "answer requested before a remote offer was applied".into(),
            ));
        }
        if self.local_description.is_some() {
            return Err(CallError::Media(
                "local description already created for this attempt".into(),
            ));
        }
        let description = self.media.create_answer().await?;
        self.local_description = Some(description.clone());
        Ok(description)
    }

    /// Apply the remote description. A second application within one
    /// attempt is a protocol violation surfaced as
    /// `DuplicateNegotiation`; buffered candidates are drained in
    /// arrival order once the description is applied.
    pub async fn apply_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<(), CallError> {
        if self.remote_description.is_some() {
            return Err(CallError::DuplicateNegotiation);
        }
        self.media
            .apply_remote_description(description.clone())
            .await?;
        self.remote_description = Some(description);

        let buffered = std::mem::take(&mut self.pending_candidates);
        if !buffered.is_empty() {
            debug!(
                target: "call::negotiation",
                count = buffered.len(),
                "draining buffered path candidates"
            );
        }
        for candidate in buffered {
            self.media.add_remote_candidate(candidate).await?;
        }
        Ok(())
    }

    /// Apply a remote candidate, or buffer it while no remote
    /// description exists yet.
    pub async fn add_remote_candidate(
        &mut self,
        candidate: PathCandidate,
    ) -> Result<(), CallError> {
        if self.remote_description.is_none() {
            self.pending_candidates.push(candidate);
            return Ok(());
        }
        self.media.add_remote_candidate(candidate).await?;
        Ok(())
    }

    /// Discard the attempt: descriptions, buffered candidates, and the
    /// engine's own negotiation state. Used when a session changes role
    /// after a symmetric-initiation tie-break.
    pub async fn begin_fresh_attempt(&mut self) -> Result<(), CallError> {
        self.media.reset().await?;
        self.local_description = None;
        self.remote_description = None;
        self.pending_candidates.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::ScriptedMediaEngine;
    use serde_json::json;

    fn engine() -> (NegotiationEngine, Arc<ScriptedMediaEngine>) {
        let media = Arc::new(ScriptedMediaEngine::new("test"));
        (NegotiationEngine::new(media.clone()), media)
    }

    fn candidate(n: u32) -> PathCandidate {
        PathCandidate(json!({"candidate": format!("candidate:{n}")}))
    }

    #[tokio::test]
    async fn second_remote_description_is_duplicate_negotiation() {
        let (mut negotiation, _media) = engine();
        let offer = SessionDescription(json!({"type": "offer", "sdp": "a"}));
        negotiation
            .apply_remote_description(offer.clone())
            .await
            .unwrap();
        let err = negotiation.apply_remote_description(offer).await.unwrap_err();
        assert!(matches!(err, CallError::DuplicateNegotiation));
    }

    #[tokio::test]
    async fn candidates_buffer_until_remote_description_then_drain_in_order() {
        let (mut negotiation, media) = engine();
        negotiation.add_remote_candidate(candidate(1)).await.unwrap();
        negotiation.add_remote_candidate(candidate(2)).await.unwrap();
        assert!(media.applied_candidates().is_empty());

        negotiation
            .apply_remote_description(SessionDescription(json!({"type": "offer"})))
            .await
            .unwrap();
        negotiation.add_remote_candidate(candidate(3)).await.unwrap();

        let applied = media.applied_candidates();
        assert_eq!(applied, vec![candidate(1), candidate(2), candidate(3)]);
    }

    #[tokio::test]
    async fn answer_before_remote_offer_is_rejected() {
        let (mut negotiation, _media) = engine();
        assert!(negotiation.create_local_answer().await.is_err());
    }

    #[tokio::test]
    async fn local_description_is_set_once_per_attempt() {
        let (mut negotiation, _media) = engine();
        negotiation.create_local_offer().await.unwrap();
        assert!(negotiation.create_local_offer().await.is_err());
    }

    #[tokio::test]
    async fn fresh_attempt_clears_descriptions_and_buffer() {
        let (mut negotiation, media) = engine();
        negotiation.create_local_offer().await.unwrap();
        negotiation.add_remote_candidate(candidate(1)).await.unwrap();
        negotiation.begin_fresh_attempt().await.unwrap();

        assert!(negotiation.local_description().is_none());
        assert!(!negotiation.has_remote_description());
        assert_eq!(media.resets(), 1);

        // The fresh attempt accepts a remote offer again.
        negotiation
            .apply_remote_description(SessionDescription(json!({"type": "offer"})))
            .await
            .unwrap();
        negotiation.create_local_answer().await.unwrap();
    }
}
