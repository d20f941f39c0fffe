//! The authoritative call lifecycle. One driver task per session owns
//! every piece of mutable call state; inbound signals, timer ticks,
//! media path reports, and local commands all arrive as events on one
//! channel and are applied by one serialized transition function.

use crate::error::{CallError, EndReason, FailReason};
use crate::events::CallEvent;
use crate::media::{MediaEngine, PathEvent, TrackKind};
use crate::negotiation::NegotiationEngine;
use crate::registry::{AppliedSignals, RegistryRelease};
use crate::retry::NegotiationTimer;
use crate::transport::SignalTransport;
use crate::CallConfig;
use parking_lot::RwLock;
use signal_proto::{
    epoch_millis, ParticipantId, PathCandidate, RoomId, SessionDescription, SignalKind,
    SignalMessage,
};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    Initiating,
    AwaitingOffer,
    Negotiating,
    Connected,
    Ended,
    Failed,
}

impl CallState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Ended | CallState::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallRole {
    Initiator,
    Responder,
}

/// Authoritative per-call record.
#[derive(Debug, Clone)]
pub struct CallSession {
    pub room_id: RoomId,
    pub local_participant_id: ParticipantId,
    pub remote_participant_id: ParticipantId,
    pub role: CallRole,
    pub state: CallState,
    pub created_at: i64,
    pub connected_at: Option<i64>,
}

/// Everything the driver can react to.
#[derive(Debug)]
pub(crate) enum SessionEvent {
    Signal(SignalMessage),
    LocalCandidate(PathCandidate),
    RetryTick,
    NegotiationDeadline,
    Path(PathEvent),
    HangUp,
    SetTrack { kind: TrackKind, enabled: bool },
}

/// State visible outside the driver task. Written only by the driver.
pub(crate) struct SharedSessionView {
    state: RwLock<CallState>,
    role: RwLock<CallRole>,
}

impl SharedSessionView {
    pub(crate) fn new(role: CallRole) -> Self {
        Self {
            state: RwLock::new(CallState::Idle),
            role: RwLock::new(role),
        }
    }
}

/// Caller-facing handle for one call session. Commands are forwarded as
/// events into the driver; after teardown they are ignored.
pub struct CallSessionHandle {
    room_id: RoomId,
    local_id: ParticipantId,
    remote_id: ParticipantId,
    shared: Arc<SharedSessionView>,
    inbox: mpsc::UnboundedSender<SessionEvent>,
    events: AsyncMutex<Option<mpsc::UnboundedReceiver<CallEvent>>>,
}

impl std::fmt::Debug for CallSessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallSessionHandle")
            .field("room_id", &self.room_id)
            .field("local_id", &self.local_id)
            .field("remote_id", &self.remote_id)
            .finish_non_exhaustive()
    }
}

impl CallSessionHandle {
    pub(crate) fn new(
        room_id: RoomId,
        local_id: ParticipantId,
        remote_id: ParticipantId,
        shared: Arc<SharedSessionView>,
        inbox: mpsc::UnboundedSender<SessionEvent>,
        events: mpsc::UnboundedReceiver<CallEvent>,
    ) -> Self {
        Self {
            room_id,
            local_id,
            remote_id,
            shared,
            inbox,
            events: AsyncMutex::new(Some(events)),
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn local_participant(&self) -> &str {
        &self.local_id
    }

    pub fn remote_participant(&self) -> &str {
        &self.remote_id
    }

    pub fn state(&self) -> CallState {
        *self.shared.state.read()
    }

    pub fn role(&self) -> CallRole {
        *self.shared.role.read()
    }

    /// Take the session's event stream. Yields `None` once taken.
    pub async fn events(&self) -> Option<mpsc::UnboundedReceiver<CallEvent>> {
        self.events.lock().await.take()
    }

    /// End the call locally. Idempotent; the teardown itself runs on the
    /// driver task.
    pub fn hang_up(&self) {
        if self.inbox.send(SessionEvent::HangUp).is_err() {
            debug!(
                target: "call::session",
                room = %self.room_id,
                "hang up after teardown ignored"
            );
        }
    }

    /// Attach or detach a local track (mute, camera off).
    pub fn set_track_enabled(&self, kind: TrackKind, enabled: bool) {
        if self
            .inbox
            .send(SessionEvent::SetTrack { kind, enabled })
            .is_err()
        {
            debug!(
                target: "call::session",
                room = %self.room_id,
                "track toggle after teardown ignored"
            );
        }
    }
}

enum Terminal {
    Ended(EndReason),
    Failed(FailReason),
}

pub(crate) struct SessionDriver {
    session: CallSession,
    shared: Arc<SharedSessionView>,
    negotiation: NegotiationEngine,
    media: Arc<dyn MediaEngine>,
    transport: SignalTransport,
    seen: AppliedSignals,
    retry_interval: std::time::Duration,
    deadline: Instant,
    timer: Option<NegotiationTimer>,
    signal_pump: Option<JoinHandle<()>>,
    path_pump: Option<JoinHandle<()>>,
    candidate_pump: Option<JoinHandle<()>>,
    offer_message: Option<SignalMessage>,
    inbox_tx: mpsc::UnboundedSender<SessionEvent>,
    events_tx: mpsc::UnboundedSender<CallEvent>,
    release: Option<RegistryRelease>,
}

impl SessionDriver {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        session: CallSession,
        shared: Arc<SharedSessionView>,
        media: Arc<dyn MediaEngine>,
        transport: SignalTransport,
        config: &CallConfig,
        inbox_tx: mpsc::UnboundedSender<SessionEvent>,
        events_tx: mpsc::UnboundedSender<CallEvent>,
        release: RegistryRelease,
    ) -> Self {
        Self {
            negotiation: NegotiationEngine::new(media.clone()),
            session,
            shared,
            media,
            transport,
            seen: AppliedSignals::default(),
            retry_interval: config.offer_retry_interval,
            deadline: Instant::now() + config.negotiation_window,
            timer: None,
            signal_pump: None,
            path_pump: None,
            candidate_pump: None,
            offer_message: None,
            inbox_tx,
            events_tx,
            release: Some(release),
        }
    }

    pub(crate) async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<SessionEvent>) {
        let outcome = match self.start().await {
            Err(terminal) => terminal,
            Ok(()) => self.drive(&mut inbox).await,
        };
        self.teardown(outcome).await;
    }

    async fn start(&mut self) -> Result<(), Terminal> {
        self.spawn_signal_pump();
        self.spawn_path_pump();
        self.spawn_candidate_pump();
        match self.session.role {
            CallRole::Initiator => self.start_initiator().await,
            CallRole::Responder => self.start_responder().await,
        }
    }

    async fn start_initiator(&mut self) -> Result<(), Terminal> {
        self.set_state(CallState::Initiating);
        // A fresh attempt must not observe signals from a previous one.
        self.transport.purge(&self.session.room_id).await;

        let description = match self.negotiation.create_local_offer().await {
            Ok(description) => description,
            Err(err) => {
                warn!(
                    target: "call::session",
                    room = %self.session.room_id,
                    error = %err,
                    "failed to create local offer"
                );
                return Err(Terminal::Failed(FailReason::PathFailed));
            }
        };

        let message = SignalMessage::offer(
            &self.session.room_id,
            &self.session.local_participant_id,
            &self.session.remote_participant_id,
            &description,
        );
        self.offer_message = Some(message.clone());
        self.publish_or_fail(&message).await?;

        info!(
            target: "call::session",
            room = %self.session.room_id,
            message_id = %message.id,
            "offer published"
        );
        self.timer = Some(NegotiationTimer::spawn(
            Some(self.retry_interval),
            self.deadline,
            self.inbox_tx.clone(),
        ));
        Ok(())
    }

    async fn start_responder(&mut self) -> Result<(), Terminal> {
        self.set_state(CallState::AwaitingOffer);
        self.timer = Some(NegotiationTimer::spawn(
            None,
            self.deadline,
            self.inbox_tx.clone(),
        ));

        // The offer may have been published before this side subscribed;
        // the durable log is the source of truth for that race.
        let backlog = self
            .transport
            .reconcile(
                &self.session.room_id,
                &self.session.local_participant_id,
                SignalKind::Offer,
            )
            .await;
        match backlog {
            Ok(Some(message)) => {
                debug!(
                    target: "call::session",
                    room = %self.session.room_id,
                    message_id = %message.id,
                    "offer recovered from durable log"
                );
                if let Some(terminal) = self.handle_signal(message).await {
                    return Err(terminal);
                }
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(err) => {
                warn!(
                    target: "call::session",
                    room = %self.session.room_id,
                    error = %err,
                    "durable log reconciliation failed"
                );
                Err(Terminal::Failed(FailReason::Transport))
            }
        }
    }

    async fn drive(&mut self, inbox: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Terminal {
        loop {
            let Some(event) = inbox.recv().await else {
                return Terminal::Ended(EndReason::LocalHangup);
            };
            if let Some(terminal) = self.handle_event(event).await {
                return terminal;
            }
        }
    }

    async fn handle_event(&mut self, event: SessionEvent) -> Option<Terminal> {
        match event {
            SessionEvent::Signal(message) => self.handle_signal(message).await,
            SessionEvent::LocalCandidate(candidate) => {
                self.publish_local_candidate(candidate).await;
                None
            }
            SessionEvent::RetryTick => self.handle_retry_tick().await,
            SessionEvent::NegotiationDeadline => self.handle_deadline(),
            SessionEvent::Path(event) => self.handle_path_event(event),
            SessionEvent::HangUp => Some(Terminal::Ended(EndReason::LocalHangup)),
            SessionEvent::SetTrack { kind, enabled } => {
                if let Err(err) = self.media.set_track_enabled(kind, enabled).await {
                    warn!(
                        target: "call::session",
                        room = %self.session.room_id,
                        error = %err,
                        "track toggle failed"
                    );
                }
                None
            }
        }
    }

    /// One intake for both substrates: live broadcast messages and
    /// reconciled backlog go through here, so de-duplication covers
    /// every delivery path.
    async fn handle_signal(&mut self, message: SignalMessage) -> Option<Terminal> {
        if message.room_id != self.session.room_id
            || message.receiver_id != self.session.local_participant_id
        {
            return None;
        }
        if !self.seen.first_delivery(&message.id) {
            debug!(
                target: "call::session",
                room = %self.session.room_id,
                message_id = %message.id,
                "signal already applied; dropping re-delivery"
            );
            return None;
        }

        match message.kind {
            SignalKind::Offer => self.handle_offer(message).await,
            SignalKind::Answer => self.handle_answer(message).await,
            SignalKind::Candidate => {
                self.handle_candidate(message).await;
                None
            }
            SignalKind::EndCall => {
                info!(
                    target: "call::session",
                    room = %self.session.room_id,
                    peer = %message.sender_id,
                    "remote peer ended the call"
                );
                Some(Terminal::Ended(EndReason::RemoteEnded))
            }
        }
    }

    async fn handle_offer(&mut self, message: SignalMessage) -> Option<Terminal> {
        let Some(description) = message.description() else {
            warn!(
                target: "call::session",
                room = %self.session.room_id,
                message_id = %message.id,
                "offer without a session description"
            );
            return None;
        };

        match (self.session.role, self.session.state) {
            (CallRole::Responder, CallState::AwaitingOffer) => {
                self.emit(CallEvent::IncomingOffer {
                    from: message.sender_id.clone(),
                });
                self.accept_offer(description).await
            }
            (CallRole::Initiator, CallState::Initiating) => {
                // Both sides dialed at once. The smaller participant id
                // keeps the initiator role regardless of arrival order.
                if remote_wins_initiator(
                    &self.session.local_participant_id,
                    &message.sender_id,
                ) {
                    info!(
                        target: "call::session",
                        room = %self.session.room_id,
                        peer = %message.sender_id,
                        "yielding initiator role to peer"
                    );
                    if let Some(terminal) = self.downgrade_to_responder().await {
                        return Some(terminal);
                    }
                    self.emit(CallEvent::IncomingOffer {
                        from: message.sender_id.clone(),
                    });
                    self.accept_offer(description).await
                } else {
                    debug!(
                        target: "call::session",
                        room = %self.session.room_id,
                        peer = %message.sender_id,
                        "dropping remote offer; local side keeps the initiator role"
                    );
                    None
                }
            }
            _ => {
                self.reject_extra_description(SignalKind::Offer, description)
                    .await;
                None
            }
        }
    }

    async fn handle_answer(&mut self, message: SignalMessage) -> Option<Terminal> {
        let Some(description) = message.description() else {
            warn!(
                target: "call::session",
                room = %self.session.room_id,
                message_id = %message.id,
                "answer without a session description"
            );
            return None;
        };

        match (self.session.role, self.session.state) {
            (CallRole::Initiator, CallState::Initiating) => {
                match self.negotiation.apply_remote_description(description).await {
                    Ok(()) => {
                        // The offer is answered: retries stop, the
                        // negotiation window keeps running.
                        if let Some(timer) = self.timer.take() {
                            timer.cancel();
                        }
                        self.timer = Some(NegotiationTimer::spawn(
                            None,
                            self.deadline,
                            self.inbox_tx.clone(),
                        ));
                        info!(
                            target: "call::session",
                            room = %self.session.room_id,
                            message_id = %message.id,
                            "answer applied"
                        );
                        self.set_state(CallState::Negotiating);
                        None
                    }
                    Err(CallError::DuplicateNegotiation) => {
                        warn!(
                            target: "call::session",
                            room = %self.session.room_id,
                            message_id = %message.id,
                            error = %CallError::DuplicateNegotiation,
                            "dropping answer"
                        );
                        None
                    }
                    Err(err) => {
                        warn!(
                            target: "call::session",
                            room = %self.session.room_id,
                            error = %err,
                            "failed to apply answer"
                        );
                        Some(Terminal::Failed(FailReason::PathFailed))
                    }
                }
            }
            _ => {
                self.reject_extra_description(SignalKind::Answer, description)
                    .await;
                None
            }
        }
    }

    /// A second description reaching a session that already holds one is
    /// a protocol violation the registry should have filtered; the
    /// engine's guard names it, the driver logs it and drops the
    /// message. A description in a state that never applies one is
    /// simply ignored.
    async fn reject_extra_description(&mut self, kind: SignalKind, description: SessionDescription) {
        if !self.negotiation.has_remote_description() {
            debug!(
                target: "call::session",
                room = %self.session.room_id,
                state = ?self.session.state,
                kind = ?kind,
                "ignoring description in current state"
            );
            return;
        }
        match self.negotiation.apply_remote_description(description).await {
            Err(CallError::DuplicateNegotiation) => {
                warn!(
                    target: "call::session",
                    room = %self.session.room_id,
                    kind = ?kind,
                    error = %CallError::DuplicateNegotiation,
                    "dropping signal"
                );
            }
            Err(err) => {
                warn!(
                    target: "call::session",
                    room = %self.session.room_id,
                    kind = ?kind,
                    error = %err,
                    "dropping signal"
                );
            }
            Ok(()) => {
                warn!(
                    target: "call::session",
                    room = %self.session.room_id,
                    kind = ?kind,
                    "description applied outside the negotiation flow"
                );
            }
        }
    }

    async fn accept_offer(&mut self, description: SessionDescription) -> Option<Terminal> {
        match self.negotiation.apply_remote_description(description).await {
            Ok(()) => {}
            Err(CallError::DuplicateNegotiation) => {
                warn!(
                    target: "call::session",
                    room = %self.session.room_id,
                    error = %CallError::DuplicateNegotiation,
                    "dropping offer"
                );
                return None;
            }
            Err(err) => {
                warn!(
                    target: "call::session",
                    room = %self.session.room_id,
                    error = %err,
                    "failed to apply remote offer"
                );
                return Some(Terminal::Failed(FailReason::PathFailed));
            }
        }

        let answer = match self.negotiation.create_local_answer().await {
            Ok(description) => description,
            Err(err) => {
                warn!(
                    target: "call::session",
                    room = %self.session.room_id,
                    error = %err,
                    "failed to create answer"
                );
                return Some(Terminal::Failed(FailReason::PathFailed));
            }
        };
        let message = SignalMessage::answer(
            &self.session.room_id,
            &self.session.local_participant_id,
            &self.session.remote_participant_id,
            &answer,
        );
        if let Err(terminal) = self.publish_or_fail(&message).await {
            return Some(terminal);
        }
        info!(
            target: "call::session",
            room = %self.session.room_id,
            message_id = %message.id,
            "answer published"
        );
        self.set_state(CallState::Negotiating);
        None
    }

    async fn downgrade_to_responder(&mut self) -> Option<Terminal> {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
        self.offer_message = None;
        if let Err(err) = self.negotiation.begin_fresh_attempt().await {
            warn!(
                target: "call::session",
                room = %self.session.room_id,
                error = %err,
                "failed to restart negotiation as responder"
            );
            return Some(Terminal::Failed(FailReason::PathFailed));
        }
        self.session.role = CallRole::Responder;
        *self.shared.role.write() = CallRole::Responder;
        self.set_state(CallState::AwaitingOffer);
        self.timer = Some(NegotiationTimer::spawn(
            None,
            self.deadline,
            self.inbox_tx.clone(),
        ));
        None
    }

    /// Relay a locally gathered candidate to the peer. Candidate loss
    /// degrades path selection but never aborts the call, so failures
    /// are logged and swallowed.
    async fn publish_local_candidate(&mut self, candidate: PathCandidate) {
        let message = SignalMessage::candidate(
            &self.session.room_id,
            &self.session.local_participant_id,
            &self.session.remote_participant_id,
            &candidate,
        );
        if let Err(err) = self.transport.publish(&message).await {
            warn!(
                target: "call::session",
                room = %self.session.room_id,
                error = %err,
                "path candidate publication failed"
            );
        }
    }

    async fn handle_candidate(&mut self, message: SignalMessage) {
        let Some(candidate) = message.path_candidate() else {
            warn!(
                target: "call::session",
                room = %self.session.room_id,
                message_id = %message.id,
                "candidate signal without a payload"
            );
            return;
        };
        if let Err(err) = self.negotiation.add_remote_candidate(candidate).await {
            warn!(
                target: "call::session",
                room = %self.session.room_id,
                error = %err,
                "failed to apply path candidate"
            );
        }
    }

    async fn handle_retry_tick(&mut self) -> Option<Terminal> {
        if self.session.state != CallState::Initiating {
            return None;
        }
        // Re-publish the original description; a new one would orphan
        // candidates gathered against the first.
        let Some(message) = self.offer_message.clone() else {
            return None;
        };
        debug!(
            target: "call::session",
            room = %self.session.room_id,
            message_id = %message.id,
            "re-publishing unanswered offer"
        );
        if let Err(err) = self.transport.publish(&message).await {
            warn!(
                target: "call::session",
                room = %self.session.room_id,
                error = %err,
                "offer re-publication failed"
            );
            return Some(Terminal::Failed(FailReason::Transport));
        }

        // The answer may have reached the durable log while its
        // broadcast was dropped; poll it on the same cadence.
        match self
            .transport
            .reconcile(
                &self.session.room_id,
                &self.session.local_participant_id,
                SignalKind::Answer,
            )
            .await
        {
            Ok(Some(answer)) => self.handle_signal(answer).await,
            Ok(None) => None,
            Err(err) => {
                debug!(
                    target: "call::session",
                    room = %self.session.room_id,
                    error = %err,
                    "answer reconciliation failed"
                );
                None
            }
        }
    }

    fn handle_deadline(&mut self) -> Option<Terminal> {
        if self.session.state == CallState::Connected {
            return None;
        }
        warn!(
            target: "call::session",
            room = %self.session.room_id,
            state = ?self.session.state,
            "negotiation window elapsed"
        );
        Some(Terminal::Failed(FailReason::NegotiationTimeout))
    }

    fn handle_path_event(&mut self, event: PathEvent) -> Option<Terminal> {
        match event {
            PathEvent::Connected => {
                if self.session.state == CallState::Negotiating {
                    self.session.connected_at = Some(epoch_millis());
                    if let Some(timer) = self.timer.take() {
                        timer.cancel();
                    }
                    self.record_state(CallState::Connected);
                    self.emit(CallEvent::Connected);
                    info!(
                        target: "call::session",
                        room = %self.session.room_id,
                        "media path connected"
                    );
                }
                None
            }
            PathEvent::Disconnected => {
                if self.session.state == CallState::Connected {
                    info!(
                        target: "call::session",
                        room = %self.session.room_id,
                        "media path lost; remote peer gone"
                    );
                    Some(Terminal::Ended(EndReason::RemoteEnded))
                } else {
                    None
                }
            }
            PathEvent::Failed => {
                warn!(
                    target: "call::session",
                    room = %self.session.room_id,
                    "media path failed"
                );
                Some(Terminal::Failed(FailReason::PathFailed))
            }
        }
    }

    async fn publish_or_fail(&self, message: &SignalMessage) -> Result<(), Terminal> {
        match self.transport.publish(message).await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(
                    target: "call::session",
                    room = %self.session.room_id,
                    message_id = %message.id,
                    error = %err,
                    "signal publication failed"
                );
                Err(Terminal::Failed(FailReason::Transport))
            }
        }
    }

    /// Runs on every exit path; the session's resources are released
    /// here exactly once.
    async fn teardown(mut self, outcome: Terminal) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }

        // Courtesy end-call for locally decided teardowns; the remote
        // side is not waited on.
        if !matches!(outcome, Terminal::Ended(EndReason::RemoteEnded)) {
            let message = SignalMessage::end_call(
                &self.session.room_id,
                &self.session.local_participant_id,
                &self.session.remote_participant_id,
            );
            if let Err(err) = self.transport.publish(&message).await {
                debug!(
                    target: "call::session",
                    room = %self.session.room_id,
                    error = %err,
                    "courtesy end-call skipped"
                );
            }
        }

        self.media.release_local_media().await;

        if let Some(pump) = self.signal_pump.take() {
            pump.abort();
        }
        if let Some(pump) = self.path_pump.take() {
            pump.abort();
        }
        if let Some(pump) = self.candidate_pump.take() {
            pump.abort();
        }

        self.transport.purge(&self.session.room_id).await;

        // Registry entry goes first so observers of the terminal state
        // never find a stale session.
        if let Some(release) = self.release.take() {
            release.release();
        }

        match outcome {
            Terminal::Ended(reason) => {
                self.record_state(CallState::Ended);
                self.emit(CallEvent::Ended(reason));
                info!(
                    target: "call::session",
                    room = %self.session.room_id,
                    ?reason,
                    lasted_ms = epoch_millis() - self.session.created_at,
                    "call ended"
                );
            }
            Terminal::Failed(reason) => {
                self.record_state(CallState::Failed);
                self.emit(CallEvent::Failed(reason));
                warn!(
                    target: "call::session",
                    room = %self.session.room_id,
                    ?reason,
                    "call failed"
                );
            }
        }
    }

    fn spawn_signal_pump(&mut self) {
        let mut rx = self.transport.subscribe(&self.session.room_id);
        let room = self.session.room_id.clone();
        let local = self.session.local_participant_id.clone();
        let tx = self.inbox_tx.clone();
        self.signal_pump = Some(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(message) => {
                        if message.room_id == room && message.receiver_id == local {
                            if tx.send(SessionEvent::Signal(message)).is_err() {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(
                            target: "call::session",
                            room = %room,
                            skipped,
                            "broadcast intake lagged"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
    }

    fn spawn_candidate_pump(&mut self) {
        let mut rx = self.media.local_candidates();
        let tx = self.inbox_tx.clone();
        self.candidate_pump = Some(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(candidate) => {
                        if tx.send(SessionEvent::LocalCandidate(candidate)).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
    }

    fn spawn_path_pump(&mut self) {
        let mut rx = self.media.path_events();
        let tx = self.inbox_tx.clone();
        self.path_pump = Some(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if tx.send(SessionEvent::Path(event)).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
    }

    fn set_state(&mut self, state: CallState) {
        self.record_state(state);
        self.emit(CallEvent::StateChanged(state));
    }

    fn record_state(&mut self, state: CallState) {
        self.session.state = state;
        *self.shared.state.write() = state;
    }

    fn emit(&self, event: CallEvent) {
        let _ = self.events_tx.send(event);
    }
}

/// Symmetric-initiation tie-break: a pure function of the two
/// identities, independent of arrival order.
fn remote_wins_initiator(local: &str, remote: &str) -> bool {
    remote < local
}
