use crate::error::{EndReason, FailReason};
use crate::session::CallState;
use signal_proto::ParticipantId;

/// Outward event surface of a call session, delivered through a
/// take-once receiver on the session handle. `IncomingOffer` is the
/// ring/toast trigger for the UI layer; `Ended`/`Failed` are the
/// teardown triggers. Terminal and connected transitions are reported
/// through their dedicated variants, intermediate ones through
/// `StateChanged`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    IncomingOffer { from: ParticipantId },
    StateChanged(CallState),
    Connected,
    Ended(EndReason),
    Failed(FailReason),
}
