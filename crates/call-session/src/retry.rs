//! Cooperative negotiation timer. For an initiator it emits re-publish
//! ticks on a fixed interval; for both roles it emits a single deadline
//! event when the negotiation window elapses. Ticks and the deadline
//! are delivered as events into the session driver, never as direct
//! calls. The deadline is absolute so the window keeps running when the
//! driver swaps tick mode off after an answer arrives.

use crate::session::SessionEvent;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, Instant};
use tracing::trace;

pub(crate) struct NegotiationTimer {
    handle: JoinHandle<()>,
}

impl NegotiationTimer {
    /// Spawn the timer task. `retry_interval` is `Some` only while the
    /// local side is re-publishing an unanswered offer.
    pub(crate) fn spawn(
        retry_interval: Option<Duration>,
        deadline: Instant,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let expiry = sleep_until(deadline);
            tokio::pin!(expiry);

            match retry_interval {
                Some(period) => {
                    let mut ticker = interval_at(Instant::now() + period, period);
                    loop {
                        tokio::select! {
                            _ = &mut expiry => {
                                let _ = events.send(SessionEvent::NegotiationDeadline);
                                break;
                            }
                            _ = ticker.tick() => {
                                trace!(target: "call::retry", "offer retry tick");
                                if events.send(SessionEvent::RetryTick).is_err() {
                                    break;
                                }
                            }
                        }
                    }
                }
                None => {
                    expiry.await;
                    let _ = events.send(SessionEvent::NegotiationDeadline);
                }
            }
        });
        Self { handle }
    }

    pub(crate) fn cancel(&self) {
        self.handle.abort();
    }
}

impl Drop for NegotiationTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emits_ticks_then_deadline() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _timer = NegotiationTimer::spawn(
            Some(Duration::from_millis(20)),
            Instant::now() + Duration::from_millis(70),
            tx,
        );

        let mut ticks = 0;
        loop {
            match rx.recv().await.expect("timer event") {
                SessionEvent::RetryTick => ticks += 1,
                SessionEvent::NegotiationDeadline => break,
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert!(ticks >= 2, "expected at least two ticks, saw {ticks}");
    }

    #[tokio::test]
    async fn deadline_only_mode_never_ticks() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _timer =
            NegotiationTimer::spawn(None, Instant::now() + Duration::from_millis(30), tx);
        assert!(matches!(
            rx.recv().await,
            Some(SessionEvent::NegotiationDeadline)
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn cancel_stops_the_stream() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let timer = NegotiationTimer::spawn(
            Some(Duration::from_millis(10)),
            Instant::now() + Duration::from_secs(60),
            tx,
        );
        let _ = rx.recv().await;
        timer.cancel();
        tokio::time::sleep(Duration::from_millis(30)).await;
        while rx.try_recv().is_ok() {}
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(rx.try_recv().is_err());
    }
}
