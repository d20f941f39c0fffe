use std::env;
use std::time::Duration;

/// Tunables for call negotiation.
#[derive(Debug, Clone)]
pub struct CallConfig {
    /// Interval at which an unanswered offer is re-published.
    pub offer_retry_interval: Duration,
    /// Window after which a session that has not reached `Connected` is
    /// declared failed.
    pub negotiation_window: Duration,
    /// Attempts for a durable-log write before the transport gives up.
    pub publish_retry_limit: usize,
    /// Initial delay between durable-log write attempts; doubles per
    /// attempt.
    pub publish_retry_delay: Duration,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            offer_retry_interval: Duration::from_secs(2),
            negotiation_window: Duration::from_secs(10),
            publish_retry_limit: 3,
            publish_retry_delay: Duration::from_millis(250),
        }
    }
}

impl CallConfig {
    /// Load configuration from environment variables, falling back to the
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            offer_retry_interval: env_millis("CALL_OFFER_RETRY_MS")
                .unwrap_or(defaults.offer_retry_interval),
            negotiation_window: env_millis("CALL_NEGOTIATION_WINDOW_MS")
                .unwrap_or(defaults.negotiation_window),
            publish_retry_limit: env::var("CALL_PUBLISH_RETRY_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.publish_retry_limit),
            publish_retry_delay: env_millis("CALL_PUBLISH_RETRY_DELAY_MS")
                .unwrap_or(defaults.publish_retry_delay),
        }
    }
}

fn env_millis(var: &str) -> Option<Duration> {
    env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
}
