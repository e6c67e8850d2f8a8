use std::time::Duration;

use trestle_core::endpoint::Endpoint;
use trestle_core::topic::validate_topic;

use crate::error::{BridgeError, Result};

/// Exponential backoff schedule for reconnection attempts.
///
/// The delay before attempt `n` is `initial * 2^(n-1)`, capped at `max`.
/// With `jitter` enabled, up to half the computed delay is added at random
/// so that a fleet of bridges does not reconnect in lockstep.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub initial: Duration,
    /// Upper bound for any single delay.
    pub max: Duration,
    /// Give up after this many attempts; `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Randomize delays to avoid reconnect stampedes.
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(30),
            max_attempts: None,
            jitter: false,
        }
    }
}

impl BackoffPolicy {
    /// Delay to sleep before reconnect attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        let delay = self.initial.saturating_mul(factor).min(self.max);

        if self.jitter {
            let spread = (delay.as_millis() / 2) as u64;
            if spread > 0 {
                use rand::Rng;
                let extra = rand::thread_rng().gen_range(0..=spread);
                return (delay + Duration::from_millis(extra)).min(self.max);
            }
        }

        delay
    }

    /// Whether attempt `attempt` (1-based) exceeds the configured limit.
    pub fn exhausted(&self, attempt: u32) -> bool {
        match self.max_attempts {
            Some(limit) => attempt > limit,
            None => false,
        }
    }
}

/// Options describing one bridge: where to connect, what to subscribe to,
/// and how hard to try before giving up.
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    pub(crate) endpoint: Endpoint,
    pub(crate) topic: String,
    pub(crate) identity: String,
    pub(crate) backoff: BackoffPolicy,
    pub(crate) retry_count: u32,
    pub(crate) message_limit: Option<u64>,
    pub(crate) idle_timeout: Option<Duration>,
    pub(crate) outlet_capacity: usize,
}

impl BridgeOptions {
    /// Create options for the given endpoint, topic, and client identity.
    pub fn new(
        endpoint: Endpoint,
        topic: impl Into<String>,
        identity: impl Into<String>,
    ) -> Self {
        Self {
            endpoint,
            topic: topic.into(),
            identity: identity.into(),
            backoff: BackoffPolicy::default(),
            retry_count: 3,
            message_limit: None,
            idle_timeout: None,
            outlet_capacity: 64,
        }
    }

    /// Set the reconnect backoff schedule.
    pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set how many times a retryable sink failure is re-attempted before
    /// the unit is declared fatal.
    pub fn retry_count(mut self, retries: u32) -> Self {
        self.retry_count = retries;
        self
    }

    /// Stop the pump after processing this many units, counting both
    /// delivered and failed ones. A limit of 1 gives one-shot behavior.
    pub fn message_limit(mut self, limit: u64) -> Self {
        self.message_limit = Some(limit);
        self
    }

    /// Stop the pump cleanly after this long without an inbound message.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Capacity of the success and failure outlet channels.
    pub fn outlet_capacity(mut self, capacity: usize) -> Self {
        self.outlet_capacity = capacity;
        self
    }

    /// The broker endpoint these options point at.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// The subscribed topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The client identity presented to the broker.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Check the options for problems that no amount of retrying will fix.
    ///
    /// Called before any connection is attempted; a failure here never
    /// reaches the network.
    pub fn validate(&self) -> Result<()> {
        if let Err(err) = validate_topic(&self.topic) {
            return Err(BridgeError::Configuration(err.to_string()));
        }
        if self.identity.is_empty() {
            return Err(BridgeError::Configuration(
                "client identity must not be empty".to_string(),
            ));
        }
        if self.outlet_capacity == 0 {
            return Err(BridgeError::Configuration(
                "outlet capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
