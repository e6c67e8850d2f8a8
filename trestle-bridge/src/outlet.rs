use tokio::sync::mpsc;
use tracing::{debug, warn};

use trestle_core::unit::{FailedUnit, SinkUnit};

/// Sending half of the bridge's two outlets.
///
/// Delivered units go to the success outlet after their cursor commit;
/// units that exhausted their options go to the failure outlet. Both
/// channels are bounded, so a slow consumer backpressures the pump rather
/// than growing a queue. A dropped receiver does not stop the pump: sends
/// then degrade to log-only.
#[derive(Debug, Clone)]
pub struct Outlets {
    success: mpsc::Sender<SinkUnit>,
    failure: mpsc::Sender<FailedUnit>,
}

/// Receiving half of the outlets, handed to the consumer.
#[derive(Debug)]
pub struct OutletReceivers {
    pub success: mpsc::Receiver<SinkUnit>,
    pub failure: mpsc::Receiver<FailedUnit>,
}

impl Outlets {
    /// Create a connected outlet pair with the given per-channel capacity.
    pub fn channel(capacity: usize) -> (Outlets, OutletReceivers) {
        let (success_tx, success_rx) = mpsc::channel(capacity);
        let (failure_tx, failure_rx) = mpsc::channel(capacity);

        (
            Outlets {
                success: success_tx,
                failure: failure_tx,
            },
            OutletReceivers {
                success: success_rx,
                failure: failure_rx,
            },
        )
    }

    pub(crate) async fn send_success(&self, unit: SinkUnit) {
        if let Err(err) = self.success.send(unit).await {
            let unit = err.0;
            debug!(
                topic = %unit.topic,
                sequence = unit.sequence,
                "success outlet closed, unit delivered but unreported"
            );
        }
    }

    pub(crate) async fn send_failure(&self, failed: FailedUnit) {
        if let Err(err) = self.failure.send(failed).await {
            let failed = err.0;
            warn!(
                topic = %failed.unit.topic,
                sequence = failed.unit.sequence,
                class = %failed.class,
                reason = %failed.reason,
                "failure outlet closed, dropping failed unit report"
            );
        }
    }
}
