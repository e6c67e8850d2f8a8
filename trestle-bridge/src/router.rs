use tracing::warn;

use trestle_core::unit::{ErrorClass, FailedUnit, SinkUnit};

use crate::error::BridgeError;
use crate::outlet::Outlets;

/// What the pump should do about an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Tear the session down and run the reconnect cycle.
    Reconnect,
    /// Give up on the current unit and move to the next message.
    NextMessage,
    /// Stop and surface the error to the caller.
    Escalate,
}

/// Decides how failures are handled and reports units that are out of
/// options.
///
/// Classification is a pure function of the error; the router's only state
/// is the failure outlet it reports fatal units on.
#[derive(Debug, Clone)]
pub struct FailureRouter {
    outlets: Outlets,
}

impl FailureRouter {
    pub fn new(outlets: Outlets) -> FailureRouter {
        FailureRouter { outlets }
    }

    /// Map an error to the recovery action the pump should take.
    ///
    /// Connection-class errors trigger a reconnect, except reconnect
    /// exhaustion itself, which has nowhere left to go but up.
    pub fn action_for(error: &BridgeError) -> FailureAction {
        if let BridgeError::ReconnectExhausted { .. } = error {
            return FailureAction::Escalate;
        }

        match error.class() {
            ErrorClass::Connection => FailureAction::Reconnect,
            ErrorClass::Message => FailureAction::NextMessage,
            ErrorClass::Configuration => FailureAction::Escalate,
        }
    }

    /// Report a unit that will never be delivered.
    ///
    /// Logged and routed to the failure outlet; the pump then carries on
    /// with the next message.
    pub(crate) async fn fail_unit(&self, unit: SinkUnit, class: ErrorClass, reason: String) {
        warn!(
            topic = %unit.topic,
            sequence = unit.sequence,
            class = %class,
            reason = %reason,
            "unit failed permanently"
        );

        self.outlets
            .send_failure(FailedUnit {
                unit,
                class,
                reason,
            })
            .await;
    }
}
