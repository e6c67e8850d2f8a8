//! Sink-bound units of work and their delivery outcomes.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::message::InboundMessage;

/// One unit of downstream work, produced from a single inbound message.
///
/// Conversion from a message is pass-through: the payload bytes are carried
/// verbatim, so the sink sees exactly what the broker delivered.
#[derive(Clone, Debug)]
pub struct SinkUnit {
    /// Topic the originating message arrived on.
    pub topic: Arc<str>,
    /// Arrival sequence number of the originating message.
    pub sequence: u64,
    /// Payload bytes, unchanged from the inbound message.
    pub payload: Bytes,
}

impl SinkUnit {
    /// Build a unit from an inbound message without copying the payload.
    pub fn from_message(message: &InboundMessage) -> SinkUnit {
        SinkUnit {
            topic: Arc::clone(&message.topic),
            sequence: message.sequence,
            payload: message.payload.clone(),
        }
    }
}

/// Result of handing one unit to a sink.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The sink confirmed receipt; the originating message may be committed.
    Delivered,
    /// The write failed but may succeed if re-attempted.
    Retryable(String),
    /// The write failed permanently for this unit.
    Fatal(String),
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered)
    }
}

/// Coarse failure classification used to pick a recovery strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transport-level failure; recovered by reconnecting.
    Connection,
    /// Per-unit failure; handled by the retry/fatal path of the pump.
    Message,
    /// Invalid setup; fatal immediately, never retried.
    Configuration,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Connection => write!(f, "connection"),
            ErrorClass::Message => write!(f, "message"),
            ErrorClass::Configuration => write!(f, "configuration"),
        }
    }
}

/// A unit that exhausted its delivery options, as reported on the failure
/// outlet.
///
/// Carries the unit itself (topic and sequence included) plus the failure
/// classification and reason, so a fatal outcome can be diagnosed without
/// re-reading the broker log.
#[derive(Clone, Debug)]
pub struct FailedUnit {
    pub unit: SinkUnit,
    pub class: ErrorClass,
    pub reason: String,
}
