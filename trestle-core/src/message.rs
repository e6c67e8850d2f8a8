//! Inbound message types for bridge routing.

use std::sync::Arc;

use bytes::Bytes;

/// A message received on a subscribed broker topic.
///
/// Immutable once received, and cheap to clone: both the topic
/// (`Arc<str>`) and the payload (`Bytes`) are reference-counted.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    /// Topic the message arrived on.
    pub topic: Arc<str>,
    /// Broker-assigned arrival sequence number, monotonic per topic.
    pub sequence: u64,
    /// Payload bytes, carried verbatim.
    pub payload: Bytes,
}
