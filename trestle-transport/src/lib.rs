//! Broker transport abstraction for the trestle bridge.
//!
//! This crate defines the narrow interface behind which a concrete broker
//! client library sits: a [`Transport`] dials and authenticates, a
//! [`BrokerSession`] opens topic subscriptions, and a [`TopicStream`] yields
//! inbound messages and accepts cursor commits. The bridge never sees a wire
//! protocol; any pub/sub system can be plugged in by implementing these
//! three traits.
//!
//! The built-in [`memory`] backend is a complete in-process broker used by
//! the test suite and for loopback runs.

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use trestle_core::endpoint::Endpoint;
use trestle_core::message::InboundMessage;

/// Error type for transport operations.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The broker refused the connection or the logon handshake.
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    /// The transport dropped mid-stream; the session and its subscriptions
    /// are unusable until a new session is established.
    #[error("connection lost")]
    ConnectionLost,

    /// The broker rejected a subscription request.
    #[error("subscription to `{topic}` rejected: {reason}")]
    SubscribeRejected { topic: String, reason: String },

    /// Operation on a session or subscription that was already closed.
    #[error("session closed")]
    SessionClosed,

    /// I/O error from a socket-backed transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// A broker client capability: dials an endpoint and authenticates.
///
/// Implementations are shared handles (the bridge holds one behind an
/// `Arc`); each successful `connect` call yields an independent session.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish a transport session with the broker at `endpoint` and log
    /// on as `identity`.
    async fn connect(&self, endpoint: &Endpoint, identity: &str)
        -> Result<Box<dyn BrokerSession>>;
}

/// One authenticated session with a broker.
///
/// Structural calls (`subscribe`, `close`) must not run concurrently; the
/// session is `&mut self` throughout so a single owner serializes them.
#[async_trait]
pub trait BrokerSession: Send {
    /// Open a subscription on `topic`.
    ///
    /// A returning identity resumes from its committed cursor; a first-time
    /// subscriber starts from the present.
    async fn subscribe(&mut self, topic: &str) -> Result<Box<dyn TopicStream>>;

    /// Close the session and release its transport resources.
    ///
    /// Safe to call more than once.
    async fn close(&mut self) -> Result<()>;
}

/// The inbound side of one topic subscription.
#[async_trait]
pub trait TopicStream: Send {
    /// Wait for the next message.
    ///
    /// Returns `Ok(Some(message))` for each inbound message, `Ok(None)` once
    /// the subscription has been closed locally, and
    /// `Err(TransportError::ConnectionLost)` when the transport dropped; the
    /// caller is expected to reconnect and re-issue the subscribe.
    async fn next_message(&mut self) -> Result<Option<InboundMessage>>;

    /// Commit the subscription cursor past `sequence`.
    ///
    /// Commits are cumulative: committing sequence N acknowledges every
    /// message at or before N, and none of them will be redelivered to this
    /// identity on resubscribe. Brokers that only acknowledge on receive may
    /// implement this as a no-op, in which case delivery degrades from
    /// at-least-once to at-most-once.
    async fn commit(&mut self, sequence: u64) -> Result<()>;

    /// Close the subscription and release its resources.
    ///
    /// Safe to call more than once.
    async fn close(&mut self) -> Result<()>;
}
