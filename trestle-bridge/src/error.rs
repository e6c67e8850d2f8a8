use thiserror::Error;

use trestle_core::unit::ErrorClass;
use trestle_transport::TransportError;

/// Errors that can occur while running the bridge.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("subscribe to `{topic}` rejected: {reason}")]
    Subscribe { topic: String, reason: String },

    #[error("not connected")]
    NotConnected,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("sink failure: {0}")]
    Sink(String),

    #[error("reconnect abandoned after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl BridgeError {
    /// Classify the error for failure routing.
    ///
    /// Connection-class errors are recoverable by reconnecting, message-class
    /// errors affect a single unit of work, and configuration-class errors
    /// will not clear up until an operator intervenes.
    pub fn class(&self) -> ErrorClass {
        match self {
            BridgeError::Connect(_)
            | BridgeError::Subscribe { .. }
            | BridgeError::NotConnected
            | BridgeError::Transport(_)
            | BridgeError::ReconnectExhausted { .. } => ErrorClass::Connection,
            BridgeError::Sink(_) => ErrorClass::Message,
            BridgeError::Configuration(_) => ErrorClass::Configuration,
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
