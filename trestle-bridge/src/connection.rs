use std::sync::Arc;

use tokio::time;
use tracing::{debug, info, warn};

use trestle_core::endpoint::Endpoint;
use trestle_transport::{BrokerSession, Transport, TransportError};

use crate::error::{BridgeError, Result};
use crate::options::{BackoffPolicy, BridgeOptions};
use crate::shutdown::Shutdown;
use crate::subscription::SubscriptionHandle;

/// Lifecycle states of a broker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session held; nothing attempted yet, or closed cleanly.
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// A live session is held.
    Connected,
    /// The last attempt failed; recovery goes through `reconnect`.
    Failed,
}

/// A managed session with one broker.
///
/// Owns the transport session and drives the reconnect cycle. `close`
/// disconnects cleanly; dropping the connection releases the session
/// without a goodbye, so resources are returned on every exit path,
/// cancellation included.
pub struct BrokerConnection {
    transport: Arc<dyn Transport>,
    endpoint: Endpoint,
    identity: String,
    backoff: BackoffPolicy,
    session: Option<Box<dyn BrokerSession>>,
    state: ConnectionState,
}

impl BrokerConnection {
    pub fn new(transport: Arc<dyn Transport>, options: &BridgeOptions) -> BrokerConnection {
        BrokerConnection {
            transport,
            endpoint: options.endpoint().clone(),
            identity: options.identity().to_string(),
            backoff: options.backoff.clone(),
            session: None,
            state: ConnectionState::Disconnected,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Establish the session. No-op when already connected.
    pub async fn connect(&mut self) -> Result<()> {
        if self.state == ConnectionState::Connected {
            return Ok(());
        }

        info!(endpoint = %self.endpoint, identity = %self.identity, "connecting");
        self.try_connect().await
    }

    async fn try_connect(&mut self) -> Result<()> {
        self.state = ConnectionState::Connecting;

        match self.transport.connect(&self.endpoint, &self.identity).await {
            Ok(session) => {
                self.session = Some(session);
                self.state = ConnectionState::Connected;
                Ok(())
            }
            Err(err) => {
                self.session = None;
                self.state = ConnectionState::Failed;
                Err(BridgeError::Connect(err.to_string()))
            }
        }
    }

    /// Open a subscription on the live session.
    pub async fn subscribe(&mut self, topic: &str) -> Result<SubscriptionHandle> {
        let mut handle = SubscriptionHandle::detached(topic.to_string());
        self.resubscribe(&mut handle).await?;
        Ok(handle)
    }

    /// Re-issue the subscribe call for `handle` on the current session.
    ///
    /// Used after a reconnect to restart an existing handle in place; the
    /// broker decides the resumption point.
    pub async fn resubscribe(&mut self, handle: &mut SubscriptionHandle) -> Result<()> {
        let session = match (self.state, self.session.as_mut()) {
            (ConnectionState::Connected, Some(session)) => session,
            _ => return Err(BridgeError::NotConnected),
        };

        match session.subscribe(handle.topic()).await {
            Ok(stream) => {
                info!(topic = handle.topic(), "subscribed");
                handle.attach(stream);
                Ok(())
            }
            Err(TransportError::SubscribeRejected { topic, reason }) => {
                Err(BridgeError::Subscribe { topic, reason })
            }
            Err(err) => {
                // The session did not survive the attempt.
                self.session = None;
                self.state = ConnectionState::Failed;
                Err(BridgeError::Transport(err))
            }
        }
    }

    /// Reconnect with exponential backoff, restoring `subscription` on
    /// success.
    ///
    /// Runs until connected and resubscribed, until the attempt limit is
    /// exhausted, or until `shutdown` is signalled. Each attempt sleeps,
    /// then dials, then re-issues the subscribe call; failing either step
    /// consumes the attempt.
    pub async fn reconnect(
        &mut self,
        shutdown: &mut Shutdown,
        subscription: &mut SubscriptionHandle,
    ) -> Result<()> {
        self.session = None;
        self.state = ConnectionState::Failed;

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            if self.backoff.exhausted(attempt) {
                let attempts = attempt - 1;
                warn!(attempts, "reconnect attempts exhausted");
                self.session = None;
                self.state = ConnectionState::Failed;
                return Err(BridgeError::ReconnectExhausted { attempts });
            }

            let delay = self.backoff.delay_for(attempt);
            debug!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "backing off before reconnect"
            );
            tokio::select! {
                _ = time::sleep(delay) => {}
                _ = shutdown.recv() => {
                    self.state = ConnectionState::Disconnected;
                    return Err(BridgeError::NotConnected);
                }
            }

            if let Err(err) = self.try_connect().await {
                warn!(attempt, error = %err, "reconnect attempt failed");
                continue;
            }

            match self.resubscribe(subscription).await {
                Ok(()) => {
                    info!(attempt, topic = subscription.topic(), "reconnected");
                    return Ok(());
                }
                Err(err) => {
                    warn!(attempt, error = %err, "resubscribe failed after reconnect");
                }
            }
        }
    }

    /// Close the session. Safe to call when already disconnected.
    pub async fn close(&mut self) -> Result<()> {
        let result = match self.session.take() {
            Some(mut session) => session.close().await,
            None => Ok(()),
        };
        self.state = ConnectionState::Disconnected;
        result.map_err(BridgeError::from)
    }
}
