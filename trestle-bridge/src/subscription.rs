use async_stream::stream;
use tokio_stream::Stream;

use trestle_core::message::InboundMessage;
use trestle_transport::TopicStream;

use crate::error::{BridgeError, Result};

/// A live subscription to one topic.
///
/// Yields messages one at a time; nothing is acknowledged implicitly. The
/// consumer commits the cursor explicitly once a message has been handled,
/// which is what makes redelivery after a failure possible.
///
/// After a reconnect the handle is restarted in place: the connection
/// re-issues the subscribe call and attaches the fresh stream, and the next
/// `next_message` call continues from the broker's replay point.
pub struct SubscriptionHandle {
    topic: String,
    stream: Option<Box<dyn TopicStream>>,
}

impl SubscriptionHandle {
    /// A handle with no live stream yet, for subscriptions still being
    /// established through the reconnect cycle.
    pub(crate) fn detached(topic: String) -> SubscriptionHandle {
        SubscriptionHandle {
            topic,
            stream: None,
        }
    }

    pub(crate) fn attach(&mut self, stream: Box<dyn TopicStream>) {
        self.stream = Some(stream);
    }

    /// The topic this handle subscribes to.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Whether the handle currently has a live stream.
    pub fn is_active(&self) -> bool {
        self.stream.is_some()
    }

    /// Wait for the next message.
    ///
    /// `Ok(None)` means the subscription ended cleanly; a transport error
    /// means the connection is gone and the handle needs a restart.
    pub async fn next_message(&mut self) -> Result<Option<InboundMessage>> {
        match self.stream.as_mut() {
            Some(stream) => Ok(stream.next_message().await?),
            None => Err(BridgeError::NotConnected),
        }
    }

    /// Commit the cursor past `sequence`.
    ///
    /// Commits are cumulative: committing `n` acknowledges every message up
    /// to and including `n`.
    pub async fn commit(&mut self, sequence: u64) -> Result<()> {
        match self.stream.as_mut() {
            Some(stream) => Ok(stream.commit(sequence).await?),
            None => Err(BridgeError::NotConnected),
        }
    }

    /// Close the subscription. Safe to call more than once.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.close().await?;
        }
        Ok(())
    }

    /// Borrow the subscription as an async stream of messages.
    ///
    /// The stream ends on clean close, or yields the error and stops if
    /// the transport fails. Dropping the stream leaves the handle usable.
    pub fn messages(&mut self) -> impl Stream<Item = Result<InboundMessage>> + '_ {
        stream! {
            loop {
                match self.next_message().await {
                    Ok(Some(message)) => yield Ok(message),
                    Ok(None) => break,
                    Err(err) => {
                        yield Err(err);
                        break;
                    }
                }
            }
        }
    }
}
