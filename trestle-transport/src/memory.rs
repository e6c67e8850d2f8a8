//! In-process broker backend.
//!
//! A complete pub/sub broker living in the current process, behind the
//! transport traits. Each topic is an append log with monotonically
//! increasing sequence numbers; each (identity, topic) pair has a committed
//! cursor, and a resubscribing identity replays every entry past its cursor
//! before receiving live messages. Nothing is bounded or persisted, which
//! makes this backend suitable for tests and loopback runs only.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use trestle_core::endpoint::Endpoint;
use trestle_core::message::InboundMessage;

use crate::{BrokerSession, Result, TopicStream, Transport, TransportError};

/// Endpoint scheme served by the in-memory broker.
pub const SCHEME: &str = "mem";

/// In-process broker implementing the transport traits.
///
/// Cheap to clone; all clones publish to and serve the same topics.
#[derive(Clone, Debug, Default)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    /// Per-topic append logs; a message's sequence is its index.
    topics: HashMap<String, Vec<Bytes>>,
    /// Committed cursor per (identity, topic): the next sequence owed to
    /// that identity on resubscribe.
    cursors: HashMap<(String, String), u64>,
    /// Live subscription feeds.
    feeds: HashMap<u64, Feed>,
    /// Feed ids owned by each live session.
    sessions: HashMap<u64, Vec<u64>>,
    next_feed_id: u64,
    next_session_id: u64,
    /// Bumped by `drop_connections`; sessions from older epochs are dead.
    epoch: u64,
    connect_attempts: u64,
}

#[derive(Debug)]
struct Feed {
    topic: String,
    tx: mpsc::UnboundedSender<InboundMessage>,
    dropped: Arc<AtomicBool>,
}

impl MemoryBroker {
    /// Create a new in-memory broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message to `topic` and fan it out to live subscribers.
    ///
    /// Returns the arrival sequence number assigned to the message.
    pub fn publish(&self, topic: &str, payload: impl Into<Bytes>) -> u64 {
        let payload = payload.into();
        let mut state = self.shared.state.lock().unwrap();

        let sequence = {
            let log = state.topics.entry(topic.to_string()).or_default();
            let sequence = log.len() as u64;
            log.push(payload.clone());
            sequence
        };

        let message_topic: Arc<str> = Arc::from(topic);
        for feed in state.feeds.values() {
            if feed.topic == topic {
                let _ = feed.tx.send(InboundMessage {
                    topic: Arc::clone(&message_topic),
                    sequence,
                    payload: payload.clone(),
                });
            }
        }

        sequence
    }

    /// Sever every live session and subscription, as a broker restart or
    /// network partition would. Committed cursors survive, so reconnecting
    /// identities resume where they left off.
    pub fn drop_connections(&self) {
        let mut state = self.shared.state.lock().unwrap();
        state.epoch += 1;
        for feed in state.feeds.values() {
            feed.dropped.store(true, Ordering::SeqCst);
        }
        state.feeds.clear();
        state.sessions.clear();
    }

    /// Number of `connect` calls the broker has seen, successful or not.
    pub fn connect_attempts(&self) -> u64 {
        self.shared.state.lock().unwrap().connect_attempts
    }

    /// Number of currently open sessions.
    pub fn session_count(&self) -> usize {
        self.shared.state.lock().unwrap().sessions.len()
    }

    /// Number of live subscriptions on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.shared
            .state
            .lock()
            .unwrap()
            .feeds
            .values()
            .filter(|feed| feed.topic == topic)
            .count()
    }

    fn commit_cursor(&self, identity: &str, topic: &str, sequence: u64) {
        let mut state = self.shared.state.lock().unwrap();
        let cursor = state
            .cursors
            .entry((identity.to_string(), topic.to_string()))
            .or_insert(0);
        *cursor = (*cursor).max(sequence.saturating_add(1));
    }

    fn release_feed(&self, feed_id: u64) {
        let mut state = self.shared.state.lock().unwrap();
        state.feeds.remove(&feed_id);
    }

    fn release_session(&self, session_id: u64) {
        let mut state = self.shared.state.lock().unwrap();
        if let Some(feed_ids) = state.sessions.remove(&session_id) {
            for feed_id in feed_ids {
                state.feeds.remove(&feed_id);
            }
        }
    }
}

#[async_trait]
impl Transport for MemoryBroker {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        identity: &str,
    ) -> Result<Box<dyn BrokerSession>> {
        let (session_id, epoch) = {
            let mut state = self.shared.state.lock().unwrap();
            state.connect_attempts += 1;

            if endpoint.scheme() != SCHEME {
                return Err(TransportError::ConnectionRefused(format!(
                    "unsupported scheme `{}`",
                    endpoint.scheme()
                )));
            }
            if identity.is_empty() {
                return Err(TransportError::ConnectionRefused(
                    "client identity is required".to_string(),
                ));
            }

            let session_id = state.next_session_id;
            state.next_session_id += 1;
            state.sessions.insert(session_id, Vec::new());
            (session_id, state.epoch)
        };

        Ok(Box::new(MemorySession {
            broker: self.clone(),
            identity: identity.to_string(),
            session_id,
            epoch,
            open: true,
        }))
    }
}

struct MemorySession {
    broker: MemoryBroker,
    identity: String,
    session_id: u64,
    epoch: u64,
    open: bool,
}

#[async_trait]
impl BrokerSession for MemorySession {
    async fn subscribe(&mut self, topic: &str) -> Result<Box<dyn TopicStream>> {
        if !self.open {
            return Err(TransportError::SessionClosed);
        }
        if topic.is_empty() {
            return Err(TransportError::SubscribeRejected {
                topic: topic.to_string(),
                reason: "empty topic".to_string(),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let dropped = Arc::new(AtomicBool::new(false));

        {
            let mut state = self.broker.shared.state.lock().unwrap();
            if state.epoch != self.epoch {
                return Err(TransportError::ConnectionLost);
            }

            // A first-time subscriber starts at the end of the log; a
            // returning identity replays everything past its cursor.
            let log_len = state
                .topics
                .get(topic)
                .map(|log| log.len() as u64)
                .unwrap_or(0);
            let cursor = *state
                .cursors
                .entry((self.identity.clone(), topic.to_string()))
                .or_insert(log_len);

            if cursor < log_len {
                let message_topic: Arc<str> = Arc::from(topic);
                if let Some(log) = state.topics.get(topic) {
                    for (offset, payload) in log[cursor as usize..].iter().enumerate() {
                        let _ = tx.send(InboundMessage {
                            topic: Arc::clone(&message_topic),
                            sequence: cursor + offset as u64,
                            payload: payload.clone(),
                        });
                    }
                }
            }

            let feed_id = state.next_feed_id;
            state.next_feed_id += 1;
            state.feeds.insert(
                feed_id,
                Feed {
                    topic: topic.to_string(),
                    tx,
                    dropped: Arc::clone(&dropped),
                },
            );
            if let Some(feed_ids) = state.sessions.get_mut(&self.session_id) {
                feed_ids.push(feed_id);
            }

            Ok(Box::new(MemoryTopicStream {
                broker: self.broker.clone(),
                identity: self.identity.clone(),
                topic: topic.to_string(),
                feed_id,
                rx,
                dropped,
                closed: false,
            }))
        }
    }

    async fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.broker.release_session(self.session_id);
        Ok(())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        if self.open {
            self.broker.release_session(self.session_id);
        }
    }
}

struct MemoryTopicStream {
    broker: MemoryBroker,
    identity: String,
    topic: String,
    feed_id: u64,
    rx: mpsc::UnboundedReceiver<InboundMessage>,
    dropped: Arc<AtomicBool>,
    closed: bool,
}

#[async_trait]
impl TopicStream for MemoryTopicStream {
    async fn next_message(&mut self) -> Result<Option<InboundMessage>> {
        if self.closed {
            return Ok(None);
        }
        match self.rx.recv().await {
            Some(message) => Ok(Some(message)),
            None => {
                if self.dropped.load(Ordering::SeqCst) {
                    Err(TransportError::ConnectionLost)
                } else {
                    Ok(None)
                }
            }
        }
    }

    async fn commit(&mut self, sequence: u64) -> Result<()> {
        if self.closed {
            return Err(TransportError::SessionClosed);
        }
        if self.dropped.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionLost);
        }
        self.broker
            .commit_cursor(&self.identity, &self.topic, sequence);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.broker.release_feed(self.feed_id);
        self.rx.close();
        Ok(())
    }
}

impl Drop for MemoryTopicStream {
    fn drop(&mut self) {
        if !self.closed {
            self.broker.release_feed(self.feed_id);
        }
    }
}
