use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::time::{self, Duration};
use tracing::{debug, info, warn};

use trestle_core::message::InboundMessage;
use trestle_core::unit::{DeliveryOutcome, SinkUnit};
use trestle_transport::Transport;

use crate::connection::BrokerConnection;
use crate::error::{BridgeError, Result};
use crate::options::BridgeOptions;
use crate::outlet::{OutletReceivers, Outlets};
use crate::router::{FailureAction, FailureRouter};
use crate::shutdown::Shutdown;
use crate::sink::Sink;
use crate::subscription::SubscriptionHandle;

/// Counters describing one pump run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PumpSummary {
    /// Units confirmed by the sink and committed on the broker.
    pub delivered: u64,
    /// Units routed to the failure outlet.
    pub failed: u64,
    /// Reconnect cycles entered.
    pub reconnects: u64,
}

/// What the loop got out of its read step.
enum PumpEvent {
    Message(InboundMessage),
    Idle,
    Closed,
    Failed(BridgeError),
}

/// The delivery loop: read a message, write it to the sink, commit the
/// cursor, repeat.
///
/// The cursor is only committed after the sink confirms a write, which is
/// what makes delivery at-least-once: a failure between write and commit
/// means redelivery, never silent loss. Per-unit sink failures are retried
/// then routed to the failure outlet without stopping the loop; transport
/// failures run the connection's reconnect cycle and resume the
/// subscription.
///
/// The pump runs until the shutdown future completes, the configured
/// message limit or idle timeout is reached, or reconnection is abandoned.
pub struct DeliveryPump<S> {
    connection: BrokerConnection,
    sink: S,
    outlets: Outlets,
    router: FailureRouter,
    options: BridgeOptions,
    notify_shutdown: broadcast::Sender<()>,
    shutdown: Shutdown,
    summary: PumpSummary,
}

impl<S: Sink> DeliveryPump<S> {
    /// Build a pump over the given transport.
    ///
    /// The success and failure outlets are sized from the options and
    /// their receiving halves are returned alongside the pump. Fails with
    /// a configuration error, before any network activity and before the
    /// outlet channels exist, when the options are invalid.
    pub fn new(
        transport: Arc<dyn Transport>,
        options: BridgeOptions,
        sink: S,
    ) -> Result<(DeliveryPump<S>, OutletReceivers)> {
        options.validate()?;

        let (outlets, receivers) = Outlets::channel(options.outlet_capacity);
        let (notify_shutdown, notify_rx) = broadcast::channel(1);

        let pump = DeliveryPump {
            connection: BrokerConnection::new(transport, &options),
            sink,
            router: FailureRouter::new(outlets.clone()),
            outlets,
            options,
            notify_shutdown,
            shutdown: Shutdown::new(notify_rx),
            summary: PumpSummary::default(),
        };
        Ok((pump, receivers))
    }

    /// Run the pump until it finishes or `shutdown` completes.
    ///
    /// When `shutdown` fires the pump is drained rather than dropped: the
    /// loop observes the signal at its suspension points, closes the
    /// subscription and the connection, and the summary so far is returned.
    pub async fn run(mut self, shutdown: impl Future) -> Result<PumpSummary> {
        let notify = self.notify_shutdown.clone();

        let work = self.pump();
        tokio::pin!(work);
        tokio::pin!(shutdown);

        tokio::select! {
            result = &mut work => result,
            _ = &mut shutdown => {
                info!("shutdown requested, draining");
                let _ = notify.send(());
                work.await
            }
        }
    }

    async fn pump(&mut self) -> Result<PumpSummary> {
        let result = match self.establish().await {
            Ok(mut subscription) => {
                let result = self.pump_loop(&mut subscription).await;
                if let Err(err) = subscription.close().await {
                    debug!(error = %err, "subscription close reported an error");
                }
                result
            }
            Err(err) => Err(err),
        };

        if let Err(err) = self.connection.close().await {
            debug!(error = %err, "connection close reported an error");
        }

        match result {
            Ok(()) => Ok(std::mem::take(&mut self.summary)),
            // Recovery abandoned because we were told to stop; that is a
            // clean exit, not a failure.
            Err(_) if self.shutdown.is_shutdown() => Ok(std::mem::take(&mut self.summary)),
            Err(err) => Err(err),
        }
    }

    /// Connect and subscribe, falling into the reconnect cycle when the
    /// direct attempt fails with something recoverable.
    async fn establish(&mut self) -> Result<SubscriptionHandle> {
        let err = match self.connection.connect().await {
            Ok(()) => match self.connection.subscribe(&self.options.topic).await {
                Ok(handle) => return Ok(handle),
                Err(err) => err,
            },
            Err(err) => err,
        };

        warn!(error = %err, "could not establish the subscription directly");
        match FailureRouter::action_for(&err) {
            FailureAction::Reconnect => {
                let mut handle = SubscriptionHandle::detached(self.options.topic.clone());
                self.recover(&mut handle).await?;
                Ok(handle)
            }
            _ => Err(err),
        }
    }

    async fn pump_loop(&mut self, subscription: &mut SubscriptionHandle) -> Result<()> {
        while !self.shutdown.is_shutdown() {
            if let Some(limit) = self.options.message_limit {
                if self.summary.delivered + self.summary.failed >= limit {
                    info!(limit, "message limit reached");
                    break;
                }
            }

            let idle = self.options.idle_timeout;
            let event = tokio::select! {
                _ = self.shutdown.recv() => break,
                event = Self::next_event(subscription, idle) => event,
            };

            match event {
                PumpEvent::Message(message) => self.deliver(message, subscription).await?,
                PumpEvent::Idle => {
                    info!("idle timeout reached, stopping");
                    break;
                }
                PumpEvent::Closed => {
                    info!("subscription ended");
                    break;
                }
                PumpEvent::Failed(err) => self.handle_failure(err, subscription).await?,
            }
        }

        Ok(())
    }

    async fn next_event(
        subscription: &mut SubscriptionHandle,
        idle: Option<Duration>,
    ) -> PumpEvent {
        let result = match idle {
            Some(window) => match time::timeout(window, subscription.next_message()).await {
                Ok(result) => result,
                Err(_) => return PumpEvent::Idle,
            },
            None => subscription.next_message().await,
        };

        match result {
            Ok(Some(message)) => PumpEvent::Message(message),
            Ok(None) => PumpEvent::Closed,
            Err(err) => PumpEvent::Failed(err),
        }
    }

    /// One unit through the sink, with the commit and outlet bookkeeping.
    async fn deliver(
        &mut self,
        message: InboundMessage,
        subscription: &mut SubscriptionHandle,
    ) -> Result<()> {
        let unit = SinkUnit::from_message(&message);
        debug!(
            topic = %unit.topic,
            sequence = unit.sequence,
            size = unit.payload.len(),
            "unit received"
        );

        let retry_count = self.options.retry_count;
        let outcome = tokio::select! {
            outcome = Self::write_with_retry(&mut self.sink, retry_count, &unit) => outcome,
            _ = self.shutdown.recv() => {
                // Not committed, so the broker redelivers it next run.
                debug!(sequence = unit.sequence, "shutdown during sink write");
                return Ok(());
            }
        };

        match outcome {
            DeliveryOutcome::Delivered => {
                if let Err(err) = subscription.commit(message.sequence).await {
                    // Written downstream but not committed; recovery will
                    // replay it and the sink sees it twice.
                    warn!(sequence = message.sequence, error = %err, "commit failed after delivery");
                    return self.handle_failure(err, subscription).await;
                }
                self.summary.delivered += 1;
                self.outlets.send_success(unit).await;
            }
            DeliveryOutcome::Retryable(reason) => {
                let err = BridgeError::Sink(format!("retries exhausted: {reason}"));
                self.fail_delivery(unit, err).await;
            }
            DeliveryOutcome::Fatal(reason) => {
                self.fail_delivery(unit, BridgeError::Sink(reason)).await;
            }
        }

        Ok(())
    }

    async fn write_with_retry(
        sink: &mut S,
        retry_count: u32,
        unit: &SinkUnit,
    ) -> DeliveryOutcome {
        let mut attempt: u32 = 0;
        loop {
            match sink.write(unit).await {
                DeliveryOutcome::Retryable(reason) => {
                    attempt += 1;
                    if attempt > retry_count {
                        return DeliveryOutcome::Retryable(reason);
                    }
                    debug!(attempt, reason = %reason, "sink write retry");
                }
                outcome => return outcome,
            }
        }
    }

    /// Count a unit the sink will never take and report it on the failure
    /// outlet, classified through the error taxonomy.
    async fn fail_delivery(&mut self, unit: SinkUnit, err: BridgeError) {
        self.summary.failed += 1;
        self.router.fail_unit(unit, err.class(), err.to_string()).await;
    }

    async fn handle_failure(
        &mut self,
        err: BridgeError,
        subscription: &mut SubscriptionHandle,
    ) -> Result<()> {
        match FailureRouter::action_for(&err) {
            FailureAction::Reconnect => {
                warn!(error = %err, "connection failure, entering reconnect cycle");
                match self.recover(subscription).await {
                    Ok(()) => Ok(()),
                    // Abandoned because of shutdown; the loop exits cleanly
                    // right after.
                    Err(_) if self.shutdown.is_shutdown() => Ok(()),
                    Err(err) => Err(err),
                }
            }
            FailureAction::NextMessage => {
                warn!(error = %err, "message failure, continuing");
                Ok(())
            }
            FailureAction::Escalate => Err(err),
        }
    }

    async fn recover(&mut self, subscription: &mut SubscriptionHandle) -> Result<()> {
        self.summary.reconnects += 1;
        self.connection
            .reconnect(&mut self.shutdown, subscription)
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU64, Ordering};

    use async_trait::async_trait;
    use bytes::Bytes;
    use tokio::sync::oneshot;

    use trestle_core::endpoint::Endpoint;
    use trestle_core::unit::ErrorClass;
    use trestle_transport::memory::MemoryBroker;

    use crate::options::BackoffPolicy;

    use super::*;

    struct ScriptedSink {
        script: VecDeque<DeliveryOutcome>,
        writes: Arc<AtomicU64>,
    }

    impl ScriptedSink {
        /// A sink that always reports `Delivered`.
        fn delivering() -> (ScriptedSink, Arc<AtomicU64>) {
            Self::scripted([])
        }

        /// A sink that plays back the given outcomes, then keeps
        /// delivering.
        fn scripted(
            outcomes: impl IntoIterator<Item = DeliveryOutcome>,
        ) -> (ScriptedSink, Arc<AtomicU64>) {
            let writes = Arc::new(AtomicU64::new(0));
            (
                ScriptedSink {
                    script: outcomes.into_iter().collect(),
                    writes: Arc::clone(&writes),
                },
                writes,
            )
        }
    }

    #[async_trait]
    impl Sink for ScriptedSink {
        async fn write(&mut self, _unit: &SinkUnit) -> DeliveryOutcome {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.script.pop_front().unwrap_or(DeliveryOutcome::Delivered)
        }
    }

    /// A sink whose write never finishes; `entered` fires once the first
    /// write has been polled.
    struct HangingSink {
        entered: Option<oneshot::Sender<()>>,
    }

    #[async_trait]
    impl Sink for HangingSink {
        async fn write(&mut self, _unit: &SinkUnit) -> DeliveryOutcome {
            if let Some(entered) = self.entered.take() {
                let _ = entered.send(());
            }
            std::future::pending().await
        }
    }

    fn mem_options(topic: &str) -> BridgeOptions {
        BridgeOptions::new(Endpoint::parse("mem://local").unwrap(), topic, "bridge-1").backoff(
            BackoffPolicy {
                initial: Duration::from_millis(1),
                max: Duration::from_millis(8),
                max_attempts: None,
                jitter: false,
            },
        )
    }

    async fn wait_for_subscriber(broker: &MemoryBroker, topic: &str) {
        for _ in 0..500 {
            if broker.subscriber_count(topic) > 0 {
                return;
            }
            time::sleep(Duration::from_millis(2)).await;
        }
        panic!("no subscriber showed up on `{topic}`");
    }

    #[tokio::test]
    async fn delivers_a_single_message_end_to_end() {
        let broker = MemoryBroker::new();
        let (sink, _writes) = ScriptedSink::delivering();
        let options = mem_options("orders").message_limit(1);
        let (pump, mut receivers) =
            DeliveryPump::new(Arc::new(broker.clone()), options, sink).unwrap();

        let task = tokio::spawn(pump.run(std::future::pending::<()>()));
        wait_for_subscriber(&broker, "orders").await;
        broker.publish("orders", "payload-1");

        let summary = task.await.unwrap().unwrap();
        assert_eq!(summary.delivered, 1);
        assert_eq!(summary.failed, 0);

        let unit = receivers.success.recv().await.unwrap();
        assert_eq!(unit.payload, Bytes::from("payload-1"));
        assert_eq!(&*unit.topic, "orders");
        assert_eq!(unit.sequence, 0);
        assert!(receivers.failure.recv().await.is_none());
    }

    #[tokio::test]
    async fn delivers_messages_in_broker_order() {
        let broker = MemoryBroker::new();
        let (sink, _writes) = ScriptedSink::delivering();
        let options = mem_options("orders").retry_count(0).message_limit(3);
        let (pump, mut receivers) =
            DeliveryPump::new(Arc::new(broker.clone()), options, sink).unwrap();

        let task = tokio::spawn(pump.run(std::future::pending::<()>()));
        wait_for_subscriber(&broker, "orders").await;
        for payload in ["a", "b", "c"] {
            broker.publish("orders", payload);
        }

        let summary = task.await.unwrap().unwrap();
        assert_eq!(summary.delivered, 3);

        for expected in ["a", "b", "c"] {
            let unit = receivers.success.recv().await.unwrap();
            assert_eq!(unit.payload, Bytes::from(expected));
        }
    }

    #[tokio::test]
    async fn retryable_exhaustion_routes_to_failure_outlet_once() {
        let broker = MemoryBroker::new();
        let (sink, writes) = ScriptedSink::scripted([
            DeliveryOutcome::Retryable("busy".to_string()),
            DeliveryOutcome::Retryable("busy".to_string()),
            DeliveryOutcome::Retryable("busy".to_string()),
        ]);
        let options = mem_options("orders").retry_count(2).message_limit(1);
        let (pump, mut receivers) =
            DeliveryPump::new(Arc::new(broker.clone()), options, sink).unwrap();

        let task = tokio::spawn(pump.run(std::future::pending::<()>()));
        wait_for_subscriber(&broker, "orders").await;
        broker.publish("orders", "x");

        let summary = task.await.unwrap().unwrap();
        assert_eq!(summary.delivered, 0);
        assert_eq!(summary.failed, 1);
        // retry_count retries on top of the first attempt
        assert_eq!(writes.load(Ordering::SeqCst), 3);

        let failed = receivers.failure.recv().await.unwrap();
        assert_eq!(failed.unit.payload, Bytes::from("x"));
        assert_eq!(failed.class, ErrorClass::Message);
        assert!(failed.reason.contains("busy"));

        // Exactly once: nothing further on either outlet.
        assert!(receivers.failure.recv().await.is_none());
        assert!(receivers.success.recv().await.is_none());
    }

    #[tokio::test]
    async fn fatal_unit_reaches_failure_outlet_only() {
        let broker = MemoryBroker::new();
        let (sink, writes) =
            ScriptedSink::scripted([DeliveryOutcome::Fatal("rejected".to_string())]);
        let options = mem_options("orders").message_limit(1);
        let (pump, mut receivers) =
            DeliveryPump::new(Arc::new(broker.clone()), options, sink).unwrap();

        let task = tokio::spawn(pump.run(std::future::pending::<()>()));
        wait_for_subscriber(&broker, "orders").await;
        broker.publish("orders", "x");

        let summary = task.await.unwrap().unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(writes.load(Ordering::SeqCst), 1);

        let failed = receivers.failure.recv().await.unwrap();
        assert_eq!(failed.unit.payload, Bytes::from("x"));
        assert_eq!(failed.class, ErrorClass::Message);
        assert!(failed.reason.contains("rejected"));
        assert!(receivers.success.recv().await.is_none());
    }

    #[tokio::test]
    async fn one_bad_unit_does_not_halt_the_pump() {
        let broker = MemoryBroker::new();
        let (sink, _writes) =
            ScriptedSink::scripted([DeliveryOutcome::Fatal("poison".to_string())]);
        let options = mem_options("orders").message_limit(2);
        let (pump, mut receivers) =
            DeliveryPump::new(Arc::new(broker.clone()), options, sink).unwrap();

        let task = tokio::spawn(pump.run(std::future::pending::<()>()));
        wait_for_subscriber(&broker, "orders").await;
        broker.publish("orders", "bad");
        broker.publish("orders", "good");

        let summary = task.await.unwrap().unwrap();
        assert_eq!(summary.delivered, 1);
        assert_eq!(summary.failed, 1);

        assert_eq!(
            receivers.failure.recv().await.unwrap().unit.payload,
            Bytes::from("bad")
        );
        assert_eq!(
            receivers.success.recv().await.unwrap().payload,
            Bytes::from("good")
        );
    }

    #[tokio::test]
    async fn empty_topic_fails_before_any_connect() {
        let broker = MemoryBroker::new();
        let (sink, _writes) = ScriptedSink::delivering();
        let options =
            BridgeOptions::new(Endpoint::parse("mem://local").unwrap(), "", "bridge-1");

        let err = match DeliveryPump::new(Arc::new(broker.clone()), options, sink) {
            Err(err) => err,
            Ok(_) => panic!("empty topic must be rejected"),
        };
        assert!(matches!(err, BridgeError::Configuration(_)));
        assert_eq!(err.class(), ErrorClass::Configuration);
        assert_eq!(broker.connect_attempts(), 0);
    }

    #[tokio::test]
    async fn zero_outlet_capacity_is_a_configuration_error() {
        let broker = MemoryBroker::new();
        let (sink, _writes) = ScriptedSink::delivering();
        let options = mem_options("orders").outlet_capacity(0);

        // Validation rejects this before the outlet channels are built.
        let err = match DeliveryPump::new(Arc::new(broker.clone()), options, sink) {
            Err(err) => err,
            Ok(_) => panic!("zero outlet capacity must be rejected"),
        };
        assert!(matches!(err, BridgeError::Configuration(_)));
        assert_eq!(broker.connect_attempts(), 0);
    }

    #[tokio::test]
    async fn reconnects_and_resumes_after_transport_drop() {
        let broker = MemoryBroker::new();
        let (sink, _writes) = ScriptedSink::delivering();
        let options = mem_options("orders").message_limit(2);
        let (pump, mut receivers) =
            DeliveryPump::new(Arc::new(broker.clone()), options, sink).unwrap();

        let task = tokio::spawn(pump.run(std::future::pending::<()>()));
        wait_for_subscriber(&broker, "orders").await;
        broker.publish("orders", "before-drop");
        assert_eq!(
            receivers.success.recv().await.unwrap().payload,
            Bytes::from("before-drop")
        );

        broker.drop_connections();
        wait_for_subscriber(&broker, "orders").await;
        broker.publish("orders", "after-drop");

        assert_eq!(
            receivers.success.recv().await.unwrap().payload,
            Bytes::from("after-drop")
        );

        let summary = task.await.unwrap().unwrap();
        assert_eq!(summary.delivered, 2);
        assert!(summary.reconnects >= 1);
    }

    #[tokio::test]
    async fn escalates_when_reconnect_attempts_run_out() {
        let broker = MemoryBroker::new();
        let (sink, _writes) = ScriptedSink::delivering();
        let options =
            BridgeOptions::new(Endpoint::parse("tcp://far:9007").unwrap(), "orders", "bridge-1")
                .backoff(BackoffPolicy {
                    initial: Duration::from_millis(1),
                    max: Duration::from_millis(2),
                    max_attempts: Some(2),
                    jitter: false,
                });
        let (pump, _receivers) =
            DeliveryPump::new(Arc::new(broker.clone()), options, sink).unwrap();

        let err = pump.run(std::future::pending::<()>()).await.unwrap_err();
        assert!(matches!(
            err,
            BridgeError::ReconnectExhausted { attempts: 2 }
        ));
        // the direct connect plus two reconnect attempts
        assert_eq!(broker.connect_attempts(), 3);
    }

    #[tokio::test]
    async fn message_limit_one_commits_only_what_was_delivered() {
        let broker = MemoryBroker::new();
        let (sink, _writes) = ScriptedSink::delivering();
        let options = mem_options("orders").message_limit(1);
        let (pump, mut receivers) =
            DeliveryPump::new(Arc::new(broker.clone()), options, sink).unwrap();

        let task = tokio::spawn(pump.run(std::future::pending::<()>()));
        wait_for_subscriber(&broker, "orders").await;
        broker.publish("orders", "a");
        broker.publish("orders", "b");

        let summary = task.await.unwrap().unwrap();
        assert_eq!(summary.delivered, 1);
        assert_eq!(
            receivers.success.recv().await.unwrap().payload,
            Bytes::from("a")
        );

        // "b" was never committed, so the same identity is owed it on the
        // next subscribe.
        let endpoint = Endpoint::parse("mem://local").unwrap();
        let mut session = broker.connect(&endpoint, "bridge-1").await.unwrap();
        let mut stream = session.subscribe("orders").await.unwrap();
        let replayed = stream.next_message().await.unwrap().unwrap();
        assert_eq!(replayed.payload, Bytes::from("b"));
    }

    #[tokio::test]
    async fn idle_timeout_stops_the_pump_cleanly() {
        let broker = MemoryBroker::new();
        let (sink, writes) = ScriptedSink::delivering();
        let options = mem_options("orders").idle_timeout(Duration::from_millis(30));
        let (pump, _receivers) =
            DeliveryPump::new(Arc::new(broker.clone()), options, sink).unwrap();

        let summary = pump.run(std::future::pending::<()>()).await.unwrap();
        assert_eq!(summary, PumpSummary::default());
        assert_eq!(writes.load(Ordering::SeqCst), 0);
        assert_eq!(broker.session_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_signal_stops_the_pump_gracefully() {
        let broker = MemoryBroker::new();
        let (sink, _writes) = ScriptedSink::delivering();
        let options = mem_options("orders");
        let (pump, mut receivers) =
            DeliveryPump::new(Arc::new(broker.clone()), options, sink).unwrap();

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(pump.run(async move {
            let _ = stop_rx.await;
        }));

        wait_for_subscriber(&broker, "orders").await;
        broker.publish("orders", "a");
        assert_eq!(
            receivers.success.recv().await.unwrap().payload,
            Bytes::from("a")
        );

        stop_tx.send(()).unwrap();
        let summary = task.await.unwrap().unwrap();
        assert_eq!(summary.delivered, 1);
        assert_eq!(broker.session_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_during_sink_write_leaves_the_unit_uncommitted() {
        let broker = MemoryBroker::new();
        let (entered_tx, entered_rx) = oneshot::channel();
        let sink = HangingSink {
            entered: Some(entered_tx),
        };
        let options = mem_options("orders");
        let (pump, _receivers) =
            DeliveryPump::new(Arc::new(broker.clone()), options, sink).unwrap();

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(pump.run(async move {
            let _ = stop_rx.await;
        }));

        wait_for_subscriber(&broker, "orders").await;
        broker.publish("orders", "stuck");

        // The sink has the unit and will never answer; stop mid-write.
        entered_rx.await.unwrap();
        stop_tx.send(()).unwrap();

        let summary = time::timeout(Duration::from_secs(2), task)
            .await
            .expect("pump should stop promptly during a sink write")
            .unwrap()
            .unwrap();
        assert_eq!(summary.delivered, 0);
        assert_eq!(summary.failed, 0);
        assert_eq!(broker.session_count(), 0);

        // Never committed, so the same identity is owed the message again.
        let endpoint = Endpoint::parse("mem://local").unwrap();
        let mut session = broker.connect(&endpoint, "bridge-1").await.unwrap();
        let mut stream = session.subscribe("orders").await.unwrap();
        let replayed = stream.next_message().await.unwrap().unwrap();
        assert_eq!(replayed.payload, Bytes::from("stuck"));
        assert_eq!(replayed.sequence, 0);
    }
}
