//! Trestle bridge engine
//!
//! This crate turns a broker subscription into a resilient, at-least-once
//! delivery loop. A [`DeliveryPump`] owns one [`BrokerConnection`] and one
//! [`SubscriptionHandle`], writes every inbound message to a caller-supplied
//! [`Sink`], and commits the broker cursor only after the sink confirms the
//! write. Transport failures run an exponential-backoff reconnect cycle;
//! per-unit sink failures are retried and then reported on the failure
//! outlet without stopping the loop.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use trestle_bridge::{BridgeOptions, DeliveryOutcome, DeliveryPump, Sink, SinkUnit};
//! use trestle_core::endpoint::Endpoint;
//! use trestle_transport::memory::MemoryBroker;
//!
//! struct PrintSink;
//!
//! #[async_trait::async_trait]
//! impl Sink for PrintSink {
//!     async fn write(&mut self, unit: &SinkUnit) -> DeliveryOutcome {
//!         println!("{} #{}: {} bytes", unit.topic, unit.sequence, unit.payload.len());
//!         DeliveryOutcome::Delivered
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let broker = MemoryBroker::new();
//!     let options = BridgeOptions::new(Endpoint::parse("mem://local")?, "orders", "bridge-1")
//!         .idle_timeout(Duration::from_secs(30));
//!
//!     let (pump, _receivers) = DeliveryPump::new(Arc::new(broker), options, PrintSink)?;
//!     let summary = pump.run(std::future::pending::<()>()).await?;
//!     println!("delivered {} units", summary.delivered);
//!     Ok(())
//! }
//! ```

mod connection;
mod error;
mod options;
mod outlet;
mod pump;
mod router;
mod shutdown;
mod sink;
mod subscription;

pub use connection::{BrokerConnection, ConnectionState};
pub use error::{BridgeError, Result};
pub use options::{BackoffPolicy, BridgeOptions};
pub use outlet::{OutletReceivers, Outlets};
pub use pump::{DeliveryPump, PumpSummary};
pub use router::{FailureAction, FailureRouter};
pub use shutdown::Shutdown;
pub use sink::Sink;
pub use subscription::SubscriptionHandle;

// Re-export the types that flow through the pump and its outlets.
pub use trestle_core::message::InboundMessage;
pub use trestle_core::unit::{DeliveryOutcome, ErrorClass, FailedUnit, SinkUnit};
