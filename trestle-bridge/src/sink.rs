use async_trait::async_trait;

use trestle_core::unit::{DeliveryOutcome, SinkUnit};

/// Downstream destination for units pulled off a subscription.
///
/// A sink reports how each write went instead of returning an error: the
/// pump turns [`DeliveryOutcome::Retryable`] into re-attempts and
/// [`DeliveryOutcome::Fatal`] into failure-outlet routing, so implementors
/// only have to decide which kind of failure they hit.
///
/// The pump writes one unit at a time and only commits the broker cursor
/// after a [`DeliveryOutcome::Delivered`], so a sink that confirms receipt
/// before durably accepting the bytes weakens the at-least-once guarantee.
/// A write may also be cancelled at an await point during shutdown; the
/// unit is then uncommitted and will be redelivered on the next run.
#[async_trait]
pub trait Sink: Send {
    /// Attempt to write one unit downstream.
    async fn write(&mut self, unit: &SinkUnit) -> DeliveryOutcome;
}

#[async_trait]
impl<S: Sink + ?Sized> Sink for Box<S> {
    async fn write(&mut self, unit: &SinkUnit) -> DeliveryOutcome {
        (**self).write(unit).await
    }
}
