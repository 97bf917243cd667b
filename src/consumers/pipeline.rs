use crate::consumers::{
    ConsumerError, ErrorHandler, HandlerError, MessageHandler, RawDelivery, ValueDeserializer,
};
use futures_util::{Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// The processing chain applied to every delivery: deserializer, message handler,
/// error handler.
///
/// Deliveries are processed one at a time, in the order they were received: a
/// delivery is fully settled before the next one is pulled from the stream.
pub struct Pipeline<V> {
    deserializer: Arc<dyn ValueDeserializer<V>>,
    handler: Arc<dyn MessageHandler<V>>,
    error_handler: Arc<dyn ErrorHandler>,
    auto_ack: bool,
    suppress_processing_errors: bool,
    processing_delay: Duration,
}

impl<V: Send + 'static> Pipeline<V> {
    /// Manual acknowledgment, processing errors reported at `warn` and no delay
    /// between deliveries.
    pub fn new(
        deserializer: impl ValueDeserializer<V>,
        handler: impl MessageHandler<V>,
        error_handler: impl ErrorHandler,
    ) -> Self {
        Self {
            deserializer: Arc::new(deserializer),
            handler: Arc::new(handler),
            error_handler: Arc::new(error_handler),
            auto_ack: false,
            suppress_processing_errors: false,
            processing_delay: Duration::ZERO,
        }
    }

    /// Let the broker consider deliveries settled as soon as they are sent.
    /// Successfully handled deliveries are then not acknowledged again.
    #[must_use]
    pub fn auto_ack(mut self, auto_ack: bool) -> Self {
        self.auto_ack = auto_ack;
        self
    }

    /// Log hand-overs to the error handler at `debug` instead of `warn`.
    ///
    /// Useful when the message handler uses [`HandlerError::NeedsDisposition`]
    /// as its regular outcome.
    #[must_use]
    pub fn suppress_processing_errors(mut self, suppress: bool) -> Self {
        self.suppress_processing_errors = suppress;
        self
    }

    /// Pause after each delivery.
    #[must_use]
    pub fn processing_delay(mut self, delay: Duration) -> Self {
        self.processing_delay = delay;
        self
    }

    pub fn is_auto_ack(&self) -> bool {
        self.auto_ack
    }

    /// Process deliveries until `shutdown` is cancelled or the stream ends.
    ///
    /// Cancellation is only observed between deliveries: a delivery that has been
    /// pulled from the stream is always settled first.
    pub async fn drive<S, E>(
        &self,
        deliveries: S,
        shutdown: &CancellationToken,
    ) -> Result<(), ConsumerError>
    where
        S: Stream<Item = Result<RawDelivery, E>>,
        E: Into<anyhow::Error>,
    {
        tokio::pin!(deliveries);
        loop {
            let next = tokio::select! {
                biased;

                _ = shutdown.cancelled() => return Ok(()),
                next = deliveries.next() => next,
            };
            match next {
                None => {
                    debug!("The delivery stream ended");
                    return Ok(());
                }
                Some(Err(e)) => return Err(ConsumerError::Stream(e.into())),
                Some(Ok(delivery)) => self.process(delivery).await?,
            }

            if !self.processing_delay.is_zero() {
                tokio::select! {
                    biased;

                    _ = shutdown.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(self.processing_delay) => {}
                }
            }
        }
    }

    #[tracing::instrument(
        name = "process_delivery",
        skip_all,
        fields(delivery_tag = delivery.delivery_tag, key = %delivery.key()),
        level = tracing::Level::DEBUG
    )]
    async fn process(&self, delivery: RawDelivery) -> Result<(), ConsumerError> {
        let value = match self.deserializer.deserialize(&delivery.data) {
            Ok(value) => value,
            Err(e) => {
                error!(error = ?e, "Failed to deserialize the delivery payload, leaving it untouched");
                return Ok(());
            }
        };

        match self.handler.on_receive(delivery.key(), value).await {
            Ok(()) => {
                if !self.auto_ack {
                    delivery.ack(false).await.map_err(ConsumerError::Ack)?;
                }
            }
            Err(HandlerError::NeedsDisposition) => {
                if self.suppress_processing_errors {
                    debug!("Handing the delivery over to the error handler");
                } else {
                    warn!("Message handler failed, handing the delivery over to the error handler");
                }
                self.error_handler
                    .on_error(&delivery)
                    .await
                    .map_err(ConsumerError::Disposition)?;
            }
            Err(HandlerError::Malformed(e)) => {
                error!(error = ?e, "Malformed delivery, leaving it untouched");
            }
        }
        Ok(())
    }
}
