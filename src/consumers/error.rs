/// The outcome of a [`MessageHandler`](super::MessageHandler) other than plain success.
#[derive(thiserror::Error, Debug)]
pub enum HandlerError {
    /// The delivery must be settled by the [`ErrorHandler`](super::ErrorHandler),
    /// which is the only component that sees the raw delivery.
    ///
    /// This is a routing decision, not a fault.
    #[error("The delivery was handed over to the error handler")]
    NeedsDisposition,
    /// The delivery does not have the shape the handler expects.
    ///
    /// This is a defect in the producer or in the consumer configuration: the
    /// delivery is logged and left untouched, no error handler is involved.
    #[error("Malformed delivery")]
    Malformed(#[source] anyhow::Error),
}

/// Why a [`Pipeline`](super::Pipeline) stopped before its shutdown signal fired.
#[derive(thiserror::Error, Debug)]
pub enum ConsumerError {
    /// The delivery stream failed, e.g. the channel was closed by the broker.
    #[error("Failed to receive deliveries from RabbitMq")]
    Stream(#[source] anyhow::Error),
    /// A successfully handled delivery could not be acknowledged.
    #[error("Failed to acknowledge a processed delivery")]
    Ack(#[source] anyhow::Error),
    /// The [`ErrorHandler`](super::ErrorHandler) failed to settle a delivery.
    #[error("The error handler failed to settle a delivery")]
    Disposition(#[source] anyhow::Error),
}
