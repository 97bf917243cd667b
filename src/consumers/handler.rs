use crate::consumers::{HandlerError, RawDelivery};

/// Processes the decoded value of each delivery.
///
/// The handler never sees the raw delivery, so it cannot settle it. Returning
/// `Ok(())` lets the pipeline acknowledge it, [`HandlerError::NeedsDisposition`]
/// hands it over to the [`ErrorHandler`].
#[async_trait::async_trait]
pub trait MessageHandler<V>: Send + Sync + 'static {
    async fn on_receive(&self, key: &str, value: V) -> Result<(), HandlerError>;
}

/// Settles deliveries the [`MessageHandler`] did not accept.
///
/// An error returned here is fatal to the consumer.
#[async_trait::async_trait]
pub trait ErrorHandler: Send + Sync + 'static {
    async fn on_error(&self, delivery: &RawDelivery) -> Result<(), anyhow::Error>;
}

/// assert they are object safe
type _CHECK_MESSAGE_HANDLER = Box<dyn MessageHandler<serde_json::Value>>;
type _CHECK_ERROR_HANDLER = Box<dyn ErrorHandler>;
