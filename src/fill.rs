//! Publish the same JSON message to an exchange, any number of times.
//!
//! Mostly useful to prepare a queue before trying out `drain`.
use crate::amqp::configuration::RabbitMqSettings;
use crate::amqp::ConnectionFactory;
use crate::consumers::Topology;
use crate::pool::confirming_channel_pool;
use crate::publishers::{MessageEnvelope, Publisher, PublisherError};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

/// The message published when none is given.
pub const DEFAULT_MESSAGE: &str = r#"{"msg": "Hello, World!"}"#;

#[derive(Debug, Clone)]
pub struct FillSettings {
    pub rabbitmq: RabbitMqSettings,
    /// Where to publish. The queue is declared too, so that messages published
    /// before anyone consumes are not lost.
    pub topology: Topology,
    pub count: usize,
    /// A JSON object.
    pub message: String,
}

#[derive(thiserror::Error, Debug)]
pub enum FillError {
    #[error("The message is not valid JSON")]
    InvalidJson(#[source] serde_json::Error),
    #[error("The message must be a JSON object, got `{0}`")]
    NotAnObject(Value),
    #[error("Failed to set up the destination")]
    Setup(#[source] anyhow::Error),
    #[error("Failed to publish message {key}")]
    Publish {
        key: String,
        #[source]
        source: PublisherError,
    },
}

/// Parse the message to publish. Only JSON objects are accepted.
pub fn parse_message(raw: &str) -> Result<Map<String, Value>, FillError> {
    match serde_json::from_str(raw).map_err(FillError::InvalidJson)? {
        Value::Object(message) => Ok(message),
        other => Err(FillError::NotAnObject(other)),
    }
}

/// Declare the destination and publish `count` copies of the message, keyed
/// `0` to `count - 1`.
///
/// Every publish waits for the broker confirmation: when this returns `Ok`, all
/// messages have been routed. Returns the number of published messages.
#[tracing::instrument(
    name = "fill",
    skip_all,
    fields(
        count = settings.count,
        exchange = %settings.topology.exchange.name,
        queue = %settings.topology.queue.name,
    )
)]
pub async fn fill(settings: FillSettings) -> Result<usize, FillError> {
    let message = parse_message(&settings.message)?;

    let factory = ConnectionFactory::new_from_config(&settings.rabbitmq).map_err(FillError::Setup)?;
    let channel_pool = confirming_channel_pool(factory, 1).map_err(FillError::Setup)?;
    {
        let channel = channel_pool
            .get()
            .await
            .map_err(|e| FillError::Setup(anyhow::Error::msg(e)))?;
        let queue = settings
            .topology
            .declare(&channel)
            .await
            .map_err(FillError::Setup)?;
        debug!(%queue, bound = settings.topology.binds_queue(), "Destination ready");
    }

    let publisher = Publisher::new(channel_pool);
    for i in 0..settings.count {
        let key = i.to_string();
        let envelope = MessageEnvelope::json(&key, &message)
            .map_err(|e| FillError::Setup(e.into()))?
            .with_exchange_name(settings.topology.exchange.name.as_str())
            .with_routing_key(settings.topology.topic.as_str());
        info!(%key, "Writing message");
        publisher
            .publish(envelope)
            .await
            .map_err(|source| FillError::Publish { key, source })?;
    }
    if let Err(e) = publisher.close().await {
        warn!(error = ?e, "Failed to close the publishing connection cleanly");
    }
    Ok(settings.count)
}
