use crate::pool::ChannelPool;
use anyhow::Context;
use lapin::message::BasicReturnMessage;
use lapin::options::BasicPublishOptions;
use lapin::publisher_confirm::Confirmation;
use lapin::{BasicProperties, Channel};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::warn;
use uuid::Uuid;

use crate::publishers::MessageEnvelope;

/// AMQP reply code for a mandatory message that could not be routed to any queue.
const NO_ROUTE: u16 = 312;

/// How long a publish may take, from acquiring a channel to the broker confirmation.
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(3);

/// Publishes messages on confirm-mode channels taken from a [`ChannelPool`].
///
/// Every publish is mandatory and waits for the broker confirmation, so
/// unroutable or nacked messages surface as errors instead of vanishing.
pub struct Publisher {
    channel_pool: ChannelPool,
}

impl Publisher {
    pub fn new(channel_pool: ChannelPool) -> Self {
        Self { channel_pool }
    }

    /// Close the connection shared by the pooled channels.
    pub async fn close(&self) -> Result<(), anyhow::Error> {
        self.channel_pool.manager().close().await
    }

    /// Publish a message, injecting a message id and a timestamp if missing.
    ///
    /// Acquiring a channel and waiting for the confirmation share a 3 seconds timeout.
    pub async fn publish(&self, envelope: MessageEnvelope) -> Result<(), PublisherError> {
        let options = BasicPublishOptions {
            mandatory: true,
            // Unsupported since RabbitMq 3.0.
            immediate: false,
        };
        let MessageEnvelope {
            payload,
            exchange_name,
            routing_key,
            properties,
        } = envelope;
        let properties = with_default_properties(properties);

        let publish_future = async {
            let channel = self
                .channel_pool
                .get()
                .await
                .map_err(anyhow::Error::msg)
                .context("Failed to acquire a healthy channel from the pool")
                .map_err(PublisherError::GenericError)?;
            publish(
                &channel,
                &payload,
                options,
                &exchange_name,
                &routing_key,
                properties,
            )
            .await
        };

        tokio::time::timeout(PUBLISH_TIMEOUT, publish_future)
            .await
            .map_err(|_| PublisherError::TimeoutError)?
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PublisherError {
    #[error("Generic error encountered when interacting with the RabbitMq broker")]
    GenericError(#[source] anyhow::Error),
    #[error("The timeout threshold was reached while trying to publish the message")]
    TimeoutError,
    #[error("The message could not be routed: {0:?}")]
    UnroutableMessage(Box<BasicReturnMessage>),
    #[error("The RabbitMq broker nacked the publishing of the message: {0:?}")]
    NegativeAck(Option<Box<BasicReturnMessage>>),
}

#[tracing::instrument(level = "debug", skip(channel, payload, options, properties))]
async fn publish(
    channel: &Channel,
    payload: &[u8],
    options: BasicPublishOptions,
    exchange: &str,
    routing_key: &str,
    properties: BasicProperties,
) -> Result<(), PublisherError> {
    let generic = |e: lapin::Error| PublisherError::GenericError(e.into());
    let confirmation = channel
        .basic_publish(exchange, routing_key, options, payload, properties)
        .await
        .map_err(generic)?
        .await
        .map_err(generic)?;

    match confirmation {
        Confirmation::Ack(Some(returned)) if returned.reply_code == NO_ROUTE => {
            Err(PublisherError::UnroutableMessage(returned))
        }
        Confirmation::Ack(_) | Confirmation::NotRequested => Ok(()),
        Confirmation::Nack(returned) => Err(PublisherError::NegativeAck(returned)),
    }
}

/// Persistent delivery, plus a message id and a timestamp unless the caller set them.
fn with_default_properties(properties: BasicProperties) -> BasicProperties {
    let properties = match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(now) => {
            let timestamp = properties.timestamp().unwrap_or(now.as_secs());
            properties.with_timestamp(timestamp)
        }
        Err(_) => {
            warn!("System time is before 1970");
            properties
        }
    };
    let message_id = properties
        .message_id()
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string().into());
    properties.with_message_id(message_id).with_delivery_mode(2)
}
