use amq_protocol_types::{DeliveryTag, ShortString};
use lapin::{acker::Acker, options::BasicAckOptions, BasicProperties};

/// The broker-level handle used to settle a delivery.
#[async_trait::async_trait]
pub trait Acknowledge: Send + Sync + 'static {
    /// Positively acknowledge the delivery. With `multiple` set, every
    /// outstanding delivery up to this one is acknowledged as well.
    async fn ack(&self, multiple: bool) -> Result<(), anyhow::Error>;
}

#[async_trait::async_trait]
impl Acknowledge for Acker {
    async fn ack(&self, multiple: bool) -> Result<(), anyhow::Error> {
        Acker::ack(self, BasicAckOptions { multiple })
            .await
            .map_err(Into::into)
    }
}

/// A message as it was pushed by the broker, before any decoding.
pub struct RawDelivery {
    pub delivery_tag: DeliveryTag,
    /// Empty if the default exchange was used.
    pub exchange: ShortString,
    pub routing_key: ShortString,
    pub redelivered: bool,
    pub properties: BasicProperties,
    pub data: Vec<u8>,
    acker: Box<dyn Acknowledge>,
}

impl RawDelivery {
    /// Build a delivery settled through a custom [`Acknowledge`] implementation.
    pub fn new(
        delivery_tag: DeliveryTag,
        properties: BasicProperties,
        data: Vec<u8>,
        acker: impl Acknowledge,
    ) -> Self {
        Self {
            delivery_tag,
            exchange: ShortString::from(String::new()),
            routing_key: ShortString::from(String::new()),
            redelivered: false,
            properties,
            data,
            acker: Box::new(acker),
        }
    }

    /// The application-level key: the `message_id` property, or the routing key
    /// when the publisher did not set one.
    pub fn key(&self) -> &str {
        self.properties
            .message_id()
            .as_ref()
            .map(ShortString::as_str)
            .unwrap_or_else(|| self.routing_key.as_str())
    }

    pub async fn ack(&self, multiple: bool) -> Result<(), anyhow::Error> {
        self.acker.ack(multiple).await
    }
}

impl std::fmt::Debug for RawDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawDelivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("exchange", &self.exchange)
            .field("routing_key", &self.routing_key)
            .field("redelivered", &self.redelivered)
            .field("properties", &self.properties)
            .field("data_len", &self.data.len())
            .finish_non_exhaustive()
    }
}

impl From<lapin::message::Delivery> for RawDelivery {
    fn from(value: lapin::message::Delivery) -> Self {
        Self {
            delivery_tag: value.delivery_tag,
            exchange: value.exchange,
            routing_key: value.routing_key,
            redelivered: value.redelivered,
            properties: value.properties,
            data: value.data,
            acker: Box::new(value.acker),
        }
    }
}
