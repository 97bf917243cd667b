use lapin::BasicProperties;
use serde::Serialize;

/// A message to be published via [`Publisher`](super::Publisher).
#[derive(Debug, Default, Clone)]
pub struct MessageEnvelope {
    /// The message body.
    pub payload: Vec<u8>,
    /// The exchange to publish to. Empty for the default exchange.
    pub exchange_name: String,
    /// Used by the exchange to route the message to bound queues.
    pub routing_key: String,
    pub properties: BasicProperties,
}

impl MessageEnvelope {
    /// A JSON envelope carrying `key` as its message id.
    pub fn json<T: Serialize>(key: &str, value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            payload: serde_json::to_vec(value)?,
            properties: BasicProperties::default()
                .with_content_type("application/json".into())
                .with_message_id(key.into()),
            ..Self::default()
        })
    }

    #[must_use]
    pub fn with_exchange_name(mut self, value: impl Into<String>) -> Self {
        self.exchange_name = value.into();
        self
    }

    #[must_use]
    pub fn with_routing_key(mut self, value: impl Into<String>) -> Self {
        self.routing_key = value.into();
        self
    }
}
