use serde::de::DeserializeOwned;
use std::marker::PhantomData;

/// Decodes the payload of a delivery into the value handed to a
/// [`MessageHandler`](super::MessageHandler).
pub trait ValueDeserializer<V>: Send + Sync + 'static {
    fn deserialize(&self, payload: &[u8]) -> Result<V, anyhow::Error>;
}

/// Decodes JSON payloads into any [`DeserializeOwned`] type.
///
/// Use `JsonValueDeserializer<serde_json::Value>` to accept any JSON document and
/// check its shape in the handler.
pub struct JsonValueDeserializer<T>(PhantomData<fn() -> T>);

impl<T> JsonValueDeserializer<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for JsonValueDeserializer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned + 'static> ValueDeserializer<T> for JsonValueDeserializer<T> {
    fn deserialize(&self, payload: &[u8]) -> Result<T, anyhow::Error> {
        Ok(serde_json::from_slice(payload)?)
    }
}
