//! Consuming messages from a RabbitMq queue.
//!
//! Deliveries flow through a [`Pipeline`]: the payload is decoded by a
//! [`ValueDeserializer`], handed to a [`MessageHandler`] and, when the handler asks
//! for it, to an [`ErrorHandler`] that has access to the raw delivery and can
//! acknowledge it. [`Consumer`] feeds a pipeline from a live queue.

pub use consumer::{Consumer, ConsumerBuilder, DeliverySource};
pub use delivery::{Acknowledge, RawDelivery};
pub use deserializer::{JsonValueDeserializer, ValueDeserializer};
pub use error::{ConsumerError, HandlerError};
pub use handler::{ErrorHandler, MessageHandler};
pub use pipeline::Pipeline;
pub use topology::{parse_exchange_kind, ExchangeSpec, QueueSpec, Topology};

mod consumer;
mod delivery;
mod deserializer;
mod error;
mod handler;
mod pipeline;
mod topology;
