//! Exchange and queue declarations performed before consuming or publishing.
use amq_protocol_types::FieldTable;
use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::{Channel, ExchangeKind};

/// Map the usual exchange type names onto [`ExchangeKind`]. Anything else is
/// declared as a custom type (e.g. `x-delayed-message`).
pub fn parse_exchange_kind(kind: &str) -> ExchangeKind {
    match kind.to_ascii_lowercase().as_str() {
        "direct" => ExchangeKind::Direct,
        "fanout" => ExchangeKind::Fanout,
        "headers" => ExchangeKind::Headers,
        "topic" => ExchangeKind::Topic,
        _ => ExchangeKind::Custom(kind.to_owned()),
    }
}

#[derive(Debug, Clone)]
pub struct ExchangeSpec {
    /// An empty name designates the default exchange, which can be neither
    /// declared nor bound.
    pub name: String,
    pub kind: ExchangeKind,
    pub durable: bool,
    /// Delete the exchange once the last queue is unbound from it.
    pub auto_delete: bool,
}

impl ExchangeSpec {
    pub fn is_default_exchange(&self) -> bool {
        self.name.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct QueueSpec {
    /// An empty name lets the broker pick one.
    pub name: String,
    pub durable: bool,
    /// Delete the queue once its last consumer unsubscribes.
    pub auto_delete: bool,
}

/// An exchange, a queue and the routing key binding them.
#[derive(Debug, Clone)]
pub struct Topology {
    pub exchange: ExchangeSpec,
    pub queue: QueueSpec,
    /// The routing key used to bind the queue, and to publish.
    pub topic: String,
    /// Declare the queue but leave it unbound.
    pub no_bind: bool,
}

impl Topology {
    /// Declare the exchange and the queue, then bind them.
    ///
    /// Returns the name of the queue, which is only different from the configured
    /// one for server-named queues.
    #[tracing::instrument(
        name = "declare_topology",
        skip_all,
        fields(exchange = %self.exchange.name, queue = %self.queue.name, topic = %self.topic)
    )]
    pub async fn declare(&self, channel: &Channel) -> Result<String, anyhow::Error> {
        if !self.exchange.is_default_exchange() {
            channel
                .exchange_declare(
                    &self.exchange.name,
                    self.exchange.kind.clone(),
                    ExchangeDeclareOptions {
                        passive: false,
                        durable: self.exchange.durable,
                        auto_delete: self.exchange.auto_delete,
                        internal: false,
                        nowait: false,
                    },
                    FieldTable::default(),
                )
                .await?;
        }

        let queue = channel
            .queue_declare(
                &self.queue.name,
                QueueDeclareOptions {
                    passive: false,
                    durable: self.queue.durable,
                    exclusive: false,
                    auto_delete: self.queue.auto_delete,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await?;
        let queue_name = queue.name().as_str().to_owned();

        if self.binds_queue() {
            channel
                .queue_bind(
                    &queue_name,
                    &self.exchange.name,
                    &self.topic,
                    QueueBindOptions { nowait: false },
                    FieldTable::default(),
                )
                .await?;
        }
        Ok(queue_name)
    }

    /// Every queue is implicitly bound to the default exchange by its own name.
    pub fn binds_queue(&self) -> bool {
        !self.no_bind && !self.exchange.is_default_exchange()
    }
}
