use crate::amqp::{configuration::RabbitMqSettings, ConnectionFactory};
use crate::consumers::{ConsumerError, Pipeline, RawDelivery, Topology};
use amq_protocol_types::FieldTable;
use futures_util::StreamExt;
use lapin::options::{BasicCancelOptions, BasicConsumeOptions, BasicQosOptions};
use lapin::{Channel, Connection};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// AMQP reply code for a normal shutdown.
const REPLY_SUCCESS: u16 = 200;

/// Something that pushes deliveries through a processing chain until told to stop.
///
/// [`Consumer`] is the RabbitMq implementation.
#[async_trait::async_trait]
pub trait DeliverySource: Send + Sync {
    /// Process deliveries until `shutdown` is cancelled or the source fails.
    async fn run(&self, shutdown: CancellationToken) -> Result<(), ConsumerError>;

    /// Release the underlying broker resources. Calling it more than once is a no-op.
    async fn close(&self) -> Result<(), anyhow::Error>;
}

/// Configures a [`Consumer`].
pub struct ConsumerBuilder {
    settings: RabbitMqSettings,
    topology: Topology,
    prefetch_count: u16,
}

impl ConsumerBuilder {
    pub fn new(settings: RabbitMqSettings, topology: Topology) -> Self {
        Self {
            settings,
            topology,
            prefetch_count: 0,
        }
    }

    /// Limit the number of unacknowledged deliveries the broker pushes to us.
    ///
    /// Defaults to 0, i.e. no limit. A consumer that never acknowledges (a
    /// non-destructive drain) would stall after `prefetch_count` deliveries.
    #[must_use]
    pub fn prefetch_count(mut self, prefetch_count: u16) -> Self {
        self.prefetch_count = prefetch_count;
        self
    }

    /// Connect to the broker and declare the topology.
    ///
    /// The returned consumer is ready: nothing has been consumed yet, use
    /// [`DeliverySource::run`] to start.
    #[tracing::instrument(
        name = "consumer_connect",
        skip_all,
        fields(queue = %self.topology.queue.name, exchange = %self.topology.exchange.name)
    )]
    pub async fn connect<V: Send + 'static>(
        self,
        pipeline: Pipeline<V>,
    ) -> Result<Consumer<V>, anyhow::Error> {
        let factory = ConnectionFactory::new_from_config(&self.settings)?;
        let connection = factory.new_connection().await?;
        let channel = connection.create_channel().await?;
        channel
            .basic_qos(self.prefetch_count, BasicQosOptions { global: false })
            .await?;
        let queue_name = self.topology.declare(&channel).await?;
        info!(queue = %queue_name, "Consumer ready");

        Ok(Consumer {
            connection,
            channel,
            queue_name,
            pipeline,
            closed: AtomicBool::new(false),
        })
    }
}

/// A RabbitMq queue consumer feeding a [`Pipeline`].
pub struct Consumer<V> {
    connection: Connection,
    channel: Channel,
    queue_name: String,
    pipeline: Pipeline<V>,
    closed: AtomicBool,
}

impl<V> Consumer<V> {
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }
}

#[async_trait::async_trait]
impl<V: Send + 'static> DeliverySource for Consumer<V> {
    #[tracing::instrument(skip_all, name = "consumer_run", fields(queue = %self.queue_name))]
    async fn run(&self, shutdown: CancellationToken) -> Result<(), ConsumerError> {
        let consumer_tag = format!("draino-{}", Uuid::new_v4());
        let deliveries = self
            .channel
            .basic_consume(
                &self.queue_name,
                &consumer_tag,
                BasicConsumeOptions {
                    no_ack: self.pipeline.is_auto_ack(),
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| ConsumerError::Stream(e.into()))?;

        let outcome = self
            .pipeline
            .drive(deliveries.map(|d| d.map(RawDelivery::from)), &shutdown)
            .await;

        if shutdown.is_cancelled() {
            debug!("Cancelling consumer {consumer_tag}");
            let _ = self
                .channel
                .basic_cancel(&consumer_tag, BasicCancelOptions::default())
                .await;
        }
        outcome
    }

    async fn close(&self) -> Result<(), anyhow::Error> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!(queue = %self.queue_name, "Closing the consumer channel and connection");
        // Always attempt both, report the first failure.
        let channel = self.channel.close(REPLY_SUCCESS, "draino done").await;
        let connection = self.connection.close(REPLY_SUCCESS, "draino done").await;
        channel.and(connection).map_err(Into::into)
    }
}
