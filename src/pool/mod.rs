//! A [`deadpool`] pool of confirm-mode channels, used by the
//! [`Publisher`](crate::publishers::Publisher).
//!
//! All channels are multiplexed over a single connection, opened on first use
//! and reopened if the broker drops it.
use crate::amqp::ConnectionFactory;
use deadpool::managed::{Manager, RecycleError, RecycleResult};
use lapin::options::ConfirmSelectOptions;
use lapin::{Channel, Connection};
use tokio::sync::Mutex;
use tracing::debug;

/// AMQP reply code for a normal shutdown.
const REPLY_SUCCESS: u16 = 200;

pub type ChannelPool = deadpool::managed::Pool<ConfirmChannels>;

/// Build a pool of at most `max_channels` confirm-mode channels.
///
/// Nothing is opened until the first channel is requested.
pub fn confirming_channel_pool(
    factory: ConnectionFactory,
    max_channels: usize,
) -> Result<ChannelPool, anyhow::Error> {
    ChannelPool::builder(ConfirmChannels::new(factory))
        .max_size(max_channels)
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build the channel pool: {e}"))
}

/// Hands out channels in publisher-confirm mode over one shared connection.
pub struct ConfirmChannels {
    factory: ConnectionFactory,
    connection: Mutex<Option<Connection>>,
}

impl ConfirmChannels {
    pub fn new(factory: ConnectionFactory) -> Self {
        Self {
            factory,
            connection: Mutex::new(None),
        }
    }

    /// Close the shared connection, and with it every pooled channel.
    ///
    /// The next channel request opens a new connection.
    pub async fn close(&self) -> Result<(), anyhow::Error> {
        match self.connection.lock().await.take() {
            Some(connection) if connection.status().connected() => {
                debug!(host = %self.factory.host(), "Closing the publishing connection");
                connection
                    .close(REPLY_SUCCESS, "draino done")
                    .await
                    .map_err(Into::into)
            }
            _ => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl Manager for ConfirmChannels {
    type Type = Channel;
    type Error = anyhow::Error;

    async fn create(&self) -> Result<Channel, anyhow::Error> {
        let mut shared = self.connection.lock().await;
        let connection = match shared.take() {
            Some(connection) if connection.status().connected() => connection,
            _ => {
                debug!(host = %self.factory.host(), "Opening the publishing connection");
                self.factory.new_connection().await?
            }
        };
        let channel = connection.create_channel().await;
        *shared = Some(connection);
        drop(shared);

        let channel = channel?;
        channel
            .confirm_select(ConfirmSelectOptions { nowait: false })
            .await?;
        Ok(channel)
    }

    async fn recycle(&self, channel: &mut Channel) -> RecycleResult<anyhow::Error> {
        if channel.status().connected() {
            Ok(())
        } else {
            Err(RecycleError::Message(format!(
                "Channel {} is no longer connected",
                channel.id()
            )))
        }
    }
}
