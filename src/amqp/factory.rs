use crate::amqp::configuration::RabbitMqSettings;
use lapin::{
    tcp::{AMQPUriTcpExt, NativeTlsConnector},
    uri::{AMQPScheme, AMQPUri},
    ConnectionProperties,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::warn;

#[derive(Clone)]
/// Opens connections to a single RabbitMq broker.
pub struct ConnectionFactory {
    uri: AMQPUri,
    connection_timeout: Duration,
    /// Only set for `amqps://` URIs with a custom CA chain. Plain `amqps://` URIs
    /// are handled by lapin with the system trust roots.
    custom_tls: Option<Arc<CustomTls>>,
}

struct CustomTls {
    connector: NativeTlsConnector,
    domain: String,
}

impl ConnectionFactory {
    pub fn new_from_config(settings: &RabbitMqSettings) -> Result<Self, anyhow::Error> {
        let uri = settings.amqp_uri()?;
        let custom_tls = match settings.ca_certificate()? {
            Some(certificate) if uri.scheme == AMQPScheme::AMQPS => {
                let connector = NativeTlsConnector::builder()
                    .add_root_certificate(certificate)
                    .build()?;
                Some(Arc::new(CustomTls {
                    connector,
                    domain: uri.authority.host.clone(),
                }))
            }
            Some(_) => {
                warn!("A CA certificate was configured for a plain-text AMQP connection, ignoring it");
                None
            }
            None => None,
        };
        Ok(Self {
            uri,
            connection_timeout: settings.connection_timeout(),
            custom_tls,
        })
    }

    /// The broker host, for diagnostics.
    pub fn host(&self) -> &str {
        &self.uri.authority.host
    }

    #[tracing::instrument(name = "rabbitmq_connect", skip(self), fields(host = %self.host()))]
    pub async fn new_connection(&self) -> Result<lapin::Connection, anyhow::Error> {
        let properties =
            ConnectionProperties::default().with_executor(tokio_executor_trait::Tokio::current());
        let connect = async {
            match &self.custom_tls {
                None => lapin::Connection::connect_uri(self.uri.clone(), properties).await,
                Some(tls) => {
                    let tls = Arc::clone(tls);
                    lapin::Connection::connector(
                        self.uri.clone(),
                        Box::new(move |uri| {
                            // TCP first, then the TLS handshake against our own trust roots.
                            let mut plain = uri.clone();
                            plain.scheme = AMQPScheme::AMQP;
                            plain
                                .connect()
                                .and_then(|tcp| tcp.into_native_tls(&tls.connector, &tls.domain))
                        }),
                        properties,
                    )
                    .await
                }
            }
        };
        let connection = timeout(self.connection_timeout, connect)
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "Timed out after {:?} while connecting to RabbitMq",
                    self.connection_timeout
                )
            })??;
        connection.on_error(|e| {
            warn!("RabbitMQ broken connection: {:?}", e);
        });
        Ok(connection)
    }
}
