//! RabbitMQ transport.

use super::{Delivery, DeliveryStream, QueueChannel, QueueTransport};
use crate::config::RabbitMqConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

const PERSISTENT: u8 = 2;

/// Opens channels on one lazily established broker connection.
pub struct AmqpTransport {
    uri: String,
    connection: OnceCell<Connection>,
}

impl AmqpTransport {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            connection: OnceCell::new(),
        }
    }

    pub fn from_config(config: &RabbitMqConfig) -> Self {
        Self::new(config.uri())
    }

    async fn connection(&self) -> Result<&Connection> {
        self.connection
            .get_or_try_init(|| async {
                let connection = Connection::connect(&self.uri, ConnectionProperties::default())
                    .await
                    .with_context(|| format!("Could not connect to rabbitmq server {}", self.uri))?;
                info!("Connected to rabbitmq server {}", self.uri);
                Ok::<_, anyhow::Error>(connection)
            })
            .await
    }
}

#[async_trait]
impl QueueTransport for AmqpTransport {
    async fn open_channel(&self) -> Result<Arc<dyn QueueChannel>> {
        let channel = self
            .connection()
            .await?
            .create_channel()
            .await
            .context("Could not create rabbitmq channel")?;
        Ok(Arc::new(AmqpChannel { channel }))
    }
}

struct AmqpChannel {
    channel: Channel,
}

#[async_trait]
impl QueueChannel for AmqpChannel {
    async fn assert_queue(&self, queue: &str) -> Result<()> {
        let options = QueueDeclareOptions {
            durable: true,
            ..QueueDeclareOptions::default()
        };
        self.channel
            .queue_declare(queue, options, FieldTable::default())
            .await
            .with_context(|| format!("Could not declare queue {}", queue))?;
        Ok(())
    }

    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<bool> {
        self.channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default().with_delivery_mode(PERSISTENT),
            )
            .await
            .with_context(|| format!("Could not publish to queue {}", queue))?;
        Ok(true)
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .with_context(|| format!("Could not consume queue {}", queue))?;

        Ok(consumer
            .map(|delivery| {
                delivery
                    .map(|d| Box::new(AmqpDelivery(d)) as Box<dyn Delivery>)
                    .map_err(anyhow::Error::from)
            })
            .boxed())
    }
}

struct AmqpDelivery(lapin::message::Delivery);

#[async_trait]
impl Delivery for AmqpDelivery {
    fn payload(&self) -> &[u8] {
        &self.0.data
    }

    async fn ack(self: Box<Self>) -> Result<()> {
        self.0.acker.ack(BasicAckOptions::default()).await?;
        Ok(())
    }

    async fn nack(self: Box<Self>) -> Result<()> {
        let options = BasicNackOptions {
            requeue: true,
            ..BasicNackOptions::default()
        };
        self.0.acker.nack(options).await?;
        Ok(())
    }
}
