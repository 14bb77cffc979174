use super::{Delivery, QueueTransport};
use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, warn};

#[async_trait]
pub trait QueueConsumer: Send + Sync + 'static {
    /// Empty when the worker consumes nothing.
    fn consumer_queue(&self) -> &str;

    /// `Ok(true)` acknowledges the message, `Ok(false)` requeues it.
    async fn on_consuming_message(&self, payload: &[u8]) -> Result<bool> {
        warn!(
            "{}::on_consuming_message do nothing msg={}",
            self.consumer_queue(),
            String::from_utf8_lossy(payload)
        );
        Ok(false)
    }
}

/// Subscribes `consumer` to its queue and spawns the delivery loop.
///
/// Returns `None` without touching the broker when the queue name is empty.
pub async fn setup_consumer<C>(
    consumer: Arc<C>,
    transport: &dyn QueueTransport,
) -> Result<Option<JoinHandle<()>>>
where
    C: QueueConsumer + ?Sized,
{
    let queue = consumer.consumer_queue().to_string();
    if queue.is_empty() {
        warn!("Consumer has empty queue name. Just skip setup connection...");
        return Ok(None);
    }

    let channel = transport.open_channel().await?;
    channel.assert_queue(&queue).await?;
    let tag = format!("{}-{}", queue, uuid::Uuid::new_v4());
    let mut deliveries = channel.consume(&queue, &tag).await?;

    Ok(Some(tokio::spawn(async move {
        let _channel = channel;
        while let Some(delivery) = deliveries.next().await {
            match delivery {
                Ok(delivery) => handle_delivery(consumer.as_ref(), delivery).await,
                Err(e) => error!("Error receiving from queue {}: {:#}", queue, e),
            }
        }
        warn!("Consumer stream for queue {} closed", queue);
    })))
}

/// Runs the handler once and settles the message. A handler error drops the
/// message instead of requeueing it, so a poison message cannot loop.
pub async fn handle_delivery<C>(consumer: &C, delivery: Box<dyn Delivery>)
where
    C: QueueConsumer + ?Sized,
{
    let outcome = consumer.on_consuming_message(delivery.payload()).await;
    let settled = match outcome {
        Ok(true) => delivery.ack().await,
        Ok(false) => delivery.nack().await,
        Err(e) => {
            error!(
                "{} error when consuming msg={}: {:#}",
                consumer.consumer_queue(),
                String::from_utf8_lossy(delivery.payload()),
                e
            );
            delivery.ack().await
        }
    };

    if let Err(e) = settled {
        error!(
            "Could not settle message on {}: {:#}",
            consumer.consumer_queue(),
            e
        );
    }
}
