use super::{QueueChannel, QueueTransport};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, error, warn};

/// The producing end of a worker: a queue name and, once connected, the
/// channel to publish on.
pub struct ProducerSlot {
    queue: String,
    channel: OnceCell<Arc<dyn QueueChannel>>,
}

impl ProducerSlot {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            channel: OnceCell::new(),
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn is_ready(&self) -> bool {
        self.channel.initialized()
    }

    pub async fn setup(&self, transport: &dyn QueueTransport) -> Result<()> {
        if self.queue.is_empty() {
            warn!("Producer has empty queue name. Just skip setup connection...");
            return Ok(());
        }

        let channel = transport.open_channel().await?;
        channel.assert_queue(&self.queue).await?;
        if self.channel.set(channel).is_err() {
            warn!("Producer for {} was already connected", self.queue);
        }
        Ok(())
    }

    /// Persistent publish. `false` when the channel is not ready yet or the
    /// broker refused the message.
    pub async fn emit(&self, msg: &str) -> bool {
        let Some(channel) = self.channel.get() else {
            warn!(
                "emit_message producer channel for {:?} is not ready yet...",
                self.queue
            );
            return false;
        };

        debug!("Publish to queue: {}, msg={}", self.queue, msg);
        match channel.publish(&self.queue, msg.as_bytes()).await {
            Ok(sent) => sent,
            Err(e) => {
                error!("Could not publish to {}: {:#}", self.queue, e);
                false
            }
        }
    }
}

#[async_trait]
pub trait QueueProducer: Send + Sync {
    fn producer(&self) -> &ProducerSlot;

    fn producer_queue(&self) -> &str {
        self.producer().queue()
    }

    async fn emit_message(&self, msg: &str) -> bool {
        self.producer().emit(msg).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryTransport;

    #[tokio::test]
    async fn emit_before_setup_reports_failure() {
        let transport = MemoryTransport::new();
        let slot = ProducerSlot::new("D_signing_withdrawal_eth");

        assert!(!slot.emit("42").await);
        assert_eq!(transport.stats("D_signing_withdrawal_eth").await.published, 0);
    }

    #[tokio::test]
    async fn emit_after_setup_publishes() {
        let transport = MemoryTransport::new();
        let slot = ProducerSlot::new("D_signing_withdrawal_eth");
        slot.setup(&transport).await.unwrap();

        assert!(slot.is_ready());
        assert!(slot.emit("42").await);
        assert_eq!(
            transport.take_messages("D_signing_withdrawal_eth").await,
            vec!["42"]
        );
    }

    #[tokio::test]
    async fn empty_queue_never_connects() {
        let transport = MemoryTransport::new();
        let slot = ProducerSlot::new("");
        slot.setup(&transport).await.unwrap();

        assert!(!slot.is_ready());
        assert_eq!(transport.channels_opened(), 0);
        assert!(!slot.emit("42").await);
    }
}
