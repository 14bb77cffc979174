//! In-process broker with the same semantics as the AMQP transport: named
//! queues, ack, and requeue on nack. Used by tests and single-process runs.

use super::{Delivery, DeliveryStream, QueueChannel, QueueTransport};
use anyhow::{Result, bail};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub published: usize,
    pub acked: usize,
    pub requeued: usize,
}

struct QueueState {
    sender: UnboundedSender<Vec<u8>>,
    receiver: Option<UnboundedReceiver<Vec<u8>>>,
    stats: QueueStats,
}

impl QueueState {
    fn new() -> Self {
        let (sender, receiver) = unbounded_channel();
        Self {
            sender,
            receiver: Some(receiver),
            stats: QueueStats::default(),
        }
    }
}

#[derive(Default)]
struct Broker {
    queues: Mutex<HashMap<String, QueueState>>,
    channels_opened: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct MemoryTransport {
    broker: Arc<Broker>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn stats(&self, queue: &str) -> QueueStats {
        self.broker
            .queues
            .lock()
            .await
            .get(queue)
            .map(|q| q.stats)
            .unwrap_or_default()
    }

    pub fn channels_opened(&self) -> usize {
        self.broker.channels_opened.load(Ordering::SeqCst)
    }

    /// Drains messages waiting on a queue nobody consumes.
    pub async fn take_messages(&self, queue: &str) -> Vec<String> {
        let mut queues = self.broker.queues.lock().await;
        let Some(receiver) = queues.get_mut(queue).and_then(|q| q.receiver.as_mut()) else {
            return Vec::new();
        };
        let mut messages = Vec::new();
        while let Ok(payload) = receiver.try_recv() {
            messages.push(String::from_utf8_lossy(&payload).into_owned());
        }
        messages
    }
}

#[async_trait]
impl QueueTransport for MemoryTransport {
    async fn open_channel(&self) -> Result<Arc<dyn QueueChannel>> {
        self.broker.channels_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MemoryChannel {
            broker: self.broker.clone(),
        }))
    }
}

struct MemoryChannel {
    broker: Arc<Broker>,
}

#[async_trait]
impl QueueChannel for MemoryChannel {
    async fn assert_queue(&self, queue: &str) -> Result<()> {
        self.broker
            .queues
            .lock()
            .await
            .entry(queue.to_string())
            .or_insert_with(QueueState::new);
        Ok(())
    }

    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<bool> {
        let mut queues = self.broker.queues.lock().await;
        let state = queues
            .entry(queue.to_string())
            .or_insert_with(QueueState::new);
        state.stats.published += 1;
        Ok(state.sender.send(payload.to_vec()).is_ok())
    }

    async fn consume(&self, queue: &str, _consumer_tag: &str) -> Result<DeliveryStream> {
        let receiver = {
            let mut queues = self.broker.queues.lock().await;
            let state = queues
                .entry(queue.to_string())
                .or_insert_with(QueueState::new);
            match state.receiver.take() {
                Some(receiver) => receiver,
                None => bail!("Queue {} already has a consumer", queue),
            }
        };

        let broker = self.broker.clone();
        let queue = queue.to_string();
        let stream = futures::stream::unfold(receiver, move |mut receiver| {
            let broker = broker.clone();
            let queue = queue.clone();
            async move {
                let payload = receiver.recv().await?;
                let delivery: Box<dyn Delivery> = Box::new(MemoryDelivery {
                    payload,
                    queue,
                    broker,
                });
                Some((Ok::<_, anyhow::Error>(delivery), receiver))
            }
        });
        Ok(stream.boxed())
    }
}

struct MemoryDelivery {
    payload: Vec<u8>,
    queue: String,
    broker: Arc<Broker>,
}

#[async_trait]
impl Delivery for MemoryDelivery {
    fn payload(&self) -> &[u8] {
        &self.payload
    }

    async fn ack(self: Box<Self>) -> Result<()> {
        if let Some(state) = self.broker.queues.lock().await.get_mut(&self.queue) {
            state.stats.acked += 1;
        }
        Ok(())
    }

    async fn nack(self: Box<Self>) -> Result<()> {
        let mut queues = self.broker.queues.lock().await;
        if let Some(state) = queues.get_mut(&self.queue) {
            state.stats.requeued += 1;
            state.sender.send(self.payload.clone())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconsumed_messages_can_be_drained_in_order() {
        let transport = MemoryTransport::new();
        let channel = transport.open_channel().await.unwrap();
        channel.assert_queue("q").await.unwrap();

        assert!(channel.publish("q", b"1").await.unwrap());
        assert!(channel.publish("q", b"2").await.unwrap());

        assert_eq!(transport.take_messages("q").await, vec!["1", "2"]);
        assert_eq!(transport.stats("q").await.published, 2);
    }

    #[tokio::test]
    async fn second_consumer_on_a_queue_is_refused() {
        let transport = MemoryTransport::new();
        let channel = transport.open_channel().await.unwrap();

        assert!(channel.consume("q", "a").await.is_ok());
        assert!(channel.consume("q", "b").await.is_err());
    }
}
