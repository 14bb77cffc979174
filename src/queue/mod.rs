//! Queue transport: the broker seam plus the consume and produce
//! capabilities workers are built from.

pub mod amqp;
pub mod consumer;
pub mod memory;
pub mod producer;

pub use amqp::AmqpTransport;
pub use consumer::{QueueConsumer, setup_consumer};
pub use memory::MemoryTransport;
pub use producer::{ProducerSlot, QueueProducer};

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;

/// Base names of the settlement pipeline queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageQueueName {
    UnsignedWithdrawal,
    SigningWithdrawal,
    SignedWithdrawal,
    SentWithdrawal,
    VerifiedWithdrawal,
    CollectingDeposit,
    CollectedDeposit,
}

impl MessageQueueName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageQueueName::UnsignedWithdrawal => "unsigned_withdrawal",
            MessageQueueName::SigningWithdrawal => "signing_withdrawal",
            MessageQueueName::SignedWithdrawal => "signed_withdrawal",
            MessageQueueName::SentWithdrawal => "sent_withdrawal",
            MessageQueueName::VerifiedWithdrawal => "verified_withdrawal",
            MessageQueueName::CollectingDeposit => "collecting_deposit",
            MessageQueueName::CollectedDeposit => "collected_deposit",
        }
    }
}

/// `{deployment}_{base}_{tokens}`. Without a base the queue is unbound and
/// the name is empty.
pub fn queue_name(deployment_id: &str, base: Option<MessageQueueName>, token_symbols_builder: &str) -> String {
    match base {
        Some(base) => format!("{}_{}_{}", deployment_id, base.as_str(), token_symbols_builder),
        None => String::new(),
    }
}

/// A message handed to a consumer, settled exactly once.
#[async_trait]
pub trait Delivery: Send {
    fn payload(&self) -> &[u8];

    async fn ack(self: Box<Self>) -> Result<()>;

    /// Negative acknowledgement; the broker requeues the message.
    async fn nack(self: Box<Self>) -> Result<()>;
}

pub type DeliveryStream = BoxStream<'static, Result<Box<dyn Delivery>>>;

#[async_trait]
pub trait QueueChannel: Send + Sync {
    /// Declares a durable queue.
    async fn assert_queue(&self, queue: &str) -> Result<()>;

    /// Persistent publish. `false` when the broker refused the message.
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<bool>;

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream>;
}

#[async_trait]
pub trait QueueTransport: Send + Sync {
    async fn open_channel(&self) -> Result<Arc<dyn QueueChannel>>;
}
