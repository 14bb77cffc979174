use super::{SettlementHooks, SettlementStage, stage::LIMIT_PICKING_ONCE};
use crate::context::EngineContext;
use crate::gateway::Gateway;
use crate::queue::{
    ProducerSlot, QueueConsumer, QueueProducer, QueueTransport, queue_name, setup_consumer,
};
use crate::scheduler::{IntervalTask, TickTimer};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const SEED_METHOD: &str = "seed";

/// A tick loop that consumes one queue, produces to another and reaches the
/// chain through the context's gateways.
pub trait CurrencyWorker: IntervalTask + QueueConsumer + QueueProducer {
    fn context(&self) -> &Arc<EngineContext>;

    fn gateway(&self) -> Result<Arc<dyn Gateway>> {
        self.context().gateway(None)
    }

    fn gateway_for(&self, symbol: &str) -> Result<Arc<dyn Gateway>> {
        self.context().gateway(Some(symbol))
    }
}

/// Fee top-up requested for a deposit address before it can be collected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeSeedRequest {
    pub deposit_id: String,
    pub to_address: String,
    pub amount: Decimal,
}

pub struct SettlementWorker {
    this: Weak<SettlementWorker>,
    ctx: Arc<EngineContext>,
    stage: SettlementStage,
    hooks: Arc<dyn SettlementHooks>,
    transport: Arc<dyn QueueTransport>,
    consumer_queue: String,
    producer: ProducerSlot,
    timer: TickTimer,
    consumer_task: OnceCell<JoinHandle<()>>,
    fee_requests: Mutex<Vec<FeeSeedRequest>>,
}

impl SettlementWorker {
    pub fn new(
        ctx: Arc<EngineContext>,
        stage: SettlementStage,
        hooks: Arc<dyn SettlementHooks>,
        transport: Arc<dyn QueueTransport>,
    ) -> Arc<Self> {
        let builder = ctx.token_symbols_builder();
        let consumer_queue = queue_name(ctx.deployment_id(), stage.base_consumer_queue(), builder);
        let producer_queue = queue_name(ctx.deployment_id(), stage.base_producer_queue(), builder);

        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            ctx,
            stage,
            hooks,
            transport,
            consumer_queue,
            producer: ProducerSlot::new(producer_queue),
            timer: TickTimer::new(stage.default_tick()),
            consumer_task: OnceCell::new(),
            fee_requests: Mutex::new(Vec::new()),
        })
    }

    pub fn stage(&self) -> SettlementStage {
        self.stage
    }

    pub fn limit_picking_once(&self) -> usize {
        LIMIT_PICKING_ONCE
    }

    /// A deposit is collectable while the address still holds at least the
    /// deposited amount. Old deposits seen again by the crawler are not.
    pub async fn is_collectable(&self, txid: &str, address: &str, amount: Decimal) -> Result<bool> {
        let balance = self.gateway()?.get_address_balance(address).await?;
        debug!(
            "is_collectable txid={} address={} balance={} amount={}",
            txid, address, balance, amount
        );
        Ok(balance >= amount)
    }

    /// Hands the queued fee requests to the caller.
    pub async fn take_fee_requests(&self) -> Vec<FeeSeedRequest> {
        std::mem::take(&mut *self.fee_requests.lock().await)
    }

    pub async fn pending_fee_requests(&self) -> usize {
        self.fee_requests.lock().await.len()
    }

    async fn connect(&self) -> Result<()> {
        let this = self
            .this
            .upgrade()
            .ok_or_else(|| anyhow!("{} was dropped before connecting", self.name()))?;

        let (consumer, producer) = futures::join!(
            setup_consumer(this, self.transport.as_ref()),
            self.producer.setup(self.transport.as_ref())
        );
        producer.context("Could not set up producer")?;
        if let Some(handle) = consumer.context("Could not set up consumer")? {
            if self.consumer_task.set(handle).is_err() {
                warn!("{} consumer was already running", self.name());
            }
        }
        Ok(())
    }

    async fn on_fee_seed_message(&self, content: &str) -> Result<bool> {
        let mut parts = content.split(',').map(str::trim);
        let method = parts.next().unwrap_or_default();
        if method != SEED_METHOD {
            warn!("{} ignores unknown method {:?}", self.name(), method);
            return Ok(true);
        }

        let deposit_id = parts.next().filter(|p| !p.is_empty());
        let to_address = parts.next().filter(|p| !p.is_empty());
        let (Some(deposit_id), Some(to_address)) = (deposit_id, to_address) else {
            return Err(anyhow!("Malformed seed request: {}", content));
        };

        let amount = self.gateway()?.get_avg_fee().await?;
        self.fee_requests.lock().await.push(FeeSeedRequest {
            deposit_id: deposit_id.to_string(),
            to_address: to_address.to_string(),
            amount,
        });
        self.do_process().await?;
        Ok(true)
    }
}

#[async_trait]
impl IntervalTask for SettlementWorker {
    fn name(&self) -> &str {
        self.stage.name()
    }

    fn tick_timer(&self) -> &TickTimer {
        &self.timer
    }

    async fn prepare(&self) -> Result<()> {
        self.hooks.prepare(self).await?;
        if let Err(e) = self.connect().await {
            error!(
                "{}::prepare could not connect to rabbitmq server due to error: {:#}",
                self.name(),
                e
            );
        }
        Ok(())
    }

    async fn do_process(&self) -> Result<()> {
        let result = self.hooks.do_process(self).await?;
        if result.need_next_process {
            let msg = result.withdrawal_tx_id.to_string();
            if !self.emit_message(&msg).await {
                debug!("{} could not forward {} to {:?}", self.name(), msg, self.producer_queue());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl QueueConsumer for SettlementWorker {
    fn consumer_queue(&self) -> &str {
        &self.consumer_queue
    }

    /// Messages are always consumed. They only wake the worker up; the hooks
    /// read the actual work from their own storage.
    async fn on_consuming_message(&self, payload: &[u8]) -> Result<bool> {
        let content = String::from_utf8_lossy(payload);
        info!("{}::on_consuming_message msg={}", self.name(), content);

        if self.stage == SettlementStage::FeeSeeder {
            return self.on_fee_seed_message(&content).await;
        }

        self.do_process().await?;
        Ok(true)
    }
}

impl QueueProducer for SettlementWorker {
    fn producer(&self) -> &ProducerSlot {
        &self.producer
    }
}

impl CurrencyWorker for SettlementWorker {
    fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }
}
