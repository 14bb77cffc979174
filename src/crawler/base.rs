use super::CrawlerHooks;
use crate::context::EngineContext;
use crate::gateway::Gateway;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

const FAST_GATEWAY_BATCH: u64 = 1000;
const FAST_GATEWAY_MAX_TOKENS: usize = 10;

/// Per-chain crawl parameters.
pub trait CrawlerProfile: Send + Sync {
    fn first_block_number_to_crawl(&self) -> u64;

    /// Also the idle wait between rounds once the crawler is at the tip.
    fn average_block_time(&self) -> Duration;

    fn required_confirmations(&self) -> u64;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticProfile {
    pub first_block: u64,
    pub average_block_time: Duration,
    pub required_confirmations: u64,
}

impl CrawlerProfile for StaticProfile {
    fn first_block_number_to_crawl(&self) -> u64 {
        self.first_block
    }

    fn average_block_time(&self) -> Duration {
        self.average_block_time
    }

    fn required_confirmations(&self) -> u64 {
        self.required_confirmations
    }
}

/// Fetches block ranges for the active currency and hands them to the hooks.
/// A fresh crawler is built for every round.
pub struct Crawler {
    id: Uuid,
    ctx: Arc<EngineContext>,
    profile: Arc<dyn CrawlerProfile>,
    options: Arc<dyn CrawlerHooks>,
    gateway: Arc<dyn Gateway>,
}

impl Crawler {
    pub fn new(
        ctx: Arc<EngineContext>,
        profile: Arc<dyn CrawlerProfile>,
        options: Arc<dyn CrawlerHooks>,
    ) -> Result<Self> {
        let gateway = ctx.gateway(None)?;
        Ok(Self {
            id: Uuid::new_v4(),
            ctx,
            profile,
            options,
            gateway,
        })
    }

    pub fn instance_id(&self) -> Uuid {
        self.id
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    pub fn options(&self) -> &Arc<dyn CrawlerHooks> {
        &self.options
    }

    pub fn gateway(&self) -> &Arc<dyn Gateway> {
        &self.gateway
    }

    /// Gateway of a specific token of the active set.
    pub fn gateway_for(&self, symbol: &str) -> Result<Arc<dyn Gateway>> {
        self.ctx.gateway(Some(symbol))
    }

    pub fn first_block_number_to_crawl(&self) -> u64 {
        self.profile.first_block_number_to_crawl()
    }

    pub fn average_block_time(&self) -> Duration {
        self.profile.average_block_time()
    }

    pub fn required_confirmations(&self) -> u64 {
        self.profile.required_confirmations()
    }

    pub fn crawl_type(&self) -> &str {
        self.options.crawl_type()
    }

    /// Fast adapters tracking few tokens take big strides; everything else
    /// moves one confirmation window at a time.
    pub fn block_num_in_one_go(&self) -> u64 {
        let number_of_tokens = self.ctx.active.tokens.len();
        if self.gateway.is_fast_gateway() && number_of_tokens < FAST_GATEWAY_MAX_TOKENS {
            return FAST_GATEWAY_BATCH;
        }
        self.required_confirmations() + 1
    }

    pub fn tx_num_in_one_go(&self) -> usize {
        10
    }

    pub async fn latest_block_on_network(&self) -> Result<u64> {
        self.gateway.get_block_count().await
    }

    pub async fn process_blocks(&self, from: u64, to: u64, latest_network_block: u64) -> Result<()> {
        let symbol = self.ctx.token_symbols_builder().to_uppercase();
        info!(
            "{}::process_blocks BEGIN: {}→{} / {}",
            symbol, from, to, latest_network_block
        );

        let txs = self.gateway.get_multi_blocks_transactions(from, to).await?;
        self.options.on_crawling_txs(self, &txs).await?;

        info!(
            "{}::process_blocks FINISH: {}→{}, txs={}",
            symbol,
            from,
            to,
            txs.len()
        );
        Ok(())
    }
}
