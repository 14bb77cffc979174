use super::Crawler;
use crate::types::{Block, Transaction};
use anyhow::Result;
use async_trait::async_trait;

/// The integration points a crawler exposes. Domain persistence happens
/// only here.
#[async_trait]
pub trait CrawlerHooks: Send + Sync {
    fn crawl_type(&self) -> &str {
        "deposit"
    }

    /// Resume point used when the manager has no cursor in memory. `None`
    /// means nothing was crawled yet and the crawl starts at the crawler's
    /// first block.
    async fn get_latest_crawled_block_number(&self, crawler: &Crawler) -> Result<Option<u64>>;

    /// Called with the safe block once a round has been handed over.
    async fn on_block_crawled(&self, crawler: &Crawler, block: &Block) -> Result<()>;

    async fn on_tx_crawled(&self, _crawler: &Crawler, _tx: &Transaction) -> Result<()> {
        Ok(())
    }

    /// Every transaction of one round, as a single batch.
    async fn on_crawling_txs(&self, crawler: &Crawler, txs: &[Transaction]) -> Result<()>;

    /// Rebuilds local balances after a missing-prepared-data failure.
    async fn prepare_wallet_balance_all(&self, currency: &str, symbols: &[String]) -> Result<()>;
}
