use super::{Crawler, CrawlerHooks, CrawlerProfile};
use crate::context::EngineContext;
use crate::error::EngineError;
use crate::types::BlockId;
use anyhow::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};
use uuid::Uuid;

/// A round running longer than this kills the process.
pub const ROUND_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const RETRY_DELAY: Duration = Duration::from_secs(6);
const NEXT_ROUND_DELAY: Duration = Duration::from_millis(1);

#[derive(Debug, Error)]
pub enum CrawlerManagerError {
    #[error("Timeout duration ({0:?}) is exceeded")]
    WatchdogExpired(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessedRange {
    pub from: u64,
    pub to: u64,
    pub safe: u64,
    pub latest: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundOutcome {
    pub next_delay: Duration,
    /// `None` when the crawler was already at the network tip.
    pub processed: Option<ProcessedRange>,
}

/// Owns the crawl cursor of one currency and drives crawlers round by round.
pub struct CrawlerManager {
    id: Uuid,
    ctx: Arc<EngineContext>,
    profile: Arc<dyn CrawlerProfile>,
    hooks: Arc<dyn CrawlerHooks>,
    started: AtomicBool,
}

impl CrawlerManager {
    pub fn new(
        ctx: Arc<EngineContext>,
        profile: Arc<dyn CrawlerProfile>,
        hooks: Arc<dyn CrawlerHooks>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            ctx,
            profile,
            hooks,
            started: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn last_processed_block(&self) -> Option<u64> {
        self.ctx.cursors.get(&self.id)
    }

    /// Runs rounds until the watchdog fires. Calling it on a manager that is
    /// already running returns immediately.
    pub async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Crawler manager {} is already running", self.id);
            return Ok(());
        }
        self.run().await
    }

    async fn run(&self) -> Result<()> {
        info!(
            "Starting {} crawler {} on {}",
            self.ctx.token_symbols_builder(),
            self.id,
            self.ctx.config.network.as_deref().unwrap_or("default network")
        );

        loop {
            let delay = match self.run_round().await {
                Ok(outcome) => outcome.next_delay,
                Err(e) if e.is::<CrawlerManagerError>() => {
                    error!("Crawler {} is stuck: {:#}. Exiting...", self.id, e);
                    return Err(e);
                }
                Err(e) => {
                    self.handle_error(&e).await;
                    RETRY_DELAY
                }
            };
            sleep(delay).await;
        }
    }

    /// One crawl round under the watchdog.
    pub async fn run_round(&self) -> Result<RoundOutcome> {
        match timeout(ROUND_TIMEOUT, self.crawl_round()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(CrawlerManagerError::WatchdogExpired(ROUND_TIMEOUT).into()),
        }
    }

    async fn crawl_round(&self) -> Result<RoundOutcome> {
        let crawler = Crawler::new(self.ctx.clone(), self.profile.clone(), self.hooks.clone())?;
        let gateway = crawler.gateway().clone();

        if !gateway.check_rpc_node(self.ctx.token_symbols_builder()).await? {
            return Err(EngineError::RpcNode(None).into());
        }

        let latest = crawler.latest_block_on_network().await?;
        let previous_cursor = self.ctx.cursors.get(&self.id);
        let last_processed = match (previous_cursor, self.ctx.config.force_crawl_block) {
            (Some(cursor), _) => Some(cursor),
            (None, Some(forced)) => {
                info!("Force crawling from block {}", forced);
                Some(forced)
            }
            (None, None) => self.hooks.get_latest_crawled_block_number(&crawler).await?,
        };

        let from = match last_processed {
            Some(block) => block + 1,
            None => crawler.first_block_number_to_crawl(),
        };
        if from > latest {
            info!(
                "Block {} is the newest one on the network. Wait until new blocks are mined...",
                latest
            );
            return Ok(RoundOutcome {
                next_delay: crawler.average_block_time(),
                processed: None,
            });
        }

        let to = (from + crawler.block_num_in_one_go() - 1).min(latest);
        crawler.process_blocks(from, to, latest).await?;

        // Only blocks with enough confirmations are safe to resume from, and
        // the cursor never moves backwards.
        let mut safe = latest
            .saturating_sub(crawler.required_confirmations())
            .min(to);
        if let Some(cursor) = previous_cursor {
            safe = safe.max(cursor);
        }

        let block = gateway.get_one_block(BlockId::Number(safe)).await?;
        self.hooks.on_block_crawled(&crawler, &block).await?;
        self.ctx.cursors.set(self.id, safe);

        let next_delay = if to >= latest {
            crawler.average_block_time()
        } else {
            NEXT_ROUND_DELAY
        };

        Ok(RoundOutcome {
            next_delay,
            processed: Some(ProcessedRange {
                from,
                to,
                safe,
                latest,
            }),
        })
    }

    /// Logs a failed round and repairs local state when the failure calls
    /// for it.
    pub async fn handle_error(&self, err: &anyhow::Error) {
        match EngineError::classify(err) {
            Some(EngineError::MissingPreparedData(_)) => {
                error!("Crawler {} failed on missing prepared data: {:#}", self.id, err);
                let currency = &self.ctx.active.currency;
                if let Err(e) = self
                    .hooks
                    .prepare_wallet_balance_all(currency, &self.ctx.active.tokens.symbols)
                    .await
                {
                    error!("Could not rebuild wallet balances for {}: {:#}", currency, e);
                }
            }
            Some(EngineError::ApiDataNotUpdated(_)) => {
                warn!("Crawler {}: {:#}. Will retry shortly...", self.id, err);
            }
            _ => {
                error!("Crawler {} round failed: {:#}", self.id, err);
            }
        }
    }
}
