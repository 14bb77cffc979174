//! Crawler hooks persisting crawled balance changes and the crawl cursor to
//! SQLite.

use crate::crawler::{Crawler, CrawlerHooks};
use crate::repository::{
    BalanceRepository, CrawlCursor, CrawledEntry, CursorRepository, Database, EntryRepository,
    WalletBalance,
};
use crate::types::{Block, Transaction, merge_entries};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::info;

const DEFAULT_CRAWL_TYPE: &str = "deposit";

pub struct SqliteCrawlerHooks {
    db: Arc<Mutex<Database>>,
    crawl_type: String,
}

impl SqliteCrawlerHooks {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            crawl_type: DEFAULT_CRAWL_TYPE.to_string(),
        }
    }

    pub fn open(database_url: &str) -> Result<Self> {
        Ok(Self::new(Database::new(database_url)?))
    }

    pub fn with_crawl_type(mut self, crawl_type: impl Into<String>) -> Self {
        self.crawl_type = crawl_type.into();
        self
    }

    /// Runs blocking database work off the async workers.
    async fn with_db<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let db = db.lock().map_err(|_| anyhow!("Database lock poisoned"))?;
            work(&db)
        })
        .await?
    }
}

/// Failed transactions move no funds. Entries of one transaction that share
/// an address are summed first, so a self-send nets out instead of
/// colliding on the entry key.
fn to_rows(txs: &[Transaction], symbols: &[String]) -> Vec<CrawledEntry> {
    txs.iter()
        .filter(|tx| !tx.is_failed)
        .flat_map(|tx| {
            merge_entries(tx.extract_entries())
                .into_iter()
                .map(move |entry| CrawledEntry {
                    txid: entry.txid,
                    address: entry.address,
                    currency: entry.currency,
                    sub_currency: entry.sub_currency,
                    amount: entry.amount,
                    block_number: tx.block.number,
                    block_hash: tx.block.hash.clone(),
                    block_timestamp: tx.block.timestamp,
                })
        })
        .filter(|entry| symbols.iter().any(|s| s.eq_ignore_ascii_case(&entry.sub_currency)))
        .collect()
}

/// Stores new entries and their balance deltas in one transaction, so a
/// failed round leaves nothing behind and its retry applies every delta.
fn process_batch(db: &Database, entries: Vec<CrawledEntry>) -> Result<()> {
    let start = Instant::now();
    if entries.is_empty() {
        return Ok(());
    }

    let tx = db.conn.unchecked_transaction()?;
    let inserted = EntryRepository::new(&tx).insert_all(&entries)?;

    let mut deltas: BTreeMap<&str, Vec<(String, Decimal)>> = BTreeMap::new();
    for entry in inserted.iter().copied() {
        deltas
            .entry(entry.sub_currency.as_str())
            .or_default()
            .push((entry.address.clone(), entry.amount));
    }

    let balances = BalanceRepository::new(&tx);
    for (sub_currency, deltas) in &deltas {
        balances.add_deltas(sub_currency, deltas)?;
    }
    tx.commit()?;

    info!(
        "Inserted {} of {} crawled entries in {:?}",
        inserted.len(),
        entries.len(),
        start.elapsed()
    );
    Ok(())
}

#[async_trait]
impl CrawlerHooks for SqliteCrawlerHooks {
    fn crawl_type(&self) -> &str {
        &self.crawl_type
    }

    async fn get_latest_crawled_block_number(&self, crawler: &Crawler) -> Result<Option<u64>> {
        let currency = crawler.context().active.currency.clone();
        let crawl_type = self.crawl_type.clone();
        let stored = self
            .with_db(move |db| CursorRepository::new(&db.conn).get(&currency, &crawl_type))
            .await?;
        Ok(stored.map(|cursor| cursor.block_number))
    }

    async fn on_block_crawled(&self, crawler: &Crawler, block: &Block) -> Result<()> {
        let cursor = CrawlCursor {
            currency: crawler.context().active.currency.clone(),
            crawl_type: self.crawl_type.clone(),
            block_number: block.number(),
            block_hash: block.hash().to_string(),
        };
        self.with_db(move |db| CursorRepository::new(&db.conn).upsert(&cursor))
            .await?;
        info!("Updated {} cursor to block {}", self.crawl_type, block.number());
        Ok(())
    }

    async fn on_crawling_txs(&self, crawler: &Crawler, txs: &[Transaction]) -> Result<()> {
        let entries = to_rows(txs, &crawler.context().active.tokens.symbols);
        self.with_db(move |db| process_batch(db, entries)).await
    }

    async fn prepare_wallet_balance_all(&self, currency: &str, symbols: &[String]) -> Result<()> {
        info!("Rebuilding {} wallet balances for {:?}", currency, symbols);
        let symbols = symbols.to_vec();
        self.with_db(move |db| {
            let entries = EntryRepository::new(&db.conn);
            let balances = BalanceRepository::new(&db.conn);
            for symbol in &symbols {
                let rebuilt: Vec<WalletBalance> = entries
                    .net_amounts(symbol)?
                    .into_iter()
                    .map(|(address, balance)| WalletBalance {
                        currency: symbol.clone(),
                        address,
                        balance,
                    })
                    .collect();
                balances.replace_all(symbol, &rebuilt)?;
            }
            Ok(())
        })
        .await
    }
}
