//! The contract every chain adapter satisfies.
//!
//! Adapters implement the network primitives (`get_block_count`,
//! `fetch_block`, `fetch_transaction`, signing, broadcasting, ...). Cached
//! lookups and multi-block assembly are provided on top of them and shared
//! by every chain.

pub mod cache;
pub mod error;
pub mod registry;

pub use cache::{CacheOptions, GatewayCache, TimedLru};
pub use error::{GatewayError, normalize_error};
pub use registry::{GatewayFactory, GatewayRegistry};

use crate::types::{
    Account, Block, BlockId, RawTransaction, SignedRawTransaction, SubmittedTransaction,
    Transaction, TransactionStatus, TransferOutput, TransferType,
};
use anyhow::Result;
use async_trait::async_trait;
use futures::future::try_join_all;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;

#[async_trait]
pub trait Gateway: Send + Sync {
    fn cache(&self) -> &GatewayCache;

    /// Network identifier the adapter talks to, from `NETWORK`.
    fn network(&self) -> Option<&str>;

    fn get_network(&self) -> Result<String> {
        self.network()
            .map(str::to_string)
            .ok_or_else(|| GatewayError::MissingNetwork.into())
    }

    fn is_fast_gateway(&self) -> bool {
        false
    }

    fn normalize_address(&self, address: &str) -> String {
        address.to_string()
    }

    fn transfer_type(&self) -> TransferType {
        TransferType::AccountBased
    }

    /// Bounds concurrent transaction lookups during batch assembly.
    fn concurrency_limiter(&self) -> Option<Arc<Semaphore>> {
        None
    }

    async fn get_block_count(&self) -> Result<u64>;

    async fn fetch_block(&self, id: &BlockId) -> Result<Block>;

    async fn fetch_transaction(&self, txid: &str) -> Result<Option<Transaction>>;

    async fn get_address_balance(&self, address: &str) -> Result<Decimal>;

    fn create_account(&self) -> Result<Account>;

    async fn create_account_async(&self) -> Result<Account> {
        self.create_account()
    }

    async fn is_valid_address_async(&self, _address: &str) -> Result<bool> {
        Ok(true)
    }

    async fn create_raw_transaction(
        &self,
        from_address: &str,
        outputs: &[TransferOutput],
        based_tx_ids: Option<&[String]>,
    ) -> Result<RawTransaction>;

    async fn sign_raw_tx_by_single_private_key(
        &self,
        unsigned_raw: &str,
        private_key: &str,
    ) -> Result<SignedRawTransaction>;

    async fn send_raw_transaction(&self, raw_tx: &str) -> Result<SubmittedTransaction>;

    async fn get_transaction_status(&self, txid: &str) -> Result<TransactionStatus>;

    async fn get_avg_fee(&self) -> Result<Decimal>;

    async fn check_rpc_node(&self, _currency: &str) -> Result<bool> {
        Ok(true)
    }

    /// Creates and signs a single-output transfer.
    async fn forward_transaction(
        &self,
        private_key: &str,
        from_address: &str,
        to_address: &str,
        amount: Decimal,
        based_tx_ids: Option<&[String]>,
    ) -> Result<SignedRawTransaction> {
        let outputs = [TransferOutput {
            to_address: to_address.to_string(),
            amount,
        }];
        let raw = self
            .create_raw_transaction(from_address, &outputs, based_tx_ids)
            .await?;
        self.sign_raw_tx_by_single_private_key(&raw.unsigned_raw, private_key)
            .await
    }

    async fn seed_fee(
        &self,
        private_key: &str,
        from_address: &str,
        to_address: &str,
        amount: Decimal,
    ) -> Result<SubmittedTransaction> {
        let signed = self
            .forward_transaction(private_key, from_address, to_address, amount, None)
            .await?;
        self.send_raw_transaction(&signed.signed_raw).await
    }

    async fn get_one_block(&self, id: BlockId) -> Result<Arc<Block>> {
        if let Some(block) = self.cache().block(&id).await {
            return Ok(block);
        }

        // Cached under both ids: transactions look their block up by hash
        // after the batch fetched it by number.
        let block = Arc::new(self.fetch_block(&id).await?);
        let alias = match &id {
            BlockId::Number(_) => BlockId::Hash(block.hash().to_string()),
            BlockId::Hash(_) => BlockId::Number(block.number()),
        };
        self.cache().put_block(alias, block.clone()).await;
        self.cache().put_block(id, block.clone()).await;
        Ok(block)
    }

    /// Looks the transaction up in cache first. Confirmations are computed
    /// against the network height when the transaction enters the cache.
    async fn get_one_transaction(&self, txid: &str) -> Result<Option<Transaction>> {
        if let Some(mut tx) = self.cache().transaction(txid).await {
            if self.cache().options().refresh_cached_confirmations {
                let latest = self.get_block_count().await?;
                tx.confirmations = confirmations_at(latest, tx.block.number);
                self.cache().put_transaction(tx.clone()).await;
            }
            return Ok(Some(tx));
        }

        let Some(mut tx) = self.fetch_transaction(txid).await? else {
            return Ok(None);
        };

        let latest = self.get_block_count().await?;
        tx.confirmations = confirmations_at(latest, tx.block.number);
        self.cache().put_transaction(tx.clone()).await;
        Ok(Some(tx))
    }

    async fn get_transactions_by_ids(&self, txids: &[String]) -> Result<Vec<Transaction>> {
        if txids.is_empty() {
            return Ok(Vec::new());
        }

        let limiter = self.concurrency_limiter();
        let lookups = txids.iter().map(|txid| {
            let limiter = limiter.clone();
            async move {
                let _permit = match limiter {
                    Some(semaphore) => Some(semaphore.acquire_owned().await?),
                    None => None,
                };
                self.get_one_transaction(txid).await
            }
        });

        let found = try_join_all(lookups).await?;
        Ok(found.into_iter().flatten().collect())
    }

    async fn get_block_transactions(&self, block_number: u64) -> Result<Vec<Transaction>> {
        let block = self.get_one_block(BlockId::Number(block_number)).await?;
        let txids: Vec<String> = block
            .txids
            .iter()
            .filter(|txid| !txid.is_empty())
            .cloned()
            .collect();
        self.get_transactions_by_ids(&txids).await
    }

    /// Every transaction in `[from, to]`. Order across blocks is not
    /// guaranteed.
    async fn get_multi_blocks_transactions(&self, from: u64, to: u64) -> Result<Vec<Transaction>> {
        if from > to {
            return Err(GatewayError::InvalidRange { from, to }.into());
        }

        let per_block =
            try_join_all((from..=to).map(|number| self.get_block_transactions(number))).await?;
        let txs: Vec<Transaction> = per_block.into_iter().flatten().collect();
        debug!("Assembled {} transactions from blocks {}-{}", txs.len(), from, to);
        Ok(txs)
    }
}

pub fn confirmations_at(latest_network_height: u64, tx_height: u64) -> u64 {
    (latest_network_height + 1).saturating_sub(tx_height)
}

#[cfg(test)]
pub(crate) mod testing {
    //! An in-memory chain used by tests across the crate.

    use super::*;
    use crate::types::{BlockHeader, TransferEntry, TransferPayload};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

    #[derive(Debug)]
    pub struct Deposit {
        pub to: String,
        pub amount: Decimal,
    }

    impl TransferPayload for Deposit {
        fn extract_entries(&self, txid: &str) -> Vec<TransferEntry> {
            vec![TransferEntry {
                currency: "eth".to_string(),
                sub_currency: "eth".to_string(),
                txid: txid.to_string(),
                address: self.to.clone(),
                amount: self.amount,
            }]
        }

        fn network_fee(&self) -> Decimal {
            Decimal::ZERO
        }
    }

    pub struct MockGateway {
        pub cache: GatewayCache,
        pub height: AtomicU64,
        pub fast: bool,
        pub rpc_alive: AtomicBool,
        pub avg_fee: Decimal,
        pub balances: HashMap<String, Decimal>,
        pub block_fetches: AtomicUsize,
        pub tx_fetches: AtomicUsize,
        pub count_calls: AtomicUsize,
        /// Transaction ids that exist in blocks but cannot be found.
        pub missing: Vec<String>,
        /// Blocks that fail to load.
        pub broken_blocks: Vec<u64>,
        pub txs_per_block: usize,
    }

    impl MockGateway {
        pub fn new(height: u64) -> Self {
            Self::with_cache(height, CacheOptions::default())
        }

        pub fn with_cache(height: u64, options: CacheOptions) -> Self {
            Self {
                cache: GatewayCache::new(options),
                height: AtomicU64::new(height),
                fast: false,
                rpc_alive: AtomicBool::new(true),
                avg_fee: Decimal::new(21, 5),
                balances: HashMap::new(),
                block_fetches: AtomicUsize::new(0),
                tx_fetches: AtomicUsize::new(0),
                count_calls: AtomicUsize::new(0),
                missing: Vec::new(),
                broken_blocks: Vec::new(),
                txs_per_block: 2,
            }
        }

        pub fn set_height(&self, height: u64) {
            self.height.store(height, Ordering::SeqCst);
        }

        pub fn header(number: u64) -> BlockHeader {
            BlockHeader {
                hash: format!("0xblock{number}"),
                number,
                timestamp: 1_600_000_000 + number,
            }
        }

        pub fn txid(block: u64, index: usize) -> String {
            format!("tx-{block}-{index}")
        }

        fn block_of(txid: &str) -> Option<u64> {
            txid.strip_prefix("tx-")?.split('-').next()?.parse().ok()
        }
    }

    #[async_trait]
    impl Gateway for MockGateway {
        fn cache(&self) -> &GatewayCache {
            &self.cache
        }

        fn network(&self) -> Option<&str> {
            Some("testnet")
        }

        fn is_fast_gateway(&self) -> bool {
            self.fast
        }

        async fn get_block_count(&self) -> Result<u64> {
            self.count_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.height.load(Ordering::SeqCst))
        }

        async fn fetch_block(&self, id: &BlockId) -> Result<Block> {
            self.block_fetches.fetch_add(1, Ordering::SeqCst);
            let number = match id {
                BlockId::Number(n) => *n,
                BlockId::Hash(hash) => hash
                    .strip_prefix("0xblock")
                    .and_then(|n| n.parse().ok())
                    .ok_or_else(|| anyhow::anyhow!("unknown block {hash}"))?,
            };
            if self.broken_blocks.contains(&number) {
                anyhow::bail!("block {number} unavailable");
            }
            let txids = (0..self.txs_per_block)
                .map(|i| Self::txid(number, i))
                .collect();
            Ok(Block::new(Self::header(number), txids))
        }

        async fn fetch_transaction(&self, txid: &str) -> Result<Option<Transaction>> {
            self.tx_fetches.fetch_add(1, Ordering::SeqCst);
            if self.missing.iter().any(|m| m == txid) {
                return Ok(None);
            }
            let Some(number) = Self::block_of(txid) else {
                return Ok(None);
            };
            let payload = Deposit {
                to: format!("addr-{txid}"),
                amount: Decimal::ONE,
            };
            Ok(Some(Transaction::new(
                txid,
                Self::header(number),
                Arc::new(payload),
            )))
        }

        async fn get_address_balance(&self, address: &str) -> Result<Decimal> {
            Ok(self.balances.get(address).copied().unwrap_or_default())
        }

        fn create_account(&self) -> Result<Account> {
            Ok(Account::new("key", "address"))
        }

        async fn create_raw_transaction(
            &self,
            from_address: &str,
            outputs: &[TransferOutput],
            _based_tx_ids: Option<&[String]>,
        ) -> Result<RawTransaction> {
            Ok(RawTransaction {
                txid: String::new(),
                unsigned_raw: format!("{}>{}:{}", from_address, outputs[0].to_address, outputs[0].amount),
            })
        }

        async fn sign_raw_tx_by_single_private_key(
            &self,
            unsigned_raw: &str,
            private_key: &str,
        ) -> Result<SignedRawTransaction> {
            Ok(SignedRawTransaction {
                txid: format!("signed-{unsigned_raw}"),
                unsigned_raw: unsigned_raw.to_string(),
                signed_raw: format!("{unsigned_raw}#{private_key}"),
            })
        }

        async fn send_raw_transaction(&self, raw_tx: &str) -> Result<SubmittedTransaction> {
            Ok(SubmittedTransaction {
                txid: format!("sent-{raw_tx}"),
                block_number: None,
            })
        }

        async fn get_transaction_status(&self, _txid: &str) -> Result<TransactionStatus> {
            Ok(TransactionStatus::Unknown)
        }

        async fn get_avg_fee(&self) -> Result<Decimal> {
            Ok(self.avg_fee)
        }

        async fn check_rpc_node(&self, _currency: &str) -> Result<bool> {
            Ok(self.rpc_alive.load(Ordering::SeqCst))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MockGateway;
    use super::*;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn get_one_block_hits_network_once() {
        let gateway = MockGateway::new(100);

        let first = gateway.get_one_block(BlockId::Number(42)).await.unwrap();
        let second = gateway.get_one_block(BlockId::Number(42)).await.unwrap();

        assert_eq!(gateway.block_fetches.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn block_fetched_by_number_is_served_by_hash() {
        let gateway = MockGateway::new(100);

        let by_number = gateway.get_one_block(BlockId::Number(5)).await.unwrap();
        let by_hash = gateway
            .get_one_block(BlockId::from("0xblock5"))
            .await
            .unwrap();

        assert_eq!(gateway.block_fetches.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&by_number, &by_hash));

        gateway.get_one_block(BlockId::from("0xblock6")).await.unwrap();
        gateway.get_one_block(BlockId::Number(6)).await.unwrap();
        assert_eq!(gateway.block_fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn reversed_range_is_rejected() {
        let gateway = MockGateway::new(100);

        let err = gateway.get_multi_blocks_transactions(10, 9).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<GatewayError>(),
            Some(&GatewayError::InvalidRange { from: 10, to: 9 })
        );
        assert_eq!(gateway.block_fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn single_block_range_returns_its_transactions_without_missing_ones() {
        let mut gateway = MockGateway::new(100);
        gateway.txs_per_block = 3;
        gateway.missing = vec![MockGateway::txid(8, 1)];

        let txs = gateway.get_multi_blocks_transactions(8, 8).await.unwrap();

        let mut ids: Vec<String> = txs.into_iter().map(|tx| tx.txid).collect();
        ids.sort();
        assert_eq!(ids, vec![MockGateway::txid(8, 0), MockGateway::txid(8, 2)]);
    }

    #[tokio::test]
    async fn multi_block_range_concatenates_every_block() {
        let gateway = MockGateway::new(100);

        let txs = gateway.get_multi_blocks_transactions(1, 4).await.unwrap();

        assert_eq!(txs.len(), 8);
        assert_eq!(gateway.block_fetches.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn failing_block_fails_the_batch() {
        let mut gateway = MockGateway::new(100);
        gateway.broken_blocks = vec![3];

        assert!(gateway.get_multi_blocks_transactions(1, 4).await.is_err());
    }

    #[tokio::test]
    async fn cached_transaction_keeps_confirmations_from_first_fetch() {
        let gateway = MockGateway::new(100);

        let first = gateway
            .get_one_transaction(&MockGateway::txid(91, 0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.confirmations, 10);

        gateway.set_height(120);
        let cached = gateway
            .get_one_transaction(&MockGateway::txid(91, 0))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(cached.confirmations, 10);
        assert_eq!(gateway.tx_fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refresh_option_recomputes_cached_confirmations() {
        let options = CacheOptions {
            refresh_cached_confirmations: true,
            ..CacheOptions::default()
        };
        let gateway = MockGateway::with_cache(100, options);
        let txid = MockGateway::txid(91, 0);

        gateway.get_one_transaction(&txid).await.unwrap();
        gateway.set_height(120);
        let cached = gateway.get_one_transaction(&txid).await.unwrap().unwrap();

        assert_eq!(cached.confirmations, 30);
        assert_eq!(gateway.tx_fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_transaction_is_none() {
        let gateway = MockGateway::new(100);
        assert!(gateway.get_one_transaction("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn limiter_bounds_lookups_without_losing_results() {
        struct Limited(MockGateway, Arc<Semaphore>);

        #[async_trait]
        impl Gateway for Limited {
            fn cache(&self) -> &GatewayCache {
                self.0.cache()
            }
            fn network(&self) -> Option<&str> {
                self.0.network()
            }
            fn concurrency_limiter(&self) -> Option<Arc<Semaphore>> {
                Some(self.1.clone())
            }
            async fn get_block_count(&self) -> Result<u64> {
                self.0.get_block_count().await
            }
            async fn fetch_block(&self, id: &BlockId) -> Result<Block> {
                self.0.fetch_block(id).await
            }
            async fn fetch_transaction(&self, txid: &str) -> Result<Option<Transaction>> {
                self.0.fetch_transaction(txid).await
            }
            async fn get_address_balance(&self, address: &str) -> Result<Decimal> {
                self.0.get_address_balance(address).await
            }
            fn create_account(&self) -> Result<Account> {
                self.0.create_account()
            }
            async fn create_raw_transaction(
                &self,
                from_address: &str,
                outputs: &[TransferOutput],
                based_tx_ids: Option<&[String]>,
            ) -> Result<RawTransaction> {
                self.0
                    .create_raw_transaction(from_address, outputs, based_tx_ids)
                    .await
            }
            async fn sign_raw_tx_by_single_private_key(
                &self,
                unsigned_raw: &str,
                private_key: &str,
            ) -> Result<SignedRawTransaction> {
                self.0
                    .sign_raw_tx_by_single_private_key(unsigned_raw, private_key)
                    .await
            }
            async fn send_raw_transaction(&self, raw_tx: &str) -> Result<SubmittedTransaction> {
                self.0.send_raw_transaction(raw_tx).await
            }
            async fn get_transaction_status(&self, txid: &str) -> Result<TransactionStatus> {
                self.0.get_transaction_status(txid).await
            }
            async fn get_avg_fee(&self) -> Result<Decimal> {
                self.0.get_avg_fee().await
            }
        }

        let mut inner = MockGateway::new(100);
        inner.txs_per_block = 5;
        let gateway = Limited(inner, Arc::new(Semaphore::new(1)));

        let txs = gateway.get_multi_blocks_transactions(1, 3).await.unwrap();
        assert_eq!(txs.len(), 15);
    }

    #[tokio::test]
    async fn seed_fee_forwards_then_broadcasts() {
        let gateway = MockGateway::new(100);

        let submitted = gateway
            .seed_fee("k", "hot", "user", Decimal::new(5, 1))
            .await
            .unwrap();

        assert_eq!(submitted.txid, "sent-hot>user:0.5#k");
    }

    #[test]
    fn confirmations_count_the_including_block() {
        assert_eq!(confirmations_at(100, 100), 1);
        assert_eq!(confirmations_at(100, 91), 10);
        assert_eq!(confirmations_at(5, 9), 0);
    }
}
