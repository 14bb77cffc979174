use rust_decimal::Decimal;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlCursor {
    pub currency: String,
    pub crawl_type: String,
    pub block_number: u64,
    pub block_hash: String,
}

/// One balance change observed on chain, as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawledEntry {
    pub txid: String,
    pub address: String,
    pub currency: String,
    pub sub_currency: String,
    pub amount: Decimal,
    pub block_number: u64,
    pub block_hash: String,
    pub block_timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletBalance {
    pub currency: String,
    pub address: String,
    pub balance: Decimal,
}
