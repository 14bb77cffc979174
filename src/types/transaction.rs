use super::block::BlockHeader;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A single address's balance change inside a transaction.
///
/// Senders carry a negative amount, recipients a non-negative one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEntry {
    pub currency: String,
    pub sub_currency: String,
    pub txid: String,
    pub address: String,
    pub amount: Decimal,
}

/// The chain specific part of a transaction.
pub trait TransferPayload: fmt::Debug + Send + Sync {
    /// Every balance change caused by the transaction.
    fn extract_entries(&self, txid: &str) -> Vec<TransferEntry>;

    fn network_fee(&self) -> Decimal;

    fn additional_fields(&self) -> serde_json::Value {
        serde_json::Value::Object(Default::default())
    }
}

#[derive(Debug, Clone)]
pub struct Transaction {
    pub txid: String,
    pub height: u64,
    pub timestamp: u64,
    pub block: BlockHeader,
    pub contract_address: Option<String>,
    pub confirmations: u64,
    pub is_failed: bool,
    pub payload: Arc<dyn TransferPayload>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepositExtra {
    pub block_hash: String,
    pub block_number: u64,
    pub block_timestamp: u64,
}

impl Transaction {
    pub fn new(
        txid: impl Into<String>,
        block: BlockHeader,
        payload: Arc<dyn TransferPayload>,
    ) -> Self {
        Self {
            txid: txid.into(),
            height: block.number,
            timestamp: block.timestamp,
            block,
            contract_address: None,
            confirmations: 0,
            is_failed: false,
            payload,
        }
    }

    pub fn extract_entries(&self) -> Vec<TransferEntry> {
        self.payload.extract_entries(&self.txid)
    }

    /// Entries with a non-negative amount.
    pub fn extract_transfer_outputs(&self) -> Vec<TransferEntry> {
        self.extract_entries()
            .into_iter()
            .filter(|entry| entry.amount >= Decimal::ZERO)
            .collect()
    }

    pub fn extract_recipient_addresses(&self) -> Vec<String> {
        self.extract_transfer_outputs()
            .into_iter()
            .map(|entry| entry.address)
            .collect()
    }

    pub fn extract_sender_addresses(&self) -> Vec<String> {
        self.extract_entries()
            .into_iter()
            .filter(|entry| entry.amount < Decimal::ZERO)
            .map(|entry| entry.address)
            .collect()
    }

    pub fn extra_deposit_data(&self) -> DepositExtra {
        DepositExtra {
            block_hash: self.block.hash.clone(),
            block_number: self.height,
            block_timestamp: self.timestamp,
        }
    }

    pub fn network_fee(&self) -> Decimal {
        self.payload.network_fee()
    }
}

/// Sums entries that share an address, keeping the position of the last
/// occurrence.
pub fn merge_entries(entries: Vec<TransferEntry>) -> Vec<TransferEntry> {
    let mut merged: Vec<TransferEntry> = Vec::with_capacity(entries.len());
    for entry in entries {
        match merged.iter().position(|e| e.address == entry.address) {
            Some(index) => {
                let previous = merged.remove(index);
                merged.push(TransferEntry {
                    amount: previous.amount + entry.amount,
                    ..entry
                });
            }
            None => merged.push(entry),
        }
    }
    merged
}

/// Groups transactions by each of their recipient addresses.
pub fn group_by_recipients(txs: &[Transaction]) -> HashMap<String, Vec<Transaction>> {
    let mut groups: HashMap<String, Vec<Transaction>> = HashMap::new();
    for tx in txs {
        for address in tx.extract_recipient_addresses() {
            groups.entry(address).or_default().push(tx.clone());
        }
    }
    groups
}
