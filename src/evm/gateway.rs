use super::rpc::RpcClient;
use crate::error::EngineError;
use crate::gateway::{CacheOptions, Gateway, GatewayCache, confirmations_at, normalize_error};
use crate::types::{
    Account, Block, BlockHeader, BlockId, RawTransaction, SignedRawTransaction,
    SubmittedTransaction, Transaction, TransactionStatus, TransferEntry, TransferOutput,
    TransferPayload,
};
use alloy::consensus::Transaction as ConsensusTransaction;
use alloy::eips::eip2718::Encodable2718;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::providers::Provider;
use alloy::rpc::types::{BlockNumberOrTag, TransactionRequest};
use alloy::signers::local::PrivateKeySigner;
use alloy_primitives::{Address, B256, U256, hex};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

pub const ETHER_DECIMALS: u32 = 18;
const TRANSFER_GAS: u64 = 21_000;
const MAX_CONCURRENT_LOOKUPS: usize = 10;

pub fn wei_to_ether(wei: U256) -> Result<Decimal> {
    let wei = i128::try_from(wei).map_err(|_| anyhow!("Amount {} wei is out of range", wei))?;
    Decimal::try_from_i128_with_scale(wei, ETHER_DECIMALS)
        .map(|d| d.normalize())
        .map_err(|e| anyhow!("Amount {} wei is out of range: {}", wei, e))
}

pub fn ether_to_wei(amount: Decimal) -> Result<U256> {
    if amount.is_sign_negative() {
        return Err(EngineError::TxInvalid(None)
            .due(format!("negative amount {}", amount))
            .into());
    }
    let wei = amount
        .checked_mul(Decimal::from(10u64.pow(ETHER_DECIMALS)))
        .and_then(|wei| wei.trunc().to_u128())
        .ok_or_else(|| anyhow!("Amount {} is out of range", amount))?;
    Ok(U256::from(wei))
}

/// Fee actually charged: gas used at the effective gas price.
fn paid_fee(gas_used: u64, effective_gas_price: u128) -> Result<Decimal> {
    wei_to_ether(U256::from(effective_gas_price) * U256::from(gas_used))
}

/// A reverted transaction still lands in its block, flagged as failed.
fn settled_transaction(
    txid: &str,
    header: BlockHeader,
    transfer: EtherTransfer,
    succeeded: bool,
) -> Transaction {
    let mut tx = Transaction::new(txid, header, Arc::new(transfer));
    tx.is_failed = !succeeded;
    tx
}

/// Native ether movement carried by one transaction.
#[derive(Debug)]
struct EtherTransfer {
    from: String,
    to: Option<String>,
    value: Decimal,
    fee: Decimal,
}

impl TransferPayload for EtherTransfer {
    fn extract_entries(&self, txid: &str) -> Vec<TransferEntry> {
        let Some(to) = &self.to else {
            return Vec::new();
        };
        if self.value.is_zero() {
            return Vec::new();
        }

        let entry = |address: &str, amount: Decimal| TransferEntry {
            currency: "eth".to_string(),
            sub_currency: "eth".to_string(),
            txid: txid.to_string(),
            address: address.to_string(),
            amount,
        };
        vec![entry(&self.from, -self.value), entry(to, self.value)]
    }

    fn network_fee(&self) -> Decimal {
        self.fee
    }
}

/// Reference gateway for Ethereum-compatible chains.
pub struct EvmGateway {
    client: RpcClient,
    cache: GatewayCache,
    network: Option<String>,
    required_confirmations: u64,
    limiter: Arc<Semaphore>,
}

impl EvmGateway {
    pub fn new(client: RpcClient, network: Option<String>, required_confirmations: u64) -> Self {
        Self::with_cache(client, network, required_confirmations, CacheOptions::default())
    }

    pub fn with_cache(
        client: RpcClient,
        network: Option<String>,
        required_confirmations: u64,
        options: CacheOptions,
    ) -> Self {
        Self {
            client,
            cache: GatewayCache::new(options),
            network,
            required_confirmations,
            limiter: Arc::new(Semaphore::new(MAX_CONCURRENT_LOOKUPS)),
        }
    }

    fn parse_address(address: &str) -> Result<Address> {
        Address::from_str(address).with_context(|| format!("Invalid address {}", address))
    }

    fn parse_hash(hash: &str) -> Result<B256> {
        B256::from_str(hash).with_context(|| format!("Invalid hash {}", hash))
    }

    fn into_block(block: alloy::rpc::types::Block) -> Block {
        let header = BlockHeader {
            hash: format!("{:?}", block.header.hash),
            number: block.header.number,
            timestamp: block.header.timestamp,
        };
        let txids = block
            .transactions
            .hashes()
            .map(|hash| format!("{:?}", hash))
            .collect();
        Block::new(header, txids)
    }
}

#[async_trait]
impl Gateway for EvmGateway {
    fn cache(&self) -> &GatewayCache {
        &self.cache
    }

    fn network(&self) -> Option<&str> {
        self.network.as_deref()
    }

    fn normalize_address(&self, address: &str) -> String {
        address.to_lowercase()
    }

    fn concurrency_limiter(&self) -> Option<Arc<Semaphore>> {
        Some(self.limiter.clone())
    }

    async fn get_block_count(&self) -> Result<u64> {
        self.client
            .get_latest_block()
            .await
            .map_err(|e| normalize_error(e, &[]))
    }

    async fn fetch_block(&self, id: &BlockId) -> Result<Block> {
        let params = [id.to_string()];
        let block = match id {
            BlockId::Number(number) => {
                let tag = BlockNumberOrTag::Number(*number);
                self.client
                    .call("eth_getBlockByNumber", move |provider| async move {
                        provider.get_block_by_number(tag).await
                    })
                    .await
            }
            BlockId::Hash(hash) => {
                let hash = Self::parse_hash(hash)?;
                self.client
                    .call("eth_getBlockByHash", move |provider| async move {
                        provider.get_block_by_hash(hash).await
                    })
                    .await
            }
        }
        .map_err(|e| normalize_error(e, &params))?;

        let block = block.ok_or_else(|| {
            EngineError::ApiDataNotUpdated(None).due(format!("block {} is not available yet", id))
        })?;
        Ok(Self::into_block(block))
    }

    async fn fetch_transaction(&self, txid: &str) -> Result<Option<Transaction>> {
        let hash = Self::parse_hash(txid)?;
        let tx = self
            .client
            .call("eth_getTransactionByHash", move |provider| async move {
                provider.get_transaction_by_hash(hash).await
            })
            .await
            .map_err(|e| normalize_error(e, &[txid.to_string()]))?;

        let Some(tx) = tx else {
            return Ok(None);
        };
        let Some(block_hash) = tx.block_hash else {
            debug!("Transaction {} is still pending", txid);
            return Ok(None);
        };
        let receipt = self
            .client
            .call("eth_getTransactionReceipt", move |provider| async move {
                provider.get_transaction_receipt(hash).await
            })
            .await
            .map_err(|e| normalize_error(e, &[txid.to_string()]))?;
        let Some(receipt) = receipt else {
            debug!("Receipt of {} is not available yet", txid);
            return Ok(None);
        };
        let block = self.get_one_block(BlockId::Hash(format!("{:?}", block_hash))).await?;

        let transfer = EtherTransfer {
            from: tx.inner.signer().to_string(),
            to: ConsensusTransaction::to(&tx).map(|to| to.to_string()),
            value: wei_to_ether(ConsensusTransaction::value(&tx))?,
            fee: paid_fee(receipt.gas_used, receipt.effective_gas_price)?,
        };

        Ok(Some(settled_transaction(
            txid,
            block.header.clone(),
            transfer,
            receipt.status(),
        )))
    }

    async fn get_address_balance(&self, address: &str) -> Result<Decimal> {
        let owner = Self::parse_address(address)?;
        let wei = self
            .client
            .call("eth_getBalance", move |provider| async move {
                provider.get_balance(owner).await
            })
            .await
            .map_err(|e| normalize_error(e, &[address.to_string()]))?;
        wei_to_ether(wei)
    }

    fn create_account(&self) -> Result<Account> {
        let signer = PrivateKeySigner::random();
        Ok(Account::new(
            signer.to_bytes().to_string(),
            signer.address().to_string(),
        ))
    }

    async fn is_valid_address_async(&self, address: &str) -> Result<bool> {
        Ok(Address::from_str(address).is_ok())
    }

    /// Builds a legacy transfer request. Account-based chains move funds to
    /// a single recipient per transaction.
    async fn create_raw_transaction(
        &self,
        from_address: &str,
        outputs: &[TransferOutput],
        _based_tx_ids: Option<&[String]>,
    ) -> Result<RawTransaction> {
        let [output] = outputs else {
            return Err(EngineError::TxInvalid(None)
                .due(format!("expected one output, got {}", outputs.len()))
                .into());
        };
        let from = Self::parse_address(from_address)?;
        let to = Self::parse_address(&output.to_address)?;
        let value = ether_to_wei(output.amount)?;

        let nonce = self
            .client
            .call("eth_getTransactionCount", move |provider| async move {
                provider.get_transaction_count(from).await
            })
            .await
            .map_err(|e| normalize_error(e, &[from_address.to_string()]))?;
        let gas_price = self
            .client
            .call("eth_gasPrice", |provider| async move { provider.get_gas_price().await })
            .await
            .map_err(|e| normalize_error(e, &[]))?;
        let chain_id = self
            .client
            .call("eth_chainId", |provider| async move { provider.get_chain_id().await })
            .await
            .map_err(|e| normalize_error(e, &[]))?;

        let request = TransactionRequest::default()
            .with_from(from)
            .with_to(to)
            .with_value(value)
            .with_nonce(nonce)
            .with_gas_price(gas_price)
            .with_gas_limit(TRANSFER_GAS)
            .with_chain_id(chain_id);

        Ok(RawTransaction {
            txid: String::new(),
            unsigned_raw: serde_json::to_string(&request)?,
        })
    }

    async fn sign_raw_tx_by_single_private_key(
        &self,
        unsigned_raw: &str,
        private_key: &str,
    ) -> Result<SignedRawTransaction> {
        let request: TransactionRequest =
            serde_json::from_str(unsigned_raw).context("Malformed unsigned transaction")?;
        let key_hex = private_key.strip_prefix("0x").unwrap_or(private_key);
        let signer: PrivateKeySigner = key_hex
            .parse()
            .map_err(|_| EngineError::TxInvalid(None).due("unreadable private key"))?;
        let wallet = EthereumWallet::from(signer);

        let envelope = request
            .build(&wallet)
            .await
            .map_err(|e| EngineError::TxInvalid(None).due(e.to_string()))?;

        Ok(SignedRawTransaction {
            txid: format!("{:?}", envelope.tx_hash()),
            unsigned_raw: unsigned_raw.to_string(),
            signed_raw: hex::encode_prefixed(envelope.encoded_2718()),
        })
    }

    async fn send_raw_transaction(&self, raw_tx: &str) -> Result<SubmittedTransaction> {
        let encoded = hex::decode(raw_tx).context("Signed transaction is not hex")?;
        let pending = self
            .client
            .call("eth_sendRawTransaction", |provider| {
                let encoded = encoded.clone();
                async move { provider.send_raw_transaction(&encoded).await }
            })
            .await
            .map_err(|e| {
                warn!("Broadcasting transaction failed: {:#}", e);
                anyhow::Error::from(EngineError::TxSentFailed(None).due(e.to_string()))
            })?;

        Ok(SubmittedTransaction {
            txid: format!("{:?}", pending.tx_hash()),
            block_number: None,
        })
    }

    async fn get_transaction_status(&self, txid: &str) -> Result<TransactionStatus> {
        let hash = Self::parse_hash(txid)?;
        let receipt = self
            .client
            .call("eth_getTransactionReceipt", move |provider| async move {
                provider.get_transaction_receipt(hash).await
            })
            .await
            .map_err(|e| normalize_error(e, &[txid.to_string()]))?;

        let Some(receipt) = receipt else {
            return Ok(TransactionStatus::Unknown);
        };
        if !receipt.status() {
            return Ok(TransactionStatus::Failed);
        }
        let Some(height) = receipt.block_number else {
            return Ok(TransactionStatus::Confirming);
        };

        let latest = self.get_block_count().await?;
        if confirmations_at(latest, height) >= self.required_confirmations {
            Ok(TransactionStatus::Completed)
        } else {
            Ok(TransactionStatus::Confirming)
        }
    }

    /// Price of a plain transfer at the current gas price.
    async fn get_avg_fee(&self) -> Result<Decimal> {
        let gas_price = self
            .client
            .call("eth_gasPrice", |provider| async move { provider.get_gas_price().await })
            .await
            .map_err(|e| normalize_error(e, &[]))?;
        wei_to_ether(U256::from(gas_price) * U256::from(TRANSFER_GAS))
    }

    async fn check_rpc_node(&self, currency: &str) -> Result<bool> {
        match self.client.get_latest_block().await {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!("{} rpc node {} is unreachable: {:#}", currency, self.client.get_current_url(), e);
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> EvmGateway {
        let client = RpcClient::new(&["http://127.0.0.1:1".to_string()])
            .unwrap()
            .with_max_retries(0);
        EvmGateway::new(client, Some("testnet".to_string()), 12)
    }

    #[test]
    fn converts_between_wei_and_ether() {
        let one_and_half = U256::from(1_500_000_000_000_000_000u128);
        assert_eq!(wei_to_ether(one_and_half).unwrap(), Decimal::new(15, 1));
        assert_eq!(ether_to_wei(Decimal::new(15, 1)).unwrap(), one_and_half);
        assert_eq!(wei_to_ether(U256::from(21_000u64)).unwrap(), Decimal::new(21_000, 18));
        assert!(ether_to_wei(Decimal::new(-1, 0)).is_err());
    }

    #[test]
    fn transfer_entries_debit_sender_and_credit_recipient() {
        let transfer = EtherTransfer {
            from: "0xfrom".to_string(),
            to: Some("0xto".to_string()),
            value: Decimal::new(2, 0),
            fee: Decimal::ZERO,
        };

        let entries = transfer.extract_entries("0xtx");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].address, "0xfrom");
        assert_eq!(entries[0].amount, Decimal::new(-2, 0));
        assert_eq!(entries[1].address, "0xto");
        assert_eq!(entries[1].amount, Decimal::new(2, 0));
    }

    #[test]
    fn fee_is_gas_used_at_effective_price() {
        // 21000 gas at 2 gwei
        assert_eq!(paid_fee(21_000, 2_000_000_000).unwrap(), Decimal::new(42, 6));
        assert_eq!(paid_fee(0, 2_000_000_000).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn reverted_transaction_is_flagged_failed() {
        let header = BlockHeader {
            hash: "0xblock".to_string(),
            number: 9,
            timestamp: 1_700_000_000,
        };
        let transfer = || EtherTransfer {
            from: "0xfrom".to_string(),
            to: Some("0xto".to_string()),
            value: Decimal::ONE,
            fee: Decimal::new(42, 6),
        };

        let reverted = settled_transaction("0xtx", header.clone(), transfer(), false);
        let mined = settled_transaction("0xtx", header, transfer(), true);

        assert!(reverted.is_failed);
        assert!(!mined.is_failed);
        assert_eq!(reverted.network_fee(), Decimal::new(42, 6));
    }

    #[test]
    fn contract_creation_and_zero_value_carry_no_entries() {
        let creation = EtherTransfer {
            from: "0xfrom".to_string(),
            to: None,
            value: Decimal::ONE,
            fee: Decimal::ZERO,
        };
        let call = EtherTransfer {
            from: "0xfrom".to_string(),
            to: Some("0xto".to_string()),
            value: Decimal::ZERO,
            fee: Decimal::ZERO,
        };

        assert!(creation.extract_entries("0xtx").is_empty());
        assert!(call.extract_entries("0xtx").is_empty());
    }

    #[test]
    fn created_accounts_are_valid_keys() {
        let account = gateway().create_account().unwrap();

        let key_hex = account.private_key.trim_start_matches("0x");
        let signer: PrivateKeySigner = key_hex.parse().unwrap();
        assert_eq!(signer.address().to_string(), account.address);
    }

    #[tokio::test]
    async fn signs_a_prepared_request_offline() {
        let gateway = gateway();
        let account = gateway.create_account().unwrap();
        let request = TransactionRequest::default()
            .with_from(Address::from_str(&account.address).unwrap())
            .with_to(Address::ZERO)
            .with_value(U256::from(1u64))
            .with_nonce(0)
            .with_gas_price(1_000_000_000)
            .with_gas_limit(TRANSFER_GAS)
            .with_chain_id(1);
        let unsigned = serde_json::to_string(&request).unwrap();

        let signed = gateway
            .sign_raw_tx_by_single_private_key(&unsigned, &account.private_key)
            .await
            .unwrap();

        assert!(signed.signed_raw.starts_with("0x"));
        assert_eq!(signed.txid.len(), 66);
        assert_eq!(signed.unsigned_raw, unsigned);
    }

    #[tokio::test]
    async fn multi_output_transfers_are_rejected() {
        let outputs = vec![
            TransferOutput {
                to_address: format!("{}", Address::ZERO),
                amount: Decimal::ONE,
            };
            2
        ];

        let err = gateway()
            .create_raw_transaction(&format!("{}", Address::ZERO), &outputs, None)
            .await
            .unwrap_err();

        assert_eq!(EngineError::classify(&err).map(|e| e.code()), Some(2818));
    }

    #[tokio::test]
    async fn unreachable_node_fails_the_probe() {
        assert!(!gateway().check_rpc_node("eth").await.unwrap());
    }
}
