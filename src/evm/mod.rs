//! Reference adapter for Ethereum-compatible chains.

pub mod gateway;
pub mod rpc;

pub use gateway::{EvmGateway, ether_to_wei, wei_to_ether};
pub use rpc::RpcClient;

use crate::crawler::StaticProfile;
use crate::gateway::{Gateway, GatewayRegistry};
use crate::tokens::TokenInfo;
use anyhow::bail;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;

pub const CURRENCY: &str = "eth";

pub const DEFAULT_PROFILE: StaticProfile = StaticProfile {
    first_block: 0,
    average_block_time: Duration::from_secs(12),
    required_confirmations: 12,
};

/// Catalog entry for native ether on `network`.
pub fn native_token(network: &str) -> TokenInfo {
    TokenInfo {
        symbol: CURRENCY.to_string(),
        family: CURRENCY.to_string(),
        token_type: CURRENCY.to_string(),
        network_symbol: CURRENCY.to_string(),
        contract_address: None,
        network: network.to_string(),
        decimal: 18,
        precision: 8,
        minimum_deposit: Decimal::ZERO,
    }
}

/// Registers the native ether gateway. Token contracts are not handled by
/// this adapter.
pub fn register(
    registry: &mut GatewayRegistry,
    client: RpcClient,
    network: Option<String>,
    required_confirmations: u64,
) {
    registry.register(CURRENCY, move |contract_address| {
        if let Some(address) = contract_address {
            bail!("{} gateway does not serve token contract {}", CURRENCY, address);
        }
        let gateway = EvmGateway::new(client.clone(), network.clone(), required_confirmations);
        Ok(Arc::new(gateway) as Arc<dyn Gateway>)
    });
}
