use super::Gateway;
use anyhow::{Result, anyhow};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Builds a gateway, for a token contract when an address is given or for
/// the native currency otherwise.
pub type GatewayFactory = Arc<dyn Fn(Option<&str>) -> Result<Arc<dyn Gateway>> + Send + Sync>;

/// Maps currency identifiers to gateway constructors and memoizes the
/// instances they build, so each adapter and its caches exist once.
#[derive(Default)]
pub struct GatewayRegistry {
    factories: HashMap<String, GatewayFactory>,
    instances: DashMap<String, Arc<dyn Gateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the constructor for a currency family (`eth`) or a token
    /// type (`erc20`).
    pub fn register<F>(&mut self, currency: impl Into<String>, factory: F)
    where
        F: Fn(Option<&str>) -> Result<Arc<dyn Gateway>> + Send + Sync + 'static,
    {
        self.factories
            .insert(currency.into().to_lowercase(), Arc::new(factory));
    }

    pub fn is_registered(&self, currency: &str) -> bool {
        self.factories.contains_key(&currency.to_lowercase())
    }

    /// Gateway of a native currency, keyed by its family.
    pub fn family_gateway(&self, family: &str) -> Result<Arc<dyn Gateway>> {
        self.resolve(family, family, None)
    }

    /// Gateway of a token contract, keyed by its contract address.
    pub fn token_gateway(&self, token_type: &str, contract_address: &str) -> Result<Arc<dyn Gateway>> {
        self.resolve(contract_address, token_type, Some(contract_address))
    }

    fn resolve(
        &self,
        key: &str,
        currency: &str,
        contract_address: Option<&str>,
    ) -> Result<Arc<dyn Gateway>> {
        if let Some(existing) = self.instances.get(key) {
            return Ok(existing.value().clone());
        }

        let factory = self
            .factories
            .get(&currency.to_lowercase())
            .ok_or_else(|| anyhow!("No gateway registered for currency {}", currency))?;

        let entry = self.instances.entry(key.to_string());
        let gateway = entry.or_try_insert_with(|| {
            info!("Creating {} gateway for {}", currency, key);
            factory(contract_address)
        })?;
        Ok(gateway.value().clone())
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}
