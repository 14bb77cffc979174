use crate::config::Config;
use crate::gateway::{Gateway, GatewayRegistry};
use crate::tokens::{ActiveCurrency, TokenCatalog};
use anyhow::Result;
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

/// In-memory resume points, one per crawler manager instance.
#[derive(Debug, Default)]
pub struct CursorRegistry {
    cursors: DashMap<Uuid, u64>,
}

impl CursorRegistry {
    pub fn get(&self, id: &Uuid) -> Option<u64> {
        self.cursors.get(id).map(|c| *c.value())
    }

    pub fn set(&self, id: Uuid, block: u64) {
        self.cursors.insert(id, block);
    }
}

/// Everything a crawler or worker needs from the running process.
pub struct EngineContext {
    pub config: Config,
    pub catalog: TokenCatalog,
    pub active: ActiveCurrency,
    pub gateways: GatewayRegistry,
    pub cursors: CursorRegistry,
}

impl EngineContext {
    pub fn new(
        config: Config,
        catalog: TokenCatalog,
        active: ActiveCurrency,
        gateways: GatewayRegistry,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            catalog,
            active,
            gateways,
            cursors: CursorRegistry::default(),
        })
    }

    /// Gateway for `symbol`: a token gateway when the symbol names a token
    /// contract, the family gateway otherwise.
    pub fn gateway(&self, symbol: Option<&str>) -> Result<Arc<dyn Gateway>> {
        let contract = match symbol {
            Some(symbol) => self.catalog.by_symbol(symbol)?.contract_address.clone(),
            None => None,
        };
        match contract {
            Some(address) => self
                .gateways
                .token_gateway(&self.active.token_type, &address),
            None => self.gateways.family_gateway(&self.active.family),
        }
    }

    pub fn deployment_id(&self) -> &str {
        &self.config.deployment_id
    }

    pub fn token_symbols_builder(&self) -> &str {
        &self.active.tokens.builder
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::gateway::testing::MockGateway;
    use crate::tokens::testing::catalog;

    pub fn config() -> Config {
        Config::from_lookup(|key| match key {
            "DEPLOYMENT_ID" => Some("D".to_string()),
            "NETWORK" => Some("testnet".to_string()),
            _ => None,
        })
        .expect("test config")
    }

    /// A context for the native `eth` currency whose family gateway is `gateway`.
    pub fn context_with(gateway: Arc<MockGateway>, config: Config) -> Arc<EngineContext> {
        let catalog = catalog();
        let active = ActiveCurrency::build(&catalog, "eth", None, None).expect("eth is catalogued");
        let mut gateways = GatewayRegistry::new();
        gateways.register("eth", move |_| Ok(gateway.clone() as Arc<dyn Gateway>));
        EngineContext::new(config, catalog, active, gateways)
    }
}
