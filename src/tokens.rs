use anyhow::{Result, anyhow, bail};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

pub const TOKEN_SEPARATOR: char = ',';

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub symbol: String,
    pub family: String,
    pub token_type: String,
    pub network_symbol: String,
    pub contract_address: Option<String>,
    pub network: String,
    pub decimal: u32,
    pub precision: u32,
    pub minimum_deposit: Decimal,
}

/// Currencies and tokens known to this deployment.
#[derive(Debug, Clone, Default)]
pub struct TokenCatalog {
    by_symbol: HashMap<String, TokenInfo>,
    by_contract: HashMap<String, TokenInfo>,
}

impl TokenCatalog {
    pub fn new(tokens: impl IntoIterator<Item = TokenInfo>) -> Self {
        let mut catalog = Self::default();
        catalog.set_tokens(tokens);
        catalog
    }

    pub fn set_tokens(&mut self, tokens: impl IntoIterator<Item = TokenInfo>) {
        for token in tokens {
            if let Some(contract) = &token.contract_address {
                self.by_contract
                    .insert(contract.to_lowercase(), token.clone());
            }
            self.by_symbol.insert(token.symbol.clone(), token);
        }
    }

    pub fn by_symbol(&self, symbol: &str) -> Result<&TokenInfo> {
        self.by_symbol
            .get(symbol)
            .ok_or_else(|| anyhow!("Cannot find {} configuration", symbol.to_uppercase()))
    }

    pub fn by_contract(&self, token_type: &str, address: &str) -> Option<&TokenInfo> {
        self.by_contract
            .get(&address.to_lowercase())
            .filter(|token| token.token_type == token_type)
    }

    pub fn list_by_type(&self, token_type: &str) -> Vec<&TokenInfo> {
        let mut tokens: Vec<&TokenInfo> = self
            .by_symbol
            .values()
            .filter(|token| token.token_type == token_type)
            .collect();
        tokens.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        tokens
    }

    pub fn family_of_type(&self, token_type: &str) -> Option<&str> {
        self.list_by_type(token_type)
            .first()
            .map(|token| token.family.as_str())
    }
}

/// The token set a process is working on, plus the joined form used in
/// queue names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSymbols {
    pub symbols: Vec<String>,
    pub builder: String,
}

impl TokenSymbols {
    pub fn parse(builder: &str) -> Self {
        let builder = builder.trim().to_string();
        let symbols = builder
            .split(TOKEN_SEPARATOR)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        Self { symbols, builder }
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// The currency a process runs for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveCurrency {
    pub currency: String,
    pub token_type: String,
    pub family: String,
    pub tokens: TokenSymbols,
}

impl ActiveCurrency {
    /// Without a token type the process works on the native currency alone.
    /// With one, `TOKENS` picks the symbols or every catalogued token of
    /// that type is used.
    pub fn build(
        catalog: &TokenCatalog,
        currency: &str,
        token_type: Option<&str>,
        env_tokens: Option<&str>,
    ) -> Result<Self> {
        let Some(token_type) = token_type else {
            let token = catalog.by_symbol(currency)?;
            return Ok(Self {
                currency: currency.to_string(),
                token_type: token.token_type.clone(),
                family: token.family.clone(),
                tokens: TokenSymbols::parse(currency),
            });
        };

        let family = catalog
            .family_of_type(token_type)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Cannot find any {} token configuration", token_type))?;

        let tokens = match env_tokens.filter(|t| !t.trim().is_empty()) {
            Some(builder) => TokenSymbols::parse(builder),
            None => {
                warn!(
                    "Missing TOKENS env. Will use all {} tokens in currency table",
                    token_type.to_uppercase()
                );
                let symbols: Vec<String> = catalog
                    .list_by_type(token_type)
                    .into_iter()
                    .map(|t| t.symbol.clone())
                    .collect();
                if symbols.is_empty() {
                    bail!("Cannot find any {} token configuration", token_type);
                }
                TokenSymbols::parse(&symbols.join(","))
            }
        };

        Ok(Self {
            currency: currency.to_string(),
            token_type: token_type.to_string(),
            family,
            tokens,
        })
    }
}
