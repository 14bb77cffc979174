use anyhow::{Context, Result};

const DEFAULT_DEPLOYMENT_ID: &str = "PP70ExC8Hr";

#[derive(Debug, Clone)]
pub struct Config {
    pub network: Option<String>,
    pub currency: String,
    pub tokens: Option<String>,
    pub force_crawl_block: Option<u64>,
    pub deployment_id: String,
    pub rabbitmq: RabbitMqConfig,
    pub json_rpc_urls: Vec<String>,
    pub database_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RabbitMqConfig {
    pub protocol: String,
    pub address: String,
    pub port: u16,
}

impl RabbitMqConfig {
    pub fn uri(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.address, self.port)
    }
}

impl Default for RabbitMqConfig {
    fn default() -> Self {
        Self {
            protocol: "amqp".to_string(),
            address: "127.0.0.1".to_string(),
            port: 5672,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup, so callers
    /// other than the process environment can supply values.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let force_crawl_block = match non_empty("FORCE_CRAWL_BLOCK") {
            Some(raw) => Some(
                raw.trim()
                    .parse::<u64>()
                    .context("FORCE_CRAWL_BLOCK must be a block number")?,
            ),
            None => None,
        };

        let defaults = RabbitMqConfig::default();
        let port = match non_empty("RABBITMQ_SERVER_PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .context("Invalid RABBITMQ_SERVER_PORT")?,
            None => defaults.port,
        };
        let rabbitmq = RabbitMqConfig {
            protocol: non_empty("RABBITMQ_SERVER_PROTOCOL").unwrap_or(defaults.protocol),
            address: non_empty("RABBITMQ_SERVER_ADDRESS").unwrap_or(defaults.address),
            port,
        };

        let json_rpc_urls = non_empty("JSON_RPC_URLS")
            .map(|urls| {
                urls.split(',')
                    .map(|u| u.trim().to_string())
                    .filter(|u| !u.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Config {
            network: non_empty("NETWORK"),
            currency: non_empty("CURRENCY")
                .map(|c| c.trim().to_lowercase())
                .unwrap_or_else(|| "eth".to_string()),
            tokens: non_empty("TOKENS"),
            force_crawl_block,
            deployment_id: non_empty("DEPLOYMENT_ID")
                .unwrap_or_else(|| DEFAULT_DEPLOYMENT_ID.to_string()),
            rabbitmq,
            json_rpc_urls,
            database_url: non_empty("DATABASE_URL")
                .unwrap_or_else(|| "sqlite:./crawler.db".to_string()),
        })
    }
}
