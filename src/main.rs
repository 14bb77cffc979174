use anyhow::{Result, bail};
use clap::Parser;
use custody_engine::config::Config;
use custody_engine::context::EngineContext;
use custody_engine::crawler::{CrawlerManager, StaticProfile};
use custody_engine::evm::{self, RpcClient};
use custody_engine::gateway::GatewayRegistry;
use custody_engine::sqlite_hooks::SqliteCrawlerHooks;
use custody_engine::tokens::{ActiveCurrency, TokenCatalog};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "crawler", about = "Crawls ether deposits into SQLite")]
struct Args {
    /// First block crawled when nothing is stored yet
    #[arg(long, default_value_t = evm::DEFAULT_PROFILE.first_block)]
    first_block: u64,

    /// Confirmations a block needs before the cursor moves past it
    #[arg(long, default_value_t = evm::DEFAULT_PROFILE.required_confirmations)]
    confirmations: u64,

    /// Average block time in seconds
    #[arg(long, default_value_t = 12)]
    block_time: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    info!("Starting crawler");

    let config = Config::from_env()?;
    if config.currency != evm::CURRENCY {
        bail!("This crawler only serves {}, got {}", evm::CURRENCY, config.currency);
    }
    info!(
        "RPC URLs: {} endpoint(s) configured",
        config.json_rpc_urls.len()
    );

    let network = config.network.clone().unwrap_or_else(|| "mainnet".to_string());
    let catalog = TokenCatalog::new([evm::native_token(&network)]);
    let active = ActiveCurrency::build(&catalog, &config.currency, None, None)?;

    let client = RpcClient::new(&config.json_rpc_urls)?;
    let mut gateways = GatewayRegistry::new();
    evm::register(
        &mut gateways,
        client,
        config.network.clone(),
        args.confirmations,
    );

    let hooks = SqliteCrawlerHooks::open(&config.database_url)?;
    info!("Database initialized");

    let profile = StaticProfile {
        first_block: args.first_block,
        average_block_time: Duration::from_secs(args.block_time),
        required_confirmations: args.confirmations,
    };

    let ctx = EngineContext::new(config, catalog, active, gateways);
    let manager = CrawlerManager::new(ctx, Arc::new(profile), Arc::new(hooks));

    if let Err(e) = manager.start().await {
        error!("Crawler stopped: {:#}", e);
        return Err(e);
    }

    Ok(())
}
