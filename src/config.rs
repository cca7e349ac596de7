//! Configuration management
//! Load settings from .env file

use alloy::primitives::Address;
use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::str::FromStr;

/// Engine configuration, loaded once at start-up. Read-only afterwards.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    // Network
    pub rpc_url: String,
    pub chain_id: u64,

    // AMM router (Uniswap-V2-family)
    pub router_address: Address,

    // Token registry seed
    pub native_symbol: String,
    pub wrapped_native_symbol: String,
    pub wrapped_native_address: Address,
    /// Additional ERC-20s as (symbol, address, decimals)
    pub tokens: Vec<(String, Address, u8)>,

    // Price upstream
    pub price_api_url: String,
    /// Coin id of the reference asset whose spot price drives triggers
    pub price_coin_id: String,
    pub price_ttl_secs: u64,
    pub price_timeout_secs: u64,

    // Scheduler
    pub tick_interval_secs: u64,
    pub health_interval_secs: u64,
    pub auto_restart: bool,
    pub shutdown_grace_secs: u64,

    // Persistence
    /// None = memory-only store (tests, dry runs)
    pub order_store_path: Option<PathBuf>,

    // Key vault
    pub keys_file: PathBuf,
}

pub fn load_config() -> Result<EngineConfig> {
    dotenv::dotenv().ok();

    let tokens = parse_tokens(&std::env::var("TOKENS").context("TOKENS not set")?)?;

    Ok(EngineConfig {
        rpc_url: std::env::var("RPC_URL").context("RPC_URL not set")?,
        chain_id: env_parse("CHAIN_ID")?,

        router_address: env_address("ROUTER_ADDRESS")?,

        native_symbol: env_or("NATIVE_SYMBOL", "XFI"),
        wrapped_native_symbol: env_or("WRAPPED_NATIVE_SYMBOL", "WXFI"),
        wrapped_native_address: env_address("WRAPPED_NATIVE_ADDRESS")?,
        tokens,

        price_api_url: env_or("PRICE_API_URL", "https://api.coingecko.com/api/v3"),
        price_coin_id: env_or("PRICE_COIN_ID", "crossfi-2"),
        price_ttl_secs: env_parse_or("PRICE_TTL_SECS", 1800)?,
        price_timeout_secs: env_parse_or("PRICE_TIMEOUT_SECS", 5)?,

        tick_interval_secs: env_parse_or("TICK_INTERVAL_SECS", 60)?,
        health_interval_secs: env_parse_or("HEALTH_INTERVAL_SECS", 300)?,
        auto_restart: env_parse_or("AUTO_RESTART", false)?,
        shutdown_grace_secs: env_parse_or("SHUTDOWN_GRACE_SECS", 30)?,

        order_store_path: std::env::var("ORDER_STORE_PATH").ok().map(PathBuf::from),

        keys_file: PathBuf::from(env_or("KEYS_FILE", "config/keys.json")),
    })
}

/// Parse the TOKENS env var: "USDC:0x...:6,WETH:0x...:18"
pub fn parse_tokens(spec: &str) -> Result<Vec<(String, Address, u8)>> {
    let mut out = Vec::new();
    for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let parts: Vec<&str> = entry.split(':').collect();
        if parts.len() != 3 {
            bail!("invalid token entry {entry:?}, expected SYMBOL:ADDRESS:DECIMALS");
        }
        let address = Address::from_str(parts[1])
            .with_context(|| format!("invalid address in token entry {entry:?}"))?;
        let decimals: u8 = parts[2]
            .parse()
            .with_context(|| format!("invalid decimals in token entry {entry:?}"))?;
        out.push((parts[0].to_string(), address, decimals));
    }
    if out.is_empty() {
        bail!("TOKENS declared no ERC-20 entries");
    }
    Ok(out)
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr>(key: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    std::env::var(key)
        .with_context(|| format!("{key} not set"))?
        .parse()
        .with_context(|| format!("{key} is not valid"))
}

fn env_parse_or<T: FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(v) => v.parse().with_context(|| format!("{key} is not valid")),
        Err(_) => Ok(default),
    }
}

fn env_address(key: &str) -> Result<Address> {
    Address::from_str(&std::env::var(key).with_context(|| format!("{key} not set"))?)
        .with_context(|| format!("{key} is not a valid address"))
}
