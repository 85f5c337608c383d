// src/config.rs
use std::time::Duration;

use clap::Args;
use ethers::types::{Address, U256};
use thiserror::Error;

use crate::paymaster::{SponsorshipPolicy, DEFAULT_PERMIT_ALLOWANCE};

pub const ARBITRUM_SEPOLIA_CHAIN_ID: u64 = 421614;
pub const ENTRY_POINT_V08: &str = "0x4337084D9E255Ff0702461CF8895CE9E3b5Ff108";
pub const PIMLICO_BUNDLER_TEMPLATE: &str = "https://public.pimlico.io/v2/{chain_id}/rpc";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} must be set to a non-zero address")]
    ZeroAddress(&'static str),

    #[error("token and paymaster addresses must differ")]
    SameTokenAndPaymaster,

    #[error("chain id must be non-zero")]
    ZeroChainId,

    #[error("invalid bundler url {0:?}")]
    BundlerUrl(String),

    #[error("permit allowance must be greater than zero")]
    ZeroAllowance,

    #[error("{0}")]
    Timing(String),
}

/// Settings shared by every subcommand. Each one falls back to an
/// environment variable, so a `.env` file is enough to run.
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    #[arg(long, env = "CHAIN_ID", default_value_t = ARBITRUM_SEPOLIA_CHAIN_ID)]
    pub chain_id: u64,

    #[arg(long, env = "ETH_RPC_URL", default_value = "https://sepolia-rollup.arbitrum.io/rpc")]
    pub eth_rpc_url: String,

    /// `{chain_id}` is substituted with the configured chain id.
    #[arg(long, env = "BUNDLER_URL", default_value = PIMLICO_BUNDLER_TEMPLATE)]
    pub bundler_url: String,

    #[arg(long, env = "TOKEN_ADDRESS")]
    pub token_address: Address,

    #[arg(long, env = "PAYMASTER_ADDRESS")]
    pub paymaster_address: Address,

    #[arg(long, env = "ENTRY_POINT_ADDRESS", default_value = ENTRY_POINT_V08)]
    pub entry_point_address: Address,

    #[arg(long, env = "OWNER_PRIVATE_KEY", hide_env_values = true)]
    pub private_key: String,

    /// Token base units the paymaster may pull for fees.
    #[arg(long, env = "PERMIT_ALLOWANCE", default_value_t = DEFAULT_PERMIT_ALLOWANCE)]
    pub permit_allowance: u64,

    #[arg(long, env = "RPC_TIMEOUT_SECS", default_value_t = 15)]
    pub rpc_timeout_secs: u64,

    #[arg(long, env = "RECEIPT_TIMEOUT_SECS", default_value_t = 120)]
    pub receipt_timeout_secs: u64,

    #[arg(long, env = "POLL_INTERVAL_MS", default_value_t = 2_000)]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub chain_id: u64,
    pub eth_rpc_url: String,
    pub bundler_url: String,
    pub token: Address,
    pub paymaster: Address,
    pub entry_point: Address,
    pub sponsorship: SponsorshipPolicy,
    pub rpc_timeout: Duration,
    pub receipt_timeout: Duration,
    pub poll_interval: Duration,
}

impl Config {
    pub fn from_args(args: &ConfigArgs) -> Result<Self, ConfigError> {
        let config = Self {
            chain_id: args.chain_id,
            eth_rpc_url: args.eth_rpc_url.clone(),
            bundler_url: render_bundler_url(&args.bundler_url, args.chain_id)?,
            token: args.token_address,
            paymaster: args.paymaster_address,
            entry_point: args.entry_point_address,
            sponsorship: SponsorshipPolicy::with_allowance(U256::from(args.permit_allowance)),
            rpc_timeout: Duration::from_secs(args.rpc_timeout_secs),
            receipt_timeout: Duration::from_secs(args.receipt_timeout_secs),
            poll_interval: Duration::from_millis(args.poll_interval_ms),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chain_id == 0 {
            return Err(ConfigError::ZeroChainId);
        }
        for (name, address) in [
            ("token address", self.token),
            ("paymaster address", self.paymaster),
            ("entry point address", self.entry_point),
        ] {
            if address.is_zero() {
                return Err(ConfigError::ZeroAddress(name));
            }
        }
        if self.token == self.paymaster {
            return Err(ConfigError::SameTokenAndPaymaster);
        }
        if self.sponsorship.permit_allowance.is_zero() {
            return Err(ConfigError::ZeroAllowance);
        }
        if self.rpc_timeout.is_zero() || self.receipt_timeout.is_zero() || self.poll_interval.is_zero() {
            return Err(ConfigError::Timing("timeouts and poll interval must be positive".to_string()));
        }
        if self.poll_interval >= self.receipt_timeout {
            return Err(ConfigError::Timing(format!(
                "poll interval {:?} must be shorter than receipt timeout {:?}",
                self.poll_interval, self.receipt_timeout
            )));
        }
        Ok(())
    }
}

fn render_bundler_url(template: &str, chain_id: u64) -> Result<String, ConfigError> {
    let url = template.replace("{chain_id}", &chain_id.to_string());
    if url.contains('{') || !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ConfigError::BundlerUrl(url));
    }
    Ok(url)
}
