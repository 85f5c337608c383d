// src/fees.rs
use std::sync::Arc;

use async_trait::async_trait;
use ethers::types::U256;
use tracing::debug;

use crate::bundler::{Bundler, GAS_PRICE_METHOD};
use crate::error::TransferError;
use crate::types::{FeeQuote, GasPriceTier, GasPriceTiers};

/// Supplies fee fields for a user operation.
#[async_trait]
pub trait FeeEstimator: Send + Sync {
    async fn estimate(&self) -> Result<FeeQuote, TransferError>;
}

/// Asks the bundler for its gas price tiers and takes the standard one.
/// Queried on every call, fees are never cached.
pub struct BundlerFeeEstimator {
    bundler: Arc<dyn Bundler>,
}

impl BundlerFeeEstimator {
    pub fn new(bundler: Arc<dyn Bundler>) -> Self {
        Self { bundler }
    }
}

#[async_trait]
impl FeeEstimator for BundlerFeeEstimator {
    async fn estimate(&self) -> Result<FeeQuote, TransferError> {
        let tiers = self.bundler.gas_price_tiers().await?;
        let quote = standard_tier(&tiers)?;
        debug!(
            "Standard fee tier: maxFeePerGas {}, maxPriorityFeePerGas {}",
            quote.max_fee_per_gas, quote.max_priority_fee_per_gas
        );
        Ok(quote)
    }
}

pub fn standard_tier(tiers: &GasPriceTiers) -> Result<FeeQuote, TransferError> {
    let GasPriceTier {
        max_fee_per_gas,
        max_priority_fee_per_gas,
    } = tiers.standard.as_ref().ok_or_else(|| {
        TransferError::ProviderUnavailable(format!("{GAS_PRICE_METHOD}: no standard tier"))
    })?;

    Ok(FeeQuote {
        max_fee_per_gas: packable(
            "maxFeePerGas",
            parse_hex_quantity("maxFeePerGas", max_fee_per_gas)?,
        )?,
        max_priority_fee_per_gas: packable(
            "maxPriorityFeePerGas",
            parse_hex_quantity("maxPriorityFeePerGas", max_priority_fee_per_gas)?,
        )?,
    })
}

/// Fee and gas limit fields travel as `uint128` halves of a packed word.
/// A bundler quote outside that range is a broken payload.
pub fn packable(field: &str, value: U256) -> Result<U256, TransferError> {
    if value > U256::from(u128::MAX) {
        return Err(TransferError::ProviderUnavailable(format!(
            "{field} {value} does not fit in uint128"
        )));
    }
    Ok(value)
}

/// Converts a `0x`-prefixed JSON-RPC quantity into a `U256`.
pub fn parse_hex_quantity(field: &str, value: &str) -> Result<U256, TransferError> {
    let malformed = || {
        TransferError::ProviderUnavailable(format!("{field} is not a hex quantity: {value:?}"))
    };

    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .ok_or_else(malformed)?;
    if digits.is_empty() || digits.len() > 64 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(malformed());
    }
    U256::from_str_radix(digits, 16).map_err(|_| malformed())
}
