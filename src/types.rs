// src/types.rs
use std::str::FromStr;

use ethers::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Serialize};

use crate::error::TransferError;

/// EntryPoint v0.7/v0.8 user operation in its unpacked JSON-RPC form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperation {
    pub sender: Address,
    pub nonce: U256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factory: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factory_data: Option<Bytes>,
    pub call_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_verification_gas_limit: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_post_op_gas_limit: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_data: Option<Bytes>,
    pub signature: Bytes,
}

impl UserOperation {
    pub fn apply_fees(&mut self, fees: &FeeQuote) {
        self.max_fee_per_gas = fees.max_fee_per_gas;
        self.max_priority_fee_per_gas = fees.max_priority_fee_per_gas;
    }

    pub fn apply_paymaster(&mut self, fields: &PaymasterFields) {
        self.paymaster = Some(fields.paymaster);
        self.paymaster_data = Some(fields.paymaster_data.clone());
        self.paymaster_verification_gas_limit = Some(fields.paymaster_verification_gas_limit);
        self.paymaster_post_op_gas_limit = Some(fields.paymaster_post_op_gas_limit);
    }

    pub fn apply_gas(&mut self, gas: &GasEstimate) {
        self.call_gas_limit = gas.call_gas_limit;
        self.verification_gas_limit = gas.verification_gas_limit;
        self.pre_verification_gas = gas.pre_verification_gas;
    }
}

/// One call executed by the smart account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeQuote {
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

/// One tier of a bundler gas price suggestion, still hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasPriceTier {
    pub max_fee_per_gas: String,
    pub max_priority_fee_per_gas: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasPriceTiers {
    #[serde(default)]
    pub slow: Option<GasPriceTier>,
    #[serde(default)]
    pub standard: Option<GasPriceTier>,
    #[serde(default)]
    pub fast: Option<GasPriceTier>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasEstimate {
    pub pre_verification_gas: U256,
    pub verification_gas_limit: U256,
    pub call_gas_limit: U256,
    #[serde(default)]
    pub paymaster_verification_gas_limit: Option<U256>,
    #[serde(default)]
    pub paymaster_post_op_gas_limit: Option<U256>,
}

/// Sponsorship fields attached to a user operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymasterFields {
    pub paymaster: Address,
    pub paymaster_data: Bytes,
    pub paymaster_verification_gas_limit: U256,
    pub paymaster_post_op_gas_limit: U256,
    /// No second paymaster round after gas estimation.
    pub is_final: bool,
}

/// Returned by submission. Not a completion guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationHandle {
    pub user_op_hash: H256,
    pub sender: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleReceipt {
    pub transaction_hash: H256,
}

/// Response of `eth_getUserOperationReceipt`, trimmed to what settlement needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperationReceipt {
    pub user_op_hash: H256,
    pub success: bool,
    #[serde(default)]
    pub reason: Option<String>,
    pub receipt: BundleReceipt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SettlementStatus {
    Included,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    pub user_op_hash: H256,
    pub transaction_hash: H256,
    pub status: SettlementStatus,
}

/// A validated transfer request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferRequest {
    pub recipient: Address,
    pub amount: U256,
}

impl TransferRequest {
    pub fn new(recipient: Address, amount: U256) -> Result<Self, TransferError> {
        if recipient.is_zero() {
            return Err(TransferError::InvalidInput(
                "recipient cannot be the zero address".to_string(),
            ));
        }
        if amount.is_zero() {
            return Err(TransferError::InvalidInput(
                "amount must be greater than zero".to_string(),
            ));
        }
        Ok(Self { recipient, amount })
    }

    /// Parses user-supplied strings; `amount` is a decimal count of base units.
    pub fn parse(recipient: &str, amount: &str) -> Result<Self, TransferError> {
        let recipient = Address::from_str(recipient.trim()).map_err(|e| {
            TransferError::InvalidInput(format!("malformed recipient {recipient:?}: {e}"))
        })?;
        let amount = U256::from_dec_str(amount.trim()).map_err(|e| {
            TransferError::InvalidInput(format!("malformed amount {amount:?}: {e}"))
        })?;
        Self::new(recipient, amount)
    }
}
