// src/paymaster.rs
use std::sync::Arc;

use async_trait::async_trait;
use ethers::signers::Signer;
use ethers::types::{Address, Bytes, U256};
use tracing::info;

use crate::account::SmartAccount;
use crate::error::TransferError;
use crate::permit::PermitSigner;
use crate::types::PaymasterFields;

/// Paymaster mode byte for "pay fees with a permit".
pub const PERMIT_MODE: u8 = 0;
/// Worst-case gas for the paymaster's validation step.
pub const PAYMASTER_VERIFICATION_GAS_LIMIT: u64 = 200_000;
/// Worst-case gas for the paymaster's post-operation fee pull.
pub const PAYMASTER_POST_OP_GAS_LIMIT: u64 = 15_000;
/// 10 units of a 6-decimal token.
pub const DEFAULT_PERMIT_ALLOWANCE: u64 = 10_000_000;

/// `mode || token || permit amount`, ahead of the signature.
pub const HEADER_LEN: usize = 1 + 20 + 32;

/// How much the paymaster is allowed to pull and how much gas it is granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SponsorshipPolicy {
    pub mode: u8,
    pub permit_allowance: U256,
    pub verification_gas_limit: U256,
    pub post_op_gas_limit: U256,
}

impl SponsorshipPolicy {
    pub fn with_allowance(permit_allowance: U256) -> Self {
        Self {
            mode: PERMIT_MODE,
            permit_allowance,
            verification_gas_limit: U256::from(PAYMASTER_VERIFICATION_GAS_LIMIT),
            post_op_gas_limit: U256::from(PAYMASTER_POST_OP_GAS_LIMIT),
        }
    }

    /// Amount authorized in the permit for a transfer of `transfer_amount`.
    ///
    /// The permit only pays gas, so the allowance is a fixed fee ceiling and
    /// does not grow with the transfer itself. The paymaster reverts if the
    /// actual fee exceeds it.
    pub fn allowance_for(&self, _transfer_amount: U256) -> U256 {
        self.permit_allowance
    }
}

impl Default for SponsorshipPolicy {
    fn default() -> Self {
        Self::with_allowance(U256::from(DEFAULT_PERMIT_ALLOWANCE))
    }
}

/// What the paymaster is asked to sponsor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SponsorshipContext {
    pub sender: Address,
    pub token: Address,
    pub transfer_amount: U256,
}

/// Produces paymaster data on demand for one user operation.
#[async_trait]
pub trait PaymasterDataSource: Send + Sync {
    async fn paymaster_data(
        &self,
        context: &SponsorshipContext,
    ) -> Result<PaymasterFields, TransferError>;
}

/// Packs `mode || token || permitAmount || signature`, the layout the
/// paymaster contract decodes.
pub fn encode_paymaster_data(mode: u8, token: Address, permit_amount: U256, signature: &[u8]) -> Bytes {
    let mut data = Vec::with_capacity(HEADER_LEN + signature.len());
    data.push(mode);
    data.extend_from_slice(token.as_bytes());

    let mut amount = [0u8; 32];
    permit_amount.to_big_endian(&mut amount);
    data.extend_from_slice(&amount);

    data.extend_from_slice(signature);
    Bytes::from(data)
}

/// Sponsorship paid in tokens: every request signs a fresh permit for the
/// paymaster and packs it.
pub struct PermitPaymaster<S> {
    account: Arc<SmartAccount<S>>,
    permits: PermitSigner,
    token: Address,
    paymaster: Address,
    policy: SponsorshipPolicy,
}

impl<S: Signer + 'static> PermitPaymaster<S> {
    pub fn new(
        account: Arc<SmartAccount<S>>,
        permits: PermitSigner,
        token: Address,
        paymaster: Address,
        policy: SponsorshipPolicy,
    ) -> Self {
        Self {
            account,
            permits,
            token,
            paymaster,
            policy,
        }
    }
}

#[async_trait]
impl<S: Signer + 'static> PaymasterDataSource for PermitPaymaster<S> {
    async fn paymaster_data(
        &self,
        context: &SponsorshipContext,
    ) -> Result<PaymasterFields, TransferError> {
        if context.sender != self.account.address() {
            return Err(TransferError::AuthorizationDenied(format!(
                "paymaster signs for {:?}, not {:?}",
                self.account.address(),
                context.sender
            )));
        }

        if context.token != self.token {
            return Err(TransferError::AuthorizationDenied(format!(
                "paymaster is paid in {:?}, not {:?}",
                self.token, context.token
            )));
        }

        let permit_amount = self.policy.allowance_for(context.transfer_amount);
        let signature = self
            .permits
            .sign(self.token, &self.account, self.paymaster, permit_amount)
            .await?;

        let paymaster_data =
            encode_paymaster_data(self.policy.mode, self.token, permit_amount, &signature);
        info!(
            "Built paymaster data for {:?} ({} bytes, allowance {})",
            context.sender,
            paymaster_data.len(),
            permit_amount
        );

        Ok(PaymasterFields {
            paymaster: self.paymaster,
            paymaster_data,
            paymaster_verification_gas_limit: self.policy.verification_gas_limit,
            paymaster_post_op_gas_limit: self.policy.post_op_gas_limit,
            is_final: true,
        })
    }
}
