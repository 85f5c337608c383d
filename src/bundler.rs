// src/bundler.rs
use std::time::Duration;

use async_trait::async_trait;
use ethers::providers::{JsonRpcClient, Provider};
use ethers::types::{Address, H256};
use tracing::debug;

use crate::error::{bounded, TransferError};
use crate::fees::packable;
use crate::types::{GasEstimate, GasPriceTiers, UserOperation, UserOperationReceipt};

pub const GAS_PRICE_METHOD: &str = "pimlico_getUserOperationGasPrice";
pub const ESTIMATE_GAS_METHOD: &str = "eth_estimateUserOperationGas";
pub const SEND_METHOD: &str = "eth_sendUserOperation";
pub const RECEIPT_METHOD: &str = "eth_getUserOperationReceipt";

/// The account-abstraction bundler as seen by the pipeline.
#[async_trait]
pub trait Bundler: Send + Sync {
    /// Tiered fee suggestions, hex encoded as the bundler returns them.
    async fn gas_price_tiers(&self) -> Result<GasPriceTiers, TransferError>;

    async fn estimate_user_operation_gas(
        &self,
        op: &UserOperation,
        entry_point: Address,
    ) -> Result<GasEstimate, TransferError>;

    async fn send_user_operation(
        &self,
        op: &UserOperation,
        entry_point: Address,
    ) -> Result<H256, TransferError>;

    /// `None` until the operation is included.
    async fn user_operation_receipt(
        &self,
        user_op_hash: H256,
    ) -> Result<Option<UserOperationReceipt>, TransferError>;
}

/// JSON-RPC bundler client.
pub struct RpcBundler<P> {
    provider: Provider<P>,
    rpc_timeout: Duration,
}

impl<P: JsonRpcClient> RpcBundler<P> {
    pub fn new(provider: Provider<P>, rpc_timeout: Duration) -> Self {
        Self {
            provider,
            rpc_timeout,
        }
    }
}

#[async_trait]
impl<P: JsonRpcClient + 'static> Bundler for RpcBundler<P> {
    async fn gas_price_tiers(&self) -> Result<GasPriceTiers, TransferError> {
        bounded(self.rpc_timeout, GAS_PRICE_METHOD, async {
            self.provider
                .request::<_, GasPriceTiers>(GAS_PRICE_METHOD, ())
                .await
                .map_err(|e| TransferError::ProviderUnavailable(format!("{GAS_PRICE_METHOD}: {e}")))
        })
        .await
    }

    async fn estimate_user_operation_gas(
        &self,
        op: &UserOperation,
        entry_point: Address,
    ) -> Result<GasEstimate, TransferError> {
        let estimate = bounded(self.rpc_timeout, ESTIMATE_GAS_METHOD, async {
            self.provider
                .request::<_, GasEstimate>(ESTIMATE_GAS_METHOD, (op, entry_point))
                .await
                .map_err(|e| TransferError::from_bundler(ESTIMATE_GAS_METHOD, e))
        })
        .await?;

        packable("verificationGasLimit", estimate.verification_gas_limit)?;
        packable("callGasLimit", estimate.call_gas_limit)?;
        if let Some(limit) = estimate.paymaster_verification_gas_limit {
            packable("paymasterVerificationGasLimit", limit)?;
        }
        if let Some(limit) = estimate.paymaster_post_op_gas_limit {
            packable("paymasterPostOpGasLimit", limit)?;
        }

        debug!("Gas estimate for {:?}: {:?}", op.sender, estimate);
        Ok(estimate)
    }

    async fn send_user_operation(
        &self,
        op: &UserOperation,
        entry_point: Address,
    ) -> Result<H256, TransferError> {
        bounded(self.rpc_timeout, SEND_METHOD, async {
            self.provider
                .request::<_, H256>(SEND_METHOD, (op, entry_point))
                .await
                .map_err(|e| TransferError::from_bundler(SEND_METHOD, e))
        })
        .await
    }

    async fn user_operation_receipt(
        &self,
        user_op_hash: H256,
    ) -> Result<Option<UserOperationReceipt>, TransferError> {
        bounded(self.rpc_timeout, RECEIPT_METHOD, async {
            self.provider
                .request::<_, Option<UserOperationReceipt>>(RECEIPT_METHOD, [user_op_hash])
                .await
                .map_err(|e| TransferError::ProviderUnavailable(format!("{RECEIPT_METHOD}: {e}")))
        })
        .await
    }
}
