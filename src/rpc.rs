// src/rpc.rs
use std::sync::Arc;

use ethers::signers::LocalWallet;
use ethers::types::H256;
use jsonrpsee::core::{async_trait, RpcResult};
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::types::error::{ErrorObject, ErrorObjectOwned, INVALID_PARAMS_CODE};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::error::TransferError;
use crate::transfer::SponsoredTransfer;
use crate::types::{Settlement, TransferRequest};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferResponse {
    pub user_op_hash: H256,
    pub transaction_hash: H256,
}

impl From<Settlement> for TransferResponse {
    fn from(settlement: Settlement) -> Self {
        Self {
            user_op_hash: settlement.user_op_hash,
            transaction_hash: settlement.transaction_hash,
        }
    }
}

#[rpc(server, namespace = "transfer")]
pub trait TransferRpc {
    /// Sends `amount` base units of the configured token to `recipient`,
    /// with gas paid through the paymaster.
    #[method(name = "send")]
    async fn send(&self, recipient: String, amount: String) -> RpcResult<TransferResponse>;
}

pub struct TransferRpcImpl {
    transfer: Arc<SponsoredTransfer<LocalWallet>>,
}

impl TransferRpcImpl {
    pub fn new(transfer: Arc<SponsoredTransfer<LocalWallet>>) -> Self {
        Self { transfer }
    }
}

pub fn error_code(error: &TransferError) -> i32 {
    match error {
        TransferError::InvalidInput(_) => INVALID_PARAMS_CODE,
        TransferError::AuthorizationDenied(_) => -32001,
        TransferError::ProviderUnavailable(_) => -32002,
        TransferError::SubmissionRejected(_) => -32003,
        TransferError::ExecutionReverted { .. } => -32004,
        TransferError::Timeout(_) => -32005,
    }
}

fn to_rpc_error(error: &TransferError) -> ErrorObjectOwned {
    ErrorObject::owned(
        error_code(error),
        format!("Transfer error: {}", error),
        Some(json!({ "kind": error.kind() })),
    )
}

#[async_trait]
impl TransferRpcServer for TransferRpcImpl {
    async fn send(&self, recipient: String, amount: String) -> RpcResult<TransferResponse> {
        debug!("Received transfer request to {} for {}", recipient, amount);

        let request = TransferRequest::parse(&recipient, &amount).map_err(|e| to_rpc_error(&e))?;
        // The transfer already logs its failure kind.
        let settlement = self
            .transfer
            .transfer(request.recipient, request.amount)
            .await
            .map_err(|e| to_rpc_error(&e))?;

        info!("Transfer to {:?} settled", request.recipient);
        Ok(settlement.into())
    }
}
