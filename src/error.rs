// src/error.rs
use std::time::Duration;

use ethers::providers::{ProviderError, RpcError};
use ethers::types::H256;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Authorization denied: {0}")]
    AuthorizationDenied(String),

    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Submission rejected by bundler: {0}")]
    SubmissionRejected(String),

    #[error("Execution reverted in transaction {transaction_hash:?}: {reason}")]
    ExecutionReverted {
        transaction_hash: H256,
        reason: String,
    },

    #[error("No receipt after {0:?}")]
    Timeout(Duration),
}

impl TransferError {
    /// Stable label for logs and RPC error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            TransferError::InvalidInput(_) => "invalid_input",
            TransferError::AuthorizationDenied(_) => "authorization_denied",
            TransferError::ProviderUnavailable(_) => "provider_unavailable",
            TransferError::SubmissionRejected(_) => "submission_rejected",
            TransferError::ExecutionReverted { .. } => "execution_reverted",
            TransferError::Timeout(_) => "timeout",
        }
    }

    /// Splits bundler failures into policy rejections (a JSON-RPC error
    /// object came back) and transport failures.
    pub fn from_bundler(method: &str, err: ProviderError) -> Self {
        match err.as_error_response() {
            Some(response) => TransferError::SubmissionRejected(format!(
                "{method}: {} (code {})",
                response.message, response.code
            )),
            None => TransferError::ProviderUnavailable(format!("{method}: {err}")),
        }
    }
}

/// Runs one RPC round-trip with a single bounded wait.
pub async fn bounded<T, F>(limit: Duration, what: &str, fut: F) -> Result<T, TransferError>
where
    F: std::future::Future<Output = Result<T, TransferError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(TransferError::ProviderUnavailable(format!(
            "{what} did not answer within {limit:?}"
        ))),
    }
}
