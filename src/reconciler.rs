// src/reconciler.rs
use std::sync::Arc;
use std::time::Duration;

use ethers::types::H256;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::bundler::Bundler;
use crate::error::TransferError;
use crate::types::{OperationHandle, Settlement, SettlementStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
enum ReconcileState {
    Submitted,
    Pending { polls: u32 },
    Included(Settlement),
    Failed { transaction_hash: H256, reason: String },
    TimedOut,
}

/// Waits for a submitted operation to land and turns the bundler receipt
/// into a settlement.
pub struct ReceiptReconciler {
    bundler: Arc<dyn Bundler>,
    poll_interval: Duration,
    timeout: Duration,
}

impl ReceiptReconciler {
    pub fn new(bundler: Arc<dyn Bundler>, poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            bundler,
            poll_interval,
            timeout,
        }
    }

    /// Polls until inclusion, revert or the timeout. Dropping the future
    /// stops waiting but does not withdraw the operation.
    pub async fn await_receipt(&self, handle: &OperationHandle) -> Result<Settlement, TransferError> {
        let deadline = Instant::now() + self.timeout;
        let mut state = ReconcileState::Submitted;

        loop {
            state = match state {
                ReconcileState::Submitted => self.poll(handle, deadline, 0).await?,
                ReconcileState::Pending { polls } => {
                    let wake = (Instant::now() + self.poll_interval).min(deadline);
                    sleep(wake.saturating_duration_since(Instant::now())).await;
                    self.poll(handle, deadline, polls).await?
                }
                ReconcileState::Included(settlement) => {
                    info!(
                        "User operation {:?} from {:?} included in {:?}",
                        settlement.user_op_hash, handle.sender, settlement.transaction_hash
                    );
                    return Ok(settlement);
                }
                ReconcileState::Failed {
                    transaction_hash,
                    reason,
                } => {
                    warn!(
                        "User operation {:?} from {:?} reverted in {:?}: {}",
                        handle.user_op_hash, handle.sender, transaction_hash, reason
                    );
                    return Err(TransferError::ExecutionReverted {
                        transaction_hash,
                        reason,
                    });
                }
                ReconcileState::TimedOut => {
                    warn!(
                        "User operation {:?} from {:?} not included after {:?}",
                        handle.user_op_hash, handle.sender, self.timeout
                    );
                    return Err(TransferError::Timeout(self.timeout));
                }
            };
        }
    }

    async fn poll(
        &self,
        handle: &OperationHandle,
        deadline: Instant,
        polls: u32,
    ) -> Result<ReconcileState, TransferError> {
        if Instant::now() >= deadline {
            return Ok(ReconcileState::TimedOut);
        }

        let receipt = match timeout_at(deadline, self.bundler.user_operation_receipt(handle.user_op_hash)).await {
            Ok(receipt) => receipt?,
            Err(_) => return Ok(ReconcileState::TimedOut),
        };

        Ok(match receipt {
            None => {
                debug!("User operation {:?} pending (poll {})", handle.user_op_hash, polls + 1);
                ReconcileState::Pending { polls: polls + 1 }
            }
            Some(receipt) if receipt.success => ReconcileState::Included(Settlement {
                user_op_hash: handle.user_op_hash,
                transaction_hash: receipt.receipt.transaction_hash,
                status: SettlementStatus::Included,
            }),
            Some(receipt) => ReconcileState::Failed {
                transaction_hash: receipt.receipt.transaction_hash,
                reason: receipt
                    .reason
                    .filter(|reason| !reason.is_empty())
                    .unwrap_or_else(|| "execution reverted".to_string()),
            },
        })
    }
}
