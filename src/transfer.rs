// src/transfer.rs
use std::sync::Arc;

use ethers::signers::Signer;
use ethers::types::{Address, U256};
use tracing::{error, info, instrument};

use crate::account::SmartAccount;
use crate::assembler::UserOperationAssembler;
use crate::bundler::Bundler;
use crate::chain::ChainReader;
use crate::config::Config;
use crate::error::TransferError;
use crate::fees::BundlerFeeEstimator;
use crate::paymaster::PermitPaymaster;
use crate::permit::PermitSigner;
use crate::reconciler::ReceiptReconciler;
use crate::types::{OperationHandle, Settlement};

/// Gasless token transfer: submit a sponsored user operation and wait for
/// it to settle.
pub struct SponsoredTransfer<S> {
    assembler: UserOperationAssembler<S>,
    reconciler: ReceiptReconciler,
}

impl<S: Signer + 'static> SponsoredTransfer<S> {
    pub fn new(assembler: UserOperationAssembler<S>, reconciler: ReceiptReconciler) -> Self {
        Self {
            assembler,
            reconciler,
        }
    }

    /// Wires the permit paymaster and the bundler fee strategy for `owner`.
    pub fn from_config(
        config: &Config,
        owner: S,
        chain: Arc<dyn ChainReader>,
        bundler: Arc<dyn Bundler>,
    ) -> Self {
        let account = Arc::new(SmartAccount::simple_7702(
            Arc::new(owner),
            config.entry_point,
            config.chain_id,
        ));
        let paymaster = PermitPaymaster::new(
            account.clone(),
            PermitSigner::new(chain.clone()),
            config.token,
            config.paymaster,
            config.sponsorship,
        );
        let assembler = UserOperationAssembler::new(
            account,
            config.token,
            chain,
            bundler.clone(),
            Arc::new(paymaster),
            Arc::new(BundlerFeeEstimator::new(bundler.clone())),
        );
        let reconciler = ReceiptReconciler::new(bundler, config.poll_interval, config.receipt_timeout);
        Self::new(assembler, reconciler)
    }

    pub fn account_address(&self) -> Address {
        self.assembler.account().address()
    }

    pub async fn submit(&self, recipient: Address, amount: U256) -> Result<OperationHandle, TransferError> {
        self.assembler.submit(recipient, amount).await
    }

    pub async fn await_receipt(&self, handle: &OperationHandle) -> Result<Settlement, TransferError> {
        self.reconciler.await_receipt(handle).await
    }

    #[instrument(skip(self), fields(sender = ?self.account_address()))]
    pub async fn transfer(&self, recipient: Address, amount: U256) -> Result<Settlement, TransferError> {
        let outcome = async {
            let handle = self.submit(recipient, amount).await?;
            self.await_receipt(&handle).await
        }
        .await;

        match &outcome {
            Ok(settlement) => info!("Transfer settled in {:?}", settlement.transaction_hash),
            Err(e) => error!(kind = e.kind(), "Transfer failed: {}", e),
        }
        outcome
    }
}
