// src/assembler.rs
use std::sync::Arc;

use ethers::abi::AbiEncode;
use ethers::signers::Signer;
use ethers::types::{Address, U256};
use tracing::{debug, info, warn};

use crate::account::SmartAccount;
use crate::bundler::Bundler;
use crate::chain::{ChainReader, TransferCall};
use crate::error::TransferError;
use crate::fees::FeeEstimator;
use crate::paymaster::{PaymasterDataSource, SponsorshipContext};
use crate::types::{Call, OperationHandle, TransferRequest, UserOperation};

/// Builds, signs and submits the user operation for one token transfer.
pub struct UserOperationAssembler<S> {
    account: Arc<SmartAccount<S>>,
    token: Address,
    chain: Arc<dyn ChainReader>,
    bundler: Arc<dyn Bundler>,
    paymaster: Arc<dyn PaymasterDataSource>,
    fees: Arc<dyn FeeEstimator>,
}

impl<S: Signer + 'static> UserOperationAssembler<S> {
    pub fn new(
        account: Arc<SmartAccount<S>>,
        token: Address,
        chain: Arc<dyn ChainReader>,
        bundler: Arc<dyn Bundler>,
        paymaster: Arc<dyn PaymasterDataSource>,
        fees: Arc<dyn FeeEstimator>,
    ) -> Self {
        Self {
            account,
            token,
            chain,
            bundler,
            paymaster,
            fees,
        }
    }

    pub fn account(&self) -> &SmartAccount<S> {
        &self.account
    }

    /// `token.transfer(recipient, amount)`
    pub fn transfer_call(&self, request: &TransferRequest) -> Call {
        Call {
            to: self.token,
            value: U256::zero(),
            data: TransferCall {
                to: request.recipient,
                amount: request.amount,
            }
            .encode()
            .into(),
        }
    }

    /// Produces a fully signed operation. Input is checked before any
    /// network call.
    pub async fn assemble(&self, recipient: Address, amount: U256) -> Result<UserOperation, TransferError> {
        let request = TransferRequest::new(recipient, amount)?;
        let sender = self.account.address();
        let entry_point = self.account.entry_point();

        let call_data = self.account.encode_calls(&[self.transfer_call(&request)])?;
        let context = SponsorshipContext {
            sender,
            token: self.token,
            transfer_amount: request.amount,
        };

        let (fees, sponsorship, nonce) = tokio::try_join!(
            self.fees.estimate(),
            self.paymaster.paymaster_data(&context),
            self.chain.account_nonce(entry_point, sender),
        )?;

        let mut op = UserOperation {
            sender,
            nonce,
            call_data,
            signature: SmartAccount::<S>::stub_signature(),
            ..Default::default()
        };
        op.apply_fees(&fees);
        op.apply_paymaster(&sponsorship);

        let gas = self.bundler.estimate_user_operation_gas(&op, entry_point).await?;
        op.apply_gas(&gas);

        if !sponsorship.is_final {
            debug!("Paymaster data not final, requesting it again after estimation");
            let sponsorship = self.paymaster.paymaster_data(&context).await?;
            op.apply_paymaster(&sponsorship);
        }

        op.signature = self.account.sign_user_operation(&op).await?;
        Ok(op)
    }

    pub async fn submit(&self, recipient: Address, amount: U256) -> Result<OperationHandle, TransferError> {
        let op = self.assemble(recipient, amount).await?;
        let expected_hash = self.account.user_operation_hash(&op)?;
        let user_op_hash = self
            .bundler
            .send_user_operation(&op, self.account.entry_point())
            .await?;
        if user_op_hash != expected_hash {
            // Receipts are keyed by the bundler's hash, so keep it.
            warn!(
                "Bundler returned hash {:?}, expected {:?}",
                user_op_hash, expected_hash
            );
        }

        info!(
            "Submitted user operation {:?} from {:?} (nonce {})",
            user_op_hash, op.sender, op.nonce
        );

        Ok(OperationHandle {
            user_op_hash,
            sender: op.sender,
        })
    }
}
