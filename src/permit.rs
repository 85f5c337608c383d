// src/permit.rs
use std::convert::Infallible;
use std::sync::Arc;

use ethers::abi::{encode, Token};
use ethers::signers::Signer;
use ethers::types::transaction::eip712::{EIP712Domain, Eip712};
use ethers::types::{Address, Bytes, U256};
use ethers::utils::keccak256;
use tracing::debug;

use crate::account::SmartAccount;
use crate::chain::{ChainReader, PermitDomain};
use crate::error::TransferError;

const PERMIT_TYPE: &str =
    "Permit(address owner,address spender,uint256 value,uint256 nonce,uint256 deadline)";

/// EIP-2612 permit message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permit {
    pub owner: Address,
    pub spender: Address,
    pub value: U256,
    pub nonce: U256,
    pub deadline: U256,
    pub domain: PermitDomain,
}

impl Permit {
    /// The paymaster redeems the permit with the maximum deadline, since the
    /// paymaster data carries no deadline of its own.
    pub fn unbounded(
        owner: Address,
        spender: Address,
        value: U256,
        nonce: U256,
        domain: PermitDomain,
    ) -> Self {
        Self {
            owner,
            spender,
            value,
            nonce,
            deadline: U256::MAX,
            domain,
        }
    }
}

impl Eip712 for Permit {
    type Error = Infallible;

    fn domain(&self) -> Result<EIP712Domain, Self::Error> {
        Ok(EIP712Domain {
            name: Some(self.domain.name.clone()),
            version: Some(self.domain.version.clone()),
            chain_id: Some(U256::from(self.domain.chain_id)),
            verifying_contract: Some(self.domain.verifying_contract),
            salt: None,
        })
    }

    fn type_hash() -> Result<[u8; 32], Self::Error> {
        Ok(keccak256(PERMIT_TYPE))
    }

    fn struct_hash(&self) -> Result<[u8; 32], Self::Error> {
        Ok(keccak256(encode(&[
            Token::FixedBytes(Self::type_hash()?.to_vec()),
            Token::Address(self.owner),
            Token::Address(self.spender),
            Token::Uint(self.value),
            Token::Uint(self.nonce),
            Token::Uint(self.deadline),
        ])))
    }
}

/// Produces off-chain permit signatures for a smart account.
pub struct PermitSigner {
    chain: Arc<dyn ChainReader>,
}

impl PermitSigner {
    pub fn new(chain: Arc<dyn ChainReader>) -> Self {
        Self { chain }
    }

    /// Signs a permit letting `spender` pull up to `amount` of `token` from
    /// the account, bound to the token's current nonce.
    pub async fn sign<S: Signer + 'static>(
        &self,
        token: Address,
        owner: &SmartAccount<S>,
        spender: Address,
        amount: U256,
    ) -> Result<Bytes, TransferError> {
        if amount.is_zero() {
            return Err(TransferError::InvalidInput(
                "permit amount must be greater than zero".to_string(),
            ));
        }

        let (domain, nonce) = tokio::try_join!(
            self.chain.permit_domain(token),
            self.chain.permit_nonce(token, owner.address()),
        )?;

        debug!(
            "Signing permit for {:?}: spender {:?}, value {}, nonce {}",
            owner.address(),
            spender,
            amount,
            nonce
        );

        let permit = Permit::unbounded(owner.address(), spender, amount, nonce, domain);
        owner.sign_typed_data(&permit).await
    }
}
