// src/account.rs
use std::convert::Infallible;
use std::sync::Arc;

use ethers::abi::{encode, AbiEncode, Token};
use ethers::prelude::*;
use ethers::types::transaction::eip712::{EIP712Domain, Eip712};
use ethers::utils::{id, keccak256};
use tracing::debug;

use crate::error::TransferError;
use crate::types::{Call, UserOperation};

abigen!(
    Simple7702Account,
    r#"[
        function execute(address target, uint256 value, bytes data) external
    ]"#
);

const EXECUTE_BATCH_SIGNATURE: &str = "executeBatch((address,uint256,bytes)[])";

const PACKED_USER_OPERATION_TYPE: &str = "PackedUserOperation(address sender,uint256 nonce,bytes initCode,bytes callData,bytes32 accountGasLimits,uint256 preVerificationGas,bytes32 gasFees,bytes paymasterAndData)";

/// Placeholder signature used while the bundler estimates gas. Recovers to a
/// non-owner address, so it can never validate.
const STUB_SIGNATURE: [u8; 65] = [
    // r
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xf0,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    // s
    0x7a, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa,
    0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa,
    // v
    0x1c,
];

/// A smart account controlled by a standard wallet key.
///
/// The account is an EIP-7702 delegation to the Simple7702 implementation,
/// so its address is the owner's own address.
#[derive(Debug)]
pub struct SmartAccount<S> {
    address: Address,
    owner: Arc<S>,
    entry_point: Address,
    chain_id: u64,
}

impl<S: Signer + 'static> SmartAccount<S> {
    pub fn simple_7702(owner: Arc<S>, entry_point: Address, chain_id: u64) -> Self {
        let address = owner.address();
        debug!("Derived smart account {:?}", address);
        Self {
            address,
            owner,
            entry_point,
            chain_id,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn entry_point(&self) -> Address {
        self.entry_point
    }

    /// Wraps calls into the account's execution entry.
    pub fn encode_calls(&self, calls: &[Call]) -> Result<Bytes, TransferError> {
        match calls {
            [] => Err(TransferError::InvalidInput("no calls to execute".to_string())),
            [call] => Ok(ExecuteCall {
                target: call.to,
                value: call.value,
                data: call.data.clone(),
            }
            .encode()
            .into()),
            calls => {
                let batch = Token::Array(
                    calls
                        .iter()
                        .map(|call| {
                            Token::Tuple(vec![
                                Token::Address(call.to),
                                Token::Uint(call.value),
                                Token::Bytes(call.data.to_vec()),
                            ])
                        })
                        .collect(),
                );
                let mut data = id(EXECUTE_BATCH_SIGNATURE).to_vec();
                data.extend(encode(&[batch]));
                Ok(data.into())
            }
        }
    }

    pub fn stub_signature() -> Bytes {
        Bytes::from(STUB_SIGNATURE.to_vec())
    }

    /// The hash the EntryPoint assigns to `op` on this account's chain.
    pub fn user_operation_hash(&self, op: &UserOperation) -> Result<H256, TransferError> {
        user_operation_hash(op, self.entry_point, self.chain_id)
    }

    pub async fn sign_user_operation(&self, op: &UserOperation) -> Result<Bytes, TransferError> {
        let typed = PackedUserOperation::new(op, self.entry_point, self.chain_id)?;
        self.sign_typed_data(&typed).await
    }

    /// Asks the owner wallet for an EIP-712 signature (`r || s || v`).
    pub async fn sign_typed_data<T: Eip712 + Send + Sync>(
        &self,
        payload: &T,
    ) -> Result<Bytes, TransferError> {
        let signature = self
            .owner
            .sign_typed_data(payload)
            .await
            .map_err(|e| TransferError::AuthorizationDenied(e.to_string()))?;
        Ok(signature.to_vec().into())
    }
}

/// EntryPoint v0.8 user operation hash: the EIP-712 digest of the packed
/// operation under the `ERC4337` domain.
pub fn user_operation_hash(
    op: &UserOperation,
    entry_point: Address,
    chain_id: u64,
) -> Result<H256, TransferError> {
    let typed = PackedUserOperation::new(op, entry_point, chain_id)?;
    let digest = typed.encode_eip712().unwrap_or_else(|never| match never {});
    Ok(H256::from(digest))
}

/// The packed on-chain form of a user operation, ready for EIP-712 hashing.
pub struct PackedUserOperation {
    sender: Address,
    nonce: U256,
    init_code: Vec<u8>,
    call_data: Bytes,
    account_gas_limits: [u8; 32],
    pre_verification_gas: U256,
    gas_fees: [u8; 32],
    paymaster_and_data: Vec<u8>,
    entry_point: Address,
    chain_id: u64,
}

impl PackedUserOperation {
    pub fn new(op: &UserOperation, entry_point: Address, chain_id: u64) -> Result<Self, TransferError> {
        let mut init_code = Vec::new();
        if let Some(factory) = op.factory {
            init_code.extend_from_slice(factory.as_bytes());
            if let Some(data) = &op.factory_data {
                init_code.extend_from_slice(data);
            }
        }

        let mut paymaster_and_data = Vec::new();
        if let Some(paymaster) = op.paymaster {
            paymaster_and_data.extend_from_slice(paymaster.as_bytes());
            paymaster_and_data.extend_from_slice(&uint128(
                op.paymaster_verification_gas_limit.unwrap_or_default(),
                "paymasterVerificationGasLimit",
            )?);
            paymaster_and_data.extend_from_slice(&uint128(
                op.paymaster_post_op_gas_limit.unwrap_or_default(),
                "paymasterPostOpGasLimit",
            )?);
            if let Some(data) = &op.paymaster_data {
                paymaster_and_data.extend_from_slice(data);
            }
        }

        Ok(Self {
            sender: op.sender,
            nonce: op.nonce,
            init_code,
            call_data: op.call_data.clone(),
            account_gas_limits: pack_pair(
                uint128(op.verification_gas_limit, "verificationGasLimit")?,
                uint128(op.call_gas_limit, "callGasLimit")?,
            ),
            pre_verification_gas: op.pre_verification_gas,
            gas_fees: pack_pair(
                uint128(op.max_priority_fee_per_gas, "maxPriorityFeePerGas")?,
                uint128(op.max_fee_per_gas, "maxFeePerGas")?,
            ),
            paymaster_and_data,
            entry_point,
            chain_id,
        })
    }
}

impl Eip712 for PackedUserOperation {
    type Error = Infallible;

    fn domain(&self) -> Result<EIP712Domain, Self::Error> {
        Ok(EIP712Domain {
            name: Some("ERC4337".to_string()),
            version: Some("1".to_string()),
            chain_id: Some(U256::from(self.chain_id)),
            verifying_contract: Some(self.entry_point),
            salt: None,
        })
    }

    fn type_hash() -> Result<[u8; 32], Self::Error> {
        Ok(keccak256(PACKED_USER_OPERATION_TYPE))
    }

    fn struct_hash(&self) -> Result<[u8; 32], Self::Error> {
        Ok(keccak256(encode(&[
            Token::FixedBytes(Self::type_hash()?.to_vec()),
            Token::Address(self.sender),
            Token::Uint(self.nonce),
            Token::FixedBytes(keccak256(&self.init_code).to_vec()),
            Token::FixedBytes(keccak256(&self.call_data).to_vec()),
            Token::FixedBytes(self.account_gas_limits.to_vec()),
            Token::Uint(self.pre_verification_gas),
            Token::FixedBytes(self.gas_fees.to_vec()),
            Token::FixedBytes(keccak256(&self.paymaster_and_data).to_vec()),
        ])))
    }
}

fn uint128(value: U256, field: &str) -> Result<[u8; 16], TransferError> {
    if value > U256::from(u128::MAX) {
        return Err(TransferError::InvalidInput(format!("{field} does not fit in uint128")));
    }
    let mut word = [0u8; 32];
    value.to_big_endian(&mut word);
    let mut out = [0u8; 16];
    out.copy_from_slice(&word[16..]);
    Ok(out)
}

fn pack_pair(high: [u8; 16], low: [u8; 16]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[..16].copy_from_slice(&high);
    out[16..].copy_from_slice(&low);
    out
}
