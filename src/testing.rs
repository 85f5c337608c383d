// src/testing.rs
//! In-memory stand-ins for the chain and the bundler.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::sync::Arc;

use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::transaction::eip712::Eip712;
use ethers::types::{Address, Bytes, Signature, H160, H256, U256};

use crate::account::user_operation_hash;
use crate::bundler::Bundler;
use crate::chain::{ChainReader, PermitDomain};
use crate::config::Config;
use crate::error::TransferError;
use crate::fees::FeeEstimator;
use crate::paymaster::{PaymasterDataSource, SponsorshipContext, HEADER_LEN};
use crate::permit::Permit;
use crate::types::{
    BundleReceipt, FeeQuote, GasEstimate, GasPriceTier, GasPriceTiers, PaymasterFields,
    UserOperation, UserOperationReceipt,
};

pub const TOKEN: Address = H160([0x75; 20]);
pub const PAYMASTER: Address = H160([0x31; 20]);
pub const ENTRY_POINT: Address = H160([0x43; 20]);
pub const CHAIN_ID: u64 = 421614;

pub fn owner_wallet() -> LocalWallet {
    "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80"
        .parse::<LocalWallet>()
        .unwrap()
        .with_chain_id(CHAIN_ID)
}

pub fn recipient() -> Address {
    "0x70997970C51812dc3A010C7d01b50e0d17dc79C8".parse().unwrap()
}

fn recover(signature: &[u8], hash: H256) -> Option<Address> {
    Signature::try_from(signature).ok()?.recover(hash).ok()
}

/// Token and EntryPoint state held in memory.
pub struct FakeChain {
    domain: PermitDomain,
    permit_nonces: Mutex<HashMap<Address, U256>>,
    account_nonces: Mutex<HashMap<Address, U256>>,
    reads: AtomicUsize,
    failing: AtomicBool,
}

impl FakeChain {
    pub fn new() -> Self {
        Self {
            domain: PermitDomain {
                name: "USDC".to_string(),
                version: "2".to_string(),
                chain_id: CHAIN_ID,
                verifying_contract: TOKEN,
            },
            permit_nonces: Mutex::new(HashMap::new()),
            account_nonces: Mutex::new(HashMap::new()),
            reads: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    pub fn domain(&self) -> PermitDomain {
        self.domain.clone()
    }

    pub fn set_permit_nonce(&self, owner: Address, nonce: U256) {
        self.permit_nonces.lock().unwrap().insert(owner, nonce);
    }

    pub fn permit_nonce_of(&self, owner: Address) -> U256 {
        self.permit_nonces.lock().unwrap().get(&owner).copied().unwrap_or_default()
    }

    pub fn account_nonce_of(&self, sender: Address) -> U256 {
        self.account_nonces.lock().unwrap().get(&sender).copied().unwrap_or_default()
    }

    /// What inclusion does on chain: the permit and the account nonce are spent.
    pub fn consume(&self, sender: Address) {
        *self.permit_nonces.lock().unwrap().entry(sender).or_default() += U256::one();
        *self.account_nonces.lock().unwrap().entry(sender).or_default() += U256::one();
    }

    pub fn fail_reads(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn read(&self) -> Result<(), TransferError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransferError::ProviderUnavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainReader for FakeChain {
    async fn permit_domain(&self, _token: Address) -> Result<PermitDomain, TransferError> {
        self.read()?;
        Ok(self.domain())
    }

    async fn permit_nonce(&self, _token: Address, owner: Address) -> Result<U256, TransferError> {
        self.read()?;
        Ok(self.permit_nonce_of(owner))
    }

    async fn account_nonce(
        &self,
        _entry_point: Address,
        sender: Address,
    ) -> Result<U256, TransferError> {
        self.read()?;
        Ok(self.account_nonce_of(sender))
    }
}

struct PlantedReceipt {
    // None: never included
    remaining_polls: Option<usize>,
    receipt: UserOperationReceipt,
}

/// A bundler that validates what a real EntryPoint would: the account
/// signature, the account nonce and the paymaster's permit at the token's
/// current nonce. Accepted operations spend both nonces.
pub struct SimulatedBundler {
    chain: Arc<FakeChain>,
    token: Address,
    paymaster: Address,
    entry_point: Address,
    chain_id: u64,
    tiers: Mutex<GasPriceTiers>,
    polls_until_included: Mutex<Option<usize>>,
    receipts: Mutex<HashMap<H256, PlantedReceipt>>,
    submitted: Mutex<Vec<UserOperation>>,
    next_id: AtomicU64,
    calls: AtomicUsize,
    hang: AtomicBool,
}

impl SimulatedBundler {
    pub fn new(chain: Arc<FakeChain>) -> Self {
        Self {
            chain,
            token: TOKEN,
            paymaster: PAYMASTER,
            entry_point: ENTRY_POINT,
            chain_id: CHAIN_ID,
            tiers: Mutex::new(GasPriceTiers {
                slow: Some(GasPriceTier {
                    max_fee_per_gas: "0x1dcd6500".to_string(),
                    max_priority_fee_per_gas: "0x0".to_string(),
                }),
                standard: Some(GasPriceTier {
                    max_fee_per_gas: "0x3b9aca00".to_string(),
                    max_priority_fee_per_gas: "0x5f5e100".to_string(),
                }),
                fast: Some(GasPriceTier {
                    max_fee_per_gas: "0x77359400".to_string(),
                    max_priority_fee_per_gas: "0x3b9aca00".to_string(),
                }),
            }),
            polls_until_included: Mutex::new(Some(2)),
            receipts: Mutex::new(HashMap::new()),
            submitted: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            calls: AtomicUsize::new(0),
            hang: AtomicBool::new(false),
        }
    }

    pub fn with_config(chain: Arc<FakeChain>, config: &Config) -> Self {
        Self {
            token: config.token,
            paymaster: config.paymaster,
            entry_point: config.entry_point,
            chain_id: config.chain_id,
            ..Self::new(chain)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn submitted(&self) -> Vec<UserOperation> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn drop_standard_tier(&self) {
        self.tiers.lock().unwrap().standard = None;
    }

    pub fn set_standard_tier(&self, max_fee_per_gas: &str, max_priority_fee_per_gas: &str) {
        self.tiers.lock().unwrap().standard = Some(GasPriceTier {
            max_fee_per_gas: max_fee_per_gas.to_string(),
            max_priority_fee_per_gas: max_priority_fee_per_gas.to_string(),
        });
    }

    pub fn never_include(&self) {
        *self.polls_until_included.lock().unwrap() = None;
    }

    pub fn hang_receipts(&self) {
        self.hang.store(true, Ordering::SeqCst);
    }

    /// Registers a receipt served after `polls` empty answers.
    pub fn plant_receipt(&self, polls: usize, success: bool) -> H256 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let user_op_hash = H256::from_low_u64_be(id);
        self.insert_receipt(user_op_hash, Some(polls), success);
        user_op_hash
    }

    fn insert_receipt(&self, user_op_hash: H256, remaining_polls: Option<usize>, success: bool) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let receipt = UserOperationReceipt {
            user_op_hash,
            success,
            reason: (!success).then(|| "ERC20: transfer amount exceeds balance".to_string()),
            receipt: BundleReceipt {
                transaction_hash: H256::from_low_u64_be(0xbeef_0000 + id),
            },
        };
        self.receipts.lock().unwrap().insert(
            user_op_hash,
            PlantedReceipt {
                remaining_polls,
                receipt,
            },
        );
    }

    fn validate(&self, op: &UserOperation, entry_point: Address) -> Result<H256, TransferError> {
        let reject = |reason: &str| Err(TransferError::SubmissionRejected(reason.to_string()));

        if entry_point != self.entry_point {
            return reject("unsupported entry point");
        }
        if op.nonce != self.chain.account_nonce_of(op.sender) {
            return reject("AA25 invalid account nonce");
        }

        let hash = user_operation_hash(op, self.entry_point, self.chain_id)?;
        if recover(&op.signature, hash) != Some(op.sender) {
            return reject("AA24 signature error");
        }

        if op.paymaster != Some(self.paymaster) {
            return reject("AA30 paymaster not deployed");
        }
        let data = op.paymaster_data.clone().unwrap_or_default();
        let parts = match decode_paymaster_data(&data) {
            Ok(parts) => parts,
            Err(_) => return reject("AA33 reverted: malformed paymaster data"),
        };
        if parts.token != self.token {
            return reject("AA33 reverted: unsupported token");
        }

        let permit = Permit::unbounded(
            op.sender,
            self.paymaster,
            parts.permit_amount,
            self.chain.permit_nonce_of(op.sender),
            self.chain.domain(),
        );
        let digest = H256::from(permit.encode_eip712().unwrap());
        if recover(&parts.signature, digest) != Some(op.sender) {
            return reject("AA33 reverted: ERC20Permit: invalid signature");
        }

        Ok(hash)
    }
}

#[async_trait]
impl Bundler for SimulatedBundler {
    async fn gas_price_tiers(&self) -> Result<GasPriceTiers, TransferError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.tiers.lock().unwrap().clone())
    }

    async fn estimate_user_operation_gas(
        &self,
        _op: &UserOperation,
        _entry_point: Address,
    ) -> Result<GasEstimate, TransferError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(GasEstimate {
            pre_verification_gas: U256::from(50_000u64),
            verification_gas_limit: U256::from(100_000u64),
            call_gas_limit: U256::from(80_000u64),
            paymaster_verification_gas_limit: None,
            paymaster_post_op_gas_limit: None,
        })
    }

    async fn send_user_operation(
        &self,
        op: &UserOperation,
        entry_point: Address,
    ) -> Result<H256, TransferError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let hash = self.validate(op, entry_point)?;

        self.chain.consume(op.sender);
        self.submitted.lock().unwrap().push(op.clone());
        let remaining = *self.polls_until_included.lock().unwrap();
        self.insert_receipt(hash, remaining, true);
        Ok(hash)
    }

    async fn user_operation_receipt(
        &self,
        user_op_hash: H256,
    ) -> Result<Option<UserOperationReceipt>, TransferError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        let mut receipts = self.receipts.lock().unwrap();
        let Some(planted) = receipts.get_mut(&user_op_hash) else {
            return Ok(None);
        };
        match planted.remaining_polls {
            None => Ok(None),
            Some(0) => Ok(Some(planted.receipt.clone())),
            Some(n) => {
                planted.remaining_polls = Some(n - 1);
                Ok(None)
            }
        }
    }
}

/// Paymaster data split back into its fields, as the paymaster contract reads it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymasterDataParts {
    pub mode: u8,
    pub token: Address,
    pub permit_amount: U256,
    pub signature: Bytes,
}

pub fn decode_paymaster_data(data: &[u8]) -> Result<PaymasterDataParts, TransferError> {
    if data.len() < HEADER_LEN {
        return Err(TransferError::InvalidInput(format!(
            "paymaster data is {} bytes, expected at least {HEADER_LEN}",
            data.len()
        )));
    }
    Ok(PaymasterDataParts {
        mode: data[0],
        token: Address::from_slice(&data[1..21]),
        permit_amount: U256::from_big_endian(&data[21..HEADER_LEN]),
        signature: Bytes::from(data[HEADER_LEN..].to_vec()),
    })
}

/// Hands out the same pre-built fields on every request.
pub struct StaticPaymaster {
    fields: PaymasterFields,
    requests: AtomicUsize,
}

impl StaticPaymaster {
    pub fn new(fields: PaymasterFields) -> Self {
        Self {
            fields,
            requests: AtomicUsize::new(0),
        }
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymasterDataSource for StaticPaymaster {
    async fn paymaster_data(
        &self,
        _context: &SponsorshipContext,
    ) -> Result<PaymasterFields, TransferError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        Ok(self.fields.clone())
    }
}

pub struct FixedFees(pub FeeQuote);

impl Default for FixedFees {
    fn default() -> Self {
        Self(FeeQuote {
            max_fee_per_gas: U256::from(1_000_000_000u64),
            max_priority_fee_per_gas: U256::from(100_000_000u64),
        })
    }
}

#[async_trait]
impl FeeEstimator for FixedFees {
    async fn estimate(&self) -> Result<FeeQuote, TransferError> {
        Ok(self.0)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("user rejected the request")]
pub struct Rejected;

/// A wallet whose user declines every signature request.
#[derive(Debug, Default)]
pub struct RefusingSigner {
    address: Address,
}

#[async_trait]
impl Signer for RefusingSigner {
    type Error = Rejected;

    async fn sign_message<S: Send + Sync + AsRef<[u8]>>(
        &self,
        _message: S,
    ) -> Result<Signature, Self::Error> {
        Err(Rejected)
    }

    async fn sign_transaction(&self, _message: &TypedTransaction) -> Result<Signature, Self::Error> {
        Err(Rejected)
    }

    async fn sign_typed_data<T: Eip712 + Send + Sync>(
        &self,
        _payload: &T,
    ) -> Result<Signature, Self::Error> {
        Err(Rejected)
    }

    fn address(&self) -> Address {
        self.address
    }

    fn chain_id(&self) -> u64 {
        CHAIN_ID
    }

    fn with_chain_id<T: Into<u64>>(self, _chain_id: T) -> Self {
        self
    }
}
