// src/chain.rs
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::prelude::*;
use tracing::debug;

use crate::error::{bounded, TransferError};

abigen!(
    Erc20Permit,
    r#"[
        function name() external view returns (string)
        function version() external view returns (string)
        function nonces(address owner) external view returns (uint256)
        function transfer(address to, uint256 amount) external returns (bool)
    ]"#
);

abigen!(
    EntryPoint,
    r#"[
        function getNonce(address sender, uint192 key) external view returns (uint256 nonce)
    ]"#
);

/// EIP-712 domain fields of an EIP-2612 token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermitDomain {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    pub verifying_contract: Address,
}

/// Read-only chain queries the pipeline depends on.
#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn permit_domain(&self, token: Address) -> Result<PermitDomain, TransferError>;

    async fn permit_nonce(&self, token: Address, owner: Address) -> Result<U256, TransferError>;

    /// Nonce of `sender` in the EntryPoint, key 0.
    async fn account_nonce(&self, entry_point: Address, sender: Address)
        -> Result<U256, TransferError>;
}

pub struct RpcChainReader<M> {
    client: Arc<M>,
    chain_id: u64,
    rpc_timeout: Duration,
}

impl<M: Middleware + 'static> RpcChainReader<M> {
    pub fn new(client: Arc<M>, chain_id: u64, rpc_timeout: Duration) -> Self {
        Self {
            client,
            chain_id,
            rpc_timeout,
        }
    }
}

fn read_failed<E: Display>(what: &'static str) -> impl Fn(E) -> TransferError {
    move |e| TransferError::ProviderUnavailable(format!("{what}: {e}"))
}

#[async_trait]
impl<M: Middleware + 'static> ChainReader for RpcChainReader<M> {
    async fn permit_domain(&self, token: Address) -> Result<PermitDomain, TransferError> {
        let contract = Erc20Permit::new(token, self.client.clone());

        let name = bounded(self.rpc_timeout, "token name()", async {
            contract.name().call().await.map_err(read_failed("token name()"))
        })
        .await?;
        let version = bounded(self.rpc_timeout, "token version()", async {
            contract.version().call().await.map_err(read_failed("token version()"))
        })
        .await?;

        debug!("Permit domain for {:?}: {} v{}", token, name, version);

        Ok(PermitDomain {
            name,
            version,
            chain_id: self.chain_id,
            verifying_contract: token,
        })
    }

    async fn permit_nonce(&self, token: Address, owner: Address) -> Result<U256, TransferError> {
        let contract = Erc20Permit::new(token, self.client.clone());
        bounded(self.rpc_timeout, "token nonces()", async {
            contract
                .nonces(owner)
                .call()
                .await
                .map_err(read_failed("token nonces()"))
        })
        .await
    }

    async fn account_nonce(
        &self,
        entry_point: Address,
        sender: Address,
    ) -> Result<U256, TransferError> {
        let contract = EntryPoint::new(entry_point, self.client.clone());
        bounded(self.rpc_timeout, "entry point getNonce()", async {
            contract
                .get_nonce(sender, U256::zero())
                .call()
                .await
                .map_err(read_failed("entry point getNonce()"))
        })
        .await
    }
}
