// src/main.rs
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use dotenv::dotenv;
use ethers::prelude::*;
use jsonrpsee::server::{ServerBuilder, ServerHandle};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

mod account;
mod assembler;
mod bundler;
mod chain;
mod config;
mod error;
mod fees;
mod paymaster;
mod permit;
mod reconciler;
mod rpc;
#[cfg(test)]
mod testing;
mod transfer;
mod types;

use crate::bundler::RpcBundler;
use crate::chain::RpcChainReader;
use crate::config::{Config, ConfigArgs};
use crate::rpc::{TransferRpcImpl, TransferRpcServer};
use crate::transfer::SponsoredTransfer;
use crate::types::TransferRequest;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Gasless ERC-20 transfers through an ERC-4337 paymaster", long_about = None)]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: Level,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve `transfer_send` over JSON-RPC
    Serve {
        #[arg(long, default_value = "127.0.0.1:8546")]
        listen: SocketAddr,
    },
    /// Send one transfer and wait for it to settle
    Send {
        #[arg(long)]
        recipient: String,

        /// Amount in token base units
        #[arg(long)]
        amount: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let cli = Cli::parse();

    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_max_level(cli.log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = Config::from_args(&cli.config)?;
    let wallet = cli
        .config
        .private_key
        .parse::<LocalWallet>()?
        .with_chain_id(config.chain_id);

    // Refuses to start against an endpoint on another chain
    let transfer = Arc::new(connect(&config, wallet).await?);
    info!(
        "Smart account {:?} on chain {}, token {:?}, paymaster {:?}",
        transfer.account_address(),
        config.chain_id,
        config.token,
        config.paymaster
    );

    match cli.command {
        Command::Serve { listen } => {
            info!("Starting transfer RPC server on {}", listen);
            let server_handle = start_server(listen, TransferRpcImpl::new(transfer)).await?;

            // Keep the server running until Ctrl+C is pressed
            tokio::signal::ctrl_c().await?;
            server_handle.stop()?;
            info!("Server stopped");
        }
        Command::Send { recipient, amount } => {
            let request = TransferRequest::parse(&recipient, &amount)?;
            info!("Transfer in progress...");

            tokio::select! {
                outcome = transfer.transfer(request.recipient, request.amount) => {
                    let settlement = outcome?;
                    println!("{:?}", settlement.transaction_hash);
                }
                _ = tokio::signal::ctrl_c() => {
                    warn!("Stopped waiting; a submitted operation may still be included");
                }
            }
        }
    }

    Ok(())
}

async fn connect(config: &Config, wallet: LocalWallet) -> anyhow::Result<SponsoredTransfer<LocalWallet>> {
    let provider = Provider::<Http>::try_from(config.eth_rpc_url.as_str())?;
    check_chain_id(&provider, config.chain_id, config.rpc_timeout).await?;

    let chain = RpcChainReader::new(Arc::new(provider), config.chain_id, config.rpc_timeout);
    let bundler = RpcBundler::new(
        Provider::<Http>::try_from(config.bundler_url.as_str())?,
        config.rpc_timeout,
    );

    Ok(SponsoredTransfer::from_config(
        config,
        wallet,
        Arc::new(chain),
        Arc::new(bundler),
    ))
}

async fn check_chain_id<M: Middleware>(client: &M, expected: u64, rpc_timeout: Duration) -> anyhow::Result<()> {
    let remote_chain_id = tokio::time::timeout(rpc_timeout, client.get_chainid())
        .await
        .map_err(|_| anyhow::anyhow!("eth_chainId did not answer within {:?}", rpc_timeout))?
        .map_err(|e| anyhow::anyhow!("eth_chainId: {}", e))?;

    if remote_chain_id != U256::from(expected) {
        error!("RPC endpoint reports chain {}", remote_chain_id);
        anyhow::bail!(
            "chain id mismatch: configured {}, endpoint reports {}",
            expected,
            remote_chain_id
        );
    }
    Ok(())
}

async fn start_server(server_addr: SocketAddr, transfer_rpc: TransferRpcImpl) -> anyhow::Result<ServerHandle> {
    let server = ServerBuilder::default().build(server_addr).await?;
    let server_handle = server.start(transfer_rpc.into_rpc());
    Ok(server_handle)
}
