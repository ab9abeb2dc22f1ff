use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use mint_client::config::MintConfig;
use mint_client::connection::{ConnectionController, SessionReset};
use mint_client::contract::MintContract;
use mint_client::feed::{Notifier, StatusSink, StderrNotifier, StdoutSink};
use mint_client::messages;
use mint_client::mint::{MintOrchestrator, MintOutcome};
use mint_client::provider::WalletProvider;
use mint_client::rpc::{RpcClient, RpcMintContract, RpcWalletProvider};
use mint_client::session::SessionGuard;

#[derive(Parser)]
#[command(name = "mint-client", about = "Mint an NFT through an external wallet provider")]
struct Cli {
    /// Optional TOML file overriding the built-in configuration.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Wallet provider JSON-RPC endpoint. Omitting it is the providerless
    /// state: the client stays usable but disconnected.
    #[arg(long)]
    endpoint: Option<String>,
    /// Seconds between receipt and event polls against the endpoint.
    #[arg(long, default_value_t = 2)]
    poll_interval: u64,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Report the session and network state.
    Status,
    /// Request account access from the wallet.
    Connect,
    /// Connect if needed, then mint and stream the status feed.
    Mint,
}

/// Exits so the operator restarts with clean state, the deterministic
/// equivalent of the original full reload.
struct ProcessReset;

impl SessionReset for ProcessReset {
    fn reset(&self) {
        info!("required network restored; exiting for a clean restart");
        std::process::exit(0);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Arc::new(match &cli.config {
        Some(path) => MintConfig::load(path)?,
        None => MintConfig::default(),
    });

    let stack = match &cli.endpoint {
        Some(endpoint) => {
            let client = RpcClient::from_endpoint(endpoint)?;
            let poll_interval = Duration::from_secs(cli.poll_interval);
            let provider: Arc<dyn WalletProvider> = Arc::new(
                RpcWalletProvider::new(client.clone()).with_poll_interval(poll_interval),
            );
            let contract: Arc<dyn MintContract> = Arc::new(
                RpcMintContract::new(client, &config).with_poll_interval(poll_interval),
            );
            Some((provider, contract))
        }
        None => None,
    };
    let provider = stack.as_ref().map(|(provider, _)| Arc::clone(provider));

    let guard = SessionGuard::new(provider.clone(), config.clone());
    let sink: Arc<dyn StatusSink> = Arc::new(StdoutSink::new());
    let notifier: Arc<dyn Notifier> = Arc::new(StderrNotifier::new());

    match cli.command {
        Command::Status => {
            let session = guard.check_existing_session().await;
            match session.account() {
                Some(account) => println!("connected: {account}"),
                None => println!("disconnected"),
            }
            if session.connected() {
                let on_required = guard.is_required_network().await.unwrap_or(false);
                println!(
                    "network: {}",
                    if on_required { "required" } else { "not the required chain" }
                );
            }
            println!("{}", messages::collection_link(&config));
        }
        ref command @ (Command::Connect | Command::Mint) => {
            let Some((_, contract)) = stack else {
                notifier.notify(messages::install_wallet_notice());
                return Ok(());
            };
            let controller = ConnectionController::new(
                provider,
                Arc::clone(&contract),
                config.clone(),
                sink.clone(),
                notifier.clone(),
                Arc::new(ProcessReset),
            );

            let mut session = guard.check_existing_session().await;
            if session.connected() {
                controller.arm_subscriptions();
            } else {
                session = controller.connect().await;
            }

            if matches!(command, Command::Mint) && session.connected() {
                let orchestrator =
                    MintOrchestrator::new(guard, contract, config, sink, notifier);
                match orchestrator.mint(&session).await {
                    MintOutcome::Mined { hash } => {
                        info!(%hash, "mint resolved");
                        // Grace period for the contract's own mint-completed
                        // event to reach the feed before exit.
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                    outcome => info!(?outcome, "mint did not resolve"),
                }
            }
        }
    }

    Ok(())
}
