mod balances;
mod chains;
pub mod args;
mod send;
mod token;
mod tx;
mod watch;

use std::{sync::Arc, time::Duration};

use alloy::{primitives::U256, rpc::types::TransactionRequest};
use anyhow::Context;
use args::Cli;
use chainsync_sdk::{
    balances::{erc20_approval, nft_approval},
    chain::ChainConfig,
    connector::RpcWalletConnector,
    registry::HttpProviderFactory,
    session::Session,
    transactions::TransactionMeta,
};
use tokio_util::sync::CancellationToken;

use crate::args::Commands;

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = ChainConfig::default().with_default_chain(cli.chain);
    if let Some(rpc) = &cli.rpc {
        config = config.with_rpc_url(cli.chain, rpc);
    }

    if let Commands::Chains { json } = &cli.command {
        return chains::render(&config, *json);
    }

    let endpoint = config
        .endpoint(cli.chain)
        .cloned()
        .with_context(|| format!("unsupported chain {}", cli.chain))?;

    let session = Session::new(config, HttpProviderFactory { throttle: cli.rpc_throttle });
    session
        .registry()
        .require_provider(cli.chain)
        .context("connecting to RPC")?;

    let cancellation_signal = CancellationToken::new();
    let cancellation_token = cancellation_signal.child_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancellation_signal.cancel();
        }
    });

    let interval = Duration::from_millis(cli.interval_ms);
    match &cli.command {
        Commands::Chains { .. } => {},
        Commands::Balances { account, token } => {
            balances::render(&session, &endpoint, *account, token).await?
        },
        Commands::Token { address } => token::render(&session, &endpoint, *address).await?,
        Commands::Watch { account, token } => {
            watch::render(
                &session,
                &endpoint,
                *account,
                token,
                interval,
                cli.num_ticks,
                cancellation_token,
            )
            .await?
        },
        Commands::Tx { hash } => {
            tx::render(&session, &endpoint, *hash, interval, cli.num_ticks, cancellation_token)
                .await?
        },
        Commands::Send { to, value, data } => {
            let mut tx = TransactionRequest::default().to(*to).value(*value);
            if let Some(data) = data {
                tx = tx.input(data.clone().into());
            }
            let meta = TransactionMeta::summary(format!("Send {value} wei to {to}"));
            send::render(
                &session,
                &endpoint,
                wallet(&cli)?,
                tx,
                meta,
                interval,
                cli.num_ticks,
                cancellation_token,
            )
            .await?
        },
        Commands::Approve { token, spender, amount, nft } => {
            let (tx, meta) = if *nft {
                nft_approval(*token, *spender)
            } else {
                erc20_approval(*token, *spender, amount.unwrap_or(U256::MAX))
            };
            send::render(
                &session,
                &endpoint,
                wallet(&cli)?,
                tx,
                meta,
                interval,
                cli.num_ticks,
                cancellation_token,
            )
            .await?
        },
    }

    Ok(())
}

fn wallet(cli: &Cli) -> anyhow::Result<Arc<RpcWalletConnector>> {
    let url = cli.wallet_rpc.as_deref().context("--wallet-rpc is required")?;
    let wallet = RpcWalletConnector::new(url, cli.rpc_throttle).context("connecting to wallet node")?;
    Ok(Arc::new(wallet))
}
