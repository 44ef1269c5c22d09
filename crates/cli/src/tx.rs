use std::{pin::pin, time::Duration};

use alloy::primitives::{Address, TxHash};
use chainsync_sdk::{
    chain::{ChainEndpoint, ExplorerTarget},
    connector::RpcWalletConnector,
    session::Session,
    transactions::{TransactionMeta, TransactionStatus},
};
use chrono::Utc;
use colored::Colorize;
use futures::StreamExt;
use tabled::{Table, settings::Style};
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub(crate) async fn render(
    session: &Session,
    endpoint: &ChainEndpoint,
    hash: TxHash,
    interval: Duration,
    num_ticks: Option<u64>,
    cancellation_token: CancellationToken,
) -> anyhow::Result<()> {
    session.tracker().add(endpoint.chain_id(), hash, Address::ZERO, TransactionMeta::default(), Utc::now());
    wait(session, endpoint, hash, None, interval, num_ticks, cancellation_token).await
}

/// Ticks until the transaction is mined, then prints the tracked records.
/// The wallet, if any, is refreshed every tick so switches on the node side
/// are picked up.
pub(crate) async fn wait(
    session: &Session,
    endpoint: &ChainEndpoint,
    hash: TxHash,
    wallet: Option<&RpcWalletConnector>,
    interval: Duration,
    num_ticks: Option<u64>,
    cancellation_token: CancellationToken,
) -> anyhow::Result<()> {
    let chain_id = endpoint.chain_id();
    println!("\n{}", format!("**** Tx {}", hash).bright_blue());
    println!("{}\n", endpoint.explorer_link(ExplorerTarget::Transaction(hash)));

    let mut ticks = pin!(session.ticks(interval, tokio::time::sleep));
    let mut ticks_left = num_ticks;

    while let Some(_tick) = ticks.next().await {
        if cancellation_token.is_cancelled() || ticks_left.is_some_and(|count| count == 0) {
            break;
        }

        let Some(record) = session.tracker().get(chain_id, hash) else {
            break;
        };
        if record.status() != TransactionStatus::Pending {
            break;
        }
        println!("{}", "  pending...".yellow());

        if let Some(wallet) = wallet
            && let Err(err) = wallet.refresh().await
        {
            warn!(%err, "failed to refresh wallet");
        }

        if let Some(ref mut count) = ticks_left {
            *count -= 1;
        }
    }

    let mut table = Table::new(session.tracker().all());
    table.with(Style::sharp());
    println!("\n{}", table);
    if let Some(receipt) = session.tracker().get(chain_id, hash).and_then(|r| r.receipt().cloned()) {
        println!(
            "Mined in block {} ({}), gas used: {}\n",
            receipt.block_number,
            endpoint.explorer_link(ExplorerTarget::Block(receipt.block_number)),
            receipt.gas_used
        );
    }

    Ok(())
}
