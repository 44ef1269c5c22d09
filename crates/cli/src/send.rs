use std::{sync::Arc, time::Duration};

use alloy::rpc::types::TransactionRequest;
use anyhow::{Context, ensure};
use chainsync_sdk::{
    chain::ChainEndpoint,
    connector::{Connector, RpcWalletConnector},
    session::Session,
    transactions::TransactionMeta,
};
use colored::Colorize;
use tokio_util::sync::CancellationToken;

/// Submits `tx` through the wallet node and waits for it to be mined.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn render(
    session: &Session,
    endpoint: &ChainEndpoint,
    wallet: Arc<RpcWalletConnector>,
    tx: TransactionRequest,
    meta: TransactionMeta,
    interval: Duration,
    num_ticks: Option<u64>,
    cancellation_token: CancellationToken,
) -> anyhow::Result<()> {
    session.activate(wallet.clone()).await.context("connecting to wallet node")?;
    let active = session.active_state();
    ensure!(
        active.chain_id == Some(endpoint.chain_id()),
        "wallet node is on chain {:?}, expected {}",
        active.chain_id,
        endpoint.chain_id()
    );
    let from = wallet.account().context("wallet node has no unlocked account")?;

    let summary = meta.summary.clone().unwrap_or_default();
    let record = session.tracker().submit(tx, meta).await.context("submitting transaction")?;
    println!("\n{} {}", summary.bold().purple(), format!("(from {from})").dimmed());

    let result = super::tx::wait(
        session,
        endpoint,
        record.hash(),
        Some(wallet.as_ref()),
        interval,
        num_ticks,
        cancellation_token,
    )
    .await;
    session.deactivate().await?;
    result
}
