use alloy::primitives::Address;
use anyhow::Context;
use chainsync_sdk::{
    chain::{ChainEndpoint, ExplorerTarget},
    session::Session,
};
use colored::Colorize;

pub(crate) async fn render(
    session: &Session,
    endpoint: &ChainEndpoint,
    address: Address,
) -> anyhow::Result<()> {
    let metadata = session
        .balances()
        .token_metadata(endpoint.chain_id(), address)
        .await
        .context("reading token metadata")?
        .context("token metadata is not available, RPC endpoint unreachable?")?;

    println!("\n{}", format!("{} ({})", metadata.name, metadata.symbol).bold().purple());
    println!("  Address:  {}", metadata.address);
    println!("  Decimals: {}", metadata.decimals);
    println!("  Explorer: {}\n", endpoint.explorer_link(ExplorerTarget::Token(address)));

    Ok(())
}
