use std::{io::Write, pin::pin, time::Duration};

use alloy::primitives::Address;
use chainsync_sdk::{
    balances::Currency,
    chain::ChainEndpoint,
    multicall::ListenerOptions,
    session::Session,
};
use colored::Colorize;
use crossterm::{
    QueueableCommand,
    cursor::MoveTo,
    execute,
    style::Print,
    terminal::{Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

#[allow(clippy::too_many_arguments)]
pub(crate) async fn render(
    session: &Session,
    endpoint: &ChainEndpoint,
    account: Address,
    tokens: &[Address],
    interval: Duration,
    num_ticks: Option<u64>,
    cancellation_token: CancellationToken,
) -> anyhow::Result<()> {
    let chain_id = endpoint.chain_id();
    let currencies: Vec<_> = std::iter::once(Currency::Native)
        .chain(tokens.iter().copied().map(Currency::Token))
        .collect();
    let requests = session.balances().balance_requests(chain_id, account, &currencies);
    session.multicall().add_listeners(&requests, ListenerOptions::every_block());

    let mut ticks = pin!(session.ticks(interval, tokio::time::sleep));
    let mut ticks_left = num_ticks;

    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen, Clear(ClearType::All), MoveTo(0, 0))?;

    while let Some(tick) = ticks.next().await {
        if cancellation_token.is_cancelled() || ticks_left.is_some_and(|count| count == 0) {
            break;
        }

        let amounts = session.balances().cached_balances(chain_id, account, &currencies);
        let table = super::balances::table(session, endpoint, &amounts, tokens).await;

        stdout.queue(Clear(ClearType::All))?;
        stdout.queue(MoveTo(0, 0))?;
        stdout.queue(Print(format!(
            "{}\n",
            format!("Balances of {} on {}", account, endpoint.name()).bold().purple()
        )))?;
        stdout.queue(Print(format!(
            "Block: {} | Refreshed calls: {}{}\n\n",
            session
                .multicall()
                .latest_block(chain_id)
                .map_or_else(|| "-".to_string(), |b| b.to_string()),
            tick.fetched,
            if amounts.loading { " | loading".yellow() } else { Default::default() },
        )))?;
        stdout.queue(Print(format!("{}\n", table)))?;
        stdout.flush()?;

        if let Some(ref mut count) = ticks_left {
            *count -= 1;
        }
    }

    execute!(stdout, LeaveAlternateScreen)?;
    session.multicall().remove_listeners(&requests, ListenerOptions::every_block());

    Ok(())
}
