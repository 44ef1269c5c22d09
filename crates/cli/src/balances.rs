use alloy::primitives::{Address, U256, utils::format_units};
use chainsync_sdk::{
    balances::{Amounts, Currency},
    chain::{ChainEndpoint, ExplorerTarget},
    session::Session,
};
use colored::Colorize;
use tabled::{Table, Tabled, settings::Style};

#[derive(Tabled)]
struct Row {
    #[tabled(rename = "Currency")]
    currency: String,
    #[tabled(rename = "Balance")]
    balance: String,
    #[tabled(rename = "Address")]
    address: String,
}

pub(crate) async fn render(
    session: &Session,
    endpoint: &ChainEndpoint,
    account: Address,
    tokens: &[Address],
) -> anyhow::Result<()> {
    let amounts = session.balances().balances(endpoint.chain_id(), account, tokens).await;

    println!(
        "\n{}\n{}\n",
        format!("Balances of {} on {}", account, endpoint.name()).bold().purple(),
        endpoint.explorer_link(ExplorerTarget::Address(account)),
    );
    println!("{}", table(session, endpoint, &amounts, tokens).await);
    if amounts.loading {
        println!("{}", "Some balances are not available yet".yellow());
    }

    Ok(())
}

/// Balances table with amounts scaled by token decimals.
pub(crate) async fn table(
    session: &Session,
    endpoint: &ChainEndpoint,
    amounts: &Amounts<Currency>,
    tokens: &[Address],
) -> Table {
    let native = endpoint.native_currency();
    let mut rows = vec![Row {
        currency: native.symbol.clone(),
        balance: balance(amounts, &Currency::Native, native.decimals),
        address: "-".to_string(),
    }];

    for token in tokens {
        let metadata = session.balances().token_metadata(endpoint.chain_id(), *token).await;
        let (symbol, decimals) = match metadata {
            Ok(Some(metadata)) => (metadata.symbol, Some(metadata.decimals)),
            Ok(None) => ("...".to_string(), None),
            Err(_) => ("?".to_string(), None),
        };
        rows.push(Row {
            currency: symbol,
            balance: match decimals {
                Some(decimals) => balance(amounts, &Currency::Token(*token), decimals),
                None => raw_balance(amounts.get(&Currency::Token(*token))),
            },
            address: token.to_string(),
        });
    }

    let mut table = Table::new(rows);
    table.with(Style::sharp());
    table
}

fn balance(amounts: &Amounts<Currency>, currency: &Currency, decimals: u8) -> String {
    if let Some(err) = amounts.error(currency) {
        return err.to_string().red().to_string();
    }
    match amounts.get(currency) {
        Some(amount) => format_units(amount, decimals).unwrap_or_else(|_| amount.to_string()),
        None => "-".to_string(),
    }
}

fn raw_balance(amount: Option<U256>) -> String {
    amount.map_or_else(|| "-".to_string(), |amount| amount.to_string())
}
