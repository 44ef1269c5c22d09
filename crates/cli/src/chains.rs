use anyhow::Context;
use chainsync_sdk::chain::ChainConfig;
use colored::Colorize;
use tabled::{Table, settings::Style};

pub(crate) fn render(config: &ChainConfig, json: bool) -> anyhow::Result<()> {
    if json {
        let params: Vec<_> = config.endpoints().map(|e| e.add_chain_parameter()).collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&params).context("serializing chain parameters")?
        );
        return Ok(());
    }

    println!("\n{}\n", "Supported chains".bold().purple());
    let mut table = Table::new(config.endpoints());
    table.with(Style::sharp());
    println!("{}", table);
    println!("Default chain: {}", config.default_chain_id());

    Ok(())
}
