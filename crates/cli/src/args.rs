use alloy::primitives::{Address, Bytes, TxHash, U256};
use chainsync_sdk::chain::{self, ChainId};
use clap::{Parser, Subcommand};

pub(crate) const DEFAULT_INTERVAL_MS: u64 = 3_000;

#[derive(Parser, Debug)]
#[command(name = "chainsync-cli", version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Chain ID to operate on [default: BNB Chain]
    #[arg(long, global = true, default_value_t = chain::BSC)]
    pub chain: ChainId,

    /// RPC endpoint to use for the chain instead of the built-in one
    #[arg(long, global = true)]
    pub rpc: Option<String>,

    /// RPC throttling (req/sec) [default: none]
    #[arg(long, global = true)]
    pub rpc_throttle: Option<u32>,

    /// JSON-RPC node signing for its unlocked accounts, used by `send` and
    /// `approve`
    #[arg(long, global = true)]
    pub wallet_rpc: Option<String>,

    /// Polling interval of `watch`, `tx`, `send` and `approve` in
    /// milliseconds
    #[arg(long, global = true, default_value_t = DEFAULT_INTERVAL_MS)]
    pub interval_ms: u64,

    /// Number of polling ticks to run [default: unlimited, until terminated
    /// by (Ctrl+C)]
    #[arg(long, global = true)]
    pub num_ticks: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List supported chains
    Chains {
        /// Print `wallet_addEthereumChain` parameters as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Show native and token balances of an account
    Balances {
        account: Address,

        /// ERC-20 token to show the balance of, can be repeated
        #[arg(long)]
        token: Vec<Address>,
    },
    /// Show ERC-20 token metadata
    Token { address: Address },
    /// Show live balances of an account, refreshed every block
    Watch {
        account: Address,

        /// ERC-20 token to show the balance of, can be repeated
        #[arg(long)]
        token: Vec<Address>,
    },
    /// Wait for a transaction to be mined
    Tx { hash: TxHash },
    /// Send a transaction from the wallet node's first account and wait for
    /// it to be mined
    Send {
        to: Address,

        /// Value in wei
        #[arg(long, default_value_t = U256::ZERO)]
        value: U256,

        /// Hex-encoded call data
        #[arg(long)]
        data: Option<Bytes>,
    },
    /// Approve a spender from the wallet node's first account and wait for
    /// the approval to be mined
    Approve {
        /// ERC-20 token, or ERC-721 collection with `--nft`
        token: Address,

        spender: Address,

        /// Allowance in base units [default: unlimited]
        #[arg(long, conflicts_with = "nft")]
        amount: Option<U256>,

        /// Approve every NFT of the collection
        #[arg(long, default_value_t = false)]
        nft: bool,
    },
}

#[cfg(test)]
mod tests {
    use alloy::primitives::address;

    use super::*;

    #[test]
    fn test_wallet_commands() {
        let cli = Cli::try_parse_from([
            "chainsync-cli",
            "--wallet-rpc",
            "http://localhost:8545",
            "--num-ticks",
            "3",
            "send",
            "0x0000000000000000000000000000000000000b0b",
            "--value",
            "1000",
            "--data",
            "0x1234",
        ])
        .unwrap();
        assert_eq!(cli.wallet_rpc.as_deref(), Some("http://localhost:8545"));
        assert_eq!(cli.num_ticks, Some(3));
        let Commands::Send { to, value, data } = cli.command else { panic!("not send") };
        assert_eq!(to, address!("0x0000000000000000000000000000000000000b0b"));
        assert_eq!(value, U256::from(1000));
        assert_eq!(data, Some(Bytes::from_static(&[0x12, 0x34])));

        let token = "0x0000000000000000000000000000000000000701";
        let cli = Cli::try_parse_from(["chainsync-cli", "approve", token, token, "--nft"]).unwrap();
        assert!(matches!(cli.command, Commands::Approve { nft: true, amount: None, .. }));
        assert!(
            Cli::try_parse_from(["chainsync-cli", "approve", token, token, "--nft", "--amount", "1"])
                .is_err()
        );
    }
}
