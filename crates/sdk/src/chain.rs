use std::collections::BTreeMap;

use alloy::primitives::{Address, TxHash, address};
use serde::Serialize;

/// Numeric EIP-155 chain identifier.
pub type ChainId = u64;

pub const MAINNET: ChainId = 1;
pub const GOERLI: ChainId = 5;
pub const SEPOLIA: ChainId = 11155111;
pub const BSC: ChainId = 56;
pub const BSC_TESTNET: ChainId = 97;

/// Canonical Multicall3 deployment, same address on every supported chain.
pub const MULTICALL3: Address = address!("0xcA11bde05977b3631167028862bE2a173976CA11");

/// Native currency of a chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

impl NativeCurrency {
    pub fn new(name: &str, symbol: &str, decimals: u8) -> Self {
        Self { name: name.to_string(), symbol: symbol.to_string(), decimals }
    }
}

/// Static description of a chain the application can talk to.
///
/// Loaded once at startup and never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainEndpoint {
    chain_id: ChainId,
    name: String,
    rpc_urls: Vec<String>,
    native_currency: NativeCurrency,
    explorer_url: String,
    multicall: Address,
}

impl ChainEndpoint {
    pub fn new(
        chain_id: ChainId,
        name: &str,
        rpc_urls: Vec<String>,
        native_currency: NativeCurrency,
        explorer_url: &str,
        multicall: Address,
    ) -> Self {
        Self {
            chain_id,
            name: name.to_string(),
            rpc_urls,
            native_currency,
            explorer_url: explorer_url.trim_end_matches('/').to_string(),
            multicall,
        }
    }

    pub fn mainnet() -> Self {
        Self::new(
            MAINNET,
            "ETH Mainnet",
            vec!["https://mainnet.infura.io/v3".to_string()],
            NativeCurrency::new("ETH", "ETH", 18),
            "https://etherscan.io",
            MULTICALL3,
        )
    }

    pub fn goerli() -> Self {
        Self::new(
            GOERLI,
            "Görli Testnet",
            vec!["https://goerli.infura.io/v3".to_string()],
            NativeCurrency::new("GoerliETH", "ETH", 18),
            "https://goerli.etherscan.io",
            MULTICALL3,
        )
    }

    pub fn sepolia() -> Self {
        Self::new(
            SEPOLIA,
            "Sepolia",
            vec!["https://sepolia.infura.io/v3".to_string()],
            NativeCurrency::new("SepoliaETH", "ETH", 18),
            "https://sepolia.etherscan.io",
            MULTICALL3,
        )
    }

    pub fn bsc() -> Self {
        Self::new(
            BSC,
            "BNB Chain",
            vec!["https://bsc-dataseed.binance.org".to_string()],
            NativeCurrency::new("Binance Coin", "BNB", 18),
            "https://bscscan.com",
            MULTICALL3,
        )
    }

    pub fn bsc_testnet() -> Self {
        Self::new(
            BSC_TESTNET,
            "BNB Testnet",
            vec!["https://data-seed-prebsc-1-s1.binance.org:8545".to_string()],
            NativeCurrency::new("Binance Coin", "BNB", 18),
            "https://testnet.bscscan.com",
            MULTICALL3,
        )
    }

    pub fn chain_id(&self) -> ChainId { self.chain_id }

    pub fn name(&self) -> &str { &self.name }

    /// RPC endpoints, preferred first.
    pub fn rpc_urls(&self) -> &[String] { &self.rpc_urls }

    pub fn native_currency(&self) -> &NativeCurrency { &self.native_currency }

    pub fn explorer_url(&self) -> &str { &self.explorer_url }

    /// Address of the aggregator contract batched reads are sent to.
    pub fn multicall(&self) -> Address { self.multicall }

    /// Link to the chain explorer page of the given target.
    pub fn explorer_link(&self, target: ExplorerTarget) -> String {
        match target {
            ExplorerTarget::Transaction(hash) => format!("{}/tx/{}", self.explorer_url, hash),
            ExplorerTarget::Address(address) => {
                format!("{}/address/{}", self.explorer_url, address)
            },
            ExplorerTarget::Token(address) => format!("{}/token/{}", self.explorer_url, address),
            ExplorerTarget::Block(number) => format!("{}/block/{}", self.explorer_url, number),
        }
    }

    /// EIP-3085 `wallet_addEthereumChain` parameter for asking the wallet to
    /// add or switch to this chain.
    pub fn add_chain_parameter(&self) -> AddChainParameter {
        AddChainParameter {
            chain_id: format!("{:#x}", self.chain_id),
            chain_name: self.name.clone(),
            native_currency: self.native_currency.clone(),
            rpc_urls: self.rpc_urls.clone(),
            block_explorer_urls: vec![self.explorer_url.clone()],
        }
    }

    pub(crate) fn with_rpc_url(mut self, url: String) -> Self {
        self.rpc_urls.retain(|u| *u != url);
        self.rpc_urls.insert(0, url);
        self
    }
}

#[cfg(feature = "display")]
impl tabled::Tabled for ChainEndpoint {
    const LENGTH: usize = 5;

    fn fields(&self) -> Vec<std::borrow::Cow<'_, str>> {
        vec![
            self.chain_id.to_string().into(),
            self.name.as_str().into(),
            self.native_currency.symbol.as_str().into(),
            self.rpc_urls.first().map_or("-", String::as_str).into(),
            self.explorer_url.as_str().into(),
        ]
    }

    fn headers() -> Vec<std::borrow::Cow<'static, str>> {
        vec!["Chain", "Name", "Currency", "RPC", "Explorer"].into_iter().map(Into::into).collect()
    }
}

/// Explorer page kinds.
#[derive(Clone, Copy, Debug)]
pub enum ExplorerTarget {
    Transaction(TxHash),
    Address(Address),
    Token(Address),
    Block(u64),
}

/// Parameter object of the `wallet_addEthereumChain` wallet request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddChainParameter {
    pub chain_id: String,
    pub chain_name: String,
    pub native_currency: NativeCurrency,
    pub rpc_urls: Vec<String>,
    pub block_explorer_urls: Vec<String>,
}

/// Static chain configuration: supported chains and the default one.
#[derive(Clone, Debug)]
pub struct ChainConfig {
    endpoints: BTreeMap<ChainId, ChainEndpoint>,
    default_chain_id: ChainId,
}

impl Default for ChainConfig {
    /// All built-in chains, BNB Chain by default.
    fn default() -> Self {
        Self::empty(BSC)
            .with_endpoint(ChainEndpoint::mainnet())
            .with_endpoint(ChainEndpoint::goerli())
            .with_endpoint(ChainEndpoint::sepolia())
            .with_endpoint(ChainEndpoint::bsc())
            .with_endpoint(ChainEndpoint::bsc_testnet())
    }
}

impl ChainConfig {
    pub fn empty(default_chain_id: ChainId) -> Self {
        Self { endpoints: BTreeMap::new(), default_chain_id }
    }

    pub fn with_endpoint(mut self, endpoint: ChainEndpoint) -> Self {
        self.endpoints.insert(endpoint.chain_id(), endpoint);
        self
    }

    /// Makes `url` the preferred RPC endpoint of the chain, if it is
    /// configured.
    pub fn with_rpc_url(mut self, chain_id: ChainId, url: &str) -> Self {
        if let Some(endpoint) = self.endpoints.remove(&chain_id) {
            self.endpoints.insert(chain_id, endpoint.with_rpc_url(url.to_string()));
        }
        self
    }

    pub fn with_default_chain(mut self, chain_id: ChainId) -> Self {
        self.default_chain_id = chain_id;
        self
    }

    /// Restricts the configuration to the given subset of chains.
    pub fn supported(mut self, chain_ids: &[ChainId]) -> Self {
        self.endpoints.retain(|id, _| chain_ids.contains(id));
        self
    }

    pub fn endpoint(&self, chain_id: ChainId) -> Option<&ChainEndpoint> {
        self.endpoints.get(&chain_id)
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &ChainEndpoint> { self.endpoints.values() }

    pub fn is_supported(&self, chain_id: ChainId) -> bool { self.endpoints.contains_key(&chain_id) }

    pub fn default_chain_id(&self) -> ChainId { self.default_chain_id }

    pub fn default_endpoint(&self) -> Option<&ChainEndpoint> { self.endpoint(self.default_chain_id) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_subset() {
        let config = ChainConfig::default().supported(&[BSC, SEPOLIA]);
        assert!(config.is_supported(BSC));
        assert!(config.is_supported(SEPOLIA));
        assert!(!config.is_supported(MAINNET));
        assert!(config.endpoint(1337).is_none());
        assert_eq!(config.endpoints().count(), 2);
        assert_eq!(config.default_endpoint().unwrap().name(), "BNB Chain");
    }

    #[test]
    fn test_rpc_override_is_preferred() {
        let config = ChainConfig::default().with_rpc_url(SEPOLIA, "http://localhost:8545");
        let endpoint = config.endpoint(SEPOLIA).unwrap();
        assert_eq!(endpoint.rpc_urls()[0], "http://localhost:8545");
        assert_eq!(endpoint.rpc_urls().len(), 2);

        // Unknown chains are not added implicitly
        let config = config.with_rpc_url(1337, "http://localhost:8545");
        assert!(!config.is_supported(1337));
    }

    #[test]
    fn test_explorer_links() {
        let bsc = ChainEndpoint::bsc();
        assert_eq!(bsc.explorer_link(ExplorerTarget::Block(100)), "https://bscscan.com/block/100");
        assert_eq!(
            bsc.explorer_link(ExplorerTarget::Address(Address::ZERO)),
            format!("https://bscscan.com/address/{}", Address::ZERO)
        );
        assert_eq!(
            ChainEndpoint::goerli().explorer_link(ExplorerTarget::Transaction(TxHash::ZERO)),
            format!("https://goerli.etherscan.io/tx/{}", TxHash::ZERO)
        );
    }

    #[test]
    fn test_add_chain_parameter() {
        let param = ChainEndpoint::bsc_testnet().add_chain_parameter();
        assert_eq!(param.chain_id, "0x61");
        let json = serde_json::to_value(&param).unwrap();
        assert_eq!(json["chainName"], "BNB Testnet");
        assert_eq!(json["nativeCurrency"]["symbol"], "BNB");
        assert_eq!(json["blockExplorerUrls"][0], "https://testnet.bscscan.com");
    }
}
