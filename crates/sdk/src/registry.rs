use std::sync::{Arc, PoisonError, RwLock};

use alloy::primitives::Address;
use dashmap::{DashMap, mapref::entry::Entry};
use tracing::{debug, warn};

use crate::{
    chain::{ChainConfig, ChainEndpoint, ChainId},
    connector::{Connector, NetworkConnector},
    error::SyncError,
    provider::{AlloyProvider, ReadProvider},
};

/// Builds read providers for configured chains.
pub trait ProviderFactory: Send + Sync {
    fn build(&self, endpoint: &ChainEndpoint) -> Result<Arc<dyn ReadProvider>, SyncError>;
}

impl<F> ProviderFactory for F
where
    F: Fn(&ChainEndpoint) -> Result<Arc<dyn ReadProvider>, SyncError> + Send + Sync,
{
    fn build(&self, endpoint: &ChainEndpoint) -> Result<Arc<dyn ReadProvider>, SyncError> {
        self(endpoint)
    }
}

/// Connects to the preferred RPC url of the chain over HTTP.
#[derive(Clone, Copy, Debug, Default)]
pub struct HttpProviderFactory {
    /// Requests per second, unlimited if `None`.
    pub throttle: Option<u32>,
}

impl ProviderFactory for HttpProviderFactory {
    fn build(&self, endpoint: &ChainEndpoint) -> Result<Arc<dyn ReadProvider>, SyncError> {
        let url = endpoint
            .rpc_urls()
            .first()
            .ok_or(SyncError::NoProvider { chain_id: endpoint.chain_id() })?;
        Ok(Arc::new(AlloyProvider::connect_http(url, self.throttle)?))
    }
}

/// Snapshot of the active connection for rendering.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActiveState {
    pub chain_id: Option<ChainId>,
    /// Hidden while the wallet is attached to an unsupported chain.
    pub account: Option<Address>,
    pub active: bool,
    /// `None` while the chain is unknown.
    pub error_network: Option<bool>,
}

/// Resolves which connector services reads for a given chain.
///
/// Holds the single user-selected active connector and a per-chain cache of
/// read-only [`NetworkConnector`]s constructed on first use and kept for the
/// lifetime of the registry.
pub struct ConnectorRegistry {
    config: ChainConfig,
    factory: Box<dyn ProviderFactory>,
    active: RwLock<Option<Arc<dyn Connector>>>,
    network: DashMap<ChainId, Arc<NetworkConnector>>,
}

impl ConnectorRegistry {
    pub fn new(config: ChainConfig, factory: impl ProviderFactory + 'static) -> Self {
        Self {
            config,
            factory: Box::new(factory),
            active: RwLock::new(None),
            network: DashMap::new(),
        }
    }

    /// Registry connecting to configured chains over HTTP.
    pub fn http(config: ChainConfig, throttle: Option<u32>) -> Self {
        Self::new(config, HttpProviderFactory { throttle })
    }

    pub fn config(&self) -> &ChainConfig { &self.config }

    pub fn active(&self) -> Option<Arc<dyn Connector>> {
        self.active.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Replaces the active connector, returning the previous one.
    pub fn set_active(&self, connector: Arc<dyn Connector>) -> Option<Arc<dyn Connector>> {
        self.active.write().unwrap_or_else(PoisonError::into_inner).replace(connector)
    }

    pub fn clear_active(&self) -> Option<Arc<dyn Connector>> {
        self.active.write().unwrap_or_else(PoisonError::into_inner).take()
    }

    /// Chain the active connector is attached to.
    pub fn active_chain_id(&self) -> Option<ChainId> {
        self.active().filter(|c| c.is_active()).and_then(|c| c.chain_id())
    }

    pub fn active_state(&self) -> ActiveState {
        let Some(connector) = self.active().filter(|c| c.is_active()) else {
            return ActiveState { chain_id: None, account: None, active: false, error_network: None };
        };
        let chain_id = connector.chain_id();
        let supported = chain_id.map(|id| self.config.is_supported(id));
        let account = connector.account().filter(|_| supported != Some(false));
        ActiveState {
            chain_id,
            account,
            active: account.is_some(),
            error_network: supported.map(|s| !s),
        }
    }

    /// Provider serving reads for `chain_id`.
    ///
    /// Prefers the active connector when it is attached to the chain,
    /// otherwise falls back to a read-only connector built from static
    /// configuration. `None` means the chain is unsupported.
    pub fn resolve_provider(&self, chain_id: ChainId) -> Option<Arc<dyn ReadProvider>> {
        if let Some(active) = self.active()
            && active.is_active()
            && active.chain_id() == Some(chain_id)
            && let Some(provider) = active.provider()
        {
            return Some(provider);
        }
        self.network_connector(chain_id).and_then(|c| c.provider())
    }

    /// Same as [`Self::resolve_provider`] with absence as a typed error.
    pub fn require_provider(&self, chain_id: ChainId) -> Result<Arc<dyn ReadProvider>, SyncError> {
        self.resolve_provider(chain_id).ok_or(SyncError::NoProvider { chain_id })
    }

    /// Read-only connector of the chain, constructed on first request.
    pub fn network_connector(&self, chain_id: ChainId) -> Option<Arc<NetworkConnector>> {
        match self.network.entry(chain_id) {
            Entry::Occupied(entry) => Some(entry.get().clone()),
            Entry::Vacant(entry) => {
                let endpoint = self.config.endpoint(chain_id)?;
                let provider = match self.factory.build(endpoint) {
                    Ok(provider) => provider,
                    Err(err) => {
                        warn!(chain_id, %err, "failed to build read-only provider");
                        return None;
                    },
                };
                debug!(chain_id, "read-only connector created");
                let connector = Arc::new(NetworkConnector::new(endpoint.clone(), provider));
                entry.insert(connector.clone());
                Some(connector)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::address;

    use super::*;
    use crate::{
        chain::{BSC, MAINNET, SEPOLIA},
        testing::{MockNetwork, MockWallet},
    };

    const ALICE: Address = address!("0x00000000000000000000000000000000000a11ce");

    fn registry(network: &MockNetwork) -> ConnectorRegistry {
        ConnectorRegistry::new(ChainConfig::default().supported(&[BSC, SEPOLIA]), network.clone())
    }

    #[test]
    fn test_unsupported_chain_has_no_provider() {
        let network = MockNetwork::new(&[BSC, SEPOLIA]);
        let registry = registry(&network);

        assert!(registry.resolve_provider(MAINNET).is_none());
        assert!(registry.resolve_provider(424242).is_none());
        assert_eq!(
            registry.require_provider(MAINNET).err(),
            Some(SyncError::NoProvider { chain_id: MAINNET })
        );
        assert_eq!(network.builds(), 0);
    }

    #[test]
    fn test_read_only_connectors_are_cached() {
        let network = MockNetwork::new(&[BSC, SEPOLIA]);
        let registry = registry(&network);

        assert!(registry.resolve_provider(BSC).is_some());
        assert!(registry.resolve_provider(BSC).is_some());
        assert!(registry.resolve_provider(SEPOLIA).is_some());
        assert_eq!(network.builds(), 2);
        // Constructing read-only connectors never touches the active one
        assert!(registry.active().is_none());
    }

    #[tokio::test]
    async fn test_active_connector_preferred_on_its_chain() {
        let network = MockNetwork::new(&[BSC, SEPOLIA]);
        let registry = registry(&network);
        let wallet = Arc::new(MockWallet::new(BSC, Some(ALICE)));
        wallet.connect().await.unwrap();
        registry.set_active(wallet.clone());

        let provider = registry.resolve_provider(BSC).unwrap();
        assert!(Arc::ptr_eq(&provider, &(wallet.mock_provider() as Arc<dyn ReadProvider>)));
        assert_eq!(network.builds(), 0);

        // Other chains go through read-only connectors
        let provider = registry.resolve_provider(SEPOLIA).unwrap();
        assert!(Arc::ptr_eq(&provider, &(network.provider(SEPOLIA) as Arc<dyn ReadProvider>)));
        assert_eq!(network.builds(), 1);
    }

    #[tokio::test]
    async fn test_active_state_hides_account_on_unsupported_chain() {
        let network = MockNetwork::new(&[BSC]);
        let registry = registry(&network);
        assert_eq!(registry.active_state().error_network, None);

        let wallet = Arc::new(MockWallet::new(BSC, Some(ALICE)));
        wallet.connect().await.unwrap();
        registry.set_active(wallet.clone());
        assert_eq!(
            registry.active_state(),
            ActiveState {
                chain_id: Some(BSC),
                account: Some(ALICE),
                active: true,
                error_network: Some(false)
            }
        );

        wallet.switch_chain(MAINNET);
        let state = registry.active_state();
        assert_eq!(state.chain_id, Some(MAINNET));
        assert_eq!(state.account, None);
        assert!(!state.active);
        assert_eq!(state.error_network, Some(true));
    }
}
