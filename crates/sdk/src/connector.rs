use std::sync::{
    Arc, Mutex, PoisonError, RwLock,
    atomic::{AtomicBool, Ordering},
};

use alloy::primitives::Address;
use futures::{FutureExt, future::BoxFuture};
use tracing::debug;

use crate::{
    chain::{ChainEndpoint, ChainId},
    error::SyncError,
    provider::{AlloyProvider, ReadProvider},
};

/// Kind of a [`Connector`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectorKind {
    /// Interactive, user-approved wallet; can sign and submit transactions.
    Wallet,
    /// Non-interactive read-only endpoint scoped to one chain.
    Network,
}

/// Change notifications emitted by connectors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectorEvent {
    Connected { chain_id: ChainId, account: Option<Address> },
    AccountChanged(Option<Address>),
    ChainChanged(ChainId),
    Disconnected,
}

/// Callback invoked synchronously for every [`ConnectorEvent`], after the
/// connector state already reflects the change. Returning `false`
/// unsubscribes it.
pub type Listener = Arc<dyn Fn(&ConnectorEvent) -> bool + Send + Sync>;

/// Connection to a network, either through a wallet or directly.
pub trait Connector: Send + Sync {
    fn kind(&self) -> ConnectorKind;

    fn connect(&self) -> BoxFuture<'_, Result<(), SyncError>>;

    fn disconnect(&self) -> BoxFuture<'_, Result<(), SyncError>>;

    /// Currently selected account, if any.
    fn account(&self) -> Option<Address>;

    /// Chain the connector is currently attached to.
    fn chain_id(&self) -> Option<ChainId>;

    fn is_active(&self) -> bool;

    /// Provider serving reads for [`Connector::chain_id`]. Returns the same
    /// instance for as long as the connector stays on the chain.
    fn provider(&self) -> Option<Arc<dyn ReadProvider>>;

    /// Registers `listener` for [`ConnectorEvent`]s.
    fn subscribe(&self, listener: Listener);
}

/// Fan-out of [`ConnectorEvent`]s to listeners, called in registration
/// order before [`Notifier::notify`] returns.
#[derive(Default)]
pub struct Notifier {
    listeners: Mutex<Vec<Listener>>,
}

impl Notifier {
    pub fn subscribe(&self, listener: Listener) {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner).push(listener);
    }

    pub fn notify(&self, event: ConnectorEvent) {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner).retain(|l| l(&event));
    }

    pub fn len(&self) -> usize { self.listeners.lock().unwrap_or_else(PoisonError::into_inner).len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

/// Read-only connector for a single configured chain.
pub struct NetworkConnector {
    endpoint: ChainEndpoint,
    provider: Arc<dyn ReadProvider>,
    active: AtomicBool,
    notifier: Notifier,
}

impl NetworkConnector {
    pub fn new(endpoint: ChainEndpoint, provider: Arc<dyn ReadProvider>) -> Self {
        Self { endpoint, provider, active: AtomicBool::new(false), notifier: Notifier::default() }
    }

    pub fn endpoint(&self) -> &ChainEndpoint { &self.endpoint }
}

impl Connector for NetworkConnector {
    fn kind(&self) -> ConnectorKind { ConnectorKind::Network }

    fn connect(&self) -> BoxFuture<'_, Result<(), SyncError>> {
        async move {
            if !self.active.swap(true, Ordering::SeqCst) {
                self.notifier.notify(ConnectorEvent::Connected {
                    chain_id: self.endpoint.chain_id(),
                    account: None,
                });
            }
            Ok(())
        }
        .boxed()
    }

    fn disconnect(&self) -> BoxFuture<'_, Result<(), SyncError>> {
        async move {
            if self.active.swap(false, Ordering::SeqCst) {
                self.notifier.notify(ConnectorEvent::Disconnected);
            }
            Ok(())
        }
        .boxed()
    }

    fn account(&self) -> Option<Address> { None }

    fn chain_id(&self) -> Option<ChainId> { Some(self.endpoint.chain_id()) }

    fn is_active(&self) -> bool { self.active.load(Ordering::SeqCst) }

    fn provider(&self) -> Option<Arc<dyn ReadProvider>> { Some(self.provider.clone()) }

    fn subscribe(&self, listener: Listener) { self.notifier.subscribe(listener) }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct WalletState {
    chain_id: ChainId,
    account: Option<Address>,
}

/// Wallet connector backed by a JSON-RPC node holding unlocked accounts
/// (a local dev node or a signing proxy). Signing happens on the node side.
///
/// The node does not push changes: [`RpcWalletConnector::refresh`] polls it
/// and notifies listeners about chain and account switches.
pub struct RpcWalletConnector {
    provider: Arc<AlloyProvider>,
    state: RwLock<Option<WalletState>>,
    notifier: Notifier,
}

impl RpcWalletConnector {
    pub fn new(url: &str, throttle: Option<u32>) -> Result<Self, SyncError> {
        Ok(Self::with_provider(AlloyProvider::connect_http(url, throttle)?))
    }

    pub fn with_provider(provider: AlloyProvider) -> Self {
        Self { provider: Arc::new(provider), state: RwLock::new(None), notifier: Notifier::default() }
    }

    async fn fetch_state(&self) -> Result<WalletState, SyncError> {
        let chain_id = self.provider.chain_id().await?;
        let accounts = self.provider.accounts().await?;
        Ok(WalletState { chain_id, account: accounts.first().copied() })
    }

    fn current(&self) -> Option<WalletState> {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Re-reads chain and account from the node, notifying listeners about
    /// changes. No-op while disconnected.
    pub async fn refresh(&self) -> Result<(), SyncError> {
        let Some(previous) = self.current() else {
            return Ok(());
        };
        let next = self.fetch_state().await?;
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            // Disconnected while refreshing
            if state.is_none() {
                return Ok(());
            }
            *state = Some(next);
        }
        if next.chain_id != previous.chain_id {
            debug!(from = previous.chain_id, to = next.chain_id, "wallet chain changed");
            self.notifier.notify(ConnectorEvent::ChainChanged(next.chain_id));
        }
        if next.account != previous.account {
            debug!(from = ?previous.account, to = ?next.account, "wallet account changed");
            self.notifier.notify(ConnectorEvent::AccountChanged(next.account));
        }
        Ok(())
    }
}

impl Connector for RpcWalletConnector {
    fn kind(&self) -> ConnectorKind { ConnectorKind::Wallet }

    fn connect(&self) -> BoxFuture<'_, Result<(), SyncError>> {
        async move {
            let state = self.fetch_state().await?;
            *self.state.write().unwrap_or_else(PoisonError::into_inner) = Some(state);
            self.notifier.notify(ConnectorEvent::Connected {
                chain_id: state.chain_id,
                account: state.account,
            });
            Ok(())
        }
        .boxed()
    }

    fn disconnect(&self) -> BoxFuture<'_, Result<(), SyncError>> {
        async move {
            if self.state.write().unwrap_or_else(PoisonError::into_inner).take().is_some() {
                self.notifier.notify(ConnectorEvent::Disconnected);
            }
            Ok(())
        }
        .boxed()
    }

    fn account(&self) -> Option<Address> { self.current().and_then(|s| s.account) }

    fn chain_id(&self) -> Option<ChainId> { self.current().map(|s| s.chain_id) }

    fn is_active(&self) -> bool { self.current().is_some() }

    fn provider(&self) -> Option<Arc<dyn ReadProvider>> {
        self.is_active().then(|| self.provider.clone() as Arc<dyn ReadProvider>)
    }

    fn subscribe(&self, listener: Listener) { self.notifier.subscribe(listener) }
}

#[cfg(test)]
mod tests {
    use alloy::{
        primitives::address,
        providers::ProviderBuilder,
        transports::mock::Asserter,
    };

    use super::*;
    use crate::{
        chain::{BSC, BSC_TESTNET},
        testing::MockProvider,
    };

    const ALICE: Address = address!("0x00000000000000000000000000000000000a11ce");
    const BOB: Address = address!("0x0000000000000000000000000000000000000b0b");

    fn recorder() -> (Listener, Arc<Mutex<Vec<ConnectorEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let listener: Listener = Arc::new(move |event: &ConnectorEvent| {
            sink.lock().unwrap().push(event.clone());
            true
        });
        (listener, events)
    }

    #[tokio::test]
    async fn test_network_connector_lifecycle() {
        let connector =
            NetworkConnector::new(ChainEndpoint::bsc(), Arc::new(MockProvider::new(10)));
        let (listener, events) = recorder();
        connector.subscribe(listener);

        assert!(!connector.is_active());
        assert_eq!(connector.chain_id(), Some(BSC));
        assert_eq!(connector.account(), None);

        connector.connect().await.unwrap();
        connector.connect().await.unwrap();
        assert!(connector.is_active());
        connector.disconnect().await.unwrap();
        assert!(!connector.is_active());

        assert_eq!(*events.lock().unwrap(), vec![
            ConnectorEvent::Connected { chain_id: BSC, account: None },
            ConnectorEvent::Disconnected,
        ]);
    }

    #[test]
    fn test_notifier_drops_finished_listeners() {
        let notifier = Notifier::default();
        let (open, events) = recorder();
        notifier.subscribe(Arc::new(|_: &ConnectorEvent| false));
        notifier.subscribe(open);
        assert_eq!(notifier.len(), 2);

        notifier.notify(ConnectorEvent::ChainChanged(1));
        assert_eq!(notifier.len(), 1);
        assert_eq!(*events.lock().unwrap(), vec![ConnectorEvent::ChainChanged(1)]);
    }

    #[tokio::test]
    async fn test_rpc_wallet_follows_node() {
        let asserter = Asserter::new();
        let wallet = RpcWalletConnector::with_provider(AlloyProvider::new(
            ProviderBuilder::new().connect_mocked_client(asserter.clone()),
        ));
        let (listener, events) = recorder();
        wallet.subscribe(listener);

        // Disconnected wallets neither serve reads nor poll the node
        assert!(wallet.provider().is_none());
        wallet.refresh().await.unwrap();

        asserter.push_success(&"0x38");
        asserter.push_success(&vec![ALICE]);
        wallet.connect().await.unwrap();
        assert_eq!((wallet.chain_id(), wallet.account()), (Some(BSC), Some(ALICE)));
        let provider = wallet.provider().unwrap();
        assert!(Arc::ptr_eq(&provider, &wallet.provider().unwrap()));

        // Unchanged
        asserter.push_success(&"0x38");
        asserter.push_success(&vec![ALICE]);
        wallet.refresh().await.unwrap();

        asserter.push_success(&"0x61");
        asserter.push_success(&vec![BOB, ALICE]);
        wallet.refresh().await.unwrap();
        assert_eq!((wallet.chain_id(), wallet.account()), (Some(BSC_TESTNET), Some(BOB)));

        wallet.disconnect().await.unwrap();
        assert!(!wallet.is_active());
        assert_eq!(*events.lock().unwrap(), vec![
            ConnectorEvent::Connected { chain_id: BSC, account: Some(ALICE) },
            ConnectorEvent::ChainChanged(BSC_TESTNET),
            ConnectorEvent::AccountChanged(Some(BOB)),
            ConnectorEvent::Disconnected,
        ]);
    }
}
