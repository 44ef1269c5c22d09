use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError, RwLock},
};

use alloy::primitives::Address;
use futures::{FutureExt, future::BoxFuture};

use super::MockProvider;
use crate::{
    chain::ChainId,
    connector::{Connector, ConnectorEvent, ConnectorKind, Listener, Notifier},
    error::SyncError,
    provider::ReadProvider,
};

#[derive(Clone, Copy)]
struct WalletState {
    chain_id: ChainId,
    account: Option<Address>,
    connected: bool,
}

/// Interactive wallet double, switched between chains and accounts by the
/// test. Holds one [`MockProvider`] per chain it has been attached to.
pub struct MockWallet {
    state: RwLock<WalletState>,
    providers: Mutex<HashMap<ChainId, Arc<MockProvider>>>,
    notifier: Notifier,
}

impl MockWallet {
    pub fn new(chain_id: ChainId, account: Option<Address>) -> Self {
        Self {
            state: RwLock::new(WalletState { chain_id, account, connected: false }),
            providers: Mutex::new(HashMap::new()),
            notifier: Notifier::default(),
        }
    }

    fn current(&self) -> WalletState { *self.state.read().unwrap_or_else(PoisonError::into_inner) }

    /// Provider of the chain the wallet is attached to.
    pub fn mock_provider(&self) -> Arc<MockProvider> { self.mock_provider_for(self.current().chain_id) }

    pub fn mock_provider_for(&self, chain_id: ChainId) -> Arc<MockProvider> {
        self.providers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(chain_id)
            .or_insert_with(|| Arc::new(MockProvider::new(1)))
            .clone()
    }

    /// Emulates the user switching the wallet to another chain.
    pub fn switch_chain(&self, chain_id: ChainId) {
        let connected = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            state.chain_id = chain_id;
            state.connected
        };
        if connected {
            self.notifier.notify(ConnectorEvent::ChainChanged(chain_id));
        }
    }

    /// Emulates the user selecting another account.
    pub fn switch_account(&self, account: Option<Address>) {
        let connected = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            state.account = account;
            state.connected
        };
        if connected {
            self.notifier.notify(ConnectorEvent::AccountChanged(account));
        }
    }
}

impl Connector for MockWallet {
    fn kind(&self) -> ConnectorKind { ConnectorKind::Wallet }

    fn connect(&self) -> BoxFuture<'_, Result<(), SyncError>> {
        async move {
            let state = {
                let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
                state.connected = true;
                *state
            };
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
            let was_connected = std::mem::replace(
                &mut self.state.write().unwrap_or_else(PoisonError::into_inner).connected,
                false,
            );
            if was_connected {
                self.notifier.notify(ConnectorEvent::Disconnected);
            }
            Ok(())
        }
        .boxed()
    }

    fn account(&self) -> Option<Address> {
        let state = self.current();
        state.connected.then_some(state.account).flatten()
    }

    fn chain_id(&self) -> Option<ChainId> {
        let state = self.current();
        state.connected.then_some(state.chain_id)
    }

    fn is_active(&self) -> bool { self.current().connected }

    fn provider(&self) -> Option<Arc<dyn ReadProvider>> {
        self.is_active().then(|| self.mock_provider() as Arc<dyn ReadProvider>)
    }

    fn subscribe(&self, listener: Listener) { self.notifier.subscribe(listener) }
}
