//! Application session wiring the connector registry, the call batching
//! engine and the transaction tracker.
//!
//! The session subscribes once to the active connector. Every
//! [`ConnectorEvent`] invalidates the affected cache scope before the
//! connector's notification returns, so reads in flight for a superseded
//! chain or account are discarded on arrival.

use std::{
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use futures::{Stream, stream};
use tracing::{debug, info};

use crate::{
    balances::Balances,
    chain::{ChainConfig, ChainId},
    connector::{Connector, ConnectorEvent, Listener},
    error::SyncError,
    multicall::{Multicall, MulticallOptions},
    registry::{ActiveState, ConnectorRegistry, ProviderFactory},
    transactions::TransactionTracker,
};

/// Outcome of one polling tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Tick {
    /// Listened calls fetched.
    pub fetched: usize,
    /// Transactions confirmed.
    pub confirmed: usize,
}

/// State reachable from the connector listener.
struct Inner {
    registry: Arc<ConnectorRegistry>,
    multicall: Multicall,
    active_chain: Mutex<Option<ChainId>>,
    /// Bumped on every activation; listeners of older activations retire.
    generation: AtomicU64,
}

impl Inner {
    fn active_chain(&self) -> Option<ChainId> {
        *self.active_chain.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn switch_chain(&self, chain_id: Option<ChainId>) {
        let previous = std::mem::replace(
            &mut *self.active_chain.lock().unwrap_or_else(PoisonError::into_inner),
            chain_id,
        );
        if previous == chain_id {
            return;
        }
        debug!(from = ?previous, to = ?chain_id, "active chain switched");
        if let Some(previous) = previous {
            self.multicall.invalidate_chain(previous);
        }
    }

    fn handle_event(&self, event: &ConnectorEvent) {
        match *event {
            ConnectorEvent::Connected { chain_id, .. } | ConnectorEvent::ChainChanged(chain_id) => {
                self.switch_chain(Some(chain_id));
            },
            ConnectorEvent::AccountChanged(account) => {
                debug!(?account, "active account changed");
                if let Some(chain_id) = self.active_chain() {
                    self.multicall.discard_in_flight(chain_id);
                }
            },
            ConnectorEvent::Disconnected => {
                self.registry.clear_active();
                self.switch_chain(None);
            },
        }
    }
}

pub struct Session {
    inner: Arc<Inner>,
    tracker: TransactionTracker,
}

impl Session {
    pub fn new(config: ChainConfig, factory: impl ProviderFactory + 'static) -> Self {
        Self::with_options(config, factory, MulticallOptions::default())
    }

    pub fn with_options(
        config: ChainConfig,
        factory: impl ProviderFactory + 'static,
        options: MulticallOptions,
    ) -> Self {
        let registry = Arc::new(ConnectorRegistry::new(config, factory));
        Self {
            tracker: TransactionTracker::new(registry.clone()),
            inner: Arc::new(Inner {
                multicall: Multicall::with_options(registry.clone(), options),
                registry,
                active_chain: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectorRegistry> { &self.inner.registry }

    pub fn multicall(&self) -> &Multicall { &self.inner.multicall }

    pub fn tracker(&self) -> &TransactionTracker { &self.tracker }

    pub fn balances(&self) -> Balances<'_> { Balances::new(&self.inner.multicall, &self.tracker) }

    pub fn active_state(&self) -> ActiveState { self.inner.registry.active_state() }

    /// Connects `connector` and makes it the active one.
    ///
    /// Reads of the previously active chain issued before are discarded on
    /// arrival.
    pub async fn activate(&self, connector: Arc<dyn Connector>) -> Result<(), SyncError> {
        connector.connect().await?;
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(previous) = self.inner.registry.set_active(connector.clone())
            && !Arc::ptr_eq(&previous, &connector)
        {
            previous.disconnect().await?;
        }
        connector.subscribe(self.listener(generation));
        let chain_id = connector.chain_id();
        self.inner.switch_chain(chain_id);
        info!(chain_id, account = ?connector.account(), "connector activated");
        Ok(())
    }

    /// Disconnects the active connector.
    pub async fn deactivate(&self) -> Result<(), SyncError> {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(connector) = self.inner.registry.clear_active() {
            connector.disconnect().await?;
        }
        self.inner.switch_chain(None);
        Ok(())
    }

    fn listener(&self, generation: u64) -> Listener {
        let inner = Arc::downgrade(&self.inner);
        Arc::new(move |event: &ConnectorEvent| {
            let Some(inner) = inner.upgrade() else {
                return false;
            };
            if inner.generation.load(Ordering::SeqCst) != generation {
                return false;
            }
            inner.handle_event(event);
            true
        })
    }

    /// Applies a connector notification. The affected cache scope is
    /// invalidated before returning.
    ///
    /// Notifications of the active connector are applied automatically;
    /// this is for consumers relaying events of their own.
    pub fn handle_event(&self, event: &ConnectorEvent) { self.inner.handle_event(event) }

    /// One iteration of both polling loops: refetches outdated listened
    /// calls and polls receipts of pending transactions.
    pub async fn tick(&self) -> Tick {
        let (fetched, confirmed) =
            futures::join!(self.inner.multicall.poll(), self.tracker.poll());
        Tick { fetched, confirmed }
    }

    /// Stream ticking every `interval`, sleeping with `sleep` in between.
    pub fn ticks<S, SFut>(&self, interval: Duration, sleep: S) -> impl Stream<Item = Tick> + '_
    where
        S: Fn(Duration) -> SFut + Copy + 'static,
        SFut: Future<Output = ()>,
    {
        stream::unfold((self, false), move |(session, started)| async move {
            if started {
                sleep(interval).await;
            }
            let tick = session.tick().await;
            Some((tick, (session, true)))
        })
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{Address, U256, address};
    use futures::{StreamExt, future};

    use super::*;
    use crate::{
        abi::erc20::IERC20,
        balances::Currency,
        chain::{BSC, SEPOLIA},
        multicall::{CallRequest, Freshness, ListenerOptions},
        testing::{MockNetwork, MockWallet},
    };

    const TOKEN: Address = address!("0x0000000000000000000000000000000000000701");
    const ALICE: Address = address!("0x00000000000000000000000000000000000a11ce");
    const BOB: Address = address!("0x0000000000000000000000000000000000000b0b");

    fn session() -> (MockNetwork, Session) {
        let network = MockNetwork::new(&[BSC, SEPOLIA]);
        let session =
            Session::new(ChainConfig::default().supported(&[BSC, SEPOLIA]), network.clone());
        (network, session)
    }

    #[tokio::test]
    async fn test_chain_switch_invalidates_previous_chain() {
        let (_, session) = session();
        let wallet = Arc::new(MockWallet::new(BSC, Some(ALICE)));
        session.activate(wallet.clone()).await.unwrap();

        let on_bsc = CallRequest::from_call(BSC, TOKEN, &IERC20::balanceOfCall { account: ALICE });
        let on_sepolia =
            CallRequest::from_call(SEPOLIA, TOKEN, &IERC20::balanceOfCall { account: ALICE });
        session.multicall().batch_read(&[on_bsc.clone(), on_sepolia.clone()], Freshness::Any).await;

        // Applied before the notification returns
        wallet.switch_chain(SEPOLIA);
        assert!(session.multicall().state(&on_bsc).is_stale());
        assert!(!session.multicall().state(&on_sepolia).is_stale());
        assert_eq!(session.active_state().chain_id, Some(SEPOLIA));
        assert_eq!(session.active_state().account, Some(ALICE));
    }

    #[tokio::test]
    async fn test_disconnect_clears_active_connector() {
        let (_, session) = session();
        let wallet = Arc::new(MockWallet::new(BSC, Some(ALICE)));
        session.activate(wallet.clone()).await.unwrap();
        wallet.switch_account(Some(BOB));
        assert_eq!(session.active_state().account, Some(BOB));

        wallet.disconnect().await.unwrap();
        assert!(session.registry().active().is_none());
        assert!(!session.active_state().active);
    }

    #[tokio::test]
    async fn test_replaced_connector_is_ignored() {
        let (_, session) = session();
        let first = Arc::new(MockWallet::new(BSC, Some(ALICE)));
        let second = Arc::new(MockWallet::new(SEPOLIA, Some(BOB)));
        session.activate(first.clone()).await.unwrap();
        session.activate(second.clone()).await.unwrap();
        assert!(!first.is_active());

        let on_sepolia =
            CallRequest::from_call(SEPOLIA, TOKEN, &IERC20::balanceOfCall { account: BOB });
        session.multicall().read(&on_sepolia, Freshness::Any).await;

        // The first wallet reconnecting elsewhere does not touch the session
        first.connect().await.unwrap();
        first.switch_chain(SEPOLIA);
        first.switch_chain(BSC);
        assert!(!session.multicall().state(&on_sepolia).is_stale());
        assert_eq!(session.active_state().chain_id, Some(SEPOLIA));

        session.deactivate().await.unwrap();
        assert!(session.multicall().state(&on_sepolia).is_stale());
        second.connect().await.unwrap();
        assert_eq!(session.active_state().chain_id, None);
    }

    #[tokio::test]
    async fn test_ticks_drive_both_loops() {
        let (network, session) = session();
        let wallet = Arc::new(MockWallet::new(BSC, Some(ALICE)));
        session.activate(wallet.clone()).await.unwrap();

        let requests = session.balances().balance_requests(BSC, ALICE, &[Currency::Token(TOKEN)]);
        session.multicall().add_listeners(&requests, ListenerOptions::every_block());
        wallet.mock_provider().set_return(TOKEN, &IERC20::balanceOfCall { account: ALICE }, U256::from(1));

        let hash = alloy::primitives::B256::with_last_byte(1);
        session.tracker().add(BSC, hash, ALICE, Default::default(), chrono::Utc::now());
        wallet.mock_provider().set_receipt(hash, 2, true);

        let ticks: Vec<_> = session.ticks(Duration::ZERO, |_| future::ready(())).take(2).collect().await;
        assert_eq!(ticks, vec![Tick { fetched: 1, confirmed: 1 }, Tick::default()]);

        // Reads go through the wallet on its own chain
        assert_eq!(network.provider(BSC).round_trips(), 0);
        let balances = session.balances().cached_balances(BSC, ALICE, &[Currency::Token(TOKEN)]);
        assert_eq!(balances.get(&Currency::Token(TOKEN)), Some(U256::from(1)));
    }
}
