use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};

use alloy::{
    primitives::{Address, Bytes, TxHash, keccak256},
    rpc::types::TransactionRequest,
};
use alloy_sol_types::{SolCall, SolValue};
use futures::{
    FutureExt,
    channel::oneshot,
    future::BoxFuture,
};

use crate::{
    chain::{ChainEndpoint, ChainId},
    error::SyncError,
    provider::{Aggregate, ReadProvider, Receipt, SubCall, SubCallResult},
    registry::ProviderFactory,
};

#[derive(Clone, Debug)]
enum Response {
    Return(Bytes),
    Revert(Bytes),
}

#[derive(Default)]
struct State {
    block_number: u64,
    responses: HashMap<(Address, Bytes), Response>,
    failing_aggregates: usize,
    aggregates: Vec<Vec<SubCall>>,
    receipts: HashMap<TxHash, Receipt>,
    sent: Vec<TransactionRequest>,
    send_error: Option<SyncError>,
    nonce: u64,
}

/// Pauses the next aggregated call of a [`MockProvider`] until released.
pub struct Hold {
    started: oneshot::Receiver<()>,
    release: oneshot::Sender<()>,
}

impl Hold {
    /// Resolves once the held call reached the provider.
    pub async fn started(&mut self) { let _ = (&mut self.started).await; }

    /// Lets the held call complete.
    pub fn release(self) { let _ = self.release.send(()); }
}

/// Scriptable in-memory node.
///
/// Sub-calls without a scripted response succeed with empty return data.
/// Every aggregated call is recorded for inspection.
pub struct MockProvider {
    state: Mutex<State>,
    hold: Mutex<Option<(oneshot::Sender<()>, oneshot::Receiver<()>)>>,
}

impl MockProvider {
    pub fn new(block_number: u64) -> Self {
        Self {
            state: Mutex::new(State { block_number, ..Default::default() }),
            hold: Mutex::new(None),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn block_number(&self) -> u64 { self.state().block_number }

    pub fn set_block_number(&self, block_number: u64) { self.state().block_number = block_number; }

    /// Scripts `call` on `target` to return `value`.
    pub fn set_return<C: SolCall, V: SolValue>(&self, target: Address, call: &C, value: V) {
        self.state()
            .responses
            .insert((target, call.abi_encode().into()), Response::Return(value.abi_encode().into()));
    }

    /// Scripts `call` on `target` to return raw `data`.
    pub fn set_return_data<C: SolCall>(&self, target: Address, call: &C, data: Bytes) {
        self.state().responses.insert((target, call.abi_encode().into()), Response::Return(data));
    }

    /// Scripts `call` on `target` to revert.
    pub fn set_revert<C: SolCall>(&self, target: Address, call: &C) {
        self.state()
            .responses
            .insert((target, call.abi_encode().into()), Response::Revert(Bytes::new()));
    }

    /// Fails the next `count` aggregated calls with a network failure.
    pub fn fail_next_aggregates(&self, count: usize) { self.state().failing_aggregates = count; }

    /// Holds the next aggregated call until [`Hold::release`].
    pub fn hold(&self) -> Hold {
        let (started_tx, started) = oneshot::channel();
        let (release, release_rx) = oneshot::channel();
        *self.hold.lock().unwrap_or_else(PoisonError::into_inner) = Some((started_tx, release_rx));
        Hold { started, release }
    }

    /// Number of aggregated calls received, failed ones included.
    pub fn round_trips(&self) -> usize { self.state().aggregates.len() }

    /// Every sub-call received, in order.
    pub fn sub_calls(&self) -> Vec<SubCall> { self.state().aggregates.concat() }

    /// Mines the transaction at `block_number`.
    pub fn set_receipt(&self, hash: TxHash, block_number: u64, status: bool) {
        self.state().receipts.insert(hash, Receipt {
            transaction_hash: hash,
            block_number,
            block_hash: Some(keccak256(block_number.to_be_bytes())),
            status,
            gas_used: 21_000,
        });
    }

    /// Fails the next `send_transaction` with `err`.
    pub fn fail_next_send(&self, err: SyncError) { self.state().send_error = Some(err); }

    /// Transactions relayed so far.
    pub fn sent(&self) -> Vec<TransactionRequest> { self.state().sent.clone() }

    fn respond(&self, calls: &[SubCall]) -> Result<Aggregate, SyncError> {
        let mut state = self.state();
        state.aggregates.push(calls.to_vec());
        if state.failing_aggregates > 0 {
            state.failing_aggregates -= 1;
            return Err(SyncError::NetworkFailure("connection reset".to_string()));
        }
        let results = calls
            .iter()
            .map(|call| {
                match state.responses.get(&(call.target, call.call_data.clone())) {
                    Some(Response::Return(data)) => {
                        SubCallResult { success: true, return_data: data.clone() }
                    },
                    Some(Response::Revert(data)) => {
                        SubCallResult { success: false, return_data: data.clone() }
                    },
                    None => SubCallResult { success: true, return_data: Bytes::new() },
                }
            })
            .collect();
        Ok(Aggregate { block_number: state.block_number, results })
    }
}

impl ReadProvider for MockProvider {
    fn aggregate<'a>(
        &'a self,
        _aggregator: Address,
        calls: &'a [SubCall],
    ) -> BoxFuture<'a, Result<Aggregate, SyncError>> {
        async move {
            let hold = self.hold.lock().unwrap_or_else(PoisonError::into_inner).take();
            if let Some((started, release)) = hold {
                let _ = started.send(());
                let _ = release.await;
            }
            self.respond(calls)
        }
        .boxed()
    }

    fn block_number(&self) -> BoxFuture<'_, Result<u64, SyncError>> {
        async move { Ok(self.state().block_number) }.boxed()
    }

    fn transaction_receipt(&self, hash: TxHash) -> BoxFuture<'_, Result<Option<Receipt>, SyncError>> {
        async move { Ok(self.state().receipts.get(&hash).cloned()) }.boxed()
    }

    fn send_transaction(&self, tx: TransactionRequest) -> BoxFuture<'_, Result<TxHash, SyncError>> {
        async move {
            let mut state = self.state();
            if let Some(err) = state.send_error.take() {
                return Err(err);
            }
            state.nonce += 1;
            let hash = keccak256(state.nonce.to_be_bytes());
            state.sent.push(tx);
            Ok(hash)
        }
        .boxed()
    }
}

/// One [`MockProvider`] per chain, handed out by the
/// [`ProviderFactory`] implementation.
#[derive(Clone)]
pub struct MockNetwork {
    providers: Arc<HashMap<ChainId, Arc<MockProvider>>>,
    builds: Arc<AtomicUsize>,
}

impl MockNetwork {
    /// Network with providers at block 1 for `chains`.
    pub fn new(chains: &[ChainId]) -> Self {
        Self {
            providers: Arc::new(
                chains.iter().map(|id| (*id, Arc::new(MockProvider::new(1)))).collect(),
            ),
            builds: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Panics if the chain is not part of the network.
    pub fn provider(&self, chain_id: ChainId) -> Arc<MockProvider> {
        self.providers.get(&chain_id).cloned().expect("chain is part of the mock network")
    }

    /// Number of providers built by the factory.
    pub fn builds(&self) -> usize { self.builds.load(Ordering::SeqCst) }
}

impl ProviderFactory for MockNetwork {
    fn build(&self, endpoint: &ChainEndpoint) -> Result<Arc<dyn ReadProvider>, SyncError> {
        let chain_id = endpoint.chain_id();
        let provider = self.providers.get(&chain_id).ok_or(SyncError::NoProvider { chain_id })?;
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(provider.clone())
    }
}
