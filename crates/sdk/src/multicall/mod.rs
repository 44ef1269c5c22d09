//! Call batching engine.
//!
//! Aggregates contract reads issued within a polling tick into one
//! round-trip per chain through the chain's Multicall3 contract, deduplicates
//! identical requests and caches results by request identity and block.
//!
//! Two ways of consuming it:
//!
//! * [`Multicall::batch_read`] resolves a set of requests on demand.
//! * [`Multicall::add_listeners`] registers long-lived interest in requests,
//!   which [`Multicall::poll`] refreshes once per tick when the cached data
//!   falls behind the chain's latest block. [`Multicall::state`] projects the
//!   cached state for rendering.
//!
//! Consumers reading a request that is already in flight await the same
//! round-trip. Results of round-trips that were in flight while their chain
//! got invalidated (see [`Multicall::invalidate_chain`]), or whose chain is
//! served by another provider by the time they arrive, are discarded.

mod cache;
mod call;

use std::{
    collections::{BTreeMap, HashMap, HashSet, btree_map},
    sync::Arc,
};

use alloy::primitives::Address;
pub use call::{CallRequest, CallResult, Freshness, ListenerOptions, NEVER_RELOAD};
use dashmap::{DashMap, mapref::entry::Entry};
use futures::{
    FutureExt,
    channel::oneshot,
    future::{Shared, join_all},
};
use itertools::Itertools;
use tracing::{debug, warn};

use self::cache::{CallCache, Outcome};
use crate::{
    chain::ChainId,
    error::SyncError,
    provider::{Aggregate, ReadProvider, SubCall},
    registry::ConnectorRegistry,
};

/// Default maximum number of sub-calls per aggregated call.
pub const DEFAULT_CHUNK_SIZE: usize = 500;

#[derive(Clone, Copy, Debug)]
pub struct MulticallOptions {
    /// Maximum number of sub-calls sent in one aggregated call; larger
    /// batches are split.
    pub max_chunk_size: usize,
}

impl Default for MulticallOptions {
    fn default() -> Self { Self { max_chunk_size: DEFAULT_CHUNK_SIZE } }
}

/// Call batching engine, see the [module documentation](self).
pub struct Multicall {
    registry: Arc<ConnectorRegistry>,
    options: MulticallOptions,
    cache: CallCache,
    listeners: DashMap<CallRequest, BTreeMap<u64, usize>>,
    block_numbers: DashMap<ChainId, u64>,
    epochs: DashMap<ChainId, u64>,
    in_flight: DashMap<CallRequest, InFlight>,
}

type Batch = Vec<(CallRequest, bool)>;

/// Results of one round-trip, handed to consumers that joined it.
type Delivery = Shared<oneshot::Receiver<Arc<HashMap<CallRequest, CallResult>>>>;

struct InFlight {
    epoch: u64,
    delivery: Delivery,
}

/// Clears the in-flight markers of a round-trip, also when it is dropped
/// before completing.
struct InFlightGuard<'a> {
    in_flight: &'a DashMap<CallRequest, InFlight>,
    requests: Vec<CallRequest>,
    epoch: u64,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        for request in &self.requests {
            self.in_flight.remove_if(request, |_, f| f.epoch == self.epoch);
        }
    }
}

impl Multicall {
    pub fn new(registry: Arc<ConnectorRegistry>) -> Self {
        Self::with_options(registry, MulticallOptions::default())
    }

    pub fn with_options(registry: Arc<ConnectorRegistry>, options: MulticallOptions) -> Self {
        Self {
            registry,
            options,
            cache: CallCache::default(),
            listeners: DashMap::new(),
            block_numbers: DashMap::new(),
            epochs: DashMap::new(),
            in_flight: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectorRegistry> { &self.registry }

    /// Latest block observed for the chain.
    pub fn latest_block(&self, chain_id: ChainId) -> Option<u64> {
        self.block_numbers.get(&chain_id).map(|b| *b)
    }

    /// Records a block observed for the chain. The latest block never goes
    /// backwards; returns `true` if it advanced.
    pub fn update_block_number(&self, chain_id: ChainId, block_number: u64) -> bool {
        match self.block_numbers.entry(chain_id) {
            Entry::Occupied(mut latest) if *latest.get() < block_number => {
                latest.insert(block_number);
                true
            },
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(block_number);
                true
            },
        }
    }

    fn epoch(&self, chain_id: ChainId) -> u64 { self.epochs.get(&chain_id).map_or(0, |e| *e) }

    /// Makes results of requests currently in flight for the chain
    /// irrelevant: they are discarded on arrival.
    pub fn discard_in_flight(&self, chain_id: ChainId) {
        *self.epochs.entry(chain_id).or_insert(0) += 1;
        self.in_flight.retain(|request, _| request.chain_id != chain_id);
    }

    /// Invalidates everything scoped to the chain: in-flight results are
    /// discarded and cached results marked stale, so they are refetched on the
    /// next read or tick. Other chains and never-reload results are kept.
    pub fn invalidate_chain(&self, chain_id: ChainId) {
        self.discard_in_flight(chain_id);
        let count = self.cache.mark_chain_stale(chain_id);
        debug!(chain_id, entries = count, "chain invalidated");
    }

    /// Registers interest in the requests for [`Self::poll`].
    pub fn add_listeners(&self, requests: &[CallRequest], options: ListenerOptions) {
        for request in requests {
            *self
                .listeners
                .entry(request.clone())
                .or_default()
                .entry(options.blocks_per_fetch)
                .or_insert(0) += 1;
        }
    }

    /// Removes interest registered with the same options by
    /// [`Self::add_listeners`].
    pub fn remove_listeners(&self, requests: &[CallRequest], options: ListenerOptions) {
        for request in requests {
            let Entry::Occupied(mut listeners) = self.listeners.entry(request.clone()) else {
                continue;
            };
            if let btree_map::Entry::Occupied(mut count) =
                listeners.get_mut().entry(options.blocks_per_fetch)
            {
                *count.get_mut() -= 1;
                if *count.get() == 0 {
                    count.remove();
                }
            }
            if listeners.get().is_empty() {
                listeners.remove();
            }
        }
    }

    /// Listened requests with the most demanding fetch interval of their
    /// listeners.
    fn listened(&self) -> Vec<(CallRequest, u64)> {
        self.listeners
            .iter()
            .filter_map(|e| e.value().keys().next().map(|bpf| (e.key().clone(), *bpf)))
            .collect()
    }

    /// Cached state of the request.
    pub fn state(&self, request: &CallRequest) -> CallResult {
        if let Some(entry) = self.cache.get(request) {
            let behind =
                self.latest_block(request.chain_id).is_some_and(|latest| entry.block_number < latest);
            return CallResult::from_entry(&entry, behind);
        }
        match self.cache.get_permanent(request) {
            Some(entry) => CallResult::from_entry(&entry, false),
            None => CallResult::Loading,
        }
    }

    /// Oldest block a result of the chain may come from to satisfy
    /// `freshness`.
    fn floor(&self, chain_id: ChainId, freshness: Freshness) -> Option<u64> {
        match freshness {
            Freshness::AtLeast(block) => Some(block),
            Freshness::Latest => self.latest_block(chain_id),
            Freshness::Any | Freshness::NeverReload => None,
        }
    }

    fn cached(&self, request: &CallRequest, freshness: Freshness) -> Option<CallResult> {
        let entry = match freshness {
            Freshness::NeverReload => self.cache.get_permanent(request),
            _ => {
                let floor = self.floor(request.chain_id, freshness);
                self.cache
                    .get(request)
                    .filter(|e| !e.stale && floor.is_none_or(|b| e.block_number >= b))
            },
        }?;
        Some(CallResult::from_entry(&entry, false))
    }

    /// Resolves the requests, one result per request in the same order.
    ///
    /// Duplicates are requested once and receive identical results. Cached
    /// results satisfying `freshness` are served without a round-trip, and
    /// requests already in flight await that round-trip instead of being
    /// requested again. Results of blocks older than `freshness` demands are
    /// reported as [`CallResult::Loading`]. Per-request failures occupy their
    /// own result slot.
    pub async fn batch_read(
        &self,
        requests: &[CallRequest],
        freshness: Freshness,
    ) -> Vec<CallResult> {
        let floors: HashMap<ChainId, u64> = requests
            .iter()
            .map(|r| r.chain_id)
            .unique()
            .filter_map(|chain_id| Some((chain_id, self.floor(chain_id, freshness)?)))
            .collect();

        let mut resolved = HashMap::new();
        let mut to_fetch = Vec::new();
        let mut joined = Vec::new();
        for request in requests.iter().unique() {
            if let Some(result) = self.cached(request, freshness) {
                resolved.insert(request.clone(), result);
            } else if let Some(in_flight) = self.in_flight.get(request) {
                joined.push((request.clone(), in_flight.delivery.clone()));
            } else {
                to_fetch.push((request.clone(), freshness == Freshness::NeverReload));
            }
        }

        let (fetched, awaited) =
            futures::join!(self.fetch(to_fetch), self.await_in_flight(joined));
        resolved.extend(fetched);
        resolved.extend(awaited);

        requests
            .iter()
            .map(|request| {
                let result = resolved.get(request).cloned().unwrap_or(CallResult::Loading);
                match (floors.get(&request.chain_id), result.block_number()) {
                    (Some(floor), Some(block)) if block < *floor => CallResult::Loading,
                    _ => result,
                }
            })
            .collect()
    }

    /// Awaits round-trips issued by other consumers.
    async fn await_in_flight(
        &self,
        joined: Vec<(CallRequest, Delivery)>,
    ) -> Vec<(CallRequest, CallResult)> {
        join_all(joined.into_iter().map(|(request, delivery)| async move {
            let delivered = match delivery.await {
                Ok(results) => results.get(&request).cloned(),
                // Round-trip dropped before completing
                Err(_) => None,
            };
            let result = delivered.unwrap_or_else(|| self.state(&request));
            (request, result)
        }))
        .await
    }

    /// Single-request convenience over [`Self::batch_read`].
    pub async fn read(&self, request: &CallRequest, freshness: Freshness) -> CallResult {
        self.batch_read(std::slice::from_ref(request), freshness)
            .await
            .pop()
            .unwrap_or(CallResult::Loading)
    }

    /// Refreshes the latest block of every listened chain, then fetches every
    /// listened request whose cached result is outdated.
    ///
    /// Returns the number of requests fetched.
    pub async fn poll(&self) -> usize {
        let listened = self.listened();
        let chains: HashSet<ChainId> = listened.iter().map(|(r, _)| r.chain_id).collect();
        self.refresh_block_numbers(chains).await;

        let outdated: Batch = listened
            .into_iter()
            .filter(|(request, bpf)| {
                !self.in_flight.contains_key(request) && self.is_outdated(request, *bpf)
            })
            .map(|(request, bpf)| (request, bpf == NEVER_RELOAD.blocks_per_fetch))
            .collect();
        let count = outdated.len();
        self.fetch(outdated).await;
        count
    }

    async fn refresh_block_numbers(&self, chains: HashSet<ChainId>) {
        join_all(chains.into_iter().map(|chain_id| async move {
            let Some(provider) = self.registry.resolve_provider(chain_id) else {
                return;
            };
            match provider.block_number().await {
                Ok(block_number) => {
                    self.update_block_number(chain_id, block_number);
                },
                Err(err) => warn!(chain_id, %err, "failed to fetch block number"),
            }
        }))
        .await;
    }

    fn is_outdated(&self, request: &CallRequest, blocks_per_fetch: u64) -> bool {
        if blocks_per_fetch == NEVER_RELOAD.blocks_per_fetch {
            return self.cache.get_permanent(request).is_none();
        }
        match self.cache.get(request) {
            None => true,
            Some(entry) if entry.stale => true,
            Some(entry) => self.latest_block(request.chain_id).is_some_and(|latest| {
                entry.block_number.saturating_add(blocks_per_fetch) <= latest
            }),
        }
    }

    fn route(&self, chain_id: ChainId) -> Option<(Arc<dyn ReadProvider>, Address)> {
        let aggregator = self.registry.config().endpoint(chain_id)?.multicall();
        let provider = self.registry.resolve_provider(chain_id)?;
        Some((provider, aggregator))
    }

    /// Fetches the requests, grouped per chain and chunked, concurrently.
    async fn fetch(&self, requests: Batch) -> HashMap<CallRequest, CallResult> {
        if requests.is_empty() {
            return HashMap::new();
        }
        let chunk_size = self.options.max_chunk_size.max(1);
        let batches = requests
            .into_iter()
            .into_group_map_by(|(request, _)| request.chain_id)
            .into_iter()
            .flat_map(|(chain_id, group)| {
                group.chunks(chunk_size).map(|chunk| (chain_id, chunk.to_vec())).collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();

        join_all(batches.into_iter().map(|(chain_id, batch)| self.fetch_batch(chain_id, batch)))
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    /// One aggregated round-trip for requests of a single chain. Consumers
    /// joining it while in flight receive the same results.
    async fn fetch_batch(&self, chain_id: ChainId, batch: Batch) -> Vec<(CallRequest, CallResult)> {
        let Some((provider, aggregator)) = self.route(chain_id) else {
            let err = SyncError::NoProvider { chain_id };
            return batch
                .into_iter()
                .map(|(request, _)| (request, CallResult::Unavailable(err.clone())))
                .collect();
        };

        let epoch = self.epoch(chain_id);
        let (deliver, delivery) = oneshot::channel();
        let delivery = delivery.shared();
        for (request, _) in &batch {
            self.in_flight
                .insert(request.clone(), InFlight { epoch, delivery: delivery.clone() });
        }
        let guard = InFlightGuard {
            in_flight: &self.in_flight,
            requests: batch.iter().map(|(request, _)| request.clone()).collect(),
            epoch,
        };

        let calls: Vec<SubCall> = batch.iter().map(|(request, _)| request.sub_call()).collect();
        let response = provider.aggregate(aggregator, &calls).await;
        let results = self.settle(chain_id, epoch, &provider, batch, response);

        drop(guard);
        let _ = deliver.send(Arc::new(results.iter().cloned().collect()));
        results
    }

    /// Applies the response of a round-trip sent at `epoch` through
    /// `provider`.
    fn settle(
        &self,
        chain_id: ChainId,
        epoch: u64,
        provider: &Arc<dyn ReadProvider>,
        batch: Batch,
        response: Result<Aggregate, SyncError>,
    ) -> Vec<(CallRequest, CallResult)> {
        let rerouted = self
            .registry
            .resolve_provider(chain_id)
            .is_none_or(|current| !Arc::ptr_eq(&current, provider));
        if self.epoch(chain_id) != epoch || rerouted {
            debug!(chain_id, calls = batch.len(), "discarding results of superseded round-trip");
            return batch
                .into_iter()
                .map(|(request, _)| {
                    let state = self.state(&request);
                    (request, state)
                })
                .collect();
        }

        let aggregate = match response {
            Ok(aggregate) if aggregate.results.len() == batch.len() => aggregate,
            Ok(aggregate) => {
                warn!(
                    chain_id,
                    expected = batch.len(),
                    received = aggregate.results.len(),
                    "malformed aggregated call response"
                );
                return self.network_failure(batch);
            },
            Err(err) => {
                warn!(chain_id, calls = batch.len(), %err, "aggregated call failed");
                return self.network_failure(batch);
            },
        };

        debug!(chain_id, calls = batch.len(), block = aggregate.block_number, "aggregated call");
        self.update_block_number(chain_id, aggregate.block_number);
        batch
            .into_iter()
            .zip(aggregate.results)
            .map(|((request, permanent), result)| {
                let outcome = if result.success {
                    Outcome::Returned(result.return_data)
                } else {
                    Outcome::Reverted(result.return_data)
                };
                let entry = if permanent {
                    self.cache.store_permanent(&request, outcome, aggregate.block_number)
                } else {
                    self.cache.store(&request, outcome, aggregate.block_number)
                };
                (request, CallResult::from_entry(&entry, false))
            })
            .collect()
    }

    /// Keeps whatever is cached, flagged stale, for a retry on the next tick.
    fn network_failure(&self, batch: Batch) -> Vec<(CallRequest, CallResult)> {
        batch
            .into_iter()
            .map(|(request, _)| {
                self.cache.mark_stale(&request);
                let state = self.state(&request);
                let state = match state {
                    CallResult::Data { data, block_number, .. } => {
                        CallResult::Data { data, block_number, stale: true }
                    },
                    other => other,
                };
                (request, state)
            })
            .collect()
    }
}
