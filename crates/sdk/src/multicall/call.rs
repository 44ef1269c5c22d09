use std::fmt::Display;

use alloy::primitives::{Address, Bytes};
use alloy_sol_types::SolCall;
use tracing::debug;

use super::cache::{CacheEntry, Outcome};
use crate::{chain::ChainId, error::SyncError, provider::SubCall};

/// Contract read request.
///
/// Identity is the value of the (chain, target, call data) tuple: equal
/// requests issued by unrelated consumers are the same request.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Debug)]
pub struct CallRequest {
    pub chain_id: ChainId,
    pub target: Address,
    #[debug("{call_data}")]
    pub call_data: Bytes,
}

impl CallRequest {
    pub fn new(chain_id: ChainId, target: Address, call_data: impl Into<Bytes>) -> Self {
        Self { chain_id, target, call_data: call_data.into() }
    }

    /// Request of an ABI-encoded contract call.
    pub fn from_call<C: SolCall>(chain_id: ChainId, target: Address, call: &C) -> Self {
        Self::new(chain_id, target, call.abi_encode())
    }

    pub(crate) fn sub_call(&self) -> SubCall {
        SubCall { target: self.target, call_data: self.call_data.clone() }
    }
}

impl Display for CallRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.chain_id, self.target, self.call_data)
    }
}

/// State of a [`CallRequest`] as observed by consumers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallResult {
    /// Nothing fetched yet, or the last round-trip failed before any data
    /// arrived. Retried on the next tick.
    Loading,
    /// Data returned by the call at `block_number`. `stale` data is still
    /// usable but a newer block is known or the last refresh failed.
    Data { data: Bytes, block_number: u64, stale: bool },
    /// The call reverted at `block_number`.
    Reverted { data: Bytes, block_number: u64 },
    /// The request cannot be served, see [`SyncError::is_transient`].
    Unavailable(SyncError),
}

impl CallResult {
    pub(crate) fn from_entry(entry: &CacheEntry, stale: bool) -> Self {
        match &entry.outcome {
            Outcome::Returned(data) => CallResult::Data {
                data: data.clone(),
                block_number: entry.block_number,
                stale: stale || entry.stale,
            },
            Outcome::Reverted(data) => {
                CallResult::Reverted { data: data.clone(), block_number: entry.block_number }
            },
        }
    }

    pub fn is_loading(&self) -> bool { matches!(self, CallResult::Loading) }

    /// Data is present but a refresh is due or in progress.
    pub fn is_syncing(&self) -> bool { matches!(self, CallResult::Data { stale: true, .. }) }

    pub fn is_stale(&self) -> bool { self.is_syncing() }

    pub fn data(&self) -> Option<&Bytes> {
        match self {
            CallResult::Data { data, .. } => Some(data),
            _ => None,
        }
    }

    /// Block the result was fetched at.
    pub fn block_number(&self) -> Option<u64> {
        match self {
            CallResult::Data { block_number, .. } | CallResult::Reverted { block_number, .. } => {
                Some(*block_number)
            },
            _ => None,
        }
    }

    pub fn error(&self) -> Option<SyncError> {
        match self {
            CallResult::Reverted { data, .. } => Some(SyncError::CallReverted { data: data.clone() }),
            CallResult::Unavailable(err) => Some(err.clone()),
            _ => None,
        }
    }

    /// Decoded return value of `C`; `None` without data or if the data does
    /// not decode as `C`'s return type.
    pub fn decode<C: SolCall>(&self) -> Option<C::Return> {
        let data = self.data()?;
        match C::abi_decode_returns(data) {
            Ok(value) => Some(value),
            Err(err) => {
                debug!(call = C::SIGNATURE, %err, "failed to decode call result");
                None
            },
        }
    }
}

/// Freshness the caller of [`super::Multicall::batch_read`] requires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Freshness {
    /// Any cached result that was not invalidated since it was fetched.
    Any,
    /// Cached result fetched at the latest block known for the chain.
    Latest,
    /// Cached result fetched at the given block or later.
    AtLeast(u64),
    /// Fetched once and cached for the session, keyed only by the request
    /// identity. Meant for immutable data like token decimals.
    NeverReload,
}

/// How often the listened calls are refreshed by [`super::Multicall::poll`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerOptions {
    pub blocks_per_fetch: u64,
}

impl ListenerOptions {
    pub fn every_block() -> Self { Self { blocks_per_fetch: 1 } }

    pub fn every(blocks: u64) -> Self { Self { blocks_per_fetch: blocks.max(1) } }

    pub fn is_never_reload(&self) -> bool { *self == NEVER_RELOAD }
}

impl Default for ListenerOptions {
    fn default() -> Self { Self::every_block() }
}

/// Fetch once, never refresh.
pub const NEVER_RELOAD: ListenerOptions = ListenerOptions { blocks_per_fetch: u64::MAX };
