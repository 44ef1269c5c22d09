//! Transaction tracker.
//!
//! Records transactions submitted through the active connector and attaches
//! their receipts as [`TransactionTracker::poll`] observes them. Records are
//! never removed by the tracker; abandoning a transaction that never gets
//! mined is up to the consumer (see [`TransactionRecord::is_recent`]).

mod record;

use std::{cmp::Reverse, sync::Arc};

use alloy::{
    primitives::{Address, TxHash},
    rpc::types::TransactionRequest,
};
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::join_all;
use itertools::Itertools;
pub use record::{Approval, Claim, TransactionMeta, TransactionRecord, TransactionStatus};
use tracing::{debug, info, warn};

use crate::{chain::ChainId, error::SyncError, registry::ConnectorRegistry};

/// Default window of [`TransactionTracker::recent`].
pub const DEFAULT_RECENCY: TimeDelta = TimeDelta::hours(24);

pub struct TransactionTracker {
    registry: Arc<ConnectorRegistry>,
    records: DashMap<(ChainId, TxHash), TransactionRecord>,
}

impl TransactionTracker {
    pub fn new(registry: Arc<ConnectorRegistry>) -> Self {
        Self { registry, records: DashMap::new() }
    }

    /// Signs and broadcasts `tx` through the active connector from its
    /// current account and starts tracking it.
    ///
    /// Fails with [`SyncError::NotConnected`] without an active connector
    /// and with [`SyncError::SubmissionRejected`] if the user declines.
    pub async fn submit(
        &self,
        mut tx: TransactionRequest,
        meta: TransactionMeta,
    ) -> Result<TransactionRecord, SyncError> {
        let connector = self.registry.active().filter(|c| c.is_active()).ok_or(SyncError::NotConnected)?;
        let (Some(chain_id), Some(from), Some(provider)) =
            (connector.chain_id(), connector.account(), connector.provider())
        else {
            return Err(SyncError::NotConnected);
        };

        tx.from = Some(from);
        tx.chain_id.get_or_insert(chain_id);
        let hash = match provider.send_transaction(tx).await {
            Ok(hash) => hash,
            Err(err) if err.is_user_rejection() => {
                debug!(chain_id, %from, "transaction rejected by the user");
                return Err(err);
            },
            Err(err) => {
                warn!(chain_id, %from, %err, "transaction submission failed");
                return Err(err);
            },
        };

        info!(chain_id, %hash, summary = meta.summary.as_deref(), "transaction submitted");
        Ok(self.add(chain_id, hash, from, meta, Utc::now()))
    }

    /// Tracks a transaction submitted elsewhere. Adding a hash that is
    /// already tracked on the chain keeps the existing record.
    pub fn add(
        &self,
        chain_id: ChainId,
        hash: TxHash,
        from: Address,
        meta: TransactionMeta,
        submitted_at: DateTime<Utc>,
    ) -> TransactionRecord {
        self.records
            .entry((chain_id, hash))
            .or_insert_with(|| TransactionRecord::new(hash, chain_id, from, submitted_at, meta))
            .clone()
    }

    /// Queries receipts of every pending record from the provider resolved
    /// for its chain and attaches those found.
    ///
    /// Returns the number of records confirmed by this call.
    pub async fn poll(&self) -> usize {
        let pending = self
            .records
            .iter()
            .filter(|r| r.is_pending())
            .map(|r| *r.key())
            .into_group_map_by(|(chain_id, _)| *chain_id);

        let polls = pending.into_iter().filter_map(|(chain_id, keys)| {
            let Some(provider) = self.registry.resolve_provider(chain_id) else {
                debug!(chain_id, pending = keys.len(), "no provider to poll receipts");
                return None;
            };
            Some(async move {
                join_all(keys.into_iter().map(|key| {
                    let provider = provider.clone();
                    async move { (key, provider.transaction_receipt(key.1).await) }
                }))
                .await
            })
        });

        let mut confirmed = 0;
        for ((chain_id, hash), response) in join_all(polls).await.into_iter().flatten() {
            let receipt = match response {
                Ok(Some(receipt)) => receipt,
                Ok(None) => continue,
                Err(err) => {
                    warn!(chain_id, %hash, %err, "failed to fetch receipt");
                    continue;
                },
            };
            let Entry::Occupied(mut record) = self.records.entry((chain_id, hash)) else {
                continue;
            };
            let (block, status) = (receipt.block_number, receipt.status);
            if record.get_mut().finalize(receipt, Utc::now()) {
                info!(chain_id, %hash, block, status, "transaction mined");
                confirmed += 1;
            }
        }
        confirmed
    }

    pub fn get(&self, chain_id: ChainId, hash: TxHash) -> Option<TransactionRecord> {
        self.records.get(&(chain_id, hash)).map(|r| r.value().clone())
    }

    /// Every record, most recently submitted first.
    pub fn all(&self) -> Vec<TransactionRecord> {
        self.records
            .iter()
            .map(|r| r.value().clone())
            .sorted_by_key(|r| Reverse((r.submitted_at(), r.hash())))
            .collect()
    }

    /// Records of `chain_id` submitted within `window` before `now`, most
    /// recently submitted first.
    pub fn recent(
        &self,
        chain_id: ChainId,
        now: DateTime<Utc>,
        window: TimeDelta,
    ) -> Vec<TransactionRecord> {
        self.all()
            .into_iter()
            .filter(|r| r.chain_id() == chain_id && r.is_recent(now, window))
            .collect()
    }

    /// Hashes of records without a receipt, most recent first.
    pub fn pending(&self, chain_id: ChainId) -> Vec<TxHash> {
        self.all()
            .into_iter()
            .filter(|r| r.chain_id() == chain_id && r.is_pending())
            .map(|r| r.hash())
            .collect()
    }

    /// Hashes of records with a receipt, most recent first.
    pub fn confirmed(&self, chain_id: ChainId) -> Vec<TxHash> {
        self.all()
            .into_iter()
            .filter(|r| r.chain_id() == chain_id && !r.is_pending())
            .map(|r| r.hash())
            .collect()
    }

    /// Whether an approval of `token` for `spender` is still being mined.
    pub fn has_pending_approval(&self, chain_id: ChainId, token: Address, spender: Address) -> bool {
        let approval = Approval { token, spender };
        self.records.iter().any(|r| {
            r.chain_id() == chain_id && r.is_pending() && r.meta().approval == Some(approval)
        })
    }

    pub fn len(&self) -> usize { self.records.len() }

    pub fn is_empty(&self) -> bool { self.records.is_empty() }
}
