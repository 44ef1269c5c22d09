use alloy::primitives::Bytes;
use dashmap::{DashMap, mapref::entry::Entry};

use super::CallRequest;
use crate::chain::ChainId;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Outcome {
    Returned(Bytes),
    Reverted(Bytes),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct CacheEntry {
    pub outcome: Outcome,
    pub block_number: u64,
    pub stale: bool,
}

/// Call results by request identity.
///
/// `latest` holds the most recent result per request and is superseded by
/// results of newer blocks only. `permanent` holds never-reload results that
/// survive invalidation.
#[derive(Debug, Default)]
pub(crate) struct CallCache {
    latest: DashMap<CallRequest, CacheEntry>,
    permanent: DashMap<CallRequest, CacheEntry>,
}

impl CallCache {
    pub fn get(&self, request: &CallRequest) -> Option<CacheEntry> {
        self.latest.get(request).map(|e| e.value().clone())
    }

    pub fn get_permanent(&self, request: &CallRequest) -> Option<CacheEntry> {
        self.permanent.get(request).map(|e| e.value().clone())
    }

    /// Stores the result unless a result of a newer block is already cached.
    /// Returns the entry cached after the update.
    pub fn store(&self, request: &CallRequest, outcome: Outcome, block_number: u64) -> CacheEntry {
        let entry = CacheEntry { outcome, block_number, stale: false };
        match self.latest.entry(request.clone()) {
            Entry::Occupied(mut cached) => {
                if cached.get().block_number > block_number {
                    cached.get().clone()
                } else {
                    cached.insert(entry.clone());
                    entry
                }
            },
            Entry::Vacant(vacant) => {
                vacant.insert(entry.clone());
                entry
            },
        }
    }

    pub fn store_permanent(
        &self,
        request: &CallRequest,
        outcome: Outcome,
        block_number: u64,
    ) -> CacheEntry {
        let entry = CacheEntry { outcome, block_number, stale: false };
        self.permanent.entry(request.clone()).or_insert(entry).value().clone()
    }

    pub fn mark_stale(&self, request: &CallRequest) {
        if let Some(mut entry) = self.latest.get_mut(request) {
            entry.stale = true;
        }
    }

    /// Marks every result of the chain stale, returns the number of entries
    /// affected.
    pub fn mark_chain_stale(&self, chain_id: ChainId) -> usize {
        let mut count = 0;
        self.latest.iter_mut().filter(|e| e.key().chain_id == chain_id).for_each(|mut e| {
            e.stale = true;
            count += 1;
        });
        count
    }

    pub fn len(&self) -> usize { self.latest.len() + self.permanent.len() }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::Address;

    use super::*;

    fn request(chain_id: ChainId, data: &'static [u8]) -> CallRequest {
        CallRequest::new(chain_id, Address::ZERO, Bytes::from_static(data))
    }

    #[test]
    fn test_older_block_never_overwrites_newer() {
        let cache = CallCache::default();
        let req = request(1, &[1]);

        cache.store(&req, Outcome::Returned(Bytes::from_static(&[10])), 10);
        let kept = cache.store(&req, Outcome::Returned(Bytes::from_static(&[9])), 9);
        assert_eq!(kept.block_number, 10);
        assert_eq!(kept.outcome, Outcome::Returned(Bytes::from_static(&[10])));

        let replaced = cache.store(&req, Outcome::Reverted(Bytes::new()), 11);
        assert_eq!(cache.get(&req), Some(replaced));
    }

    #[test]
    fn test_stale_marking_is_scoped_to_chain() {
        let cache = CallCache::default();
        let (a, b, c) = (request(1, &[1]), request(1, &[2]), request(56, &[1]));
        for req in [&a, &b, &c] {
            cache.store(req, Outcome::Returned(Bytes::new()), 5);
        }
        cache.store_permanent(&a, Outcome::Returned(Bytes::new()), 5);

        assert_eq!(cache.mark_chain_stale(1), 2);
        assert!(cache.get(&a).unwrap().stale);
        assert!(cache.get(&b).unwrap().stale);
        assert!(!cache.get(&c).unwrap().stale);
        assert!(!cache.get_permanent(&a).unwrap().stale);

        // A fresh result clears the flag
        assert!(!cache.store(&a, Outcome::Returned(Bytes::new()), 6).stale);
        assert_eq!(cache.len(), 4);
    }
}
