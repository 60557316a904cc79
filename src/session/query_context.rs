// Copyright (c) 2025 ADBC Drivers Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Bounded query-context cache.
//!
//! The server attaches query-context entries to query responses and expects
//! them back on the next request. The cache keeps at most `capacity` entries.
//! A lower priority number means the entry is more important; when the cache
//! overflows the entry with the highest priority number is evicted, oldest
//! timestamp first on ties.
//!
//! Every operation takes one short lock, so `update` and `request_payload`
//! may be called concurrently from different call sites.

use crate::types::session::{
    QueryContextRequest, QueryContextRequestEntry, QueryContextResponse, QueryContextValue,
};
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};
use tracing::trace;

/// A cached query-context entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryContextEntry {
    pub id: u64,
    pub timestamp: i64,
    pub priority: u64,
    pub context: Option<String>,
}

impl QueryContextEntry {
    fn order_key(&self) -> OrderKey {
        (self.priority, Reverse(self.timestamp), self.id)
    }
}

/// Ascending order is retention order: the last element is the next victim.
type OrderKey = (u64, Reverse<i64>, u64);

#[derive(Debug, Default)]
struct CacheState {
    capacity: usize,
    by_id: HashMap<u64, QueryContextEntry>,
    order: BTreeSet<OrderKey>,
}

impl CacheState {
    fn insert(&mut self, entry: QueryContextEntry) {
        if let Some(previous) = self.by_id.remove(&entry.id) {
            self.order.remove(&previous.order_key());
        }
        self.order.insert(entry.order_key());
        self.by_id.insert(entry.id, entry);
    }

    fn evict_to_capacity(&mut self) {
        while self.by_id.len() > self.capacity {
            let Some((_, _, id)) = self.order.pop_last() else {
                // Index and map disagree; degrade to an empty cache.
                self.by_id.clear();
                break;
            };
            if let Some(evicted) = self.by_id.remove(&id) {
                trace!(
                    "Evicted query context entry {} (priority {})",
                    evicted.id,
                    evicted.priority
                );
            }
        }
    }
}

/// Priority-ordered cache of query-context entries.
#[derive(Debug)]
pub struct QueryContextCache {
    state: Mutex<CacheState>,
}

impl QueryContextCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(CacheState {
                capacity,
                ..Default::default()
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Change the capacity, evicting immediately when it shrinks.
    pub fn set_capacity(&self, capacity: usize) {
        let mut state = self.state.lock();
        if state.capacity != capacity {
            trace!(
                "Query context cache capacity {} -> {}",
                state.capacity,
                capacity
            );
        }
        state.capacity = capacity;
        state.evict_to_capacity();
    }

    /// Merge the entries of a query response (insert-or-replace by id), then
    /// evict down to capacity.
    pub fn update(&self, response: &QueryContextResponse) {
        let mut state = self.state.lock();
        for entry in &response.entries {
            state.insert(QueryContextEntry {
                id: entry.id,
                timestamp: entry.timestamp,
                priority: entry.priority,
                context: entry.context.clone(),
            });
        }
        state.evict_to_capacity();
    }

    /// Entries to attach to the next request, by ascending priority. `None`
    /// when the cache is empty.
    pub fn request_payload(&self) -> Option<QueryContextRequest> {
        let entries: Vec<QueryContextRequestEntry> = self
            .entries()
            .into_iter()
            .map(|entry| QueryContextRequestEntry {
                id: entry.id,
                timestamp: entry.timestamp,
                priority: entry.priority,
                context: QueryContextValue {
                    base64_data: entry.context,
                },
            })
            .collect();

        if entries.is_empty() {
            None
        } else {
            Some(QueryContextRequest { entries })
        }
    }

    /// Snapshot of the cached entries by ascending priority.
    pub fn entries(&self) -> Vec<QueryContextEntry> {
        let state = self.state.lock();
        state
            .order
            .iter()
            .filter_map(|(_, _, id)| state.by_id.get(id).cloned())
            .collect()
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.by_id.clear();
        state.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::session::QueryContextResponseEntry;
    use rand::Rng;
    use std::sync::Arc;

    fn entry(id: u64, timestamp: i64, priority: u64) -> QueryContextResponseEntry {
        QueryContextResponseEntry {
            id,
            timestamp,
            priority,
            context: Some(format!("ctx-{}", id)),
        }
    }

    fn response(entries: Vec<QueryContextResponseEntry>) -> QueryContextResponse {
        QueryContextResponse { entries }
    }

    fn ids(cache: &QueryContextCache) -> Vec<u64> {
        cache.entries().into_iter().map(|e| e.id).collect()
    }

    #[test]
    fn test_empty_cache_has_no_payload() {
        let cache = QueryContextCache::new(5);
        assert!(cache.request_payload().is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_evicts_least_important() {
        let cache = QueryContextCache::new(2);
        cache.update(&response(vec![entry(1, 10, 3), entry(2, 10, 1), entry(3, 10, 2)]));
        assert_eq!(ids(&cache), vec![2, 3]);
    }

    #[test]
    fn test_tie_evicts_oldest() {
        let cache = QueryContextCache::new(1);
        cache.update(&response(vec![entry(1, 100, 5), entry(2, 200, 5)]));
        assert_eq!(ids(&cache), vec![2]);
    }

    #[test]
    fn test_update_replaces_by_id() {
        let cache = QueryContextCache::new(3);
        cache.update(&response(vec![entry(1, 10, 9), entry(2, 10, 1)]));
        cache.update(&response(vec![QueryContextResponseEntry {
            id: 1,
            timestamp: 20,
            priority: 0,
            context: Some("fresh".to_string()),
        }]));

        let entries = cache.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, 1);
        assert_eq!(entries[0].priority, 0);
        assert_eq!(entries[0].context.as_deref(), Some("fresh"));
    }

    #[test]
    fn test_set_capacity_shrinks_immediately() {
        let cache = QueryContextCache::new(5);
        cache.update(&response((0..5).map(|i| entry(i, 1, i)).collect()));
        assert_eq!(cache.len(), 5);

        cache.set_capacity(2);
        assert_eq!(ids(&cache), vec![0, 1]);

        cache.set_capacity(0);
        assert!(cache.is_empty());
        assert!(cache.request_payload().is_none());
    }

    #[test]
    fn test_request_payload_ascending_priority() {
        let cache = QueryContextCache::new(5);
        cache.update(&response(vec![entry(7, 1, 4), entry(8, 1, 0), entry(9, 1, 2)]));

        let payload = cache.request_payload().unwrap();
        let priorities: Vec<u64> = payload.entries.iter().map(|e| e.priority).collect();
        assert_eq!(priorities, vec![0, 2, 4]);
        assert_eq!(payload.entries[0].context.base64_data.as_deref(), Some("ctx-8"));
    }

    #[test]
    fn test_retains_most_important_for_any_capacity() {
        let mut rng = rand::thread_rng();
        for capacity in 0..8 {
            let cache = QueryContextCache::new(capacity);
            // Few ids so batches keep replacing entries. A replacement never
            // demotes its id, otherwise an earlier victim would outrank it.
            let mut latest: HashMap<u64, QueryContextResponseEntry> = HashMap::new();
            for _ in 0..30 {
                let batch: Vec<QueryContextResponseEntry> = (0..3)
                    .map(|_| {
                        let id = rng.gen_range(0..12);
                        let next = match latest.get(&id) {
                            Some(previous) => entry(
                                id,
                                rng.gen_range(previous.timestamp..=1000),
                                rng.gen_range(0..=previous.priority),
                            ),
                            None => entry(id, rng.gen_range(0..1000), rng.gen_range(0..20)),
                        };
                        latest.insert(id, next.clone());
                        next
                    })
                    .collect();
                cache.update(&response(batch));
                assert!(cache.len() <= capacity);
            }

            let mut expected: Vec<&QueryContextResponseEntry> = latest.values().collect();
            expected.sort_by_key(|e| (e.priority, Reverse(e.timestamp), e.id));
            let expected: Vec<u64> = expected.iter().take(capacity).map(|e| e.id).collect();
            assert_eq!(ids(&cache), expected);

            for cached in cache.entries() {
                let newest = &latest[&cached.id];
                assert_eq!(cached.priority, newest.priority);
                assert_eq!(cached.timestamp, newest.timestamp);
            }
        }
    }

    #[test]
    fn test_demoted_entry_becomes_next_victim() {
        let cache = QueryContextCache::new(2);
        cache.update(&response(vec![entry(1, 10, 1), entry(2, 10, 2)]));
        cache.update(&response(vec![entry(1, 11, 9)]));
        assert_eq!(ids(&cache), vec![2, 1]);

        cache.update(&response(vec![entry(3, 10, 3)]));
        assert_eq!(ids(&cache), vec![2, 3]);
    }

    #[test]
    fn test_concurrent_update_and_read() {
        let cache = Arc::new(QueryContextCache::new(4));
        let writers: Vec<_> = (0..4)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..200u64 {
                        cache.update(&response(vec![entry(t * 1000 + i, i as i64, i % 7)]));
                    }
                })
            })
            .collect();
        let reader = {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                for _ in 0..200 {
                    if let Some(payload) = cache.request_payload() {
                        assert!(payload.entries.len() <= 4);
                    }
                }
            })
        };
        for handle in writers {
            handle.join().unwrap();
        }
        reader.join().unwrap();
        assert_eq!(cache.len(), 4);
    }
}
