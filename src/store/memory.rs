use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use bytes::Bytes;
use roaring::RoaringBitmap;

use super::{PostingsStore, QueryId, StoreError, StoredQuery, Upsert, next_query_id};
use crate::range::{EncodedRange, RangeProbe};
use crate::signature::ExtractionOutcome;

#[derive(Default)]
struct Postings {
    next_id: u32,
    names: HashMap<String, QueryId>,
    queries: HashMap<QueryId, StoredQuery>,
    terms: HashMap<Bytes, RoaringBitmap>,
    ranges: BTreeMap<EncodedRange, RoaringBitmap>,
    outcomes: HashMap<ExtractionOutcome, RoaringBitmap>,
    unconstrained: RoaringBitmap,
}

impl Postings {
    fn post(&mut self, id: QueryId, query: &StoredQuery) {
        let sig = &query.signature;
        for key in &sig.term_keys {
            self.terms.entry(key.clone()).or_default().insert(id.0);
        }
        for range in &sig.ranges {
            self.ranges.entry(*range).or_default().insert(id.0);
        }
        self.outcomes.entry(sig.outcome).or_default().insert(id.0);
        if sig.unconstrained {
            self.unconstrained.insert(id.0);
        }
    }

    fn unpost(&mut self, id: QueryId, query: &StoredQuery) {
        let sig = &query.signature;
        for key in &sig.term_keys {
            if let Some(bitmap) = self.terms.get_mut(key) {
                bitmap.remove(id.0);
                if bitmap.is_empty() {
                    self.terms.remove(key);
                }
            }
        }
        for range in &sig.ranges {
            if let Some(bitmap) = self.ranges.get_mut(range) {
                bitmap.remove(id.0);
                if bitmap.is_empty() {
                    self.ranges.remove(range);
                }
            }
        }
        if let Some(bitmap) = self.outcomes.get_mut(&sig.outcome) {
            bitmap.remove(id.0);
        }
        self.unconstrained.remove(id.0);
    }

    fn term_postings(&self, keys: &[Bytes]) -> RoaringBitmap {
        let mut out = RoaringBitmap::new();
        for key in keys {
            if let Some(bitmap) = self.terms.get(key) {
                out |= bitmap;
            }
        }
        out
    }

    fn range_postings(&self, probe: &RangeProbe) -> RoaringBitmap {
        let mut out = RoaringBitmap::new();
        for (range, bitmap) in self.ranges.range(*probe.lower()..=*probe.upper()) {
            if probe.matches(range) {
                out |= bitmap;
            }
        }
        out
    }

    fn evict(&mut self, name: &str) -> Option<QueryId> {
        let id = self.names.remove(name)?;
        if let Some(old) = self.queries.remove(&id) {
            self.unpost(id, &old);
        }
        Some(id)
    }
}

/// In-memory postings store. Every registration takes the single write lock,
/// so a signature becomes visible to readers all at once.
#[derive(Default)]
pub struct InMemoryStore {
    postings: RwLock<Postings>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Postings>, StoreError> {
        self.postings
            .read()
            .map_err(|_| StoreError::backend("poisoned lock"))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Postings>, StoreError> {
        self.postings
            .write()
            .map_err(|_| StoreError::backend("poisoned lock"))
    }
}

impl PostingsStore for InMemoryStore {
    fn put(&self, query: StoredQuery) -> Result<Upsert, StoreError> {
        let mut guard = self.write()?;
        let id = QueryId(guard.next_id);
        guard.next_id = next_query_id(guard.next_id)?;

        let replaced = guard.evict(&query.name);
        guard.post(id, &query);
        guard.names.insert(query.name.clone(), id);
        guard.queries.insert(id, query);
        Ok(Upsert { id, replaced })
    }

    fn remove(&self, name: &str) -> Result<Option<QueryId>, StoreError> {
        Ok(self.write()?.evict(name))
    }

    fn lookup(&self, name: &str) -> Result<Option<QueryId>, StoreError> {
        Ok(self.read()?.names.get(name).copied())
    }

    fn term_postings(&self, keys: &[Bytes]) -> Result<RoaringBitmap, StoreError> {
        Ok(self.read()?.term_postings(keys))
    }

    fn range_postings(&self, probe: &RangeProbe) -> Result<RoaringBitmap, StoreError> {
        Ok(self.read()?.range_postings(probe))
    }

    fn outcome_postings(&self, outcome: ExtractionOutcome) -> Result<RoaringBitmap, StoreError> {
        Ok(self.read()?.outcomes.get(&outcome).cloned().unwrap_or_default())
    }

    fn unconstrained_postings(&self) -> Result<RoaringBitmap, StoreError> {
        Ok(self.read()?.unconstrained.clone())
    }

    fn candidate_postings(
        &self,
        term_keys: &[Bytes],
        probes: &[RangeProbe],
    ) -> Result<RoaringBitmap, StoreError> {
        let guard = self.read()?;
        let mut candidates = guard.term_postings(term_keys);
        for probe in probes {
            candidates |= guard.range_postings(probe);
        }
        if let Some(failed) = guard.outcomes.get(&ExtractionOutcome::Failed) {
            candidates |= failed;
        }
        candidates |= &guard.unconstrained;
        Ok(candidates)
    }

    fn load(&self, id: QueryId) -> Result<Option<StoredQuery>, StoreError> {
        Ok(self.read()?.queries.get(&id).cloned())
    }

    fn len(&self) -> Result<u64, StoreError> {
        Ok(self.read()?.queries.len() as u64)
    }
}
