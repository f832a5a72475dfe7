//! Postings storage for registered queries.
//!
//! A [`PostingsStore`] keeps, per stored query, its record and the postings of
//! its [`QuerySignature`]. Two implementations ship with the crate:
//!
//! - [`InMemoryStore`]: everything behind one `RwLock`, for tests and
//!   ephemeral registries;
//! - [`RedbStore`] (feature `embedded`): persistent, one redb write
//!   transaction per registration.
//!
//! Registrations are upserts keyed by query name. Replacing a query assigns a
//! fresh [`QueryId`] and drops every posting of the previous one in the same
//! atomic write, so readers see either the old signature or the new one.

use std::fmt;

use bytes::Bytes;
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::compression::CompressionCodec;
use crate::range::RangeProbe;
use crate::signature::{ExtractionOutcome, QuerySignature};

mod memory;
#[cfg(feature = "embedded")]
mod redb;

pub use memory::InMemoryStore;
#[cfg(feature = "embedded")]
pub use self::redb::RedbStore;

/// Dense posting id of a stored query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryId(pub u32);

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A registered query as persisted by a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredQuery {
    pub name: String,
    pub signature: QuerySignature,
    /// Codec `source` was written with.
    pub codec: CompressionCodec,
    /// Query DSL JSON, compressed with `codec`.
    pub source: Vec<u8>,
}

/// Result of [`PostingsStore::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Upsert {
    pub id: QueryId,
    /// Id of the query previously registered under the same name.
    pub replaced: Option<QueryId>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("backend error: {0}")]
    Backend(String),
    #[error("serialization encode error: {0}")]
    Encode(String),
    #[error("serialization decode error: {0}")]
    Decode(String),
    #[error("query id space exhausted")]
    IdsExhausted,
}

impl StoreError {
    pub fn backend<E: fmt::Display>(err: E) -> Self {
        Self::Backend(err.to_string())
    }

    pub fn encode<E: fmt::Display>(err: E) -> Self {
        Self::Encode(err.to_string())
    }

    pub fn decode<E: fmt::Display>(err: E) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Keyed postings store holding registered queries.
pub trait PostingsStore: Send + Sync {
    /// Insert or replace the query registered under `query.name`.
    fn put(&self, query: StoredQuery) -> Result<Upsert, StoreError>;
    /// Remove the query registered under `name`, returning its id.
    fn remove(&self, name: &str) -> Result<Option<QueryId>, StoreError>;
    /// Id of the query currently registered under `name`.
    fn lookup(&self, name: &str) -> Result<Option<QueryId>, StoreError>;
    /// Queries posted under any of `keys`.
    fn term_postings(&self, keys: &[Bytes]) -> Result<RoaringBitmap, StoreError>;
    /// Queries whose posted ranges intersect `probe`. Only the probe's key
    /// window is scanned.
    fn range_postings(&self, probe: &RangeProbe) -> Result<RoaringBitmap, StoreError>;
    fn outcome_postings(&self, outcome: ExtractionOutcome) -> Result<RoaringBitmap, StoreError>;
    /// Queries no term or range posting can retrieve.
    fn unconstrained_postings(&self) -> Result<RoaringBitmap, StoreError>;
    /// Queries posted under any of `term_keys`, any range intersecting one of
    /// `probes`, outcome `failed`, or unconstrained.
    ///
    /// Stores override this to answer from a single read snapshot.
    fn candidate_postings(
        &self,
        term_keys: &[Bytes],
        probes: &[RangeProbe],
    ) -> Result<RoaringBitmap, StoreError> {
        let mut candidates = self.term_postings(term_keys)?;
        for probe in probes {
            candidates |= self.range_postings(probe)?;
        }
        candidates |= self.outcome_postings(ExtractionOutcome::Failed)?;
        candidates |= self.unconstrained_postings()?;
        Ok(candidates)
    }
    fn load(&self, id: QueryId) -> Result<Option<StoredQuery>, StoreError>;
    /// Number of registered queries.
    fn len(&self) -> Result<u64, StoreError>;
    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Configuration for selecting and building a store.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreConfig {
    #[default]
    InMemory,
    /// Persistent store at `path`. Requires the `embedded` feature.
    Redb { path: String },
}

impl StoreConfig {
    pub fn in_memory() -> Self {
        StoreConfig::InMemory
    }

    pub fn redb<P: Into<String>>(path: P) -> Self {
        StoreConfig::Redb { path: path.into() }
    }

    pub fn build(&self) -> Result<Box<dyn PostingsStore>, StoreError> {
        match self {
            StoreConfig::InMemory => Ok(Box::new(InMemoryStore::new())),
            StoreConfig::Redb { path } => {
                #[cfg(feature = "embedded")]
                {
                    Ok(Box::new(RedbStore::open(path)?))
                }
                #[cfg(not(feature = "embedded"))]
                {
                    let _ = path;
                    Err(StoreError::backend("redb store disabled at compile time"))
                }
            }
        }
    }
}

/// Next id after `current`, shared by both stores.
pub(crate) fn next_query_id(current: u32) -> Result<u32, StoreError> {
    current.checked_add(1).ok_or(StoreError::IdsExhausted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_config_from_yaml() {
        let cfg: StoreConfig = serde_yaml::from_str("backend: redb\npath: /tmp/q.redb\n").unwrap();
        assert_eq!(cfg, StoreConfig::redb("/tmp/q.redb"));
        let cfg: StoreConfig = serde_yaml::from_str("backend: in_memory\n").unwrap();
        assert_eq!(cfg, StoreConfig::InMemory);
    }

    #[test]
    fn in_memory_builds() {
        let store = StoreConfig::in_memory().build().unwrap();
        assert_eq!(store.len().unwrap(), 0);
    }
}
