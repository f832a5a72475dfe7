//! Persistent postings store on redb.
//!
//! Layout, one table per channel:
//!
//! | table | key | value |
//! |-------|-----|-------|
//! | `extracted_terms` | `field ++ 0x00 ++ term` | roaring bitmap of query ids |
//! | `range_field` | 64-byte encoded range | roaring bitmap |
//! | `extraction_result` | `complete` / `partial` / `failed` | roaring bitmap |
//! | `percolator_meta` | `unconstrained`, `next_id` | bitmap, big-endian `u32` |
//! | `query_records` | query id | bincode [`StoredQuery`] |
//! | `query_names` | query name | query id |
//!
//! Each registration or removal is a single write transaction, so a
//! signature is either fully visible or not at all. A candidate lookup reads
//! every channel from one read transaction.

use std::path::Path;
use std::sync::Arc;

use bincode::config::standard;
use bincode::serde::{decode_from_slice, encode_to_vec};
use bytes::Bytes;
use redb::{
    Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, Table, TableDefinition,
    WriteTransaction,
};
use roaring::RoaringBitmap;

use super::{PostingsStore, QueryId, StoreError, StoredQuery, Upsert, next_query_id};
use crate::range::{EncodedRange, RangeProbe};
use crate::signature::{
    EXTRACTED_TERMS_FIELD, EXTRACTION_RESULT_FIELD, ExtractionOutcome, QuerySignature, RANGE_FIELD,
};

const TERMS: TableDefinition<&[u8], &[u8]> = TableDefinition::new(EXTRACTED_TERMS_FIELD);
const RANGES: TableDefinition<&[u8], &[u8]> = TableDefinition::new(RANGE_FIELD);
const OUTCOMES: TableDefinition<&[u8], &[u8]> = TableDefinition::new(EXTRACTION_RESULT_FIELD);
const META: TableDefinition<&[u8], &[u8]> = TableDefinition::new("percolator_meta");
const RECORDS: TableDefinition<u32, &[u8]> = TableDefinition::new("query_records");
const NAMES: TableDefinition<&str, u32> = TableDefinition::new("query_names");

const UNCONSTRAINED_KEY: &[u8] = b"unconstrained";
const NEXT_ID_KEY: &[u8] = b"next_id";

type BitmapTable<'txn> = Table<'txn, &'static [u8], &'static [u8]>;

/// Redb-backed [`PostingsStore`].
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open or create a store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = Database::create(path).map_err(StoreError::backend)?;

        let write_txn = db.begin_write().map_err(StoreError::backend)?;
        // Opening a table in a write transaction creates it.
        WriteTables::open(&write_txn)?;
        write_txn.commit().map_err(StoreError::backend)?;

        Ok(Self { db: Arc::new(db) })
    }

    fn write<T>(
        &self,
        f: impl FnOnce(&mut WriteTables<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let write_txn = self.db.begin_write().map_err(StoreError::backend)?;
        let out = {
            let mut tables = WriteTables::open(&write_txn)?;
            f(&mut tables)?
        };
        write_txn.commit().map_err(StoreError::backend)?;
        Ok(out)
    }

    fn read_bitmap_from(
        &self,
        def: TableDefinition<&[u8], &[u8]>,
        key: &[u8],
    ) -> Result<RoaringBitmap, StoreError> {
        let read_txn = self.db.begin_read().map_err(StoreError::backend)?;
        let table = read_txn.open_table(def).map_err(StoreError::backend)?;
        read_bitmap(&table, key)
    }
}

struct WriteTables<'txn> {
    terms: BitmapTable<'txn>,
    ranges: BitmapTable<'txn>,
    outcomes: BitmapTable<'txn>,
    meta: BitmapTable<'txn>,
    records: Table<'txn, u32, &'static [u8]>,
    names: Table<'txn, &'static str, u32>,
}

impl<'txn> WriteTables<'txn> {
    fn open(txn: &'txn WriteTransaction) -> Result<Self, StoreError> {
        Ok(Self {
            terms: txn.open_table(TERMS).map_err(StoreError::backend)?,
            ranges: txn.open_table(RANGES).map_err(StoreError::backend)?,
            outcomes: txn.open_table(OUTCOMES).map_err(StoreError::backend)?,
            meta: txn.open_table(META).map_err(StoreError::backend)?,
            records: txn.open_table(RECORDS).map_err(StoreError::backend)?,
            names: txn.open_table(NAMES).map_err(StoreError::backend)?,
        })
    }

    fn allocate_id(&mut self) -> Result<u32, StoreError> {
        let current = match self.meta.get(NEXT_ID_KEY).map_err(StoreError::backend)? {
            Some(value) => {
                let raw: [u8; 4] = value
                    .value()
                    .try_into()
                    .map_err(|_| StoreError::decode("next_id is not a u32"))?;
                u32::from_be_bytes(raw)
            }
            None => 0,
        };
        let next = next_query_id(current)?;
        self.meta
            .insert(NEXT_ID_KEY, next.to_be_bytes().as_slice())
            .map_err(StoreError::backend)?;
        Ok(current)
    }

    fn post(&mut self, id: u32, sig: &QuerySignature) -> Result<(), StoreError> {
        for key in &sig.term_keys {
            update_bitmap(&mut self.terms, key, |b| {
                b.insert(id);
            })?;
        }
        for range in &sig.ranges {
            update_bitmap(&mut self.ranges, range.as_bytes(), |b| {
                b.insert(id);
            })?;
        }
        update_bitmap(&mut self.outcomes, sig.outcome.as_str().as_bytes(), |b| {
            b.insert(id);
        })?;
        if sig.unconstrained {
            update_bitmap(&mut self.meta, UNCONSTRAINED_KEY, |b| {
                b.insert(id);
            })?;
        }
        Ok(())
    }

    fn unpost(&mut self, id: u32, sig: &QuerySignature) -> Result<(), StoreError> {
        for key in &sig.term_keys {
            update_bitmap(&mut self.terms, key, |b| {
                b.remove(id);
            })?;
        }
        for range in &sig.ranges {
            update_bitmap(&mut self.ranges, range.as_bytes(), |b| {
                b.remove(id);
            })?;
        }
        update_bitmap(&mut self.outcomes, sig.outcome.as_str().as_bytes(), |b| {
            b.remove(id);
        })?;
        if sig.unconstrained {
            update_bitmap(&mut self.meta, UNCONSTRAINED_KEY, |b| {
                b.remove(id);
            })?;
        }
        Ok(())
    }

    fn evict(&mut self, name: &str) -> Result<Option<QueryId>, StoreError> {
        let id = match self.names.remove(name).map_err(StoreError::backend)? {
            Some(value) => value.value(),
            None => return Ok(None),
        };
        let old = match self.records.remove(id).map_err(StoreError::backend)? {
            Some(value) => Some(decode_record(value.value())?),
            None => None,
        };
        if let Some(old) = old {
            self.unpost(id, &old.signature)?;
        }
        Ok(Some(QueryId(id)))
    }
}

fn read_bitmap(
    table: &impl ReadableTable<&'static [u8], &'static [u8]>,
    key: &[u8],
) -> Result<RoaringBitmap, StoreError> {
    match table.get(key).map_err(StoreError::backend)? {
        Some(value) => RoaringBitmap::deserialize_from(value.value()).map_err(StoreError::decode),
        None => Ok(RoaringBitmap::new()),
    }
}

fn read_term_postings(
    table: &impl ReadableTable<&'static [u8], &'static [u8]>,
    keys: &[Bytes],
) -> Result<RoaringBitmap, StoreError> {
    let mut out = RoaringBitmap::new();
    for key in keys {
        out |= read_bitmap(table, key)?;
    }
    Ok(out)
}

fn read_range_postings(
    table: &impl ReadableTable<&'static [u8], &'static [u8]>,
    probe: &RangeProbe,
) -> Result<RoaringBitmap, StoreError> {
    let window = probe.lower().as_bytes()..=probe.upper().as_bytes();
    let mut out = RoaringBitmap::new();
    for entry in table.range::<&[u8]>(window).map_err(StoreError::backend)? {
        let (key, value) = entry.map_err(StoreError::backend)?;
        let range = EncodedRange::from_slice(key.value()).map_err(StoreError::decode)?;
        if probe.matches(&range) {
            out |= RoaringBitmap::deserialize_from(value.value()).map_err(StoreError::decode)?;
        }
    }
    Ok(out)
}

/// Read-modify-write of one posting list; empty lists are deleted.
fn update_bitmap(
    table: &mut BitmapTable<'_>,
    key: &[u8],
    f: impl FnOnce(&mut RoaringBitmap),
) -> Result<(), StoreError> {
    let mut bitmap = read_bitmap(&*table, key)?;
    f(&mut bitmap);
    if bitmap.is_empty() {
        table.remove(key).map_err(StoreError::backend)?;
    } else {
        let mut buf = Vec::with_capacity(bitmap.serialized_size());
        bitmap.serialize_into(&mut buf).map_err(StoreError::encode)?;
        table
            .insert(key, buf.as_slice())
            .map_err(StoreError::backend)?;
    }
    Ok(())
}

fn encode_record(query: &StoredQuery) -> Result<Vec<u8>, StoreError> {
    encode_to_vec(query, standard()).map_err(StoreError::encode)
}

fn decode_record(bytes: &[u8]) -> Result<StoredQuery, StoreError> {
    let (query, _) = decode_from_slice(bytes, standard()).map_err(StoreError::decode)?;
    Ok(query)
}

impl PostingsStore for RedbStore {
    fn put(&self, query: StoredQuery) -> Result<Upsert, StoreError> {
        let record = encode_record(&query)?;
        self.write(|tables| {
            let id = tables.allocate_id()?;
            let replaced = tables.evict(&query.name)?;
            tables.post(id, &query.signature)?;
            tables
                .records
                .insert(id, record.as_slice())
                .map_err(StoreError::backend)?;
            tables
                .names
                .insert(query.name.as_str(), id)
                .map_err(StoreError::backend)?;
            Ok(Upsert {
                id: QueryId(id),
                replaced,
            })
        })
    }

    fn remove(&self, name: &str) -> Result<Option<QueryId>, StoreError> {
        self.write(|tables| tables.evict(name))
    }

    fn lookup(&self, name: &str) -> Result<Option<QueryId>, StoreError> {
        let read_txn = self.db.begin_read().map_err(StoreError::backend)?;
        let table = read_txn.open_table(NAMES).map_err(StoreError::backend)?;
        let id = table.get(name).map_err(StoreError::backend)?;
        Ok(id.map(|value| QueryId(value.value())))
    }

    fn term_postings(&self, keys: &[Bytes]) -> Result<RoaringBitmap, StoreError> {
        let read_txn = self.db.begin_read().map_err(StoreError::backend)?;
        let table = read_txn.open_table(TERMS).map_err(StoreError::backend)?;
        read_term_postings(&table, keys)
    }

    fn range_postings(&self, probe: &RangeProbe) -> Result<RoaringBitmap, StoreError> {
        let read_txn = self.db.begin_read().map_err(StoreError::backend)?;
        let table = read_txn.open_table(RANGES).map_err(StoreError::backend)?;
        read_range_postings(&table, probe)
    }

    fn outcome_postings(&self, outcome: ExtractionOutcome) -> Result<RoaringBitmap, StoreError> {
        self.read_bitmap_from(OUTCOMES, outcome.as_str().as_bytes())
    }

    fn unconstrained_postings(&self) -> Result<RoaringBitmap, StoreError> {
        self.read_bitmap_from(META, UNCONSTRAINED_KEY)
    }

    fn candidate_postings(
        &self,
        term_keys: &[Bytes],
        probes: &[RangeProbe],
    ) -> Result<RoaringBitmap, StoreError> {
        let read_txn = self.db.begin_read().map_err(StoreError::backend)?;
        let terms = read_txn.open_table(TERMS).map_err(StoreError::backend)?;
        let ranges = read_txn.open_table(RANGES).map_err(StoreError::backend)?;
        let outcomes = read_txn.open_table(OUTCOMES).map_err(StoreError::backend)?;
        let meta = read_txn.open_table(META).map_err(StoreError::backend)?;

        let mut candidates = read_term_postings(&terms, term_keys)?;
        for probe in probes {
            candidates |= read_range_postings(&ranges, probe)?;
        }
        candidates |= read_bitmap(&outcomes, ExtractionOutcome::Failed.as_str().as_bytes())?;
        candidates |= read_bitmap(&meta, UNCONSTRAINED_KEY)?;
        Ok(candidates)
    }

    fn load(&self, id: QueryId) -> Result<Option<StoredQuery>, StoreError> {
        let read_txn = self.db.begin_read().map_err(StoreError::backend)?;
        let table = read_txn.open_table(RECORDS).map_err(StoreError::backend)?;
        match table.get(id.0).map_err(StoreError::backend)? {
            Some(value) => Ok(Some(decode_record(value.value())?)),
            None => Ok(None),
        }
    }

    fn len(&self) -> Result<u64, StoreError> {
        let read_txn = self.db.begin_read().map_err(StoreError::backend)?;
        let table = read_txn.open_table(NAMES).map_err(StoreError::backend)?;
        table.len().map_err(StoreError::backend)
    }

    fn flush(&self) -> Result<(), StoreError> {
        // Commits are durable on return.
        Ok(())
    }
}
