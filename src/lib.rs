//! Stored-query matching ("percolation").
//!
//! Register many queries once, then ask which of them match each incoming
//! document without evaluating all of them:
//!
//! 1. at registration, [`analyzer::analyze`] derives a conservative signature
//!    from the compiled query: terms and point ranges of which a matching
//!    document must contain at least one, plus whether containing one is
//!    already a proof of match;
//! 2. [`signature::QuerySignature`] projects it onto a term channel, a binary
//!    range channel ([`range::EncodedRange`]) and an outcome marker
//!    (`complete` / `partial` / `failed`), stored by a [`PostingsStore`];
//! 3. at percolation, [`candidate::CandidateQuery`] turns the document's own
//!    terms and points into a lookup retrieving every query that could match;
//! 4. [`percolate::percolate`] accepts `complete` candidates of single
//!    documents as is and re-evaluates the rest with a [`QueryEvaluator`].
//!
//! [`Percolator`] ties these together with a [`Mapping`], a
//! [`PercolatorConfig`] and the JSON [`QueryBuilder`] DSL.
//!
//! ```
//! use percolator::{FieldType, Mapping, Percolator, PercolatorConfig};
//! use serde_json::json;
//!
//! let mapping = Mapping::new()
//!     .with_field("status", FieldType::Keyword)
//!     .with_field("age", FieldType::Integer);
//! let percolator = Percolator::new(PercolatorConfig::new().with_mapping(mapping)).unwrap();
//!
//! percolator
//!     .register_source("adults", &json!({"query": {"range": {"age": {"gte": 18}}}}))
//!     .unwrap();
//! percolator
//!     .register_source("inactive", &json!({"query": {"bool": {"must_not": [{"term": {"status": "active"}}]}}}))
//!     .unwrap();
//!
//! let matches = percolator.percolate(&json!({"status": "active", "age": 42})).unwrap();
//! assert_eq!(matches.names().collect::<Vec<_>>(), vec!["adults"]);
//! ```

pub mod analyzer;
pub mod candidate;
pub mod compression;
pub mod config;
pub mod document;
pub mod dsl;
pub mod error;
pub mod evaluate;
pub mod mapping;
pub mod metrics;
pub mod percolate;
mod percolator;
pub mod point;
pub mod query;
pub mod range;
pub mod signature;
pub mod store;

pub use analyzer::{
    AnalyzerConfig, ConjunctionStrategy, ExtractionResult, QueryExtraction, UnsupportedQuery,
    analyze,
};
pub use candidate::CandidateQuery;
pub use compression::{CompressionCodec, CompressionConfig};
pub use config::{ConfigLoadError, PercolatorConfig};
pub use document::{DocumentIndex, IndexedDoc};
pub use dsl::{BoolQueryBuilder, QueryBuilder, QueryContext, RangeBounds};
pub use error::PercolatorError;
pub use evaluate::{MemoryEvaluator, QueryEvaluator};
pub use mapping::{FieldType, Mapping};
pub use metrics::{PercolateMetrics, set_percolate_metrics};
pub use percolate::{
    MatchSet, PercolateMatch, PercolateStats, QueryStore, RegisteredQuery, Verification,
    VerifyConfig, percolate,
};
pub use percolator::{Percolator, Registration};
pub use query::{BooleanQuery, Occur, Query};
pub use range::{EncodedRange, RANGE_FIELD_WIDTH, RangeProbe, encode_range};
pub use signature::{ExtractionOutcome, QuerySignature, term_key};
#[cfg(feature = "embedded")]
pub use store::RedbStore;
pub use store::{InMemoryStore, PostingsStore, QueryId, StoreConfig, StoreError, StoredQuery};
