//! The percolator facade: registration and percolation over one store.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use serde_json::Value;
use tracing::{Level, debug, info, warn};

use crate::analyzer::{QueryExtraction, analyze};
use crate::config::PercolatorConfig;
use crate::document::DocumentIndex;
use crate::dsl::{QueryBuilder, QueryContext};
use crate::error::PercolatorError;
use crate::evaluate::{MemoryEvaluator, QueryEvaluator};
use crate::metrics::MetricsSpan;
use crate::percolate::{MatchSet, QueryStore, RegisteredQuery, percolate};
use crate::signature::{ExtractionOutcome, QuerySignature};
use crate::store::{PostingsStore, QueryId, StoredQuery};

/// What a registration stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub id: QueryId,
    pub name: String,
    pub extractions: Vec<QueryExtraction>,
    pub verified: bool,
    pub outcome: ExtractionOutcome,
    /// Id of the query this registration replaced.
    pub replaced: Option<QueryId>,
}

/// Registers queries and percolates documents against them.
///
/// ```
/// use percolator::{FieldType, Mapping, Percolator, PercolatorConfig, QueryBuilder};
/// use serde_json::json;
///
/// let cfg = PercolatorConfig::new().with_mapping(Mapping::new().with_field("status", FieldType::Keyword));
/// let percolator = Percolator::new(cfg).unwrap();
/// percolator.register_query("active", &QueryBuilder::term("status", "active")).unwrap();
///
/// let matches = percolator.percolate(&json!({"status": "active"})).unwrap();
/// assert!(matches.contains("active"));
/// ```
pub struct Percolator {
    cfg: PercolatorConfig,
    store: Box<dyn PostingsStore>,
    evaluator: Box<dyn QueryEvaluator>,
    /// Compiled queries by id. Writers hold this lock across the store write
    /// so the cache only ever holds ids the store still serves.
    compiled: RwLock<HashMap<QueryId, Arc<RegisteredQuery>>>,
}

const DEFAULT_NAME: &str = "percolator";

impl Percolator {
    /// Build a percolator with the store selected by `cfg.store`.
    pub fn new(cfg: PercolatorConfig) -> Result<Self, PercolatorError> {
        cfg.validate()
            .map_err(|e| PercolatorError::InvalidArgument(e.to_string()))?;
        let store = cfg.store.build()?;
        Ok(Self::with_store(cfg, store))
    }

    /// Build a percolator over a caller-provided store.
    pub fn with_store(cfg: PercolatorConfig, store: Box<dyn PostingsStore>) -> Self {
        Self {
            cfg,
            store,
            evaluator: Box::new(MemoryEvaluator),
            compiled: RwLock::new(HashMap::new()),
        }
    }

    /// Replace the exact evaluator.
    pub fn with_evaluator(mut self, evaluator: Box<dyn QueryEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn config(&self) -> &PercolatorConfig {
        &self.cfg
    }

    /// Configured name, as attached to log spans.
    pub fn name(&self) -> &str {
        self.cfg.name.as_deref().unwrap_or(DEFAULT_NAME)
    }

    pub fn store(&self) -> &dyn PostingsStore {
        self.store.as_ref()
    }

    fn context(&self) -> QueryContext<'_> {
        QueryContext::new(&self.cfg.mapping, self.cfg.map_unmapped_fields_as_string)
    }

    /// Register `builder` under `name`, replacing any query of the same name.
    ///
    /// An unsupported analysis is not an error: the query is stored with
    /// outcome `failed` and evaluated against every document.
    pub fn register_query(&self, name: &str, builder: &QueryBuilder) -> Result<Registration, PercolatorError> {
        let start = Instant::now();
        let metrics = MetricsSpan::start();
        let span = tracing::span!(
            Level::INFO,
            "percolator.register",
            percolator = self.name(),
            query_name = %name,
            query_kind = builder.name()
        );
        let _guard = span.enter();

        match self.register_inner(name, builder) {
            Ok(registration) => {
                let elapsed_micros = start.elapsed().as_micros();
                info!(
                    query_id = %registration.id,
                    outcome = %registration.outcome,
                    extractions = registration.extractions.len(),
                    replaced = registration.replaced.is_some(),
                    elapsed_micros,
                    "register_success"
                );
                if let Some(m) = metrics {
                    m.record_registration(Some(registration.outcome));
                }
                Ok(registration)
            }
            Err(err) => {
                let elapsed_micros = start.elapsed().as_micros();
                warn!(error = %err, elapsed_micros, "register_failure");
                if let Some(m) = metrics {
                    m.record_registration(None);
                }
                Err(err)
            }
        }
    }

    fn register_inner(&self, name: &str, builder: &QueryBuilder) -> Result<Registration, PercolatorError> {
        if name.is_empty() {
            return Err(PercolatorError::InvalidArgument("query name must not be empty".into()));
        }
        builder.verify()?;
        let query = builder.to_query(&self.context())?;

        let analysis = analyze(&query, &self.cfg.analyzer);
        if let Err(unsupported) = &analysis {
            debug!(reason = %unsupported, "extraction_failed");
        }
        let signature = QuerySignature::index(&analysis)?;
        let outcome = signature.outcome;
        let (extractions, verified) = match analysis {
            Ok(result) => (result.extractions.into_iter().collect(), result.verified),
            Err(_) => (Vec::new(), false),
        };

        let json = serde_json::to_vec(&builder.to_json()?)?;
        let source = self.cfg.compression.compress(&json)?;

        let mut compiled = self.compiled_write();
        let upsert = self.store.put(StoredQuery {
            name: name.to_string(),
            signature,
            codec: self.cfg.compression.codec,
            source,
        })?;
        if let Some(old) = upsert.replaced {
            compiled.remove(&old);
        }
        compiled.insert(
            upsert.id,
            Arc::new(RegisteredQuery {
                name: name.to_string(),
                query,
            }),
        );

        Ok(Registration {
            id: upsert.id,
            name: name.to_string(),
            extractions,
            verified,
            outcome,
            replaced: upsert.replaced,
        })
    }

    /// Register the query held in `source[query_field]` of a registration document.
    pub fn register_source(&self, name: &str, source: &Value) -> Result<Registration, PercolatorError> {
        let field = &self.cfg.query_field;
        let object = source.as_object().ok_or_else(|| {
            PercolatorError::MalformedQuery("registration document must be a JSON object".into())
        })?;
        let raw = match object.get(field) {
            None | Some(Value::Null) => {
                return Err(PercolatorError::MalformedQuery(format!(
                    "registration document has no [{field}] field"
                )));
            }
            Some(Value::Array(items)) if items.len() > 1 => {
                return Err(PercolatorError::DuplicateRegistration { found: items.len() });
            }
            Some(Value::Array(items)) => items.first().ok_or_else(|| {
                PercolatorError::MalformedQuery(format!("[{field}] holds an empty array"))
            })?,
            Some(raw) => raw,
        };
        let builder = QueryBuilder::from_json(raw)?;
        self.register_query(name, &builder)
    }

    /// Remove the query registered under `name`. Returns `false` when none was.
    pub fn unregister(&self, name: &str) -> Result<bool, PercolatorError> {
        let mut compiled = self.compiled_write();
        match self.store.remove(name)? {
            Some(id) => {
                compiled.remove(&id);
                drop(compiled);
                info!(query_name = %name, query_id = %id, "unregister_success");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Percolate a JSON document source.
    pub fn percolate(&self, source: &Value) -> Result<MatchSet, PercolatorError> {
        let doc = DocumentIndex::from_source(source, &self.cfg.mapping)?;
        self.percolate_document(&doc)
    }

    /// Percolate an already parsed document.
    pub fn percolate_document(&self, doc: &DocumentIndex) -> Result<MatchSet, PercolatorError> {
        let start = Instant::now();
        let metrics = MetricsSpan::start();
        let span = tracing::span!(
            Level::INFO,
            "percolator.percolate",
            percolator = self.name(),
            sub_documents = doc.docs().len()
        );
        let _guard = span.enter();

        match percolate(doc, self.store.as_ref(), self, self.evaluator.as_ref(), &self.cfg.verify) {
            Ok(set) => {
                let elapsed_micros = start.elapsed().as_micros();
                info!(
                    candidates = set.stats.candidates,
                    trusted = set.stats.trusted,
                    evaluated = set.stats.evaluated,
                    matches = set.len(),
                    elapsed_micros,
                    "percolate_success"
                );
                if let Some(m) = metrics {
                    m.record_percolation(Some(&set.stats), set.len());
                }
                Ok(set)
            }
            Err(err) => {
                let elapsed_micros = start.elapsed().as_micros();
                warn!(error = %err, elapsed_micros, "percolate_failure");
                if let Some(m) = metrics {
                    m.record_percolation(None, 0);
                }
                Err(err)
            }
        }
    }

    /// Number of registered queries.
    pub fn len(&self) -> Result<u64, PercolatorError> {
        Ok(self.store.len()?)
    }

    pub fn is_empty(&self) -> Result<bool, PercolatorError> {
        Ok(self.store.is_empty()?)
    }

    pub fn flush(&self) -> Result<(), PercolatorError> {
        Ok(self.store.flush()?)
    }

    /// Stored DSL of the query registered under `name`.
    pub fn query_source(&self, name: &str) -> Result<Option<QueryBuilder>, PercolatorError> {
        let Some(id) = self.store.lookup(name)? else {
            return Ok(None);
        };
        match self.store.load(id)? {
            Some(stored) => Ok(Some(decode_source(&stored)?)),
            None => Ok(None),
        }
    }

    fn compiled_write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<QueryId, Arc<RegisteredQuery>>> {
        self.compiled
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn decode_source(stored: &StoredQuery) -> Result<QueryBuilder, PercolatorError> {
    let json = stored.codec.decompress(&stored.source)?;
    let value: Value = serde_json::from_slice(&json)?;
    QueryBuilder::from_json(&value)
}

impl QueryStore for Percolator {
    /// Cached compiled query, or the stored source recompiled on a miss.
    fn query(&self, id: QueryId) -> Result<Option<Arc<RegisteredQuery>>, PercolatorError> {
        {
            let cache = self
                .compiled
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(hit) = cache.get(&id) {
                return Ok(Some(Arc::clone(hit)));
            }
        }

        let Some(stored) = self.store.load(id)? else {
            return Ok(None);
        };
        let query = decode_source(&stored)?.to_query(&self.context())?;
        let registered = Arc::new(RegisteredQuery {
            name: stored.name,
            query,
        });

        // Cache only while the name still resolves to this id.
        let mut compiled = self.compiled_write();
        if let Some(hit) = compiled.get(&id) {
            return Ok(Some(Arc::clone(hit)));
        }
        if self.store.lookup(&registered.name)? == Some(id) {
            compiled.insert(id, Arc::clone(&registered));
        }
        Ok(Some(registered))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{FieldType, Mapping};
    use serde_json::json;

    fn percolator() -> Percolator {
        let mapping = Mapping::new()
            .with_field("status", FieldType::Keyword)
            .with_field("age", FieldType::Integer);
        Percolator::new(PercolatorConfig::new().with_mapping(mapping)).unwrap()
    }

    #[test]
    fn register_reports_extractions() {
        let p = percolator();
        let reg = p.register_query("active", &QueryBuilder::term("status", "active")).unwrap();
        assert_eq!(reg.outcome, ExtractionOutcome::Complete);
        assert!(reg.verified);
        assert_eq!(reg.extractions, vec![QueryExtraction::term("status", "active")]);
    }

    #[test]
    fn register_source_rejects_two_queries() {
        let p = percolator();
        let doc = json!({"query": [{"term": {"status": "a"}}, {"term": {"status": "b"}}]});
        let err = p.register_source("dup", &doc).unwrap_err();
        assert_eq!(err, PercolatorError::DuplicateRegistration { found: 2 });
        assert!(p.is_empty().unwrap());
    }

    #[test]
    fn cache_miss_recompiles_stored_source() {
        let p = percolator();
        let reg = p
            .register_source("adult", &json!({"query": {"range": {"age": {"gte": 18}}}}))
            .unwrap();
        p.compiled_write().clear();

        let resolved = p.query(reg.id).unwrap().unwrap();
        assert_eq!(resolved.name, "adult");
        assert!(p.percolate(&json!({"age": 30})).unwrap().contains("adult"));
        assert!(!p.percolate(&json!({"age": 12})).unwrap().contains("adult"));
    }

    #[test]
    fn unregister_removes_matches() {
        let p = percolator();
        p.register_query("active", &QueryBuilder::term("status", "active")).unwrap();
        assert!(p.unregister("active").unwrap());
        assert!(!p.unregister("active").unwrap());
        assert!(p.percolate(&json!({"status": "active"})).unwrap().is_empty());
    }

    #[test]
    fn name_defaults_and_follows_config() {
        assert_eq!(percolator().name(), "percolator");
        let cfg = PercolatorConfig::new().with_name("alerts");
        assert_eq!(Percolator::new(cfg).unwrap().name(), "alerts");
    }

    #[test]
    fn cache_never_holds_replaced_ids() {
        let p = Arc::new(percolator());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let p = Arc::clone(&p);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let name = format!("q{}", i % 3);
                        let builder = QueryBuilder::term("status", format!("s{t}-{i}"));
                        p.register_query(&name, &builder).unwrap();
                        if i % 7 == 0 {
                            p.compiled_write().clear();
                        }
                        if i % 11 == 0 {
                            p.unregister(&name).unwrap();
                        }
                        p.percolate(&json!({"status": format!("s{t}-{i}")})).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let cache = p.compiled_write();
        for (id, registered) in cache.iter() {
            assert_eq!(p.store().lookup(&registered.name).unwrap(), Some(*id));
        }
        assert!(cache.len() as u64 <= p.len().unwrap());
    }

    #[test]
    fn cache_miss_on_a_replaced_id_is_not_cached() {
        let p = percolator();
        let first = p.register_query("q", &QueryBuilder::term("status", "old")).unwrap();
        p.register_query("q", &QueryBuilder::term("status", "new")).unwrap();
        p.compiled_write().clear();

        // The replaced record is gone from the store.
        assert!(p.query(first.id).unwrap().is_none());
        assert!(p.compiled_write().is_empty());
    }

    #[test]
    fn query_source_round_trips_the_dsl() {
        let p = percolator();
        let builder = QueryBuilder::term("status", "active");
        p.register_query("active", &builder).unwrap();
        assert_eq!(p.query_source("active").unwrap(), Some(builder));
        assert_eq!(p.query_source("missing").unwrap(), None);
    }
}
