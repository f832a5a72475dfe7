//! Property tests: candidate selection never loses a match, and trusting
//! `complete` signatures never adds one.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use percolator::point::{encode_integer, encode_long};
use percolator::{
    AnalyzerConfig, BooleanQuery, CandidateQuery, CompressionCodec, ConjunctionStrategy,
    DocumentIndex, ExtractionOutcome, FieldType, InMemoryStore, Mapping, MemoryEvaluator, Occur,
    PercolatorError, PostingsStore, Query, QueryEvaluator, QueryId, QuerySignature, QueryStore,
    RegisteredQuery, StoredQuery, VerifyConfig, analyze, encode_range, percolate,
};
use proptest::prelude::*;
use serde_json::{Value, json};

const TERMS: [&str; 4] = ["a", "b", "c", "dd"];

fn mapping() -> Mapping {
    Mapping::new()
        .with_field("k0", FieldType::Keyword)
        .with_field("k1", FieldType::Keyword)
        .with_field("n", FieldType::Integer)
        .with_field("c", FieldType::Nested)
        .with_field("c.k", FieldType::Keyword)
        .with_field("c.n", FieldType::Integer)
}

fn int(v: i32) -> Bytes {
    Bytes::copy_from_slice(&encode_integer(v))
}

fn arb_term() -> impl Strategy<Value = &'static str> {
    prop::sample::select(TERMS.to_vec())
}

fn arb_field() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec!["k0", "k1"])
}

fn arb_strategy() -> impl Strategy<Value = ConjunctionStrategy> {
    prop_oneof![
        Just(ConjunctionStrategy::Union),
        Just(ConjunctionStrategy::BestClause)
    ]
}

fn arb_occur() -> impl Strategy<Value = Occur> {
    prop_oneof![
        3 => Just(Occur::Must),
        1 => Just(Occur::Filter),
        3 => Just(Occur::Should),
        2 => Just(Occur::MustNot),
    ]
}

fn arb_leaf() -> impl Strategy<Value = Query> {
    prop_oneof![
        4 => (arb_field(), arb_term()).prop_map(|(f, t)| Query::term(f, t)),
        2 => (arb_field(), prop::collection::vec(arb_term(), 0..3)).prop_map(|(f, ts)| {
            Query::TermInSet {
                field: f.to_string(),
                terms: ts.into_iter().map(Bytes::from).collect(),
            }
        }),
        3 => (-6i32..6, 0i32..5).prop_map(|(lo, width)| Query::range("n", int(lo), int(lo + width))),
        1 => Just(Query::MatchAll),
        1 => arb_field().prop_map(|f| Query::Exists { field: f.to_string() }),
        1 => (arb_field(), arb_term()).prop_map(|(f, t)| Query::Prefix {
            field: f.to_string(),
            prefix: Bytes::copy_from_slice(&t.as_bytes()[..1]),
        }),
        2 => (arb_term(), -6i32..6).prop_map(|(t, v)| Query::Nested {
            path: "c".into(),
            query: Box::new(Query::Bool(
                BooleanQuery::new()
                    .with_clause(Occur::Must, Query::term("c.k", t))
                    .with_clause(Occur::Filter, Query::range("c.n", int(v), int(v + 2))),
            )),
        }),
    ]
}

fn arb_query() -> impl Strategy<Value = Query> {
    arb_leaf().prop_recursive(3, 32, 4, |inner| {
        prop_oneof![
            4 => (prop::collection::vec((arb_occur(), inner.clone()), 0..5), 0u32..3).prop_map(
                |(clauses, msm)| {
                    let mut query = BooleanQuery::new().with_minimum_should_match(msm);
                    for (occur, clause) in clauses {
                        query = query.with_clause(occur, clause);
                    }
                    Query::Bool(query)
                }
            ),
            1 => prop::collection::vec(inner.clone(), 1..4).prop_map(Query::DisjunctionMax),
            1 => inner.clone().prop_map(|q| Query::ConstantScore(Box::new(q))),
            1 => (inner.clone(), inner).prop_map(|(positive, negative)| Query::Boosting {
                positive: Box::new(positive),
                negative: Box::new(negative),
                negative_boost: 0.5,
            }),
        ]
    })
}

fn arb_doc() -> impl Strategy<Value = Value> {
    (
        prop::collection::vec(arb_term(), 0..3),
        prop::collection::vec(arb_term(), 0..3),
        prop::collection::vec(-8i32..8, 0..3),
        prop::collection::vec((arb_term(), -8i32..8), 0..3),
    )
        .prop_map(|(k0, k1, n, c)| {
            let comments: Vec<Value> = c.into_iter().map(|(k, n)| json!({"k": k, "n": n})).collect();
            json!({"k0": k0, "k1": k1, "n": n, "c": comments})
        })
}

#[derive(Default)]
struct Registry {
    store: InMemoryStore,
    queries: HashMap<QueryId, Arc<RegisteredQuery>>,
}

impl Registry {
    fn add(&mut self, name: &str, query: Query, cfg: &AnalyzerConfig) -> (QueryId, QuerySignature) {
        let signature = QuerySignature::index(&analyze(&query, cfg)).unwrap();
        let up = self
            .store
            .put(StoredQuery {
                name: name.into(),
                signature: signature.clone(),
                codec: CompressionCodec::None,
                source: Vec::new(),
            })
            .unwrap();
        self.queries.insert(
            up.id,
            Arc::new(RegisteredQuery {
                name: name.into(),
                query,
            }),
        );
        (up.id, signature)
    }
}

impl QueryStore for Registry {
    fn query(&self, id: QueryId) -> Result<Option<Arc<RegisteredQuery>>, PercolatorError> {
        Ok(self.queries.get(&id).cloned())
    }
}

proptest! {
    /// A document matching a query always retrieves it as a candidate.
    #[test]
    fn candidates_include_every_match(
        query in arb_query(),
        source in arb_doc(),
        strategy in arb_strategy(),
    ) {
        let cfg = AnalyzerConfig { conjunction_strategy: strategy };
        let mut registry = Registry::default();
        let (id, _) = registry.add("q", query.clone(), &cfg);

        let doc = DocumentIndex::from_source(&source, &mapping()).unwrap();
        let candidates = CandidateQuery::from_document(&doc).unwrap().execute(&registry.store).unwrap();
        if MemoryEvaluator.matches(&query, &doc).unwrap() {
            prop_assert!(candidates.contains(id.0), "lost match of {:?} on {}", query, source);
        }
    }

    /// A `complete` candidate of a single document is a match.
    #[test]
    fn complete_candidates_are_matches(
        query in arb_query(),
        source in arb_doc(),
        strategy in arb_strategy(),
    ) {
        let cfg = AnalyzerConfig { conjunction_strategy: strategy };
        let mut registry = Registry::default();
        let (id, signature) = registry.add("q", query.clone(), &cfg);

        let doc = DocumentIndex::from_source(&source, &mapping()).unwrap();
        let candidates = CandidateQuery::from_document(&doc).unwrap().execute(&registry.store).unwrap();
        if signature.outcome == ExtractionOutcome::Complete
            && doc.is_single_document()
            && candidates.contains(id.0)
        {
            prop_assert!(
                MemoryEvaluator.matches(&query, &doc).unwrap(),
                "trusted non-match of {:?} on {}", query, source
            );
        }
    }

    /// Percolation returns exactly the queries an exhaustive scan would.
    #[test]
    fn percolate_equals_exhaustive_evaluation(
        queries in prop::collection::vec(arb_query(), 1..8),
        source in arb_doc(),
        strategy in arb_strategy(),
        parallel_threshold in 1usize..4,
    ) {
        let cfg = AnalyzerConfig { conjunction_strategy: strategy };
        let mut registry = Registry::default();
        for (i, query) in queries.iter().enumerate() {
            registry.add(&format!("q{i}"), query.clone(), &cfg);
        }

        let doc = DocumentIndex::from_source(&source, &mapping()).unwrap();
        let verify = VerifyConfig { parallel_threshold, ..VerifyConfig::default() };
        let set = percolate(&doc, &registry.store, &registry, &MemoryEvaluator, &verify).unwrap();

        let expected: Vec<String> = queries
            .iter()
            .enumerate()
            .filter(|(_, q)| MemoryEvaluator.matches(q, &doc).unwrap())
            .map(|(i, _)| format!("q{i}"))
            .collect();
        let mut actual: Vec<String> = set.names().map(str::to_string).collect();
        actual.sort_by_key(|name| name[1..].parse::<usize>().unwrap());
        prop_assert_eq!(actual, expected);
    }

    /// Encoding is deterministic and ranges of one field intersect exactly
    /// when their intervals overlap, whatever the bound width.
    #[test]
    fn encoded_ranges_intersect_like_intervals(
        (a_lo, a_hi) in (-50i64..50, 0i64..20).prop_map(|(lo, w)| (lo, lo + w)),
        (b_lo, b_hi) in (-50i64..50, 0i64..20).prop_map(|(lo, w)| (lo, lo + w)),
    ) {
        let a = encode_range("f", &encode_long(a_lo), &encode_long(a_hi)).unwrap();
        let b = encode_range("f", &encode_long(b_lo), &encode_long(b_hi)).unwrap();
        prop_assert_eq!(a, encode_range("f", &encode_long(a_lo), &encode_long(a_hi)).unwrap());
        prop_assert_eq!(a.as_bytes().len(), b.as_bytes().len());
        prop_assert_eq!(a.intersects(&b), a_lo <= b_hi && b_lo <= a_hi);

        let narrow = encode_range("f", &encode_integer(a_lo as i32), &encode_integer(a_hi as i32)).unwrap();
        prop_assert_eq!(narrow.as_bytes().len(), a.as_bytes().len());
    }
}

/// Marking a conjunction verified as soon as any clause is verified would
/// trust a document that satisfies only one of the required clauses.
#[test]
fn one_verified_clause_does_not_verify_a_conjunction() {
    let query = Query::Bool(
        BooleanQuery::new()
            .with_clause(Occur::Must, Query::term("k0", "a"))
            .with_clause(Occur::Must, Query::term("k1", "b")),
    );
    let cfg = AnalyzerConfig::default();
    let result = analyze(&query, &cfg).unwrap();
    assert_eq!(result.extractions.len(), 2);
    assert!(!result.verified);

    let mut registry = Registry::default();
    let (id, signature) = registry.add("both", query.clone(), &cfg);
    assert_eq!(signature.outcome, ExtractionOutcome::Partial);

    let doc = DocumentIndex::from_source(&json!({"k0": "a"}), &mapping()).unwrap();
    let candidates = CandidateQuery::from_document(&doc).unwrap().execute(&registry.store).unwrap();
    assert!(candidates.contains(id.0));
    assert!(!MemoryEvaluator.matches(&query, &doc).unwrap());

    let set = percolate(&doc, &registry.store, &registry, &MemoryEvaluator, &VerifyConfig::default()).unwrap();
    assert!(set.is_empty());
}
