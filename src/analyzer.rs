//! Query analysis: derive a conservative signature from a query tree.
//!
//! The signature is a set of [`QueryExtraction`]s such that every document
//! matching the query contains at least one of them. When
//! [`ExtractionResult::verified`] is set the converse also holds: a document
//! containing any one extraction matches the query, so the candidate can be
//! accepted without running the query.
//!
//! Two degenerate results carry no extractions:
//! - *matches nothing* (`verified`, empty): the query can never match;
//! - *unconstrained* (not `verified`, empty): no necessary term exists, e.g. a
//!   boolean query made only of `must_not` clauses. Such queries are always
//!   candidates.

use std::cmp::Reverse;
use std::collections::BTreeSet;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::query::{BooleanQuery, Query};

/// A single term or range the analyzer found to be necessary.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QueryExtraction {
    Term {
        field: String,
        term: Bytes,
    },
    Range {
        field: String,
        lower: Bytes,
        upper: Bytes,
    },
}

impl QueryExtraction {
    pub fn term(field: impl Into<String>, term: impl Into<Bytes>) -> Self {
        QueryExtraction::Term {
            field: field.into(),
            term: term.into(),
        }
    }

    pub fn field(&self) -> &str {
        match self {
            QueryExtraction::Term { field, .. } | QueryExtraction::Range { field, .. } => field,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionResult {
    pub extractions: BTreeSet<QueryExtraction>,
    pub verified: bool,
}

impl ExtractionResult {
    pub fn verified(extractions: impl IntoIterator<Item = QueryExtraction>) -> Self {
        Self {
            extractions: extractions.into_iter().collect(),
            verified: true,
        }
    }

    pub fn matches_nothing() -> Self {
        Self::verified([])
    }

    pub fn unconstrained() -> Self {
        Self {
            extractions: BTreeSet::new(),
            verified: false,
        }
    }

    pub fn is_matches_nothing(&self) -> bool {
        self.verified && self.extractions.is_empty()
    }

    pub fn is_unconstrained(&self) -> bool {
        !self.verified && self.extractions.is_empty()
    }

    /// Drop the sufficiency guarantee. A query that matches nothing keeps
    /// matching nothing.
    fn unverified(mut self) -> Self {
        if !self.is_matches_nothing() {
            self.verified = false;
        }
        self
    }
}

/// The analyzer found no safe extraction; the query must always be verified.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported query [{kind}]: {reason}")]
pub struct UnsupportedQuery {
    pub kind: &'static str,
    pub reason: String,
}

impl UnsupportedQuery {
    fn new(kind: &'static str, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

/// How a conjunction combines the extractions of its clauses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConjunctionStrategy {
    /// Post the extractions of every constraining clause.
    #[default]
    Union,
    /// Post only the clause with the smallest estimated postings cardinality.
    BestClause,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    #[serde(default)]
    pub conjunction_strategy: ConjunctionStrategy,
}

/// Analyze a compiled query.
pub fn analyze(query: &Query, cfg: &AnalyzerConfig) -> Result<ExtractionResult, UnsupportedQuery> {
    match query {
        Query::Term { field, term } => Ok(ExtractionResult::verified([QueryExtraction::Term {
            field: field.clone(),
            term: term.clone(),
        }])),
        Query::TermInSet { field, terms } => {
            Ok(ExtractionResult::verified(terms.iter().map(|term| {
                QueryExtraction::Term {
                    field: field.clone(),
                    term: term.clone(),
                }
            })))
        }
        Query::Range {
            field,
            lower,
            upper,
        } => Ok(ExtractionResult::verified([QueryExtraction::Range {
            field: field.clone(),
            lower: lower.clone(),
            upper: upper.clone(),
        }])),
        Query::Bool(b) => analyze_bool(b, cfg),
        Query::DisjunctionMax(queries) => analyze_disjunction(queries.iter().collect(), 1, cfg),
        Query::Boost { query, .. } | Query::ConstantScore(query) | Query::FunctionScore(query) => {
            analyze(query, cfg)
        }
        Query::Boosting { positive, .. } => analyze(positive, cfg),
        // Terms of nested sub-documents are seen flattened at candidate time.
        Query::Nested { query, .. } => analyze(query, cfg).map(ExtractionResult::unverified),
        Query::Prefix { .. } | Query::Exists { .. } | Query::MatchAll => Err(UnsupportedQuery::new(
            query.kind(),
            "no term or range can be extracted",
        )),
    }
}

fn analyze_bool(
    query: &BooleanQuery,
    cfg: &AnalyzerConfig,
) -> Result<ExtractionResult, UnsupportedQuery> {
    let required: Vec<&Query> = query.required().collect();
    let optional: Vec<&Query> = query.optional().collect();
    let has_prohibited = query.prohibited().next().is_some();
    let msm = query.effective_minimum_should_match();

    if msm as usize > optional.len() {
        return Ok(ExtractionResult::matches_nothing());
    }

    let result = if required.is_empty() {
        if optional.is_empty() {
            if has_prohibited {
                return Ok(ExtractionResult::unconstrained());
            }
            return Err(UnsupportedQuery::new(
                "bool",
                "a boolean query without clauses matches all documents",
            ));
        }
        analyze_disjunction(optional, msm, cfg)?
    } else {
        let mut clauses: Vec<_> = required.iter().map(|q| analyze(q, cfg)).collect();
        if msm > 0 {
            clauses.push(analyze_disjunction(optional, msm, cfg));
        }
        analyze_conjunction(clauses, cfg)?
    };

    Ok(if has_prohibited {
        result.unverified()
    } else {
        result
    })
}

/// Every clause has to yield extractions: a document may match through any one of them.
fn analyze_disjunction(
    clauses: Vec<&Query>,
    minimum_should_match: u32,
    cfg: &AnalyzerConfig,
) -> Result<ExtractionResult, UnsupportedQuery> {
    if minimum_should_match as usize > clauses.len() {
        return Ok(ExtractionResult::matches_nothing());
    }

    let mut extractions = BTreeSet::new();
    let mut verified = minimum_should_match <= 1;
    for clause in clauses {
        let result = analyze(clause, cfg)?;
        if result.is_matches_nothing() {
            continue;
        }
        if result.is_unconstrained() {
            return Err(UnsupportedQuery::new(
                clause.kind(),
                "disjunction clause has no extractable term or range",
            ));
        }
        verified &= result.verified;
        extractions.extend(result.extractions);
    }

    if extractions.is_empty() {
        return Ok(ExtractionResult::matches_nothing());
    }
    Ok(ExtractionResult {
        extractions,
        verified,
    })
}

/// Any constraining clause is a valid filter since all clauses must match.
/// The result is verified only when a single clause decides the match.
fn analyze_conjunction(
    clauses: Vec<Result<ExtractionResult, UnsupportedQuery>>,
    cfg: &AnalyzerConfig,
) -> Result<ExtractionResult, UnsupportedQuery> {
    let clause_count = clauses.len();
    let mut constraining = Vec::with_capacity(clause_count);
    let mut exact = true;
    let mut failure = None;

    for clause in clauses {
        match clause {
            Ok(result) if result.is_matches_nothing() => {
                return Ok(ExtractionResult::matches_nothing());
            }
            Ok(result) if result.is_unconstrained() => exact = false,
            Ok(result) => constraining.push(result),
            Err(err) => {
                exact = false;
                failure.get_or_insert(err);
            }
        }
    }

    if constraining.is_empty() {
        return match failure {
            Some(err) => Err(err),
            None => Ok(ExtractionResult::unconstrained()),
        };
    }

    let verified = exact && clause_count == 1 && constraining[0].verified;
    let extractions = match cfg.conjunction_strategy {
        ConjunctionStrategy::Union => constraining
            .into_iter()
            .flat_map(|r| r.extractions)
            .collect(),
        ConjunctionStrategy::BestClause => constraining
            .into_iter()
            .min_by_key(selectivity)
            .map(|r| r.extractions)
            .unwrap_or_default(),
    };
    Ok(ExtractionResult {
        extractions,
        verified,
    })
}

/// Lower is more selective: fewer extractions, fewer ranges, longer terms.
fn selectivity(result: &ExtractionResult) -> (usize, usize, Reverse<usize>) {
    let ranges = result
        .extractions
        .iter()
        .filter(|e| matches!(e, QueryExtraction::Range { .. }))
        .count();
    let shortest_term = result
        .extractions
        .iter()
        .filter_map(|e| match e {
            QueryExtraction::Term { term, .. } => Some(term.len()),
            QueryExtraction::Range { .. } => None,
        })
        .min()
        .unwrap_or(0);
    (result.extractions.len(), ranges, Reverse(shortest_term))
}
