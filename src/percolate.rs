//! Matching coordinator: candidates in, verified matches out.

use std::sync::Arc;

use rayon::prelude::*;
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::candidate::CandidateQuery;
use crate::document::DocumentIndex;
use crate::error::PercolatorError;
use crate::evaluate::QueryEvaluator;
use crate::query::Query;
use crate::signature::ExtractionOutcome;
use crate::store::{PostingsStore, QueryId};

/// A stored query resolved for verification.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredQuery {
    pub name: String,
    pub query: Query,
}

/// Resolves candidate ids to their compiled queries.
pub trait QueryStore: Send + Sync {
    /// `None` when the query was removed after the candidate lookup.
    fn query(&self, id: QueryId) -> Result<Option<Arc<RegisteredQuery>>, PercolatorError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyConfig {
    /// Accept `complete` candidates of single documents without evaluation.
    #[serde(default = "default_trust_complete")]
    pub trust_complete: bool,
    /// Candidate count from which evaluation fans out over rayon.
    #[serde(default = "default_parallel_threshold")]
    pub parallel_threshold: usize,
}

fn default_trust_complete() -> bool {
    true
}

fn default_parallel_threshold() -> usize {
    64
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            trust_complete: default_trust_complete(),
            parallel_threshold: default_parallel_threshold(),
        }
    }
}

/// How a match was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verification {
    /// `complete` signature on a single document.
    Trusted,
    /// Confirmed by the exact evaluator.
    Evaluated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PercolateMatch {
    pub id: QueryId,
    pub name: String,
    pub verification: Verification,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PercolateStats {
    pub candidates: u64,
    pub trusted: u64,
    pub evaluated: u64,
}

/// Matches ordered by query id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchSet {
    pub matches: Vec<PercolateMatch>,
    pub stats: PercolateStats,
}

impl MatchSet {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.matches.iter().map(|m| m.name.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names().any(|n| n == name)
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}

/// Percolate `doc` against the queries posted in `store`.
///
/// Trust of `complete` candidates is limited to documents without nested
/// sub-documents: with several sub-documents a complete signature only proves
/// that its terms occur somewhere, not within one sub-document.
pub fn percolate(
    doc: &DocumentIndex,
    store: &dyn PostingsStore,
    queries: &dyn QueryStore,
    evaluator: &dyn QueryEvaluator,
    cfg: &VerifyConfig,
) -> Result<MatchSet, PercolatorError> {
    let candidates = CandidateQuery::from_document(doc)?.execute(store)?;

    let trusted = if cfg.trust_complete && doc.is_single_document() {
        &candidates & store.outcome_postings(ExtractionOutcome::Complete)?
    } else {
        RoaringBitmap::new()
    };
    let to_evaluate: Vec<u32> = (&candidates - &trusted).iter().collect();

    let accept = |id: u32| -> Result<Option<PercolateMatch>, PercolatorError> {
        let Some(registered) = queries.query(QueryId(id))? else {
            debug!(query_id = id, "candidate removed before verification");
            return Ok(None);
        };
        Ok(Some(PercolateMatch {
            id: QueryId(id),
            name: registered.name.clone(),
            verification: Verification::Trusted,
        }))
    };
    let verify = |id: u32| -> Result<Option<PercolateMatch>, PercolatorError> {
        let Some(registered) = queries.query(QueryId(id))? else {
            debug!(query_id = id, "candidate removed before verification");
            return Ok(None);
        };
        Ok(evaluator
            .matches(&registered.query, doc)?
            .then(|| PercolateMatch {
                id: QueryId(id),
                name: registered.name.clone(),
                verification: Verification::Evaluated,
            }))
    };

    let mut matches: Vec<PercolateMatch> = trusted
        .iter()
        .map(accept)
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .flatten()
        .collect();

    let evaluated: Vec<Option<PercolateMatch>> = if to_evaluate.len() >= cfg.parallel_threshold {
        to_evaluate.par_iter().map(|&id| verify(id)).collect::<Result<_, _>>()?
    } else {
        to_evaluate.iter().map(|&id| verify(id)).collect::<Result<_, _>>()?
    };
    matches.extend(evaluated.into_iter().flatten());
    matches.sort_by_key(|m| m.id);

    Ok(MatchSet {
        matches,
        stats: PercolateStats {
            candidates: candidates.len(),
            trusted: trusted.len(),
            evaluated: to_evaluate.len() as u64,
        },
    })
}
