//! Exact evaluation of a compiled query against one document.

use crate::document::DocumentIndex;
use crate::error::PercolatorError;
use crate::query::{BooleanQuery, Query};

/// Decides whether a document matches a query.
pub trait QueryEvaluator: Send + Sync {
    fn matches(&self, query: &Query, doc: &DocumentIndex) -> Result<bool, PercolatorError>;
}

/// Evaluates queries directly over a [`DocumentIndex`].
///
/// Top-level clauses see the root document; a `nested` query switches to the
/// sub-documents under its path enclosed by the current one and matches when
/// any of them does.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryEvaluator;

impl QueryEvaluator for MemoryEvaluator {
    fn matches(&self, query: &Query, doc: &DocumentIndex) -> Result<bool, PercolatorError> {
        evaluate(query, doc, doc.root_position())
    }
}

fn evaluate(query: &Query, index: &DocumentIndex, pos: usize) -> Result<bool, PercolatorError> {
    let doc = &index.docs()[pos];
    match query {
        Query::Term { field, term } => Ok(doc.has_term(field, term)),
        Query::TermInSet { field, terms } => Ok(terms.iter().any(|t| doc.has_term(field, t))),
        Query::Range {
            field,
            lower,
            upper,
        } => {
            if lower.len() != upper.len() {
                return Err(PercolatorError::Evaluation(format!(
                    "range bounds of [{field}] differ in width"
                )));
            }
            Ok(doc
                .field_points(field)
                .any(|p| p.len() == lower.len() && lower <= p && p <= upper))
        }
        Query::Prefix { field, prefix } => Ok(doc.field_terms(field).any(|t| t.starts_with(prefix))),
        Query::Exists { field } => Ok(doc.has_field(field)),
        Query::MatchAll => Ok(true),
        Query::Bool(b) => evaluate_bool(b, index, pos),
        Query::DisjunctionMax(queries) => {
            for q in queries {
                if evaluate(q, index, pos)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Query::Boost { query, .. } | Query::ConstantScore(query) | Query::FunctionScore(query) => {
            evaluate(query, index, pos)
        }
        Query::Boosting { positive, .. } => evaluate(positive, index, pos),
        Query::Nested { path, query } => {
            for sub in index.nested_within(pos, path) {
                if evaluate(query, index, sub)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
    }
}

fn evaluate_bool(query: &BooleanQuery, index: &DocumentIndex, pos: usize) -> Result<bool, PercolatorError> {
    for clause in query.required() {
        if !evaluate(clause, index, pos)? {
            return Ok(false);
        }
    }
    for clause in query.prohibited() {
        if evaluate(clause, index, pos)? {
            return Ok(false);
        }
    }

    let needed = query.effective_minimum_should_match() as usize;
    let mut matched = 0;
    for clause in query.optional() {
        if matched >= needed {
            break;
        }
        if evaluate(clause, index, pos)? {
            matched += 1;
        }
    }
    Ok(matched >= needed)
}
