//! The compiled query tree.
//!
//! [`Query`] is the engine-level representation produced by compiling a
//! [`QueryBuilder`](crate::dsl::QueryBuilder) against a mapping: field values
//! are already encoded (term bytes, sortable point bytes). The analyzer and the
//! exact evaluator both dispatch over this closed set of variants; a new query
//! kind means one new variant plus one arm in each.

use bytes::Bytes;

/// How a clause participates in a [`BooleanQuery`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Occur {
    Must,
    Filter,
    Should,
    MustNot,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BooleanQuery {
    pub clauses: Vec<(Occur, Query)>,
    pub minimum_should_match: u32,
}

impl BooleanQuery {
    pub fn new() -> Self {
        Self {
            clauses: Vec::new(),
            minimum_should_match: 0,
        }
    }

    pub fn with_clause(mut self, occur: Occur, query: Query) -> Self {
        self.clauses.push((occur, query));
        self
    }

    pub fn with_minimum_should_match(mut self, msm: u32) -> Self {
        self.minimum_should_match = msm;
        self
    }

    /// MUST and FILTER clauses.
    pub fn required(&self) -> impl Iterator<Item = &Query> {
        self.clauses
            .iter()
            .filter(|(o, _)| matches!(o, Occur::Must | Occur::Filter))
            .map(|(_, q)| q)
    }

    pub fn optional(&self) -> impl Iterator<Item = &Query> {
        self.clauses
            .iter()
            .filter(|(o, _)| *o == Occur::Should)
            .map(|(_, q)| q)
    }

    pub fn prohibited(&self) -> impl Iterator<Item = &Query> {
        self.clauses
            .iter()
            .filter(|(o, _)| *o == Occur::MustNot)
            .map(|(_, q)| q)
    }

    /// Number of SHOULD clauses a document must satisfy.
    ///
    /// Without required clauses at least one SHOULD clause has to match;
    /// with required clauses SHOULD clauses are optional unless a minimum is set.
    pub fn effective_minimum_should_match(&self) -> u32 {
        if self.required().next().is_none() && self.optional().next().is_some() {
            self.minimum_should_match.max(1)
        } else {
            self.minimum_should_match
        }
    }
}

impl Default for BooleanQuery {
    fn default() -> Self {
        Self::new()
    }
}

/// A compiled query.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// Exact term equality on a keyword or text field.
    Term { field: String, term: Bytes },
    /// Any of a set of terms.
    TermInSet { field: String, terms: Vec<Bytes> },
    /// Inclusive point range; both bounds share the field's encoded width.
    Range {
        field: String,
        lower: Bytes,
        upper: Bytes,
    },
    /// Term prefix match.
    Prefix { field: String, prefix: Bytes },
    /// Field has at least one value.
    Exists { field: String },
    MatchAll,
    Bool(BooleanQuery),
    /// Matches when any sub-query matches.
    DisjunctionMax(Vec<Query>),
    Boost { query: Box<Query>, boost: f32 },
    ConstantScore(Box<Query>),
    FunctionScore(Box<Query>),
    /// Matches exactly like `positive`; `negative` only demotes scores.
    Boosting {
        positive: Box<Query>,
        negative: Box<Query>,
        negative_boost: f32,
    },
    /// Matches when a nested sub-document under `path` matches `query`.
    Nested { path: String, query: Box<Query> },
}

impl Query {
    pub fn term(field: impl Into<String>, term: impl Into<Bytes>) -> Self {
        Query::Term {
            field: field.into(),
            term: term.into(),
        }
    }

    pub fn range(field: impl Into<String>, lower: impl Into<Bytes>, upper: impl Into<Bytes>) -> Self {
        Query::Range {
            field: field.into(),
            lower: lower.into(),
            upper: upper.into(),
        }
    }

    /// Short kind name, used in logs and analyzer failures.
    pub fn kind(&self) -> &'static str {
        match self {
            Query::Term { .. } => "term",
            Query::TermInSet { .. } => "terms",
            Query::Range { .. } => "range",
            Query::Prefix { .. } => "prefix",
            Query::Exists { .. } => "exists",
            Query::MatchAll => "match_all",
            Query::Bool(_) => "bool",
            Query::DisjunctionMax(_) => "dis_max",
            Query::Boost { .. } => "boost",
            Query::ConstantScore(_) => "constant_score",
            Query::FunctionScore(_) => "function_score",
            Query::Boosting { .. } => "boosting",
            Query::Nested { .. } => "nested",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pure_should_requires_one_match() {
        let q = BooleanQuery::new()
            .with_clause(Occur::Should, Query::term("a", "x"))
            .with_clause(Occur::Should, Query::term("b", "y"));
        assert_eq!(q.effective_minimum_should_match(), 1);
    }

    #[test]
    fn should_is_optional_next_to_required_clauses() {
        let q = BooleanQuery::new()
            .with_clause(Occur::Filter, Query::term("a", "x"))
            .with_clause(Occur::Should, Query::term("b", "y"));
        assert_eq!(q.effective_minimum_should_match(), 0);
        assert_eq!(q.required().count(), 1);
    }
}
