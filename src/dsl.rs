//! JSON query DSL.
//!
//! A [`QueryBuilder`] is what callers register and what gets persisted next
//! to the extracted signature. It is compiled into a [`Query`] against the
//! index [`Mapping`] at registration time and again whenever a stored query
//! has to be re-evaluated without a cached compiled form.
//!
//! ```
//! use percolator::dsl::QueryBuilder;
//! use serde_json::json;
//!
//! let q = QueryBuilder::from_json(&json!({
//!     "bool": {
//!         "must": [{ "term": { "status": "active" } }],
//!         "must_not": [{ "range": { "age": { "lt": 18 } } }]
//!     }
//! }))
//! .unwrap();
//! assert!(matches!(q, QueryBuilder::Bool(_)));
//! ```

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PercolatorError;
use crate::mapping::{FieldType, Mapping, scalar_term, tokenize};
use crate::point::{PointType, PointValue};
use crate::query::{BooleanQuery, Occur, Query};
use crate::signature::FIELD_VALUE_SEPARATOR;

/// A query as written by the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryBuilder {
    /// `{"term": {"status": "active"}}`
    Term(BTreeMap<String, Value>),
    /// `{"terms": {"tags": ["a", "b"]}}`
    Terms(BTreeMap<String, Vec<Value>>),
    /// `{"range": {"age": {"gte": 18, "lt": 65}}}`
    Range(BTreeMap<String, RangeBounds>),
    /// `{"match": {"body": "quick fox"}}`, analyzed for text fields.
    Match(BTreeMap<String, Value>),
    Prefix(BTreeMap<String, String>),
    Exists {
        field: String,
    },
    MatchAll(MatchAllQuery),
    Bool(BoolQueryBuilder),
    DisMax {
        queries: Vec<QueryBuilder>,
    },
    ConstantScore {
        filter: Box<QueryBuilder>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        boost: Option<f32>,
    },
    FunctionScore {
        query: Box<QueryBuilder>,
    },
    Boosting {
        positive: Box<QueryBuilder>,
        negative: Box<QueryBuilder>,
        negative_boost: f32,
    },
    Nested {
        path: String,
        query: Box<QueryBuilder>,
    },
    HasChild {
        #[serde(rename = "type")]
        child_type: String,
        query: Box<QueryBuilder>,
    },
    HasParent {
        parent_type: String,
        query: Box<QueryBuilder>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchAllQuery {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RangeBounds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gte: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gt: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lte: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lt: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BoolQueryBuilder {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub must: Vec<QueryBuilder>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filter: Vec<QueryBuilder>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub should: Vec<QueryBuilder>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub must_not: Vec<QueryBuilder>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_should_match: Option<u32>,
}

/// Compilation context: the mapping plus the unmapped-field policy.
#[derive(Debug, Clone, Copy)]
pub struct QueryContext<'a> {
    pub mapping: &'a Mapping,
    /// Compile fields missing from the mapping as `text` instead of failing.
    pub map_unmapped_fields_as_string: bool,
}

impl<'a> QueryContext<'a> {
    pub fn new(mapping: &'a Mapping, map_unmapped_fields_as_string: bool) -> Self {
        Self {
            mapping,
            map_unmapped_fields_as_string,
        }
    }

    fn field_type(&self, field: &str) -> Result<FieldType, PercolatorError> {
        if field.as_bytes().contains(&FIELD_VALUE_SEPARATOR) {
            return Err(PercolatorError::InvalidArgument(format!(
                "field name {field:?} contains the reserved separator byte"
            )));
        }
        match self.mapping.field_type(field) {
            Some(ty) => Ok(ty),
            None if self.map_unmapped_fields_as_string => Ok(FieldType::Text),
            None => Err(PercolatorError::UnmappedField(field.to_string())),
        }
    }
}

impl QueryBuilder {
    pub fn from_json(value: &Value) -> Result<Self, PercolatorError> {
        serde_json::from_value(value.clone())
            .map_err(|e| PercolatorError::MalformedQuery(e.to_string()))
    }

    pub fn to_json(&self) -> Result<Value, PercolatorError> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn term(field: impl Into<String>, value: impl Into<Value>) -> Self {
        QueryBuilder::Term(BTreeMap::from([(field.into(), value.into())]))
    }

    pub fn range(field: impl Into<String>, bounds: RangeBounds) -> Self {
        QueryBuilder::Range(BTreeMap::from([(field.into(), bounds)]))
    }

    pub fn bool(bool_query: BoolQueryBuilder) -> Self {
        QueryBuilder::Bool(bool_query)
    }

    /// Name of the DSL construct.
    pub fn name(&self) -> &'static str {
        match self {
            QueryBuilder::Term(_) => "term",
            QueryBuilder::Terms(_) => "terms",
            QueryBuilder::Range(_) => "range",
            QueryBuilder::Match(_) => "match",
            QueryBuilder::Prefix(_) => "prefix",
            QueryBuilder::Exists { .. } => "exists",
            QueryBuilder::MatchAll(_) => "match_all",
            QueryBuilder::Bool(_) => "bool",
            QueryBuilder::DisMax { .. } => "dis_max",
            QueryBuilder::ConstantScore { .. } => "constant_score",
            QueryBuilder::FunctionScore { .. } => "function_score",
            QueryBuilder::Boosting { .. } => "boosting",
            QueryBuilder::Nested { .. } => "nested",
            QueryBuilder::HasChild { .. } => "has_child",
            QueryBuilder::HasParent { .. } => "has_parent",
        }
    }

    /// Reject shapes that cannot be percolated: parent/child relationship
    /// queries anywhere in the tree.
    pub fn verify(&self) -> Result<(), PercolatorError> {
        match self {
            QueryBuilder::HasChild { .. } | QueryBuilder::HasParent { .. } => {
                Err(self.unsupported_shape())
            }
            QueryBuilder::Bool(b) => b
                .must
                .iter()
                .chain(&b.filter)
                .chain(&b.should)
                .chain(&b.must_not)
                .try_for_each(QueryBuilder::verify),
            QueryBuilder::DisMax { queries } => queries.iter().try_for_each(QueryBuilder::verify),
            QueryBuilder::ConstantScore { filter, .. } => filter.verify(),
            QueryBuilder::FunctionScore { query } | QueryBuilder::Nested { query, .. } => {
                query.verify()
            }
            QueryBuilder::Boosting {
                positive, negative, ..
            } => {
                negative.verify()?;
                positive.verify()
            }
            QueryBuilder::Term(_)
            | QueryBuilder::Terms(_)
            | QueryBuilder::Range(_)
            | QueryBuilder::Match(_)
            | QueryBuilder::Prefix(_)
            | QueryBuilder::Exists { .. }
            | QueryBuilder::MatchAll(_) => Ok(()),
        }
    }

    /// Compile into an engine-level [`Query`].
    pub fn to_query(&self, ctx: &QueryContext<'_>) -> Result<Query, PercolatorError> {
        match self {
            QueryBuilder::Term(map) => {
                let (field, value) = single_field("term", map)?;
                term_query(ctx, field, value)
            }
            QueryBuilder::Terms(map) => {
                let (field, values) = single_field("terms", map)?;
                terms_query(ctx, field, values)
            }
            QueryBuilder::Range(map) => {
                let (field, bounds) = single_field("range", map)?;
                range_query(ctx, field, bounds)
            }
            QueryBuilder::Match(map) => {
                let (field, value) = single_field("match", map)?;
                match_query(ctx, field, value)
            }
            QueryBuilder::Prefix(map) => {
                let (field, prefix) = single_field("prefix", map)?;
                match ctx.field_type(field)? {
                    FieldType::Keyword | FieldType::Text => Ok(Query::Prefix {
                        field: field.to_string(),
                        prefix: Bytes::copy_from_slice(prefix.as_bytes()),
                    }),
                    other => Err(PercolatorError::MalformedQuery(format!(
                        "[prefix] is not supported on {other:?} field [{field}]"
                    ))),
                }
            }
            QueryBuilder::Exists { field } => {
                ctx.field_type(field)?;
                Ok(Query::Exists {
                    field: field.clone(),
                })
            }
            QueryBuilder::MatchAll(_) => Ok(Query::MatchAll),
            QueryBuilder::Bool(b) => {
                let mut query = BooleanQuery::new()
                    .with_minimum_should_match(b.minimum_should_match.unwrap_or(0));
                for (occur, clauses) in [
                    (Occur::Must, &b.must),
                    (Occur::Filter, &b.filter),
                    (Occur::Should, &b.should),
                    (Occur::MustNot, &b.must_not),
                ] {
                    for clause in clauses {
                        query = query.with_clause(occur, clause.to_query(ctx)?);
                    }
                }
                Ok(Query::Bool(query))
            }
            QueryBuilder::DisMax { queries } => Ok(Query::DisjunctionMax(
                queries
                    .iter()
                    .map(|q| q.to_query(ctx))
                    .collect::<Result<_, _>>()?,
            )),
            QueryBuilder::ConstantScore { filter, boost } => {
                let inner = Query::ConstantScore(Box::new(filter.to_query(ctx)?));
                Ok(match boost {
                    Some(boost) => Query::Boost {
                        query: Box::new(inner),
                        boost: *boost,
                    },
                    None => inner,
                })
            }
            QueryBuilder::FunctionScore { query } => {
                Ok(Query::FunctionScore(Box::new(query.to_query(ctx)?)))
            }
            QueryBuilder::Boosting {
                positive,
                negative,
                negative_boost,
            } => Ok(Query::Boosting {
                positive: Box::new(positive.to_query(ctx)?),
                negative: Box::new(negative.to_query(ctx)?),
                negative_boost: *negative_boost,
            }),
            QueryBuilder::Nested { path, query } => {
                if !ctx.mapping.is_nested(path) {
                    return Err(PercolatorError::MalformedQuery(format!(
                        "[nested] failed to find nested object under path [{path}]"
                    )));
                }
                Ok(Query::Nested {
                    path: path.clone(),
                    query: Box::new(query.to_query(ctx)?),
                })
            }
            QueryBuilder::HasChild { .. } | QueryBuilder::HasParent { .. } => {
                Err(self.unsupported_shape())
            }
        }
    }

    fn unsupported_shape(&self) -> PercolatorError {
        PercolatorError::UnsupportedQueryShape(format!(
            "the [{}] query is unsupported inside a percolator query",
            self.name()
        ))
    }
}

fn single_field<'m, V>(
    kind: &str,
    map: &'m BTreeMap<String, V>,
) -> Result<(&'m str, &'m V), PercolatorError> {
    let mut iter = map.iter();
    match (iter.next(), iter.next()) {
        (Some((field, value)), None) => Ok((field.as_str(), value)),
        _ => Err(PercolatorError::MalformedQuery(format!(
            "[{kind}] query requires exactly one field, found {}",
            map.len()
        ))),
    }
}

fn point_type_of(field: &str, ty: FieldType) -> Result<PointType, PercolatorError> {
    ty.point_type().ok_or_else(|| {
        PercolatorError::MalformedQuery(format!("field [{field}] of type {ty:?} has no points"))
    })
}

fn keyword_term(field: &str, value: &Value) -> Result<Bytes, PercolatorError> {
    scalar_term(value)
        .map(Bytes::from)
        .ok_or_else(|| PercolatorError::invalid_value(field, format!("{value} is not a scalar")))
}

fn point(field: &str, ty: PointType, value: &Value) -> Result<PointValue, PercolatorError> {
    PointValue::parse(ty, value).map_err(|reason| PercolatorError::invalid_value(field, reason))
}

fn matches_nothing(field: &str) -> Query {
    Query::TermInSet {
        field: field.to_string(),
        terms: Vec::new(),
    }
}

fn term_query(ctx: &QueryContext<'_>, field: &str, value: &Value) -> Result<Query, PercolatorError> {
    match ctx.field_type(field)? {
        FieldType::Keyword | FieldType::Text => Ok(Query::Term {
            field: field.to_string(),
            term: keyword_term(field, value)?,
        }),
        ty => {
            let encoded = point(field, point_type_of(field, ty)?, value)?.encode();
            Ok(Query::Range {
                field: field.to_string(),
                lower: encoded.clone(),
                upper: encoded,
            })
        }
    }
}

fn terms_query(
    ctx: &QueryContext<'_>,
    field: &str,
    values: &[Value],
) -> Result<Query, PercolatorError> {
    let ty = ctx.field_type(field)?;
    if values.is_empty() {
        return Ok(matches_nothing(field));
    }
    match ty {
        FieldType::Keyword | FieldType::Text => Ok(Query::TermInSet {
            field: field.to_string(),
            terms: values
                .iter()
                .map(|v| keyword_term(field, v))
                .collect::<Result<_, _>>()?,
        }),
        _ => {
            let mut query = BooleanQuery::new().with_minimum_should_match(1);
            for value in values {
                query = query.with_clause(Occur::Should, term_query(ctx, field, value)?);
            }
            Ok(Query::Bool(query))
        }
    }
}

fn range_query(
    ctx: &QueryContext<'_>,
    field: &str,
    bounds: &RangeBounds,
) -> Result<Query, PercolatorError> {
    let ty = point_type_of(field, ctx.field_type(field)?)?;
    if (bounds.gte.is_some() && bounds.gt.is_some()) || (bounds.lte.is_some() && bounds.lt.is_some()) {
        return Err(PercolatorError::MalformedQuery(format!(
            "[range] on [{field}] sets both an inclusive and an exclusive bound"
        )));
    }

    let lower = match (&bounds.gte, &bounds.gt) {
        (Some(v), _) => Some(point(field, ty, v)?),
        (None, Some(v)) => point(field, ty, v)?.next_up(),
        (None, None) => Some(ty.min_value()),
    };
    let upper = match (&bounds.lte, &bounds.lt) {
        (Some(v), _) => Some(point(field, ty, v)?),
        (None, Some(v)) => point(field, ty, v)?.next_down(),
        (None, None) => Some(ty.max_value()),
    };

    match (lower, upper) {
        (Some(lower), Some(upper)) => Ok(Query::Range {
            field: field.to_string(),
            lower: lower.encode(),
            upper: upper.encode(),
        }),
        // An exclusive bound at the edge of the type's domain.
        _ => Ok(matches_nothing(field)),
    }
}

fn match_query(ctx: &QueryContext<'_>, field: &str, value: &Value) -> Result<Query, PercolatorError> {
    if ctx.field_type(field)? != FieldType::Text {
        return term_query(ctx, field, value);
    }
    let text = keyword_term(field, value)?;
    let text = String::from_utf8_lossy(&text);
    let mut terms: Vec<Bytes> = Vec::new();
    for token in tokenize(&text).map(Bytes::from) {
        if !terms.contains(&token) {
            terms.push(token);
        }
    }
    Ok(match terms.len() {
        1 => Query::Term {
            field: field.to_string(),
            term: terms.remove(0),
        },
        _ => Query::TermInSet {
            field: field.to_string(),
            terms,
        },
    })
}
