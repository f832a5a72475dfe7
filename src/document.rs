//! In-memory index of the single document being percolated.
//!
//! A JSON source is flattened into one root sub-document plus one
//! sub-document per object under a `nested` path. The candidate builder reads
//! the union of terms and points across all of them; the exact evaluator
//! reads them one at a time.

use std::collections::{BTreeMap, BTreeSet};

use bytes::Bytes;
use serde_json::{Map, Value};

use crate::error::PercolatorError;
use crate::mapping::{FieldType, Mapping, scalar_term, tokenize};
use crate::point::{PointType, PointValue};
use crate::signature::FIELD_VALUE_SEPARATOR;

/// Terms and encoded points of one (sub-)document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexedDoc {
    /// Nested path for sub-documents, `None` for the root.
    pub path: Option<String>,
    /// Position of the enclosing nested sub-document; `None` when enclosed by the root.
    pub parent: Option<usize>,
    pub terms: BTreeMap<String, BTreeSet<Bytes>>,
    pub points: BTreeMap<String, BTreeSet<Bytes>>,
}

impl IndexedDoc {
    fn new(path: Option<String>, parent: Option<usize>) -> Self {
        Self {
            path,
            parent,
            ..Self::default()
        }
    }

    pub fn add_term(&mut self, field: &str, term: impl Into<Bytes>) {
        self.terms
            .entry(field.to_string())
            .or_default()
            .insert(term.into());
    }

    pub fn add_point(&mut self, field: &str, encoded: Bytes) {
        self.points
            .entry(field.to_string())
            .or_default()
            .insert(encoded);
    }

    pub fn has_term(&self, field: &str, term: &[u8]) -> bool {
        self.terms
            .get(field)
            .is_some_and(|terms| terms.contains(term))
    }

    pub fn field_terms(&self, field: &str) -> impl Iterator<Item = &Bytes> {
        self.terms.get(field).into_iter().flatten()
    }

    pub fn field_points(&self, field: &str) -> impl Iterator<Item = &Bytes> {
        self.points.get(field).into_iter().flatten()
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.terms.contains_key(field) || self.points.contains_key(field)
    }
}

/// A parsed document: nested sub-documents first, each after the one enclosing
/// it, root last.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentIndex {
    docs: Vec<IndexedDoc>,
}

impl DocumentIndex {
    /// Parse a JSON object source against `mapping`.
    ///
    /// Unmapped values are typed dynamically: strings as text, integers as
    /// long, floats as double, booleans as keyword.
    pub fn from_source(source: &Value, mapping: &Mapping) -> Result<Self, PercolatorError> {
        let object = source.as_object().ok_or_else(|| {
            PercolatorError::InvalidDocument("document source must be a JSON object".into())
        })?;
        let mut parser = SourceParser {
            mapping,
            nested: Vec::new(),
        };
        let mut root = IndexedDoc::new(None, None);
        parser.parse_object(object, "", &mut root, None)?;

        let mut docs = parser.nested;
        docs.push(root);
        Ok(Self { docs })
    }

    /// Build from already indexed sub-documents; the last one is the root and
    /// every parent precedes its children.
    pub fn from_docs(docs: Vec<IndexedDoc>) -> Result<Self, PercolatorError> {
        match docs.last() {
            Some(root) if root.path.is_none() => {}
            _ => {
                return Err(PercolatorError::InvalidDocument(
                    "the last sub-document must be the root".into(),
                ));
            }
        }
        for (pos, doc) in docs.iter().enumerate() {
            if doc.parent.is_some_and(|parent| parent >= pos) {
                return Err(PercolatorError::InvalidDocument(format!(
                    "sub-document {pos} does not follow its parent"
                )));
            }
        }
        Ok(Self { docs })
    }

    pub fn root(&self) -> &IndexedDoc {
        &self.docs[self.root_position()]
    }

    /// `docs` always ends with the root.
    pub fn root_position(&self) -> usize {
        self.docs.len() - 1
    }

    pub fn docs(&self) -> &[IndexedDoc] {
        &self.docs
    }

    /// Sub-documents under `path` enclosed, at any depth, by the one at `ancestor`.
    pub fn nested_within(&self, ancestor: usize, path: &str) -> impl Iterator<Item = usize> + '_ {
        let path = path.to_string();
        (0..self.docs.len()).filter(move |&pos| {
            self.docs[pos].path.as_deref() == Some(path.as_str()) && self.is_descendant(pos, ancestor)
        })
    }

    fn is_descendant(&self, pos: usize, ancestor: usize) -> bool {
        let mut current = self.docs[pos].parent;
        loop {
            match current {
                Some(parent) if parent == ancestor => return true,
                Some(parent) => current = self.docs[parent].parent,
                None => return ancestor == self.root_position(),
            }
        }
    }

    /// `true` when the source produced no nested sub-documents.
    pub fn is_single_document(&self) -> bool {
        self.docs.len() == 1
    }

    /// Distinct `(field, term)` pairs across all sub-documents.
    pub fn distinct_terms(&self) -> BTreeSet<(&str, &Bytes)> {
        self.docs
            .iter()
            .flat_map(|d| {
                d.terms
                    .iter()
                    .flat_map(|(f, terms)| terms.iter().map(move |t| (f.as_str(), t)))
            })
            .collect()
    }

    /// Distinct encoded point values per field across all sub-documents.
    pub fn distinct_points(&self) -> BTreeMap<&str, BTreeSet<&Bytes>> {
        let mut out: BTreeMap<&str, BTreeSet<&Bytes>> = BTreeMap::new();
        for doc in &self.docs {
            for (field, values) in &doc.points {
                out.entry(field.as_str()).or_default().extend(values);
            }
        }
        out
    }
}

struct SourceParser<'m> {
    mapping: &'m Mapping,
    nested: Vec<IndexedDoc>,
}

impl SourceParser<'_> {
    fn parse_object(
        &mut self,
        object: &Map<String, Value>,
        prefix: &str,
        doc: &mut IndexedDoc,
        parent: Option<usize>,
    ) -> Result<(), PercolatorError> {
        for (key, value) in object {
            if key.as_bytes().contains(&FIELD_VALUE_SEPARATOR) {
                return Err(PercolatorError::InvalidDocument(format!(
                    "field name {key:?} contains the reserved separator byte"
                )));
            }
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            };
            self.parse_value(&path, value, doc, parent)?;
        }
        Ok(())
    }

    fn parse_value(
        &mut self,
        path: &str,
        value: &Value,
        doc: &mut IndexedDoc,
        parent: Option<usize>,
    ) -> Result<(), PercolatorError> {
        match (self.mapping.field_type(path), value) {
            (_, Value::Null) => Ok(()),
            (Some(FieldType::Nested), _) => self.parse_nested(path, value, parent),
            (_, Value::Array(items)) => items
                .iter()
                .try_for_each(|item| self.parse_value(path, item, doc, parent)),
            (None, Value::Object(object)) => self.parse_object(object, path, doc, parent),
            (Some(ty), Value::Object(_)) => Err(PercolatorError::InvalidDocument(format!(
                "field [{path}] of type {ty:?} cannot hold an object"
            ))),
            (Some(ty), scalar) => index_scalar(doc, path, ty, scalar),
            (None, scalar) => index_scalar(doc, path, dynamic_type(scalar), scalar),
        }
    }

    fn parse_nested(
        &mut self,
        path: &str,
        value: &Value,
        parent: Option<usize>,
    ) -> Result<(), PercolatorError> {
        match value {
            Value::Array(items) => items
                .iter()
                .try_for_each(|item| self.parse_nested(path, item, parent)),
            Value::Object(object) => {
                // Reserve the slot first so children can point at it.
                let pos = self.nested.len();
                self.nested.push(IndexedDoc::new(Some(path.to_string()), parent));
                let mut sub = IndexedDoc::new(Some(path.to_string()), parent);
                self.parse_object(object, path, &mut sub, Some(pos))?;
                self.nested[pos] = sub;
                Ok(())
            }
            Value::Null => Ok(()),
            other => Err(PercolatorError::InvalidDocument(format!(
                "nested field [{path}] expects objects, got {other}"
            ))),
        }
    }
}

fn dynamic_type(value: &Value) -> FieldType {
    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => FieldType::Long,
        Value::Number(_) => FieldType::Double,
        Value::Bool(_) => FieldType::Keyword,
        _ => FieldType::Text,
    }
}

fn index_scalar(
    doc: &mut IndexedDoc,
    path: &str,
    ty: FieldType,
    value: &Value,
) -> Result<(), PercolatorError> {
    let invalid = |reason: String| PercolatorError::invalid_value(path, reason);
    match ty {
        FieldType::Keyword => {
            let term = scalar_term(value).ok_or_else(|| invalid(format!("{value} is not a scalar")))?;
            doc.add_term(path, term);
        }
        FieldType::Text => {
            let text = scalar_term(value).ok_or_else(|| invalid(format!("{value} is not a scalar")))?;
            for token in tokenize(&text) {
                doc.add_term(path, token);
            }
        }
        FieldType::Integer => add_point(doc, path, PointType::Integer, value)?,
        FieldType::Long => add_point(doc, path, PointType::Long, value)?,
        FieldType::Double => add_point(doc, path, PointType::Double, value)?,
        FieldType::Ip => add_point(doc, path, PointType::Ip, value)?,
        FieldType::Nested => return Err(invalid("a nested path cannot hold a scalar".into())),
    }
    Ok(())
}

fn add_point(
    doc: &mut IndexedDoc,
    path: &str,
    ty: PointType,
    value: &Value,
) -> Result<(), PercolatorError> {
    let point = PointValue::parse(ty, value).map_err(|r| PercolatorError::invalid_value(path, r))?;
    doc.add_point(path, point.encode());
    Ok(())
}
