//! Field mappings and text analysis.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::point::PointType;

/// Type of a mapped field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// Indexed verbatim as a single term.
    Keyword,
    /// Tokenized with [`tokenize`].
    Text,
    Integer,
    Long,
    Double,
    Ip,
    /// Object path whose values become separate sub-documents.
    Nested,
}

impl FieldType {
    pub fn point_type(self) -> Option<PointType> {
        match self {
            FieldType::Integer => Some(PointType::Integer),
            FieldType::Long => Some(PointType::Long),
            FieldType::Double => Some(PointType::Double),
            FieldType::Ip => Some(PointType::Ip),
            FieldType::Keyword | FieldType::Text | FieldType::Nested => None,
        }
    }
}

/// Field types keyed by full dotted path (`comments.author`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Mapping {
    fields: BTreeMap<String, FieldType>,
}

impl Mapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, path: impl Into<String>, ty: FieldType) -> Self {
        self.fields.insert(path.into(), ty);
        self
    }

    pub fn field_type(&self, path: &str) -> Option<FieldType> {
        self.fields.get(path).copied()
    }

    pub fn is_nested(&self, path: &str) -> bool {
        self.field_type(path) == Some(FieldType::Nested)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, FieldType)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// Term text of a JSON scalar as indexed by keyword fields.
pub(crate) fn scalar_term(value: &serde_json::Value) -> Option<String> {
    use serde_json::Value;
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Lowercase and split on anything that is not alphanumeric.
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_lowercases_and_splits() {
        let tokens: Vec<_> = tokenize("The Quick-brown FOX, jumps!").collect();
        assert_eq!(tokens, ["the", "quick", "brown", "fox", "jumps"]);
    }

    #[test]
    fn mapping_deserializes_from_yaml() {
        let yaml = "status: keyword\nage: integer\ncomments: nested\ncomments.author: keyword\n";
        let mapping: Mapping = serde_yaml::from_str(yaml).expect("mapping parses");
        assert_eq!(mapping.field_type("age"), Some(FieldType::Integer));
        assert!(mapping.is_nested("comments"));
        assert_eq!(mapping.field_type("missing"), None);
    }
}
