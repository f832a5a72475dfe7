//! Candidate lookup built from the document being percolated.
//!
//! The lookup is a disjunction over the postings store:
//! any document term key, OR any posted range intersecting a document point,
//! OR outcome `failed`, OR unconstrained. Every stored query that can match the
//! document is retrieved; some retrieved queries may not match.

use bytes::Bytes;
use roaring::RoaringBitmap;

use crate::document::DocumentIndex;
use crate::error::PercolatorError;
use crate::range::RangeProbe;
use crate::signature::term_key;
use crate::store::{PostingsStore, StoreError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateQuery {
    pub term_keys: Vec<Bytes>,
    pub range_probes: Vec<RangeProbe>,
}

impl CandidateQuery {
    /// Collect the term keys and range probes of every sub-document.
    ///
    /// Each distinct point value becomes its own degenerate `[v, v]` probe, so
    /// a stored range is retrieved only when one actual value falls inside it.
    pub fn from_document(doc: &DocumentIndex) -> Result<Self, PercolatorError> {
        let term_keys = doc
            .distinct_terms()
            .into_iter()
            .map(|(field, term)| term_key(field, term))
            .collect();

        let mut range_probes = Vec::new();
        for (field, values) in doc.distinct_points() {
            for value in values {
                range_probes.push(RangeProbe::point(field, value)?);
            }
        }

        Ok(Self {
            term_keys,
            range_probes,
        })
    }

    /// Run the lookup and return the candidate query ids.
    pub fn execute(&self, store: &dyn PostingsStore) -> Result<RoaringBitmap, StoreError> {
        store.candidate_postings(&self.term_keys, &self.range_probes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{FieldType, Mapping};
    use crate::point::encode_integer;
    use serde_json::json;

    #[test]
    fn collects_terms_and_one_probe_per_value() {
        let mapping = Mapping::new()
            .with_field("status", FieldType::Keyword)
            .with_field("age", FieldType::Integer);
        let doc = DocumentIndex::from_source(&json!({"status": "active", "age": [30, 40, 30]}), &mapping)
            .unwrap();
        let candidate = CandidateQuery::from_document(&doc).unwrap();

        assert_eq!(candidate.term_keys, vec![term_key("status", b"active")]);
        assert_eq!(candidate.range_probes.len(), 2);
        let probe = RangeProbe::point("age", &encode_integer(30)).unwrap();
        assert!(candidate.range_probes.contains(&probe));
    }
}
