//! Projection of an analysis onto the postings channels.
//!
//! A stored query is posted to three channels: the shared term channel
//! (`field ++ 0x00 ++ term`), the binary range channel ([`EncodedRange`]) and
//! a single-valued outcome marker. Queries whose analysis failed carry no
//! postings but are still marked, so the candidate lookup can always find them.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::analyzer::{ExtractionResult, QueryExtraction, UnsupportedQuery};
use crate::error::PercolatorError;
use crate::range::{EncodedRange, encode_range};

/// Separates the field name from the term in a term key. Field names
/// containing it are rejected when a query is compiled.
pub const FIELD_VALUE_SEPARATOR: u8 = 0x00;

pub const EXTRACTED_TERMS_FIELD: &str = "extracted_terms";
pub const RANGE_FIELD: &str = "range_field";
pub const EXTRACTION_RESULT_FIELD: &str = "extraction_result";
pub const QUERY_BUILDER_FIELD: &str = "query_builder_field";

/// Term-channel key of `(field, term)`.
pub fn term_key(field: &str, term: &[u8]) -> Bytes {
    let mut key = BytesMut::with_capacity(field.len() + 1 + term.len());
    key.put_slice(field.as_bytes());
    key.put_u8(FIELD_VALUE_SEPARATOR);
    key.put_slice(term);
    key.freeze()
}

/// Per-query summary telling the matcher whether a candidate can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionOutcome {
    /// The extractions are necessary and sufficient.
    Complete,
    /// The extractions are only a necessary filter.
    Partial,
    /// Nothing could be extracted; always a candidate.
    Failed,
}

impl ExtractionOutcome {
    pub const ALL: [ExtractionOutcome; 3] = [
        ExtractionOutcome::Complete,
        ExtractionOutcome::Partial,
        ExtractionOutcome::Failed,
    ];

    /// Persisted marker value.
    pub fn as_str(self) -> &'static str {
        match self {
            ExtractionOutcome::Complete => "complete",
            ExtractionOutcome::Partial => "partial",
            ExtractionOutcome::Failed => "failed",
        }
    }
}

impl fmt::Display for ExtractionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExtractionOutcome {
    type Err = PercolatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ExtractionOutcome::ALL
            .into_iter()
            .find(|o| o.as_str() == s)
            .ok_or_else(|| PercolatorError::InvalidArgument(format!("unknown extraction outcome [{s}]")))
    }
}

/// Everything posted for one stored query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySignature {
    pub term_keys: BTreeSet<Bytes>,
    pub ranges: BTreeSet<EncodedRange>,
    pub outcome: ExtractionOutcome,
    /// Set when a non-complete signature has no posting that could retrieve it.
    pub unconstrained: bool,
}

impl QuerySignature {
    /// Build the postings projection of an analysis. A failed analysis yields a
    /// `failed` signature instead of an error.
    pub fn index(analysis: &Result<ExtractionResult, UnsupportedQuery>) -> Result<Self, PercolatorError> {
        let result = match analysis {
            Ok(result) => result,
            Err(_) => return Ok(Self::failed()),
        };

        let mut term_keys = BTreeSet::new();
        let mut ranges = BTreeSet::new();
        for extraction in &result.extractions {
            match extraction {
                QueryExtraction::Term { field, term } => {
                    term_keys.insert(term_key(field, term));
                }
                QueryExtraction::Range {
                    field,
                    lower,
                    upper,
                } => {
                    ranges.insert(encode_range(field, lower, upper)?);
                }
            }
        }

        let outcome = if result.verified {
            ExtractionOutcome::Complete
        } else {
            ExtractionOutcome::Partial
        };
        let unconstrained = outcome != ExtractionOutcome::Complete && term_keys.is_empty() && ranges.is_empty();
        Ok(Self {
            term_keys,
            ranges,
            outcome,
            unconstrained,
        })
    }

    pub fn failed() -> Self {
        Self {
            term_keys: BTreeSet::new(),
            ranges: BTreeSet::new(),
            outcome: ExtractionOutcome::Failed,
            unconstrained: false,
        }
    }

    /// `true` when no posting, marker included, can ever retrieve the query.
    pub fn matches_nothing(&self) -> bool {
        self.outcome == ExtractionOutcome::Complete && self.term_keys.is_empty() && self.ranges.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{AnalyzerConfig, analyze};
    use crate::point::encode_integer;
    use crate::query::{BooleanQuery, Occur, Query};

    fn signature(query: &Query) -> QuerySignature {
        QuerySignature::index(&analyze(query, &AnalyzerConfig::default())).unwrap()
    }

    #[test]
    fn term_key_layout() {
        assert_eq!(&term_key("status", b"active")[..], b"status\0active");
    }

    #[test]
    fn verified_term_is_complete() {
        let sig = signature(&Query::term("status", "active"));
        assert_eq!(sig.outcome, ExtractionOutcome::Complete);
        assert!(sig.term_keys.contains(&term_key("status", b"active")));
        assert!(!sig.unconstrained);
    }

    #[test]
    fn range_extraction_is_encoded() {
        let q = Query::range("age", encode_integer(18).to_vec(), encode_integer(30).to_vec());
        let sig = signature(&q);
        let expected = encode_range("age", &encode_integer(18), &encode_integer(30)).unwrap();
        assert_eq!(sig.ranges.into_iter().collect::<Vec<_>>(), vec![expected]);
    }

    #[test]
    fn must_not_only_is_partial_and_unconstrained() {
        let q = Query::Bool(BooleanQuery::new().with_clause(Occur::MustNot, Query::term("status", "active")));
        let sig = signature(&q);
        assert_eq!(sig.outcome, ExtractionOutcome::Partial);
        assert!(sig.unconstrained);
    }

    #[test]
    fn failed_analysis_is_kept() {
        let sig = signature(&Query::MatchAll);
        assert_eq!(sig.outcome, ExtractionOutcome::Failed);
        assert!(sig.term_keys.is_empty());
        assert!(!sig.matches_nothing());
    }

    #[test]
    fn outcome_markers_parse() {
        for outcome in ExtractionOutcome::ALL {
            assert_eq!(outcome.as_str().parse::<ExtractionOutcome>().unwrap(), outcome);
        }
        assert!("unknown".parse::<ExtractionOutcome>().is_err());
    }
}
