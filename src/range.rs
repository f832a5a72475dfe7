//! Fixed-width binary encoding of `(field, min, max)` ranges.
//!
//! All ranges of all point fields share a single binary-range channel. To keep
//! ranges of different fields apart, each half of an [`EncodedRange`] starts
//! from the 128-bit hash of the field name; the bound is then right-aligned
//! over the trailing bytes of that half. Comparisons between two ranges of the
//! same field therefore reduce to comparisons of their bounds, while ranges of
//! different fields differ in the untouched hash prefix and never intersect.

use std::cmp::Ordering;
use std::fmt;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use xxhash_rust::xxh3::xxh3_128;

use crate::error::PercolatorError;

/// Width of one half of an encoded range. Bounds up to this many bytes are
/// accepted; a 16-byte bound (ip) still leaves one full hash copy intact.
pub const RANGE_FIELD_WIDTH: usize = 32;

/// Total size of an encoded range.
pub const ENCODED_RANGE_BYTES: usize = RANGE_FIELD_WIDTH * 2;

const HASH_BYTES: usize = 16;

/// A `(field, min, max)` triple packed into `2 * RANGE_FIELD_WIDTH` bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EncodedRange([u8; ENCODED_RANGE_BYTES]);

impl EncodedRange {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn min_half(&self) -> &[u8] {
        &self.0[..RANGE_FIELD_WIDTH]
    }

    pub fn max_half(&self) -> &[u8] {
        &self.0[RANGE_FIELD_WIDTH..]
    }

    /// Rebuild a range from its persisted bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, PercolatorError> {
        let buf: [u8; ENCODED_RANGE_BYTES] = bytes.try_into().map_err(|_| {
            PercolatorError::InvalidArgument(format!(
                "encoded range must be {ENCODED_RANGE_BYTES} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(buf))
    }

    /// Binary range intersection: `self.min <= other.max && self.max >= other.min`.
    pub fn intersects(&self, other: &EncodedRange) -> bool {
        self.min_half().cmp(other.max_half()) != Ordering::Greater
            && self.max_half().cmp(other.min_half()) != Ordering::Less
    }
}

impl fmt::Debug for EncodedRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncodedRange(")?;
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        write!(f, ")")
    }
}

impl Serialize for EncodedRange {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for EncodedRange {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = Vec::<u8>::deserialize(deserializer)?;
        Self::from_slice(&bytes).map_err(DeError::custom)
    }
}

/// A degenerate `[v, v]` range plus the window of sorted range keys that can
/// intersect it.
///
/// Keys sort by their min half first. Every posted range of the same field
/// with `min <= v` lies between the field's lowest possible key and
/// `v ++ 0xff..`, so stores scan only that window and filter it with
/// [`EncodedRange::intersects`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RangeProbe {
    range: EncodedRange,
    lower: EncodedRange,
    upper: EncodedRange,
}

impl RangeProbe {
    pub fn point(field: &str, encoded: &[u8]) -> Result<Self, PercolatorError> {
        let range = encode_range(field, encoded, encoded)?;
        let offset = RANGE_FIELD_WIDTH - encoded.len();

        let mut lower = [0u8; ENCODED_RANGE_BYTES];
        lower[..offset].copy_from_slice(&range.0[..offset]);
        let mut upper = [0xffu8; ENCODED_RANGE_BYTES];
        upper[..RANGE_FIELD_WIDTH].copy_from_slice(range.min_half());

        Ok(Self {
            range,
            lower: EncodedRange(lower),
            upper: EncodedRange(upper),
        })
    }

    pub fn range(&self) -> &EncodedRange {
        &self.range
    }

    /// Inclusive lower end of the scan window.
    pub fn lower(&self) -> &EncodedRange {
        &self.lower
    }

    /// Inclusive upper end of the scan window.
    pub fn upper(&self) -> &EncodedRange {
        &self.upper
    }

    pub fn matches(&self, posted: &EncodedRange) -> bool {
        posted.intersects(&self.range)
    }
}

/// Encode a range of `field` with bounds produced by a point encoding.
///
/// Both bounds must have the same, non-zero width of at most
/// [`RANGE_FIELD_WIDTH`] bytes.
pub fn encode_range(
    field: &str,
    min_encoded: &[u8],
    max_encoded: &[u8],
) -> Result<EncodedRange, PercolatorError> {
    if min_encoded.len() != max_encoded.len() {
        return Err(PercolatorError::InvalidArgument(format!(
            "range bounds of [{field}] differ in width: {} vs {}",
            min_encoded.len(),
            max_encoded.len()
        )));
    }
    let width = min_encoded.len();
    if width == 0 || width > RANGE_FIELD_WIDTH {
        return Err(PercolatorError::InvalidArgument(format!(
            "range bound width of [{field}] must be within 1..={RANGE_FIELD_WIDTH}, got {width}"
        )));
    }

    let hash = xxh3_128(field.as_bytes()).to_be_bytes();
    let mut bytes = [0u8; ENCODED_RANGE_BYTES];
    for chunk in bytes.chunks_exact_mut(HASH_BYTES) {
        chunk.copy_from_slice(&hash);
    }

    let offset = RANGE_FIELD_WIDTH - width;
    bytes[offset..RANGE_FIELD_WIDTH].copy_from_slice(min_encoded);
    bytes[RANGE_FIELD_WIDTH + offset..].copy_from_slice(max_encoded);
    Ok(EncodedRange(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::{encode_integer, encode_ip, encode_long};

    fn int_range(field: &str, lo: i32, hi: i32) -> EncodedRange {
        encode_range(field, &encode_integer(lo), &encode_integer(hi)).unwrap()
    }

    #[test]
    fn encoding_is_deterministic() {
        assert_eq!(int_range("age", 1, 10), int_range("age", 1, 10));
    }

    #[test]
    fn different_fields_produce_different_encodings() {
        assert_ne!(int_range("age", 1, 10), int_range("height", 1, 10));
    }

    #[test]
    fn layout_repeats_hash_and_right_aligns_bounds() {
        let range = int_range("age", 3, 7);
        let hash = xxh3_128(b"age").to_be_bytes();
        let min = range.min_half();
        assert_eq!(&min[..16], &hash);
        assert_eq!(&min[16..28], &hash[..12]);
        assert_eq!(&min[28..], &encode_integer(3));
        assert_eq!(&range.max_half()[..28], &min[..28]);
        assert_eq!(&range.max_half()[28..], &encode_integer(7));
    }

    #[test]
    fn mismatched_widths_are_rejected() {
        let err = encode_range("age", &encode_integer(1), &encode_long(2)).unwrap_err();
        assert!(matches!(err, PercolatorError::InvalidArgument(_)));
        assert!(encode_range("age", &[], &[]).is_err());
        assert!(encode_range("age", &[0; 33], &[0; 33]).is_err());
    }

    #[test]
    fn same_field_ranges_follow_interval_semantics() {
        let stored = int_range("age", 18, 65);
        assert!(stored.intersects(&int_range("age", 30, 30)));
        assert!(stored.intersects(&int_range("age", 65, 70)));
        assert!(stored.intersects(&int_range("age", -5, 18)));
        assert!(!stored.intersects(&int_range("age", 66, 90)));
        assert!(!stored.intersects(&int_range("age", -5, 17)));
    }

    #[test]
    fn mixed_widths_on_distinct_fields_never_intersect() {
        let any_int = int_range("port", i32::MIN, i32::MAX);
        let ip_lo = encode_ip("0.0.0.0".parse().unwrap());
        let ip_hi = encode_ip("255.255.255.255".parse().unwrap());
        let ip = encode_range("client_ip", &ip_lo, &ip_hi).unwrap();
        assert!(!any_int.intersects(&ip));
        assert!(!ip.intersects(&any_int));
    }

    #[test]
    fn probe_window_holds_every_intersecting_range() {
        let posted = [
            int_range("age", i32::MIN, i32::MAX),
            int_range("age", -5, 30),
            int_range("age", 30, 30),
            int_range("age", 18, 65),
            int_range("age", 31, 90),
            int_range("age", -40, 29),
        ];
        let probe = RangeProbe::point("age", &encode_integer(30)).unwrap();
        assert_eq!(probe.range(), &int_range("age", 30, 30));

        for range in posted {
            let in_window = probe.lower() <= &range && &range <= probe.upper();
            if probe.matches(&range) {
                assert!(in_window, "{range:?} outside the window");
            }
        }
        // Ranges starting above the value sort after the window.
        assert!(&int_range("age", 31, 90) > probe.upper());
    }

    #[test]
    fn probe_window_excludes_other_fields() {
        let probe = RangeProbe::point("age", &encode_integer(30)).unwrap();
        let other = int_range("height", i32::MIN, i32::MAX);
        assert!(!probe.matches(&other));
        assert!(!(probe.lower() <= &other && &other <= probe.upper()));
    }
}
