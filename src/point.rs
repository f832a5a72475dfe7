//! Sortable fixed-width encodings for point values.
//!
//! Every point type encodes to big-endian bytes whose unsigned lexicographic
//! order equals the numeric order of the values, so ranges can be compared
//! byte-wise without knowing the type. Widths differ per type (4, 8 or 16
//! bytes); the range encoder right-aligns them inside one fixed-width channel.

use std::net::{IpAddr, Ipv6Addr};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Point-carrying field types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointType {
    Integer,
    Long,
    Double,
    Ip,
}

impl PointType {
    /// Encoded width in bytes.
    pub const fn width(self) -> usize {
        match self {
            PointType::Integer => 4,
            PointType::Long | PointType::Double => 8,
            PointType::Ip => 16,
        }
    }

    pub fn min_value(self) -> PointValue {
        match self {
            PointType::Integer => PointValue::Integer(i32::MIN),
            PointType::Long => PointValue::Long(i64::MIN),
            PointType::Double => PointValue::Double(f64::NEG_INFINITY),
            PointType::Ip => PointValue::Ip(IpAddr::V6(Ipv6Addr::UNSPECIFIED)),
        }
    }

    pub fn max_value(self) -> PointValue {
        match self {
            PointType::Integer => PointValue::Integer(i32::MAX),
            PointType::Long => PointValue::Long(i64::MAX),
            PointType::Double => PointValue::Double(f64::INFINITY),
            PointType::Ip => PointValue::Ip(IpAddr::V6(Ipv6Addr::from(u128::MAX))),
        }
    }
}

/// A typed point value prior to encoding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointValue {
    Integer(i32),
    Long(i64),
    Double(f64),
    Ip(IpAddr),
}

impl PointValue {
    /// Convert a JSON scalar into a point of the given type.
    pub fn parse(ty: PointType, value: &Value) -> Result<Self, String> {
        match ty {
            PointType::Integer => {
                let v = value
                    .as_i64()
                    .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
                    .ok_or_else(|| format!("expected an integer, got {value}"))?;
                i32::try_from(v)
                    .map(PointValue::Integer)
                    .map_err(|_| format!("{v} is out of range for an integer"))
            }
            PointType::Long => value
                .as_i64()
                .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
                .map(PointValue::Long)
                .ok_or_else(|| format!("expected a long, got {value}")),
            PointType::Double => {
                let v = value
                    .as_f64()
                    .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
                    .ok_or_else(|| format!("expected a double, got {value}"))?;
                if v.is_nan() {
                    return Err("NaN cannot be indexed as a point".to_string());
                }
                Ok(PointValue::Double(v))
            }
            PointType::Ip => value
                .as_str()
                .and_then(|s| s.trim().parse::<IpAddr>().ok())
                .map(PointValue::Ip)
                .ok_or_else(|| format!("expected an ip address, got {value}")),
        }
    }

    /// The smallest value strictly greater than `self`, if any.
    pub fn next_up(self) -> Option<Self> {
        match self {
            PointValue::Integer(v) => v.checked_add(1).map(PointValue::Integer),
            PointValue::Long(v) => v.checked_add(1).map(PointValue::Long),
            PointValue::Double(v) if v == f64::INFINITY => None,
            // -0.0 sorts directly below +0.0.
            PointValue::Double(v) if v == 0.0 && v.is_sign_negative() => Some(PointValue::Double(0.0)),
            PointValue::Double(v) => Some(PointValue::Double(v.next_up())),
            PointValue::Ip(ip) => ip_bits(ip)
                .checked_add(1)
                .map(|b| PointValue::Ip(IpAddr::V6(Ipv6Addr::from(b)))),
        }
    }

    /// The largest value strictly smaller than `self`, if any.
    pub fn next_down(self) -> Option<Self> {
        match self {
            PointValue::Integer(v) => v.checked_sub(1).map(PointValue::Integer),
            PointValue::Long(v) => v.checked_sub(1).map(PointValue::Long),
            PointValue::Double(v) if v == f64::NEG_INFINITY => None,
            PointValue::Double(v) if v == 0.0 && v.is_sign_positive() => Some(PointValue::Double(-0.0)),
            PointValue::Double(v) => Some(PointValue::Double(v.next_down())),
            PointValue::Ip(ip) => ip_bits(ip)
                .checked_sub(1)
                .map(|b| PointValue::Ip(IpAddr::V6(Ipv6Addr::from(b)))),
        }
    }

    pub fn encode(&self) -> Bytes {
        match *self {
            PointValue::Integer(v) => Bytes::copy_from_slice(&encode_integer(v)),
            PointValue::Long(v) => Bytes::copy_from_slice(&encode_long(v)),
            PointValue::Double(v) => Bytes::copy_from_slice(&encode_double(v)),
            PointValue::Ip(v) => Bytes::copy_from_slice(&encode_ip(v)),
        }
    }
}

pub fn encode_integer(v: i32) -> [u8; 4] {
    ((v as u32) ^ 0x8000_0000).to_be_bytes()
}

pub fn encode_long(v: i64) -> [u8; 8] {
    ((v as u64) ^ (1 << 63)).to_be_bytes()
}

/// Doubles are mapped onto sortable long bits first: negative values have
/// their magnitude bits flipped so they order below positives.
pub fn encode_double(v: f64) -> [u8; 8] {
    let bits = v.to_bits() as i64;
    let sortable = bits ^ ((bits >> 63) & 0x7fff_ffff_ffff_ffff);
    encode_long(sortable)
}

/// IPv4 addresses are stored in their IPv4-mapped IPv6 form.
pub fn encode_ip(v: IpAddr) -> [u8; 16] {
    match v {
        IpAddr::V4(addr) => addr.to_ipv6_mapped().octets(),
        IpAddr::V6(addr) => addr.octets(),
    }
}

fn ip_bits(ip: IpAddr) -> u128 {
    u128::from_be_bytes(encode_ip(ip))
}
