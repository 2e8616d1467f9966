//! Canonical, deterministic value encoding underlying the control-message
//! codec (C2) and the attestation signing payload (C4).
//!
//! This is a small hand-rolled recursive encoding (not delegated to serde's
//! default `bincode`/`serde_json` output, neither of which guarantees
//! canonical lexicographic key order): every map is a `BTreeMap`, which
//! gives the lexicographic key sort spec §4.2 requires for free, and every
//! value carries an explicit type tag so decoding is unambiguous. Two
//! encoders producing the same logical value always produce identical
//! bytes — the round-trip contract spec §4.2/§8 requires.

use crate::error::CodecError;
use std::collections::BTreeMap;

/// A canonically-encodable value: the universe of field types the control
/// message catalogue and the attestation payload need.
#[derive(Debug, Clone, PartialEq)]
pub enum CanonicalValue {
    /// Unsigned integer (stream ids, PING sequence numbers).
    UInt(u64),
    /// Signed integer (Unix-second timestamps).
    Int(i64),
    /// A 64-bit IEEE-754 float, canonicalized via its big-endian bit
    /// pattern. No current message field uses this, but spec §4.2 names
    /// canonical float encoding as part of the general scheme.
    Float(f64),
    /// Opaque byte string (keys, signatures, stream payloads).
    Bytes(Vec<u8>),
    /// UTF-8 text (principals, labels, error reasons).
    Text(String),
    /// Boolean flag.
    Bool(bool),
    /// Ordered list of values (capability lists).
    List(Vec<CanonicalValue>),
    /// A map with lexicographically sorted string keys.
    Map(BTreeMap<String, CanonicalValue>),
}

const TAG_UINT: u8 = 0x00;
const TAG_INT: u8 = 0x01;
const TAG_BYTES: u8 = 0x02;
const TAG_TEXT: u8 = 0x03;
const TAG_BOOL: u8 = 0x04;
const TAG_LIST: u8 = 0x05;
const TAG_MAP: u8 = 0x06;
const TAG_FLOAT: u8 = 0x07;

fn encode_len(len: usize, out: &mut Vec<u8>) {
    crate::framing::encode_varint(len as u64, out);
}

fn zigzag_encode(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

fn zigzag_decode(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

impl CanonicalValue {
    /// Construct a map value from an ordered list of `(key, value)` pairs.
    /// Caller-side ordering does not matter: `BTreeMap` sorts lexically.
    #[must_use]
    pub fn map(entries: impl IntoIterator<Item = (&'static str, CanonicalValue)>) -> Self {
        Self::Map(entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    /// Encode this value into `out`, appending.
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Self::UInt(v) => {
                out.push(TAG_UINT);
                crate::framing::encode_varint(*v, out);
            }
            Self::Int(v) => {
                out.push(TAG_INT);
                crate::framing::encode_varint(zigzag_encode(*v), out);
            }
            Self::Float(v) => {
                out.push(TAG_FLOAT);
                out.extend_from_slice(&v.to_bits().to_be_bytes());
            }
            Self::Bytes(b) => {
                out.push(TAG_BYTES);
                encode_len(b.len(), out);
                out.extend_from_slice(b);
            }
            Self::Text(s) => {
                out.push(TAG_TEXT);
                encode_len(s.len(), out);
                out.extend_from_slice(s.as_bytes());
            }
            Self::Bool(b) => {
                out.push(TAG_BOOL);
                out.push(u8::from(*b));
            }
            Self::List(items) => {
                out.push(TAG_LIST);
                encode_len(items.len(), out);
                for item in items {
                    item.encode(out);
                }
            }
            Self::Map(map) => {
                out.push(TAG_MAP);
                encode_len(map.len(), out);
                // `BTreeMap` iterates in key-sorted order already.
                for (k, v) in map {
                    encode_len(k.len(), out);
                    out.extend_from_slice(k.as_bytes());
                    v.encode(out);
                }
            }
        }
    }

    /// Encode this value as a standalone byte vector.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }

    /// Decode one value from the front of `buf`, returning the value and
    /// the number of bytes consumed.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Malformed`] if `buf` is truncated or contains
    /// an unrecognized type tag.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), CodecError> {
        let (tag, mut pos) = read_u8(buf)?;
        match tag {
            TAG_UINT => {
                let (v, n) = read_varint(&buf[pos..])?;
                Ok((Self::UInt(v), pos + n))
            }
            TAG_INT => {
                let (v, n) = read_varint(&buf[pos..])?;
                Ok((Self::Int(zigzag_decode(v)), pos + n))
            }
            TAG_FLOAT => {
                if buf.len() < pos + 8 {
                    return Err(CodecError::Malformed("truncated float"));
                }
                let mut bits = [0u8; 8];
                bits.copy_from_slice(&buf[pos..pos + 8]);
                Ok((Self::Float(f64::from_bits(u64::from_be_bytes(bits))), pos + 8))
            }
            TAG_BYTES => {
                let (len, n) = read_varint(&buf[pos..])?;
                pos += n;
                let len = len as usize;
                if buf.len() < pos + len {
                    return Err(CodecError::Malformed("truncated bytes"));
                }
                Ok((Self::Bytes(buf[pos..pos + len].to_vec()), pos + len))
            }
            TAG_TEXT => {
                let (len, n) = read_varint(&buf[pos..])?;
                pos += n;
                let len = len as usize;
                if buf.len() < pos + len {
                    return Err(CodecError::Malformed("truncated text"));
                }
                let s = std::str::from_utf8(&buf[pos..pos + len])
                    .map_err(|_| CodecError::Malformed("invalid utf-8"))?
                    .to_string();
                Ok((Self::Text(s), pos + len))
            }
            TAG_BOOL => {
                let (b, n) = read_u8(&buf[pos..])?;
                Ok((Self::Bool(b != 0), pos + n))
            }
            TAG_LIST => {
                let (count, n) = read_varint(&buf[pos..])?;
                pos += n;
                let mut items = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let (item, n) = Self::decode(&buf[pos..])?;
                    pos += n;
                    items.push(item);
                }
                Ok((Self::List(items), pos))
            }
            TAG_MAP => {
                let (count, n) = read_varint(&buf[pos..])?;
                pos += n;
                let mut map = BTreeMap::new();
                for _ in 0..count {
                    let (klen, n) = read_varint(&buf[pos..])?;
                    pos += n;
                    let klen = klen as usize;
                    if buf.len() < pos + klen {
                        return Err(CodecError::Malformed("truncated map key"));
                    }
                    let key = std::str::from_utf8(&buf[pos..pos + klen])
                        .map_err(|_| CodecError::Malformed("invalid utf-8 map key"))?
                        .to_string();
                    pos += klen;
                    let (value, n) = Self::decode(&buf[pos..])?;
                    pos += n;
                    map.insert(key, value);
                }
                Ok((Self::Map(map), pos))
            }
            _ => Err(CodecError::Malformed("unknown value tag")),
        }
    }

    /// View this value as a map, if it is one.
    #[must_use]
    pub fn as_map(&self) -> Option<&BTreeMap<String, CanonicalValue>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }
}

fn read_u8(buf: &[u8]) -> Result<(u8, usize), CodecError> {
    buf.first()
        .copied()
        .map(|b| (b, 1))
        .ok_or(CodecError::Malformed("unexpected end of input"))
}

fn read_varint(buf: &[u8]) -> Result<(u64, usize), CodecError> {
    let mut value: u64 = 0;
    let mut shift: u32 = 0;
    for (i, &byte) in buf.iter().enumerate() {
        if shift >= 63 {
            return Err(CodecError::Malformed("varint too large"));
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
        shift += 7;
    }
    Err(CodecError::Malformed("truncated varint"))
}

/// Accessor helpers used by message `FromCanonical` implementations: pull a
/// required or optional field out of a decoded map by key, dropping any
/// field not asked for (the codec's "unknown fields are dropped" rule).
pub(crate) mod field {
    use super::CanonicalValue;
    use crate::error::CodecError;
    use std::collections::BTreeMap;

    pub fn uint(map: &BTreeMap<String, CanonicalValue>, key: &'static str) -> Result<u64, CodecError> {
        match map.get(key) {
            Some(CanonicalValue::UInt(v)) => Ok(*v),
            _ => Err(CodecError::BadField(key)),
        }
    }

    pub fn int(map: &BTreeMap<String, CanonicalValue>, key: &'static str) -> Result<i64, CodecError> {
        match map.get(key) {
            Some(CanonicalValue::Int(v)) => Ok(*v),
            _ => Err(CodecError::BadField(key)),
        }
    }

    pub fn bytes(map: &BTreeMap<String, CanonicalValue>, key: &'static str) -> Result<Vec<u8>, CodecError> {
        match map.get(key) {
            Some(CanonicalValue::Bytes(b)) => Ok(b.clone()),
            _ => Err(CodecError::BadField(key)),
        }
    }

    pub fn bytes_opt(map: &BTreeMap<String, CanonicalValue>, key: &'static str) -> Option<Vec<u8>> {
        match map.get(key) {
            Some(CanonicalValue::Bytes(b)) => Some(b.clone()),
            _ => None,
        }
    }

    pub fn text(map: &BTreeMap<String, CanonicalValue>, key: &'static str) -> Result<String, CodecError> {
        match map.get(key) {
            Some(CanonicalValue::Text(s)) => Ok(s.clone()),
            _ => Err(CodecError::BadField(key)),
        }
    }

    pub fn text_opt(map: &BTreeMap<String, CanonicalValue>, key: &'static str) -> Option<String> {
        match map.get(key) {
            Some(CanonicalValue::Text(s)) => Some(s.clone()),
            _ => None,
        }
    }

    pub fn bool_opt(map: &BTreeMap<String, CanonicalValue>, key: &'static str) -> Option<bool> {
        match map.get(key) {
            Some(CanonicalValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn bool_required(map: &BTreeMap<String, CanonicalValue>, key: &'static str) -> Result<bool, CodecError> {
        match map.get(key) {
            Some(CanonicalValue::Bool(b)) => Ok(*b),
            _ => Err(CodecError::BadField(key)),
        }
    }

    pub fn text_list(
        map: &BTreeMap<String, CanonicalValue>,
        key: &'static str,
    ) -> Result<Vec<String>, CodecError> {
        match map.get(key) {
            Some(CanonicalValue::List(items)) => items
                .iter()
                .map(|v| match v {
                    CanonicalValue::Text(s) => Ok(s.clone()),
                    _ => Err(CodecError::BadField(key)),
                })
                .collect(),
            _ => Err(CodecError::BadField(key)),
        }
    }
}
