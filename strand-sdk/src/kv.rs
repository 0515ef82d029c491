//! Key-value wire format.
//!
//! Only scalars can be passed to the engine, so ordered key-value lists are
//! flattened into one little-endian buffer:
//!
//! ```text
//! <u64>          pair_count
//! <u64>          key_len        (includes the trailing NUL)
//! <key_len>      key bytes + 0x00
//! <u64>          val_len        (includes the trailing NUL)
//! <val_len>      value bytes + 0x00
//! ...
//! ```
//!
//! The consumer reads keys and values as NUL-terminated strings, so the
//! length prefix always counts the terminator. Keys and values must not
//! contain interior NUL bytes; the encoder does not check this.

use bytes::{Buf, BufMut, BytesMut};
use std::fmt;

const LEN_SIZE: usize = std::mem::size_of::<u64>();

/// One ordered key-value pair. Duplicate keys are allowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl KeyValue {
    pub fn new<K: AsRef<[u8]>, V: AsRef<[u8]>>(key: K, value: V) -> Self {
        Self {
            key: key.as_ref().to_vec(),
            value: value.as_ref().to_vec(),
        }
    }
}

/// Append the wire encoding of `kvs` to `buf`.
pub fn encode_into(buf: &mut BytesMut, kvs: &[KeyValue]) {
    let needed = LEN_SIZE
        + kvs
            .iter()
            .map(|kv| 2 * LEN_SIZE + kv.key.len() + kv.value.len() + 2)
            .sum::<usize>();
    buf.reserve(needed);

    buf.put_u64_le(kvs.len() as u64);
    for kv in kvs {
        put_field(buf, &kv.key);
        put_field(buf, &kv.value);
    }
}

/// Encode `kvs` into a freshly allocated buffer.
pub fn encode(kvs: &[KeyValue]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    encode_into(&mut buf, kvs);
    buf.to_vec()
}

fn put_field(buf: &mut BytesMut, field: &[u8]) {
    buf.put_u64_le(field.len() as u64 + 1);
    buf.put_slice(field);
    buf.put_u8(0);
}

/// Decode a whole buffer into an owned list.
pub fn decode(data: &[u8]) -> Result<Vec<KeyValue>, DecodeError> {
    let mut iter = pairs(data)?;
    let mut kvs = Vec::with_capacity(iter.len().min(data.len() / (2 * LEN_SIZE + 2)));
    for pair in iter.by_ref() {
        let (key, value) = pair?;
        kvs.push(KeyValue::new(key, value));
    }
    if !iter.rest.is_empty() {
        return Err(DecodeError::TrailingBytes {
            remaining: iter.rest.len(),
        });
    }
    Ok(kvs)
}

/// Start walking an encoded buffer without copying.
///
/// Yielded slices have the trailing NUL stripped.
pub fn pairs(data: &[u8]) -> Result<Pairs<'_>, DecodeError> {
    let mut rest = data;
    if rest.len() < LEN_SIZE {
        return Err(DecodeError::Truncated {
            offset: 0,
            needed: LEN_SIZE,
        });
    }
    let count = rest.get_u64_le();
    Ok(Pairs {
        data,
        rest,
        remaining: count,
        failed: false,
    })
}

/// Zero-copy iterator over an encoded key-value buffer.
pub struct Pairs<'a> {
    data: &'a [u8],
    rest: &'a [u8],
    remaining: u64,
    failed: bool,
}

impl<'a> Pairs<'a> {
    /// Number of pairs announced by the header that have not been read yet.
    pub fn len(&self) -> usize {
        self.remaining as usize
    }

    pub fn is_empty(&self) -> bool {
        self.remaining == 0
    }

    fn offset(&self) -> usize {
        self.data.len() - self.rest.len()
    }

    fn field(&mut self) -> Result<&'a [u8], DecodeError> {
        if self.rest.len() < LEN_SIZE {
            return Err(DecodeError::Truncated {
                offset: self.offset(),
                needed: LEN_SIZE,
            });
        }
        let at = self.offset();
        let len = self.rest.get_u64_le();
        if len == 0 {
            return Err(DecodeError::ZeroLength { offset: at });
        }
        if len > self.rest.len() as u64 {
            return Err(DecodeError::Truncated {
                offset: self.offset(),
                needed: len as usize,
            });
        }
        let len = len as usize;
        let rest = self.rest;
        let (field, tail) = rest.split_at(len);
        if field[len - 1] != 0 {
            return Err(DecodeError::MissingTerminator {
                offset: at + LEN_SIZE + len - 1,
            });
        }
        self.rest = tail;
        Ok(&field[..len - 1])
    }
}

impl<'a> Iterator for Pairs<'a> {
    type Item = Result<(&'a [u8], &'a [u8]), DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 || self.failed {
            return None;
        }
        self.remaining -= 1;
        let pair = self.field().and_then(|key| Ok((key, self.field()?)));
        if pair.is_err() {
            self.failed = true;
        }
        Some(pair)
    }
}

/// Malformed key-value buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The buffer ended before `needed` bytes could be read at `offset`.
    Truncated { offset: usize, needed: usize },
    /// A length prefix of zero; every field carries at least its NUL.
    ZeroLength { offset: usize },
    /// The last byte of a field was not NUL.
    MissingTerminator { offset: usize },
    /// Bytes left over after the announced number of pairs.
    TrailingBytes { remaining: usize },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Truncated { offset, needed } => {
                write!(f, "truncated input at offset {}: need {} bytes", offset, needed)
            }
            DecodeError::ZeroLength { offset } => {
                write!(f, "zero length prefix at offset {}", offset)
            }
            DecodeError::MissingTerminator { offset } => {
                write!(f, "missing NUL terminator at offset {}", offset)
            }
            DecodeError::TrailingBytes { remaining } => {
                write!(f, "{} trailing bytes after last pair", remaining)
            }
        }
    }
}

impl std::error::Error for DecodeError {}
