//! Canonical CBOR decoder for rows.

use crate::encoder::compare_encoded;
use crate::error::{CodecError, CodecResult};
use crate::row::Row;
use crate::value::Value;
use std::cmp::Ordering;

/// Maximum number of columns accepted in one row.
const MAX_COLUMNS: u64 = 64 * 1024;

/// Maximum accepted byte/text length (64 MiB).
const MAX_BYTES_LENGTH: u64 = 64 * 1024 * 1024;

/// Decode a row previously produced by [`encode_row`](crate::encode_row).
///
/// # Errors
///
/// Returns an error if the bytes are not a canonical CBOR map of text keys
/// to scalar values, or if bytes remain after the map.
pub fn decode_row(bytes: &[u8]) -> CodecResult<Row> {
    let mut decoder = CanonicalDecoder::new(bytes);
    let row = decoder.decode_row()?;
    if !decoder.is_empty() {
        return Err(CodecError::TrailingBytes {
            remaining: decoder.remaining().len(),
        });
    }
    Ok(row)
}

/// A canonical CBOR decoder.
///
/// Rejects anything the encoder would never produce: floats, nested
/// containers, indefinite lengths, non-shortest integers and unsorted keys.
pub struct CanonicalDecoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> CanonicalDecoder<'a> {
    /// Create a new decoder for the given bytes.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Decode a row map.
    pub fn decode_row(&mut self) -> CodecResult<Row> {
        let initial = self.read_byte()?;
        if initial >> 5 != 5 {
            return Err(CodecError::invalid_structure("row must be a map"));
        }
        let len = self.decode_length(initial & 0x1f, MAX_COLUMNS)?;

        let mut row = Row::new();
        let mut prev_key: Option<&'a [u8]> = None;
        for _ in 0..len {
            let key_start = self.pos;
            let column = match self.decode_value()? {
                Value::Text(column) => column,
                other => {
                    return Err(CodecError::invalid_structure(format!(
                        "column name must be text, found {}",
                        other.type_name()
                    )))
                }
            };
            let data: &'a [u8] = self.data;
            let key_bytes = &data[key_start..self.pos];
            if let Some(prev) = prev_key {
                if compare_encoded(prev, key_bytes) != Ordering::Less {
                    return Err(CodecError::invalid_structure(
                        "non-canonical: row columns not in sorted order",
                    ));
                }
            }
            prev_key = Some(key_bytes);

            let value = self.decode_value()?;
            row.insert(column, value);
        }
        Ok(row)
    }

    /// Decode the next scalar value.
    #[allow(clippy::cast_possible_wrap)]
    pub fn decode_value(&mut self) -> CodecResult<Value> {
        let initial = self.read_byte()?;
        let additional = initial & 0x1f;

        match initial >> 5 {
            0 => {
                let n = self.decode_unsigned(additional)?;
                i64::try_from(n)
                    .map(Value::Integer)
                    .map_err(|_| CodecError::invalid_structure("integer out of range"))
            }
            1 => {
                let n = self.decode_unsigned(additional)?;
                if n > i64::MAX as u64 {
                    return Err(CodecError::invalid_structure("integer out of range"));
                }
                Ok(Value::Integer(-1 - n as i64))
            }
            2 => {
                let len = self.decode_length(additional, MAX_BYTES_LENGTH)?;
                Ok(Value::Bytes(self.read_bytes(len)?.to_vec()))
            }
            3 => {
                let len = self.decode_length(additional, MAX_BYTES_LENGTH)?;
                let bytes = self.read_bytes(len)?;
                let text = std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)?;
                Ok(Value::Text(text.to_string()))
            }
            4 => Err(CodecError::unsupported_type("array")),
            5 => Err(CodecError::unsupported_type("nested map")),
            6 => Err(CodecError::unsupported_type("tag")),
            _ => self.decode_simple(additional),
        }
    }

    /// Check if all bytes have been consumed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Get remaining bytes.
    #[must_use]
    pub fn remaining(&self) -> &[u8] {
        &self.data[self.pos..]
    }

    fn read_byte(&mut self) -> CodecResult<u8> {
        let byte = *self.data.get(self.pos).ok_or(CodecError::UnexpectedEof)?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_bytes(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        let end = self.pos.checked_add(len).ok_or(CodecError::UnexpectedEof)?;
        let bytes = self
            .data
            .get(self.pos..end)
            .ok_or(CodecError::UnexpectedEof)?;
        self.pos = end;
        Ok(bytes)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn decode_length(&mut self, additional: u8, max_allowed: u64) -> CodecResult<usize> {
        let claimed = self.decode_unsigned(additional)?;
        if claimed > max_allowed {
            return Err(CodecError::SizeLimitExceeded {
                claimed,
                max_allowed,
            });
        }
        Ok(claimed as usize)
    }

    fn decode_unsigned(&mut self, additional: u8) -> CodecResult<u64> {
        let (value, shortest) = match additional {
            0..=23 => return Ok(u64::from(additional)),
            24 => {
                let v = u64::from(self.read_byte()?);
                (v, v < 24)
            }
            25 => {
                let b = self.read_bytes(2)?;
                let v = u64::from(u16::from_be_bytes([b[0], b[1]]));
                (v, v <= u64::from(u8::MAX))
            }
            26 => {
                let b = self.read_bytes(4)?;
                let v = u64::from(u32::from_be_bytes([b[0], b[1], b[2], b[3]]));
                (v, v <= u64::from(u16::MAX))
            }
            27 => {
                let b = self.read_bytes(8)?;
                let v = u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]);
                (v, v <= u64::from(u32::MAX))
            }
            31 => return Err(CodecError::IndefiniteLengthForbidden),
            _ => return Err(CodecError::invalid_structure("reserved additional info")),
        };
        if shortest {
            return Err(CodecError::invalid_structure(
                "non-canonical: value could be encoded in fewer bytes",
            ));
        }
        Ok(value)
    }

    fn decode_simple(&mut self, additional: u8) -> CodecResult<Value> {
        match additional {
            20 => Ok(Value::Bool(false)),
            21 => Ok(Value::Bool(true)),
            22 => Ok(Value::Null),
            25..=27 => Err(CodecError::FloatForbidden),
            31 => Err(CodecError::invalid_structure("break without indefinite")),
            other => Err(CodecError::unsupported_type(format!("simple value {other}"))),
        }
    }
}
