//! Canonical CBOR encoder for rows.

use crate::row::Row;
use crate::value::Value;
use std::cmp::Ordering;

/// Encode a row to canonical CBOR bytes.
///
/// A row encodes as a CBOR map from text column names to scalar values,
/// following the canonical rules of RFC 8949 Section 4.2.1:
/// - Map keys are sorted by their encoded form (length-first, then bytewise)
/// - Integers use the shortest possible encoding
/// - No indefinite-length encoding
///
/// Equal rows always produce identical bytes.
#[must_use]
pub fn encode_row(row: &Row) -> Vec<u8> {
    let mut encoder = CanonicalEncoder::new();
    encoder.encode_row(row);
    encoder.into_bytes()
}

/// A canonical CBOR encoder.
#[derive(Debug, Default)]
pub struct CanonicalEncoder {
    buffer: Vec<u8>,
}

impl CanonicalEncoder {
    /// Create a new encoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode a single column value.
    pub fn encode_value(&mut self, value: &Value) {
        match value {
            // simple value 22
            Value::Null => self.buffer.push(0xf6),
            Value::Bool(b) => self.buffer.push(if *b { 0xf5 } else { 0xf4 }),
            Value::Integer(n) => self.encode_integer(*n),
            Value::Text(s) => {
                self.encode_head(3, s.len() as u64);
                self.buffer.extend_from_slice(s.as_bytes());
            }
            Value::Bytes(b) => {
                self.encode_head(2, b.len() as u64);
                self.buffer.extend_from_slice(b);
            }
        }
    }

    /// Encode a row as a canonical map.
    pub fn encode_row(&mut self, row: &Row) {
        let mut keys: Vec<(Vec<u8>, &Value)> = row
            .iter()
            .map(|(column, value)| {
                let mut key = CanonicalEncoder::new();
                key.encode_value(&Value::Text(column.clone()));
                (key.into_bytes(), value)
            })
            .collect();
        keys.sort_by(|a, b| compare_encoded(&a.0, &b.0));

        self.encode_head(5, keys.len() as u64);
        for (key, value) in keys {
            self.buffer.extend_from_slice(&key);
            self.encode_value(value);
        }
    }

    /// Consume this encoder and return the encoded bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    #[allow(clippy::cast_sign_loss)]
    fn encode_integer(&mut self, n: i64) {
        if n >= 0 {
            self.encode_head(0, n as u64);
        } else {
            // -1 - n fits in u64 for the whole negative i64 range
            self.encode_head(1, (-(n + 1)) as u64);
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn encode_head(&mut self, major_type: u8, value: u64) {
        let mt = major_type << 5;

        if value < 24 {
            self.buffer.push(mt | (value as u8));
        } else if u8::try_from(value).is_ok() {
            self.buffer.push(mt | 24);
            self.buffer.push(value as u8);
        } else if u16::try_from(value).is_ok() {
            self.buffer.push(mt | 25);
            self.buffer.extend_from_slice(&(value as u16).to_be_bytes());
        } else if u32::try_from(value).is_ok() {
            self.buffer.push(mt | 26);
            self.buffer.extend_from_slice(&(value as u32).to_be_bytes());
        } else {
            self.buffer.push(mt | 27);
            self.buffer.extend_from_slice(&value.to_be_bytes());
        }
    }
}

/// Length-first, then bytewise comparison of encoded keys.
pub(crate) fn compare_encoded(a: &[u8], b: &[u8]) -> Ordering {
    match a.len().cmp(&b.len()) {
        Ordering::Equal => a.cmp(b),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value_bytes(value: &Value) -> Vec<u8> {
        let mut encoder = CanonicalEncoder::new();
        encoder.encode_value(value);
        encoder.into_bytes()
    }

    #[test]
    fn encode_scalars() {
        assert_eq!(value_bytes(&Value::Null), vec![0xf6]);
        assert_eq!(value_bytes(&Value::Bool(true)), vec![0xf5]);
        assert_eq!(value_bytes(&Value::Integer(23)), vec![0x17]);
        assert_eq!(value_bytes(&Value::Integer(24)), vec![0x18, 24]);
        assert_eq!(value_bytes(&Value::Integer(5000)), vec![0x19, 0x13, 0x88]);
        assert_eq!(value_bytes(&Value::Integer(-1)), vec![0x20]);
        assert_eq!(value_bytes(&Value::Integer(-100)), vec![0x38, 99]);
        assert_eq!(value_bytes(&Value::from("a")), vec![0x61, b'a']);
        assert_eq!(value_bytes(&Value::Bytes(vec![1, 2])), vec![0x42, 1, 2]);
    }

    #[test]
    fn extreme_integers_use_eight_bytes() {
        let max = value_bytes(&Value::Integer(i64::MAX));
        assert_eq!(max[0], 0x1b);
        assert_eq!(max.len(), 9);
        let min = value_bytes(&Value::Integer(i64::MIN));
        assert_eq!(min[0], 0x3b);
        assert_eq!(min.len(), 9);
    }

    #[test]
    fn row_keys_sort_length_first() {
        // BTreeMap order is "bb" < "c"; canonical order puts the shorter key first
        let row = Row::new().with("bb", 2).with("c", 1);
        let bytes = encode_row(&row);
        assert_eq!(bytes, vec![0xa2, 0x61, b'c', 0x01, 0x62, b'b', b'b', 0x02]);
    }

    #[test]
    fn empty_row() {
        assert_eq!(encode_row(&Row::new()), vec![0xa0]);
    }
}
