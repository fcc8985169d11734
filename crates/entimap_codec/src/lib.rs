//! # entimap codec
//!
//! Column values and rows for entimap, plus the canonical CBOR form the
//! store uses to keep committed rows as immutable bytes.
//!
//! - [`Value`] is a single column value (no floats, so equality is total)
//! - [`Row`] maps column names to values
//! - [`encode_row`] / [`decode_row`] convert rows to and from canonical CBOR
//!
//! ## Usage
//!
//! ```
//! use entimap_codec::{decode_row, encode_row, Row, Value};
//!
//! let row = Row::new().with("id", 1).with("name", "Some User");
//! let bytes = encode_row(&row);
//! assert_eq!(decode_row(&bytes).unwrap(), row);
//! assert_eq!(row.get("id"), Some(&Value::Integer(1)));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
mod row;
mod value;

pub use decoder::{decode_row, CanonicalDecoder};
pub use encoder::{encode_row, CanonicalEncoder};
pub use error::{CodecError, CodecResult};
pub use row::Row;
pub use value::Value;
