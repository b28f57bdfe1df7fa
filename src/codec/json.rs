//! JSON codec using `serde_json`.
//!
//! Every payload on the wire is a UTF-8 JSON document. Both envelope shapes
//! (request and response) and all method arguments and return values pass
//! through here, so interop only requires the peer to speak JSON.
//!
//! # Example
//!
//! ```
//! use sockwire::codec::JsonCodec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Message {
//!     id: u32,
//!     content: String,
//! }
//!
//! let msg = Message { id: 42, content: "hello".to_string() };
//! let encoded = JsonCodec::encode(&msg).unwrap();
//! let decoded: Message = JsonCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, msg);
//! ```

use crate::error::Result;

/// JSON codec for structured data.
pub struct JsonCodec;

impl JsonCodec {
    /// Encode a value to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized. Values built from
    /// `serde_json::Value` always serialize; a failure here is a bug in the
    /// caller's type, not a runtime condition to recover from.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    /// Decode JSON bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes are not valid JSON for type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
