//! Codec module - serialization for frame payloads.
//!
//! The wire payload is UTF-8 JSON text, so there is a single codec:
//!
//! - [`JsonCodec`] - JSON via `serde_json`
//!
//! # Design
//!
//! The codec is a marker struct with static methods rather than a trait
//! object. Payload encoding is decided at compile time; there is no
//! per-connection codec negotiation.
//!
//! # Example
//!
//! ```
//! use sockwire::codec::JsonCodec;
//!
//! let encoded = JsonCodec::encode(&"hello").unwrap();
//! let decoded: String = JsonCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//! ```

mod json;

pub use json::JsonCodec;
