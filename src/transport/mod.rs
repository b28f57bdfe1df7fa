//! Transport module - TCP and Unix domain socket handling.
//!
//! The same framing and protocol logic runs over either endpoint kind;
//! nothing above this module knows which one is in use.

mod socket;

pub use socket::{Endpoint, Listener, Stream};
