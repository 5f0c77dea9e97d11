//! # Core Protocol Components
//!
//! Framing, the envelope type, and its protobuf wire schema.
//!
//! ## Components
//! - **Codec**: Tokio codec for length-prefixed framing over byte streams
//! - **Envelope**: Addressed, immutable protocol message
//! - **Proto**: `CastMessage` and device-auth schema, envelope encode/decode
//!
//! ## Wire Format
//! ```text
//! [Length(4, big-endian)] [CastMessage protobuf(Length)]
//! ```
//!
//! ## Security
//! - The length prefix is checked against a configurable ceiling before any
//!   body bytes are buffered

pub mod codec;
pub mod envelope;
pub mod proto;
