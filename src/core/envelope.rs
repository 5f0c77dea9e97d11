//! # Envelope
//!
//! One CASTV2 message: addressing fields plus an explicitly tagged payload.

use bytes::Bytes;
use std::fmt;

use crate::config::{BROADCAST_DESTINATION, PROTOCOL_VERSION};

/// Envelope payload. The variant is carried on the wire as `payload_type`,
/// so an empty or binary-looking string still round-trips as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Bytes),
}

impl Payload {
    pub fn len(&self) -> usize {
        match self {
            Payload::Text(text) => text.len(),
            Payload::Binary(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, Payload::Binary(_))
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            Payload::Binary(_) => None,
        }
    }

    pub fn as_binary(&self) -> Option<&Bytes> {
        match self {
            Payload::Binary(data) => Some(data),
            Payload::Text(_) => None,
        }
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_owned())
    }
}

impl From<Bytes> for Payload {
    fn from(data: Bytes) -> Self {
        Payload::Binary(data)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(data: Vec<u8>) -> Self {
        Payload::Binary(Bytes::from(data))
    }
}

impl From<&[u8]> for Payload {
    fn from(data: &[u8]) -> Self {
        Payload::Binary(Bytes::copy_from_slice(data))
    }
}

// Log-friendly summary: text verbatim, binary as a length.
impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Text(text) => f.write_str(text),
            Payload::Binary(data) => write!(f, "<{} bytes>", data.len()),
        }
    }
}

/// A complete protocol message. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    protocol_version: i32,
    source_id: String,
    destination_id: String,
    namespace: String,
    payload: Payload,
}

impl Envelope {
    /// Build an envelope at the supported protocol version.
    pub fn new(
        source_id: impl Into<String>,
        destination_id: impl Into<String>,
        namespace: impl Into<String>,
        payload: impl Into<Payload>,
    ) -> Self {
        Self::with_version(
            PROTOCOL_VERSION,
            source_id,
            destination_id,
            namespace,
            payload,
        )
    }

    /// Build an envelope carrying an arbitrary protocol version, as decoded
    /// from the wire.
    pub fn with_version(
        protocol_version: i32,
        source_id: impl Into<String>,
        destination_id: impl Into<String>,
        namespace: impl Into<String>,
        payload: impl Into<Payload>,
    ) -> Self {
        Self {
            protocol_version,
            source_id: source_id.into(),
            destination_id: destination_id.into(),
            namespace: namespace.into(),
            payload: payload.into(),
        }
    }

    pub fn protocol_version(&self) -> i32 {
        self.protocol_version
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn destination_id(&self) -> &str {
        &self.destination_id
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn into_payload(self) -> Payload {
        self.payload
    }

    /// Whether the envelope is addressed to every channel (`"*"`).
    pub fn is_broadcast(&self) -> bool {
        self.destination_id == BROADCAST_DESTINATION
    }

    pub fn is_supported_version(&self) -> bool {
        self.protocol_version == PROTOCOL_VERSION
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_tag_follows_constructor() {
        assert_eq!(Payload::from(""), Payload::Text(String::new()));
        assert!(Payload::from(vec![0u8, 159, 146]).is_binary());
        assert!(!Payload::from("\u{0}binary-looking").is_binary());
    }

    #[test]
    fn broadcast_detection() {
        let env = Envelope::new("receiver-0", "*", "urn:x-cast:test", "{}");
        assert!(env.is_broadcast());
        assert!(env.is_supported_version());

        let env = Envelope::new("receiver-0", "sender-0", "urn:x-cast:test", "{}");
        assert!(!env.is_broadcast());
    }

    #[test]
    fn payload_display_summarizes_binary() {
        assert_eq!(Payload::from("hi").to_string(), "hi");
        assert_eq!(Payload::from(vec![1u8, 2, 3]).to_string(), "<3 bytes>");
    }
}
