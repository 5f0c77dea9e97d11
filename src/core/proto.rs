//! # Cast Channel Schema
//!
//! Protobuf messages of the `extensions.api.cast_channel` package and the
//! envelope encode/decode pair built on them.
//!
//! Only `CastMessage` is interpreted here. The device-auth messages travel as
//! binary payloads on [`DEVICE_AUTH_NAMESPACE`] and are exported for callers
//! that implement the challenge/response themselves.

use bytes::Bytes;
use prost::Message;

use crate::core::envelope::{Envelope, Payload};
use crate::error::{constants, ProtocolError, Result};

/// Namespace carrying `DeviceAuthMessage` payloads
pub const DEVICE_AUTH_NAMESPACE: &str = "urn:x-cast:com.google.cast.tp.deviceauth";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ProtocolVersion {
    Castv210 = 0,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum PayloadType {
    String = 0,
    Binary = 1,
}

/// Wire form of an [`Envelope`]
#[derive(Clone, PartialEq, Message)]
pub struct CastMessage {
    #[prost(enumeration = "ProtocolVersion", required, tag = "1")]
    pub protocol_version: i32,
    #[prost(string, required, tag = "2")]
    pub source_id: String,
    #[prost(string, required, tag = "3")]
    pub destination_id: String,
    #[prost(string, required, tag = "4")]
    pub namespace: String,
    #[prost(enumeration = "PayloadType", required, tag = "5")]
    pub payload_type: i32,
    #[prost(string, optional, tag = "6")]
    pub payload_utf8: Option<String>,
    #[prost(bytes = "vec", optional, tag = "7")]
    pub payload_binary: Option<Vec<u8>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum SignatureAlgorithm {
    Unspecified = 0,
    RsassaPkcs1v15 = 1,
    RsassaPss = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum HashAlgorithm {
    Sha1 = 0,
    Sha256 = 1,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum AuthErrorType {
    InternalError = 0,
    NoTls = 1,
    SignatureAlgorithmUnavailable = 2,
}

#[derive(Clone, PartialEq, Message)]
pub struct AuthChallenge {
    #[prost(enumeration = "SignatureAlgorithm", optional, tag = "1")]
    pub signature_algorithm: Option<i32>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub sender_nonce: Option<Vec<u8>>,
    #[prost(enumeration = "HashAlgorithm", optional, tag = "3")]
    pub hash_algorithm: Option<i32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct AuthResponse {
    #[prost(bytes = "vec", required, tag = "1")]
    pub signature: Vec<u8>,
    #[prost(bytes = "vec", required, tag = "2")]
    pub client_auth_certificate: Vec<u8>,
    #[prost(bytes = "vec", repeated, tag = "3")]
    pub intermediate_certificate: Vec<Vec<u8>>,
    #[prost(enumeration = "SignatureAlgorithm", optional, tag = "4")]
    pub signature_algorithm: Option<i32>,
    #[prost(bytes = "vec", optional, tag = "5")]
    pub sender_nonce: Option<Vec<u8>>,
    #[prost(enumeration = "HashAlgorithm", optional, tag = "6")]
    pub hash_algorithm: Option<i32>,
    #[prost(bytes = "vec", optional, tag = "7")]
    pub crl: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct AuthError {
    #[prost(enumeration = "AuthErrorType", required, tag = "1")]
    pub error_type: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct DeviceAuthMessage {
    #[prost(message, optional, tag = "1")]
    pub challenge: Option<AuthChallenge>,
    #[prost(message, optional, tag = "2")]
    pub response: Option<AuthResponse>,
    #[prost(message, optional, tag = "3")]
    pub error: Option<AuthError>,
}

impl From<&Envelope> for CastMessage {
    fn from(envelope: &Envelope) -> Self {
        let (payload_type, payload_utf8, payload_binary) = match envelope.payload() {
            Payload::Text(text) => (PayloadType::String, Some(text.clone()), None),
            Payload::Binary(data) => (PayloadType::Binary, None, Some(data.to_vec())),
        };
        Self {
            protocol_version: envelope.protocol_version(),
            source_id: envelope.source_id().to_owned(),
            destination_id: envelope.destination_id().to_owned(),
            namespace: envelope.namespace().to_owned(),
            payload_type: payload_type as i32,
            payload_utf8,
            payload_binary,
        }
    }
}

impl TryFrom<CastMessage> for Envelope {
    type Error = ProtocolError;

    fn try_from(message: CastMessage) -> Result<Self> {
        let payload = match PayloadType::try_from(message.payload_type) {
            Ok(PayloadType::String) => Payload::Text(message.payload_utf8.unwrap_or_default()),
            Ok(PayloadType::Binary) => {
                Payload::Binary(Bytes::from(message.payload_binary.unwrap_or_default()))
            }
            Err(_) => {
                return Err(ProtocolError::MalformedFrame(format!(
                    "{} {}",
                    constants::ERR_UNKNOWN_PAYLOAD_TYPE,
                    message.payload_type
                )))
            }
        };
        Ok(Envelope::with_version(
            message.protocol_version,
            message.source_id,
            message.destination_id,
            message.namespace,
            payload,
        ))
    }
}

/// Serialize an envelope into a frame body.
pub fn encode_envelope(envelope: &Envelope) -> Bytes {
    Bytes::from(CastMessage::from(envelope).encode_to_vec())
}

/// Parse a frame body into an envelope. The protocol version is carried
/// through unchecked; gating it is the connection's job.
pub fn decode_envelope(frame: &[u8]) -> Result<Envelope> {
    let message =
        CastMessage::decode(frame).map_err(|e| ProtocolError::MalformedFrame(e.to_string()))?;
    Envelope::try_from(message)
}
