//! # Error Types
//!
//! Error handling for the CASTV2 protocol core.
//!
//! This module defines every error variant that can occur while framing,
//! routing, and transporting cast envelopes.
//!
//! ## Error Categories
//! - **Transport Errors**: Socket and TLS failures, reported as connection events
//! - **Protocol Errors**: Bad protocol version, malformed or oversized frames (fatal for the connection)
//! - **Call Errors**: Unsupported channel encodings, unknown server clients (local to the failing call)
//! - **Configuration Errors**: Invalid or unreadable configuration
//!
//! All errors implement `std::error::Error` for interoperability.
//!
//! ## Example Usage
//! ```rust
//! use castv2::error::{ProtocolError, Result};
//! use castv2::protocol::channel::Encoding;
//! use tracing::error;
//!
//! fn pick_encoding(name: &str) -> Result<Encoding> {
//!     name.parse::<Encoding>()
//! }
//!
//! match pick_encoding("XML") {
//!     Err(ProtocolError::UnsupportedEncoding(name)) => error!(%name, "Encoding not available"),
//!     other => panic!("unexpected: {other:?}"),
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Router-related error messages
    pub const ERR_ROUTER_WRITE_LOCK: &str = "Failed to acquire write lock on channel router";
    pub const ERR_ROUTER_READ_LOCK: &str = "Failed to acquire read lock on channel router";

    /// Client connection slot error messages
    pub const ERR_CLIENT_LOCK: &str = "Failed to acquire lock on client connection";

    /// Session registry error messages
    pub const ERR_REGISTRY_LOCK: &str = "Failed to acquire lock on session registry";

    /// Channel encoding errors
    pub const ERR_BINARY_AS_JSON: &str = "binary payload cannot be decoded as JSON";
    pub const ERR_STRUCTURED_ON_RAW: &str = "structured payload requires a JSON channel";

    /// Envelope decoding errors
    pub const ERR_UNKNOWN_PAYLOAD_TYPE: &str = "unknown payload type";
}

// ProtocolError is the primary error type for all protocol operations
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    #[serde(skip_serializing, skip_deserializing)]
    Io(#[from] io::Error),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("TLS error: {0}")]
    TlsError(String),

    #[error("Unsupported protocol version: {0}")]
    UnsupportedProtocolVersion(i32),

    #[error("Unsupported channel encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("Encoding error: {0}")]
    EncodingError(String),

    #[error("Unknown client: {0}")]
    UnknownClient(String),

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Frame too large: {size} bytes (maximum {max})")]
    OversizedFrame { size: usize, max: usize },

    #[error("Client is already connected")]
    AlreadyConnected,

    #[error("Client is not connected")]
    NotConnected,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Synchronization primitive poisoned: {0}")]
    LockPoisoned(String),
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
