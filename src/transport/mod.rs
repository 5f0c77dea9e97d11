//! # Transport Layer
//!
//! Connections over encrypted byte streams.
//!
//! ## Components
//! - **Connection**: Reader/writer tasks binding a stream to a frame codec and router
//! - **TLS**: Server identities, client verification modes and stream setup
//!
//! A [`connection::Connection`] accepts any `AsyncRead + AsyncWrite` stream,
//! so tests and embedders can drive it over in-memory pipes as well as TLS.

pub mod connection;
pub mod tls;

pub use connection::{Connection, ConnectionEvent, ConnectionState};
