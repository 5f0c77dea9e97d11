//! # castv2
//!
//! Asynchronous implementation of the CASTV2 protocol spoken by cast devices:
//! length-prefixed protobuf envelopes over TLS, multiplexed into virtual
//! channels by `(source, destination, namespace)`.
//!
//! ## Layers
//! - [`core`]: frame codec, envelope type and protobuf schema
//! - [`protocol`]: per-connection router and channels
//! - [`transport`]: connections over any async stream, TLS setup
//! - [`service`]: [`Client`] and [`Server`]
//! - [`config`], [`error`], [`utils`]: configuration, errors, logging and metrics
//!
//! ## Quick Start
//! ```rust,no_run
//! use castv2::{Client, ConnectOptions, Encoding};
//! use serde_json::json;
//!
//! # async fn run() -> castv2::Result<()> {
//! let client = Client::new();
//! client.connect("192.168.1.20", ConnectOptions::default()).await?;
//!
//! let connection = client.open_channel(
//!     "sender-0",
//!     "receiver-0",
//!     "urn:x-cast:com.google.cast.tp.connection",
//!     Some(Encoding::Json),
//! )?;
//! connection.send(json!({ "type": "CONNECT" })).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use crate::config::NetworkConfig;
pub use crate::core::envelope::{Envelope, Payload};
pub use crate::core::proto::DeviceAuthMessage;
pub use crate::error::{ProtocolError, Result};
pub use crate::protocol::{Channel, ChannelData, Encoding, Incoming};
pub use crate::service::{Client, ClientEvent, ConnectOptions, Server, ServerEvent};
