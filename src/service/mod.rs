//! # Service Layer
//!
//! Client and server endpoints built on [`crate::transport::Connection`].
//!
//! ## Components
//! - **Client**: One outbound TLS connection to a cast device
//! - **Server**: TLS listener with a lock-protected session registry

pub mod client;
pub mod server;

pub use client::{Client, ClientEvent, ConnectOptions};
pub use server::{Server, ServerEvent};
