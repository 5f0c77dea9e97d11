//! # Channel Routing
//!
//! Per-connection fan-out of inbound envelopes to subscribed channels.
//!
//! ## Components
//! - **Router**: Subscriber registry with register/unregister/dispatch and the
//!   single outbound path for channel traffic
//! - **Channel**: Addressed subscriber with an optional payload encoding
//!
//! ## Delivery Rule
//! An envelope reaches a channel when its source is the channel's destination,
//! its destination is the channel's source or `"*"`, and the namespaces match.
//! Routing never crosses connections.

pub mod channel;
pub mod router;

pub use channel::{Channel, ChannelData, Encoding, Incoming};
pub use router::{Route, Router};
