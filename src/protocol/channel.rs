//! # Channels
//!
//! A channel is a subscriber bound to one `(source, destination, namespace)`
//! route on a connection's [`Router`]. It receives every matching inbound
//! envelope in arrival order and transmits envelopes addressed by its route.
//!
//! ## Encodings
//! - no encoding: payloads pass through untouched (text stays text, binary
//!   stays binary)
//! - [`Encoding::Json`]: outbound values are serialized to JSON text and
//!   inbound text is parsed back into a [`serde_json::Value`]
//!
//! ## Example
//! ```rust,no_run
//! use castv2::protocol::channel::Encoding;
//! use castv2::service::client::{Client, ConnectOptions};
//! use serde_json::json;
//!
//! # async fn run() -> castv2::error::Result<()> {
//! let client = Client::new();
//! client.connect("192.168.1.20", ConnectOptions::default()).await?;
//!
//! let mut heartbeat = client.open_channel(
//!     "sender-0",
//!     "receiver-0",
//!     "urn:x-cast:com.google.cast.tp.heartbeat",
//!     Some(Encoding::Json),
//! )?;
//! heartbeat.send(json!({ "type": "PING" })).await?;
//!
//! while let Some(message) = heartbeat.recv().await {
//!     println!("{:?}", message?.data);
//! }
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use crate::core::envelope::{Envelope, Payload};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::router::{Delivery, Route, Router};

/// Payload transform applied by a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Json,
}

impl Encoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Json => "JSON",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Encoding {
    type Err = ProtocolError;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "JSON" => Ok(Encoding::Json),
            other => Err(ProtocolError::UnsupportedEncoding(other.to_string())),
        }
    }
}

/// Data sent or received through a channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelData {
    Text(String),
    Binary(Bytes),
    Json(Value),
}

impl From<String> for ChannelData {
    fn from(text: String) -> Self {
        ChannelData::Text(text)
    }
}

impl From<&str> for ChannelData {
    fn from(text: &str) -> Self {
        ChannelData::Text(text.to_owned())
    }
}

impl From<Bytes> for ChannelData {
    fn from(data: Bytes) -> Self {
        ChannelData::Binary(data)
    }
}

impl From<Vec<u8>> for ChannelData {
    fn from(data: Vec<u8>) -> Self {
        ChannelData::Binary(Bytes::from(data))
    }
}

impl From<Value> for ChannelData {
    fn from(value: Value) -> Self {
        ChannelData::Json(value)
    }
}

/// Apply `encoding` to outbound channel data.
pub(crate) fn encode_payload(encoding: Option<Encoding>, data: ChannelData) -> Result<Payload> {
    match (encoding, data) {
        (None, ChannelData::Text(text)) => Ok(Payload::Text(text)),
        (None, ChannelData::Binary(data)) => Ok(Payload::Binary(data)),
        (None, ChannelData::Json(_)) => Err(ProtocolError::UnsupportedEncoding(
            constants::ERR_STRUCTURED_ON_RAW.to_string(),
        )),
        (Some(Encoding::Json), ChannelData::Json(value)) => to_json_text(&value),
        (Some(Encoding::Json), ChannelData::Text(text)) => to_json_text(&text),
        (Some(Encoding::Json), ChannelData::Binary(_)) => Err(ProtocolError::EncodingError(
            constants::ERR_BINARY_AS_JSON.to_string(),
        )),
    }
}

/// Reverse `encoding` on an inbound payload.
pub(crate) fn decode_payload(encoding: Option<Encoding>, payload: &Payload) -> Result<ChannelData> {
    match (encoding, payload) {
        (None, Payload::Text(text)) => Ok(ChannelData::Text(text.clone())),
        (None, Payload::Binary(data)) => Ok(ChannelData::Binary(data.clone())),
        (Some(Encoding::Json), Payload::Text(text)) => serde_json::from_str(text)
            .map(ChannelData::Json)
            .map_err(|e| ProtocolError::EncodingError(e.to_string())),
        (Some(Encoding::Json), Payload::Binary(_)) => Err(ProtocolError::EncodingError(
            constants::ERR_BINARY_AS_JSON.to_string(),
        )),
    }
}

fn to_json_text<T: Serialize + ?Sized>(value: &T) -> Result<Payload> {
    serde_json::to_string(value)
        .map(Payload::Text)
        .map_err(|e| ProtocolError::EncodingError(e.to_string()))
}

/// One envelope delivered to a channel, decoded per the channel's encoding.
#[derive(Debug, Clone)]
pub struct Incoming {
    pub data: ChannelData,
    /// `true` when the envelope was addressed to `"*"`
    pub broadcast: bool,
    pub envelope: Arc<Envelope>,
}

impl Incoming {
    /// Deserialize JSON data into `T`.
    pub fn into_json<T: DeserializeOwned>(self) -> Result<T> {
        match self.data {
            ChannelData::Json(value) => serde_json::from_value(value)
                .map_err(|e| ProtocolError::EncodingError(e.to_string())),
            ChannelData::Text(text) => serde_json::from_str(&text)
                .map_err(|e| ProtocolError::EncodingError(e.to_string())),
            ChannelData::Binary(_) => Err(ProtocolError::EncodingError(
                constants::ERR_BINARY_AS_JSON.to_string(),
            )),
        }
    }
}

/// A subscribed channel. Dropping it unsubscribes.
pub struct Channel {
    id: u64,
    route: Route,
    encoding: Option<Encoding>,
    router: Router,
    rx: mpsc::UnboundedReceiver<Delivery>,
}

impl Channel {
    pub(crate) fn new(
        id: u64,
        route: Route,
        encoding: Option<Encoding>,
        router: Router,
        rx: mpsc::UnboundedReceiver<Delivery>,
    ) -> Self {
        Self {
            id,
            route,
            encoding,
            router,
            rx,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn source_id(&self) -> &str {
        &self.route.source_id
    }

    pub fn destination_id(&self) -> &str {
        &self.route.destination_id
    }

    pub fn namespace(&self) -> &str {
        &self.route.namespace
    }

    pub fn encoding(&self) -> Option<Encoding> {
        self.encoding
    }

    /// Encode and transmit `data` to this channel's destination.
    pub async fn send(&self, data: impl Into<ChannelData>) -> Result<()> {
        self.router.transmit(self, data.into()).await
    }

    /// Serialize `value` and transmit it. Requires a JSON channel.
    pub async fn send_json<T: Serialize>(&self, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)
            .map_err(|e| ProtocolError::EncodingError(e.to_string()))?;
        self.send(ChannelData::Json(value)).await
    }

    /// Wait for the next delivery.
    ///
    /// Returns `None` once the channel is closed or its connection has
    /// terminated and every queued delivery was consumed. A payload that
    /// fails to decode yields `Some(Err(_))` and leaves the channel usable.
    pub async fn recv(&mut self) -> Option<Result<Incoming>> {
        let delivery = self.rx.recv().await?;
        Some(self.decode(delivery))
    }

    /// Non-blocking variant of [`Channel::recv`]. `None` means nothing is
    /// queued right now or the channel has ended.
    pub fn try_recv(&mut self) -> Option<Result<Incoming>> {
        match self.rx.try_recv() {
            Ok(delivery) => Some(self.decode(delivery)),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Number of deliveries queued and not yet received.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Unsubscribe. Nothing else on the connection is affected.
    pub fn close(self) {
        self.router.unsubscribe(self.id);
    }

    fn decode(&self, delivery: Delivery) -> Result<Incoming> {
        let data = decode_payload(self.encoding, delivery.envelope.payload())?;
        Ok(Incoming {
            data,
            broadcast: delivery.broadcast,
            envelope: delivery.envelope,
        })
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.router.unsubscribe(self.id);
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("route", &self.route)
            .field("encoding", &self.encoding)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::core::proto::decode_envelope;
    use crate::transport::connection::Outbound;
    use serde_json::json;

    const NS: &str = "urn:x-cast:com.example.test";

    #[test]
    fn encoding_names() {
        assert_eq!("JSON".parse::<Encoding>().unwrap(), Encoding::Json);
        assert!(matches!(
            "XML".parse::<Encoding>(),
            Err(ProtocolError::UnsupportedEncoding(name)) if name == "XML"
        ));
        assert!("json".parse::<Encoding>().is_err());
    }

    #[test]
    fn json_encodes_compact_text() {
        let payload = encode_payload(Some(Encoding::Json), json!({"a": 1}).into()).unwrap();
        assert_eq!(payload, Payload::Text(r#"{"a":1}"#.into()));

        let payload = encode_payload(Some(Encoding::Json), "hi".into()).unwrap();
        assert_eq!(payload, Payload::Text(r#""hi""#.into()));
    }

    #[test]
    fn json_decodes_text() {
        let data = decode_payload(Some(Encoding::Json), &Payload::Text(r#"{"a":1}"#.into())).unwrap();
        assert_eq!(data, ChannelData::Json(json!({"a": 1})));
    }

    #[test]
    fn raw_channel_passes_through() {
        let bin = Bytes::from_static(&[0, 1, 2]);
        assert_eq!(
            encode_payload(None, bin.clone().into()).unwrap(),
            Payload::Binary(bin.clone())
        );
        assert_eq!(
            decode_payload(None, &Payload::Binary(bin.clone())).unwrap(),
            ChannelData::Binary(bin)
        );
        assert_eq!(
            encode_payload(None, "x".into()).unwrap(),
            Payload::Text("x".into())
        );
    }

    #[test]
    fn mismatched_data_is_rejected() {
        assert!(matches!(
            encode_payload(None, json!(1).into()),
            Err(ProtocolError::UnsupportedEncoding(_))
        ));
        assert!(matches!(
            encode_payload(Some(Encoding::Json), vec![1u8].into()),
            Err(ProtocolError::EncodingError(_))
        ));
        assert!(matches!(
            decode_payload(Some(Encoding::Json), &Payload::Text("{not json".into())),
            Err(ProtocolError::EncodingError(_))
        ));
    }

    #[tokio::test]
    async fn bad_json_does_not_end_the_channel() {
        let (outbound, _rx) = Outbound::channel(4, 1024);
        let router = Router::new(outbound);
        let mut channel = router
            .subscribe(Route::new("A", "B", NS), Some(Encoding::Json))
            .unwrap();

        router
            .dispatch(Arc::new(Envelope::new("B", "A", NS, "{not json")))
            .unwrap();
        router
            .dispatch(Arc::new(Envelope::new("B", "A", NS, r#"{"ok":true}"#)))
            .unwrap();

        assert!(channel.recv().await.unwrap().is_err());
        let good = channel.recv().await.unwrap().unwrap();
        assert_eq!(good.data, ChannelData::Json(json!({"ok": true})));
    }

    #[tokio::test]
    async fn send_json_on_json_channel() {
        #[derive(Serialize)]
        struct Ping {
            #[serde(rename = "type")]
            kind: &'static str,
        }

        let (outbound, mut rx) = Outbound::channel(4, 1024);
        let router = Router::new(outbound);
        let channel = router
            .subscribe(Route::new("sender-0", "receiver-0", NS), Some(Encoding::Json))
            .unwrap();

        channel.send_json(&Ping { kind: "PING" }).await.unwrap();
        let env = decode_envelope(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(env.payload(), &Payload::Text(r#"{"type":"PING"}"#.into()));
    }

    #[test]
    fn into_json_typed() {
        #[derive(serde::Deserialize, Debug, PartialEq)]
        struct A {
            a: i32,
        }
        let incoming = Incoming {
            data: ChannelData::Json(json!({"a": 1})),
            broadcast: false,
            envelope: Arc::new(Envelope::new("B", "A", NS, r#"{"a":1}"#)),
        };
        assert_eq!(incoming.into_json::<A>().unwrap(), A { a: 1 });
    }
}
