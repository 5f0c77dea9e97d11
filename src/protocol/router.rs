use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc;
use tracing::trace;

use crate::config::BROADCAST_DESTINATION;
use crate::core::envelope::{Envelope, Payload};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::channel::{encode_payload, Channel, ChannelData, Encoding};
use crate::transport::connection::Outbound;

/// Addressing tuple of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Route {
    /// Identity the channel transmits as
    pub source_id: String,
    /// Peer identity the channel listens for
    pub destination_id: String,
    pub namespace: String,
}

impl Route {
    pub fn new(
        source_id: impl Into<String>,
        destination_id: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            destination_id: destination_id.into(),
            namespace: namespace.into(),
        }
    }

    /// `Some(broadcast)` when `envelope` is deliverable on this route,
    /// `None` otherwise.
    pub fn accepts(&self, envelope: &Envelope) -> Option<bool> {
        if envelope.source_id() != self.destination_id || envelope.namespace() != self.namespace {
            return None;
        }
        if envelope.destination_id() == self.source_id {
            Some(false)
        } else if envelope.destination_id() == BROADCAST_DESTINATION {
            Some(true)
        } else {
            None
        }
    }

    /// Envelope addressed from this route's source to its destination.
    pub fn envelope(&self, payload: impl Into<Payload>) -> Envelope {
        Envelope::new(
            self.source_id.clone(),
            self.destination_id.clone(),
            self.namespace.clone(),
            payload,
        )
    }
}

/// One routed envelope as queued for a channel.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub envelope: Arc<Envelope>,
    pub broadcast: bool,
}

struct Subscriber {
    route: Route,
    tx: mpsc::UnboundedSender<Delivery>,
}

struct RouterInner {
    subscribers: RwLock<HashMap<u64, Subscriber>>,
    next_id: AtomicU64,
    // Written only while `subscribers` is write-locked.
    closed: AtomicBool,
    outbound: Outbound,
}

/// Per-connection channel router.
///
/// Inbound envelopes are matched against every subscribed route and queued
/// on the matching channels; each channel's queue keeps arrival order.
/// Outbound traffic from channels leaves through [`Router::transmit`].
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

impl Router {
    pub fn new(outbound: Outbound) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                subscribers: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                outbound,
            }),
        }
    }

    /// Register a new channel for `route`. Identical routes may coexist.
    ///
    /// Fails with [`ProtocolError::ConnectionClosed`] once the router has
    /// been cleared. Deliveries stay queued on the channel until it receives
    /// them or is dropped; an undrained channel keeps every envelope routed
    /// to it.
    pub fn subscribe(&self, route: Route, encoding: Option<Encoding>) -> Result<Channel> {
        let mut subscribers = self.inner.subscribers.write().map_err(|_| {
            ProtocolError::LockPoisoned(constants::ERR_ROUTER_WRITE_LOCK.to_string())
        })?;
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(ProtocolError::ConnectionClosed);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        subscribers.insert(
            id,
            Subscriber {
                route: route.clone(),
                tx,
            },
        );
        drop(subscribers);

        trace!(channel = id, source_id = %route.source_id, destination_id = %route.destination_id, namespace = %route.namespace, "channel subscribed");
        Ok(Channel::new(id, route, encoding, self.clone(), rx))
    }

    /// Remove a channel. Returns whether it was still subscribed.
    pub fn unsubscribe(&self, id: u64) -> bool {
        let removed = self
            .inner
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some();
        if removed {
            trace!(channel = id, "channel unsubscribed");
        }
        removed
    }

    /// Deliver `envelope` to every matching channel and return how many
    /// received it.
    pub fn dispatch(&self, envelope: Arc<Envelope>) -> Result<usize> {
        let subscribers = self.inner.subscribers.read().map_err(|_| {
            ProtocolError::LockPoisoned(constants::ERR_ROUTER_READ_LOCK.to_string())
        })?;

        let mut delivered = 0;
        for subscriber in subscribers.values() {
            if let Some(broadcast) = subscriber.route.accepts(&envelope) {
                let delivery = Delivery {
                    envelope: envelope.clone(),
                    broadcast,
                };
                if subscriber.tx.send(delivery).is_ok() {
                    delivered += 1;
                }
            }
        }
        Ok(delivered)
    }

    /// Encode `data` with the channel's encoding and send it addressed by the
    /// channel's route.
    pub async fn transmit(&self, channel: &Channel, data: ChannelData) -> Result<()> {
        let payload = encode_payload(channel.encoding(), data)?;
        let envelope = channel.route().envelope(payload);
        self.inner.outbound.send(&envelope).await
    }

    /// Send an envelope without going through a channel.
    pub async fn send(&self, envelope: &Envelope) -> Result<()> {
        self.inner.outbound.send(envelope).await
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Drop every subscription and refuse new ones; open channels observe
    /// end of stream.
    pub fn clear(&self) {
        let mut subscribers = self
            .inner
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        self.inner.closed.store(true, Ordering::Release);
        subscribers.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}
