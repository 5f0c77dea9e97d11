//! # Connection
//!
//! Binds one byte stream to one [`FrameCodec`] and one [`Router`].
//!
//! A connection runs two tasks: a reader that decodes frames, gates the
//! protocol version and dispatches envelopes, and a writer that drains a
//! bounded outbound queue so every frame is written whole. Both stop on the
//! first error or on [`Connection::close`]; the connection is then `Closed`
//! for good and its channels observe end of stream.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::TransportConfig;
use crate::core::codec::FrameCodec;
use crate::core::envelope::Envelope;
use crate::core::proto::{decode_envelope, encode_envelope};
use crate::error::{ProtocolError, Result};
use crate::protocol::channel::{Channel, Encoding};
use crate::protocol::router::{Route, Router};
use crate::utils::metrics::global_metrics;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Events surfaced by a connection to its owner.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// A valid inbound envelope, after channel dispatch
    Message(Arc<Envelope>),
    /// The failure that is about to close the connection
    Error(Arc<ProtocolError>),
    /// Terminal; emitted exactly once
    Closed,
}

pub type EventHandler = Arc<dyn Fn(ConnectionEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closed,
}

/// Sending half of a connection: encodes envelopes and queues frame bodies
/// for the writer task.
#[derive(Clone)]
pub struct Outbound {
    tx: mpsc::Sender<Bytes>,
    max_frame_size: usize,
    shutdown: CancellationToken,
}

impl Outbound {
    /// Outbound queue holding up to `depth` frames, paired with its receiver.
    pub fn channel(depth: usize, max_frame_size: usize) -> (Self, mpsc::Receiver<Bytes>) {
        Self::with_shutdown(depth, max_frame_size, CancellationToken::new())
    }

    fn with_shutdown(
        depth: usize,
        max_frame_size: usize,
        shutdown: CancellationToken,
    ) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        (
            Self {
                tx,
                max_frame_size,
                shutdown,
            },
            rx,
        )
    }

    /// Encode `envelope` and queue it. Waits while the queue is full.
    pub async fn send(&self, envelope: &Envelope) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(ProtocolError::ConnectionClosed);
        }

        let body = encode_envelope(envelope);
        if body.len() > self.max_frame_size {
            return Err(ProtocolError::OversizedFrame {
                size: body.len(),
                max: self.max_frame_size,
            });
        }

        debug!(
            source_id = envelope.source_id(),
            destination_id = envelope.destination_id(),
            namespace = envelope.namespace(),
            payload = %envelope.payload(),
            "send"
        );

        self.tx
            .send(body)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)
    }
}

struct ConnectionInner {
    id: u64,
    peer: SocketAddr,
    router: Router,
    shutdown: CancellationToken,
    terminated: CancellationToken,
    finished: AtomicBool,
    on_event: EventHandler,
}

impl ConnectionInner {
    fn handle_frame(&self, frame: &[u8]) -> Result<()> {
        let envelope = decode_envelope(frame)?;
        if !envelope.is_supported_version() {
            return Err(ProtocolError::UnsupportedProtocolVersion(
                envelope.protocol_version(),
            ));
        }

        debug!(
            connection = self.id,
            source_id = envelope.source_id(),
            destination_id = envelope.destination_id(),
            namespace = envelope.namespace(),
            payload = %envelope.payload(),
            "recv"
        );

        let envelope = Arc::new(envelope);
        self.router.dispatch(envelope.clone())?;
        (self.on_event)(ConnectionEvent::Message(envelope));
        Ok(())
    }

    /// Report `error` and stop both tasks. Ignored once shutdown has begun.
    fn fail(&self, error: ProtocolError) {
        if self.shutdown.is_cancelled() {
            return;
        }

        let error = match error {
            ProtocolError::Io(e) => ProtocolError::TransportError(e.to_string()),
            other => other,
        };
        match error {
            ProtocolError::TransportError(_) | ProtocolError::TlsError(_) => {
                global_metrics().transport_error();
                debug!(connection = self.id, peer = %self.peer, error = %error, "transport failure");
            }
            _ => {
                global_metrics().protocol_error();
                warn!(connection = self.id, peer = %self.peer, error = %error, "protocol violation");
            }
        }

        (self.on_event)(ConnectionEvent::Error(Arc::new(error)));
        self.shutdown.cancel();
    }

    fn finish(&self) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.cancel();
        self.router.clear();
        global_metrics().connection_closed();
        info!(connection = self.id, peer = %self.peer, "connection closed");
        (self.on_event)(ConnectionEvent::Closed);
        self.terminated.cancel();
    }
}

/// Handle to a live (or finished) connection. Cheap to clone.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Start driving `stream`. Must be called within a Tokio runtime.
    pub fn spawn<S>(
        stream: S,
        peer: SocketAddr,
        transport: &TransportConfig,
        on_event: EventHandler,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let shutdown = CancellationToken::new();
        let (outbound, rx) = Outbound::with_shutdown(
            transport.backpressure_limit,
            transport.max_frame_size,
            shutdown.clone(),
        );

        let inner = Arc::new(ConnectionInner {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            peer,
            router: Router::new(outbound),
            shutdown,
            terminated: CancellationToken::new(),
            finished: AtomicBool::new(false),
            on_event,
        });

        global_metrics().connection_established();
        info!(connection = inner.id, %peer, "connection open");

        let frames_in = FramedRead::new(reader, FrameCodec::new(transport.max_frame_size));
        let frames_out = FramedWrite::new(writer, FrameCodec::new(transport.max_frame_size));
        tokio::spawn(write_loop(inner.clone(), frames_out, rx));
        tokio::spawn(read_loop(inner.clone(), frames_in));

        Self { inner }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.inner.peer
    }

    pub fn router(&self) -> &Router {
        &self.inner.router
    }

    pub fn state(&self) -> ConnectionState {
        if self.inner.shutdown.is_cancelled() {
            ConnectionState::Closed
        } else {
            ConnectionState::Open
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    /// Queue one envelope for transmission.
    pub async fn send(&self, envelope: &Envelope) -> Result<()> {
        self.inner.router.send(envelope).await
    }

    /// Subscribe a new channel on this connection's router. Fails with
    /// [`ProtocolError::ConnectionClosed`] once the connection is closing.
    pub fn open_channel(&self, route: Route, encoding: Option<Encoding>) -> Result<Channel> {
        if self.is_closed() {
            return Err(ProtocolError::ConnectionClosed);
        }
        self.inner.router.subscribe(route, encoding)
    }

    /// Terminate immediately. Queued and partially written frames are
    /// discarded; no goodbye is exchanged.
    pub fn close(&self) {
        self.inner.shutdown.cancel();
    }

    /// Resolves once the connection has fully terminated and `Closed` was
    /// emitted.
    pub async fn closed(&self) {
        self.inner.terminated.cancelled().await;
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("peer", &self.inner.peer)
            .field("state", &self.state())
            .finish()
    }
}

async fn read_loop<R>(inner: Arc<ConnectionInner>, mut frames: FramedRead<R, FrameCodec>)
where
    R: AsyncRead + Unpin,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = inner.shutdown.cancelled() => break,
            next = frames.next() => next,
        };

        match next {
            Some(Ok(frame)) => {
                global_metrics().frame_received(frame.len() as u64);
                if let Err(e) = inner.handle_frame(&frame) {
                    inner.fail(e);
                    break;
                }
            }
            Some(Err(e)) => {
                inner.fail(e);
                break;
            }
            None => {
                debug!(connection = inner.id, "peer closed the stream");
                break;
            }
        }
    }
    inner.finish();
}

async fn write_loop<W>(
    inner: Arc<ConnectionInner>,
    mut frames: FramedWrite<W, FrameCodec>,
    mut rx: mpsc::Receiver<Bytes>,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let body = tokio::select! {
            biased;
            _ = inner.shutdown.cancelled() => break,
            body = rx.recv() => match body {
                Some(body) => body,
                None => break,
            },
        };

        let len = body.len() as u64;
        let written = tokio::select! {
            biased;
            _ = inner.shutdown.cancelled() => break,
            written = frames.send(body) => written,
        };

        match written {
            Ok(()) => global_metrics().frame_sent(len),
            Err(e) => {
                inner.fail(e);
                break;
            }
        }
    }
}
