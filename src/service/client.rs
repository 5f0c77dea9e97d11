//! # Cast Client
//!
//! Owns at most one outbound connection to a cast device.
//!
//! Lifecycle and traffic are reported as [`ClientEvent`]s on a broadcast
//! channel; failures after `connect` returns are never thrown across the
//! public operations, they arrive as `Error` followed by `Closed`.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, instrument};

use crate::config::{ClientConfig, NetworkConfig, TransportConfig};
use crate::core::envelope::{Envelope, Payload};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::channel::{Channel, Encoding};
use crate::protocol::router::Route;
use crate::transport::connection::{Connection, ConnectionEvent, EventHandler};
use crate::transport::tls::{self, TlsClientConfig};

/// Events emitted by a [`Client`].
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Connected { peer: SocketAddr },
    Message(Arc<Envelope>),
    Error(Arc<ProtocolError>),
    Closed,
}

/// Options for [`Client::connect`].
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Device port; the configured `client.port` when `None`
    pub port: Option<u16>,
    /// TLS settings; derived from the client configuration when `None`
    pub tls: Option<TlsClientConfig>,
}

impl ConnectOptions {
    pub fn port(port: u16) -> Self {
        Self {
            port: Some(port),
            ..Self::default()
        }
    }

    pub fn with_tls(mut self, tls: TlsClientConfig) -> Self {
        self.tls = Some(tls);
        self
    }
}

pub struct Client {
    config: ClientConfig,
    transport: TransportConfig,
    connection: Mutex<Option<Connection>>,
    events: broadcast::Sender<ClientEvent>,
}

impl Client {
    pub fn new() -> Self {
        Self::with_config(&NetworkConfig::default())
    }

    pub fn with_config(config: &NetworkConfig) -> Self {
        let (events, _) = broadcast::channel(config.client.event_capacity.max(1));
        Self {
            config: config.client.clone(),
            transport: config.transport.clone(),
            connection: Mutex::new(None),
            events,
        }
    }

    /// Subscribe to client events. Only events emitted after this call are
    /// observed.
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn event_stream(&self) -> BroadcastStream<ClientEvent> {
        BroadcastStream::new(self.events.subscribe())
    }

    /// Open a TLS connection to `host`. No retry is attempted.
    ///
    /// Fails with [`ProtocolError::AlreadyConnected`] while a previous
    /// connection is still open.
    #[instrument(skip(self, options))]
    pub async fn connect(&self, host: &str, options: ConnectOptions) -> Result<()> {
        if self.is_connected() {
            return Err(ProtocolError::AlreadyConnected);
        }

        let port = self.resolve_port(&options);
        let tls = options.tls.unwrap_or_else(|| self.default_tls(host));
        debug!(port, verifying = tls.is_verifying(), "connecting");

        let stream = match tls::connect(host, port, &tls).await {
            Ok(stream) => stream,
            Err(e) => {
                let reported = match &e {
                    ProtocolError::TlsError(msg) => ProtocolError::TlsError(msg.clone()),
                    ProtocolError::TransportError(msg) => {
                        ProtocolError::TransportError(msg.clone())
                    }
                    other => ProtocolError::TransportError(other.to_string()),
                };
                let _ = self.events.send(ClientEvent::Error(Arc::new(reported)));
                return Err(e);
            }
        };
        let peer = stream.get_ref().0.peer_addr()?;

        self.attach(stream, peer)
    }

    /// Bind the client to an already established stream.
    pub fn attach<S>(&self, stream: S, peer: SocketAddr) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let mut slot = self
            .connection
            .lock()
            .map_err(|_| ProtocolError::LockPoisoned(constants::ERR_CLIENT_LOCK.to_string()))?;
        if slot.as_ref().is_some_and(|conn| !conn.is_closed()) {
            return Err(ProtocolError::AlreadyConnected);
        }

        info!(%peer, "connected");
        let _ = self.events.send(ClientEvent::Connected { peer });

        let connection = Connection::spawn(stream, peer, &self.transport, self.event_handler());
        *slot = Some(connection);
        Ok(())
    }

    /// Send one envelope directly, bypassing channels.
    pub async fn send(
        &self,
        source_id: &str,
        destination_id: &str,
        namespace: &str,
        payload: impl Into<Payload>,
    ) -> Result<()> {
        let envelope = Envelope::new(source_id, destination_id, namespace, payload);
        self.current()?.send(&envelope).await
    }

    /// Open a channel on the current connection.
    pub fn open_channel(
        &self,
        source_id: &str,
        destination_id: &str,
        namespace: &str,
        encoding: Option<Encoding>,
    ) -> Result<Channel> {
        self.current()?
            .open_channel(Route::new(source_id, destination_id, namespace), encoding)
    }

    /// Tear the connection down immediately. A no-op when not connected.
    pub fn close(&self) {
        let connection = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(connection) = connection {
            info!(peer = %connection.peer(), "closing");
            connection.close();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|conn| !conn.is_closed())
    }

    /// Handle to the current connection, open or not.
    pub fn connection(&self) -> Option<Connection> {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn current(&self) -> Result<Connection> {
        self.connection().ok_or(ProtocolError::NotConnected)
    }

    fn resolve_port(&self, options: &ConnectOptions) -> u16 {
        options.port.unwrap_or(self.config.port)
    }

    fn default_tls(&self, host: &str) -> TlsClientConfig {
        let name = self.config.server_name.as_deref().unwrap_or(host);
        let tls = TlsClientConfig::new(name);
        if self.config.verify_certificates {
            tls.verify_native_roots()
        } else {
            tls
        }
    }

    fn event_handler(&self) -> EventHandler {
        let events = self.events.clone();
        Arc::new(move |event| {
            let event = match event {
                ConnectionEvent::Message(envelope) => ClientEvent::Message(envelope),
                ConnectionEvent::Error(error) => ClientEvent::Error(error),
                ConnectionEvent::Closed => ClientEvent::Closed,
            };
            let _ = events.send(event);
        })
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}
