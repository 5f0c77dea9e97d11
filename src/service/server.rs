//! # Cast Server
//!
//! Accepts TLS connections and keeps one session per peer, keyed by
//! `address:port`. Each session has its own framing state and router; nothing
//! is routed between sessions.
//!
//! ## Example
//! ```rust,no_run
//! use castv2::service::server::{Server, ServerEvent};
//! use castv2::transport::tls::TlsServerConfig;
//!
//! # async fn run() -> castv2::error::Result<()> {
//! let server = Server::new(TlsServerConfig::new("cert.pem", "key.pem"))?;
//! let mut events = server.events();
//! server.listen("0.0.0.0", 8009).await?;
//!
//! while let Ok(event) = events.recv().await {
//!     if let ServerEvent::Message { client_id, envelope } = event {
//!         server
//!             .send(&client_id, envelope.destination_id(), envelope.source_id(),
//!                   envelope.namespace(), envelope.payload().clone())
//!             .await?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_rustls::TlsAcceptor;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::{NetworkConfig, ServerConfig, TransportConfig};
use crate::core::envelope::{Envelope, Payload};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::channel::{Channel, Encoding};
use crate::protocol::router::Route;
use crate::transport::connection::{Connection, ConnectionEvent, EventHandler};
use crate::transport::tls::TlsServerConfig;

/// Events emitted by a [`Server`].
#[derive(Debug, Clone)]
pub enum ServerEvent {
    Listening(SocketAddr),
    ClientConnected {
        client_id: String,
        peer: SocketAddr,
    },
    Message {
        client_id: String,
        envelope: Arc<Envelope>,
    },
    /// A session or listener failure; `client_id` is `None` for the latter
    Error {
        client_id: Option<String>,
        error: Arc<ProtocolError>,
    },
    ClientDisconnected {
        client_id: String,
    },
    Closed,
}

struct Shared {
    transport: TransportConfig,
    acceptor: TlsAcceptor,
    sessions: RwLock<HashMap<String, Connection>>,
    events: broadcast::Sender<ServerEvent>,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl Shared {
    fn emit(&self, event: ServerEvent) {
        let _ = self.events.send(event);
    }

    fn register<S>(self: &Arc<Self>, stream: S, peer: SocketAddr) -> Result<String>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let client_id = format!("{}:{}", peer.ip(), peer.port());

        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| ProtocolError::LockPoisoned(constants::ERR_REGISTRY_LOCK.to_string()))?;
        if self.shutdown.is_cancelled() {
            return Err(ProtocolError::ConnectionClosed);
        }

        info!(client_id = %client_id, "client connected");
        self.emit(ServerEvent::ClientConnected {
            client_id: client_id.clone(),
            peer,
        });

        let connection = Connection::spawn(
            stream,
            peer,
            &self.transport,
            self.session_handler(client_id.clone()),
        );
        if let Some(previous) = sessions.insert(client_id.clone(), connection) {
            previous.close();
        }
        Ok(client_id)
    }

    fn session_handler(self: &Arc<Self>, client_id: String) -> EventHandler {
        let shared = Arc::downgrade(self);
        Arc::new(move |event| {
            if let Some(shared) = shared.upgrade() {
                shared.on_session_event(&client_id, event);
            }
        })
    }

    fn on_session_event(&self, client_id: &str, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Message(envelope) => self.emit(ServerEvent::Message {
                client_id: client_id.to_string(),
                envelope,
            }),
            ConnectionEvent::Error(error) => self.emit(ServerEvent::Error {
                client_id: Some(client_id.to_string()),
                error,
            }),
            ConnectionEvent::Closed => {
                {
                    let mut sessions = self
                        .sessions
                        .write()
                        .unwrap_or_else(PoisonError::into_inner);
                    // A newer session may already hold this id.
                    if sessions.get(client_id).is_some_and(Connection::is_closed) {
                        sessions.remove(client_id);
                    }
                }
                info!(client_id = %client_id, "client disconnected");
                self.emit(ServerEvent::ClientDisconnected {
                    client_id: client_id.to_string(),
                });
            }
        }
    }

    fn session(&self, client_id: &str) -> Result<Connection> {
        self.sessions
            .read()
            .map_err(|_| ProtocolError::LockPoisoned(constants::ERR_REGISTRY_LOCK.to_string()))?
            .get(client_id)
            .cloned()
            .ok_or_else(|| ProtocolError::UnknownClient(client_id.to_string()))
    }

    fn close_sessions(&self) -> Vec<Connection> {
        let sessions: Vec<Connection> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for connection in &sessions {
            connection.close();
        }
        sessions
    }
}

pub struct Server {
    config: ServerConfig,
    shared: Arc<Shared>,
}

impl Server {
    pub fn new(tls: TlsServerConfig) -> Result<Self> {
        Self::with_config(tls, &NetworkConfig::default())
    }

    pub fn with_config(tls: TlsServerConfig, config: &NetworkConfig) -> Result<Self> {
        let (events, _) = broadcast::channel(config.server.event_capacity.max(1));
        Ok(Self {
            config: config.server.clone(),
            shared: Arc::new(Shared {
                transport: config.transport.clone(),
                acceptor: tls.acceptor()?,
                sessions: RwLock::new(HashMap::new()),
                events,
                shutdown: CancellationToken::new(),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn events(&self) -> broadcast::Receiver<ServerEvent> {
        self.shared.events.subscribe()
    }

    pub fn event_stream(&self) -> BroadcastStream<ServerEvent> {
        BroadcastStream::new(self.shared.events.subscribe())
    }

    /// Bind and start accepting TLS connections. Returns the bound address,
    /// which tells the real port when `port` is 0.
    #[instrument(skip(self))]
    pub async fn listen(&self, bind_address: &str, port: u16) -> Result<SocketAddr> {
        if self.shared.shutdown.is_cancelled() {
            return Err(ProtocolError::ConnectionClosed);
        }

        let listener = TcpListener::bind((bind_address, port))
            .await
            .map_err(|e| ProtocolError::TransportError(format!("Failed to bind: {e}")))?;
        let local = listener.local_addr()?;

        info!(address = %local, "listening");
        self.shared.emit(ServerEvent::Listening(local));

        tokio::spawn(accept_loop(self.shared.clone(), listener));
        Ok(local)
    }

    /// [`Server::listen`] on the configured `server.bind_address` and
    /// `server.port`.
    pub async fn listen_configured(&self) -> Result<SocketAddr> {
        self.listen(&self.config.bind_address, self.config.port).await
    }

    /// Register a session over an already accepted (and decrypted) stream.
    pub fn accept_stream<S>(&self, stream: S, peer: SocketAddr) -> Result<String>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.shared.register(stream, peer)
    }

    /// Send one envelope to a connected client.
    pub async fn send(
        &self,
        client_id: &str,
        source_id: &str,
        destination_id: &str,
        namespace: &str,
        payload: impl Into<Payload>,
    ) -> Result<()> {
        let connection = self.shared.session(client_id)?;
        let envelope = Envelope::new(source_id, destination_id, namespace, payload);
        connection.send(&envelope).await
    }

    /// Open a channel on one client's session.
    pub fn open_channel(
        &self,
        client_id: &str,
        source_id: &str,
        destination_id: &str,
        namespace: &str,
        encoding: Option<Encoding>,
    ) -> Result<Channel> {
        self.shared
            .session(client_id)?
            .open_channel(Route::new(source_id, destination_id, namespace), encoding)
    }

    /// Ids of every registered session.
    pub fn clients(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .shared
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn session(&self, client_id: &str) -> Result<Connection> {
        self.shared.session(client_id)
    }

    /// Stop accepting and forcibly terminate every session. Resolves after
    /// each session has closed; `Closed` is emitted last.
    pub async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.shutdown.cancel();

        for connection in self.shared.close_sessions() {
            connection.closed().await;
        }

        info!("server closed");
        self.shared.emit(ServerEvent::Closed);
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
        self.shared.close_sessions();
    }
}

async fn accept_loop(shared: Arc<Shared>, listener: TcpListener) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "accept failed, listener stopped");
                shared.emit(ServerEvent::Error {
                    client_id: None,
                    error: Arc::new(ProtocolError::TransportError(e.to_string())),
                });
                break;
            }
        };
        let _ = stream.set_nodelay(true);

        let shared = shared.clone();
        tokio::spawn(async move {
            let handshake = tokio::select! {
                biased;
                _ = shared.shutdown.cancelled() => return,
                handshake = shared.acceptor.accept(stream) => handshake,
            };

            match handshake {
                Ok(stream) => {
                    if let Err(e) = shared.register(stream, peer) {
                        warn!(%peer, error = %e, "failed to register session");
                    }
                }
                Err(e) => {
                    debug!(%peer, error = %e, "TLS handshake failed");
                    shared.emit(ServerEvent::Error {
                        client_id: Some(format!("{}:{}", peer.ip(), peer.port())),
                        error: Arc::new(ProtocolError::TlsError(e.to_string())),
                    });
                }
            }
        });
    }
    debug!("accept loop finished");
}
