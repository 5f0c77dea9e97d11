//! # TLS Transport Layer
//!
//! Every CASTV2 connection runs over TLS. Devices present self-signed
//! certificates, so the client side skips verification unless asked to
//! verify against the native roots or a pinned certificate hash.
//!
//! ## Responsibilities
//! - Server identity from PEM files or a generated self-signed certificate
//! - Client verification modes: accept any, native roots, SHA-256 pinning
//! - Establishing client streams and building server acceptors

use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::Path;
use std::sync::Arc;

use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{Certificate, ClientConfig, PrivateKey, RootCertStore, ServerConfig, ServerName};
use rustls_pemfile::{certs, pkcs8_private_keys};
use sha2::{Digest, Sha256};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream as ClientTlsStream;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::{debug, instrument, warn};

use crate::error::{ProtocolError, Result};

enum Identity {
    Files { cert_path: String, key_path: String },
    InMemory { chain: Vec<Certificate>, key: PrivateKey },
}

/// TLS server configuration
pub struct TlsServerConfig {
    identity: Identity,
}

impl TlsServerConfig {
    /// Use a PEM certificate chain and PKCS#8 key from disk.
    pub fn new<P: AsRef<Path>>(cert_path: P, key_path: P) -> Self {
        Self {
            identity: Identity::Files {
                cert_path: cert_path.as_ref().to_string_lossy().to_string(),
                key_path: key_path.as_ref().to_string_lossy().to_string(),
            },
        }
    }

    /// Generate a self-signed certificate for `localhost` and write it to disk
    pub fn generate_self_signed<P: AsRef<Path>>(cert_path: P, key_path: P) -> io::Result<Self> {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".into()])
            .map_err(|e| io::Error::other(format!("Certificate generation error: {e}")))?;

        let mut cert_file = File::create(&cert_path)?;
        cert_file.write_all(cert.cert.pem().as_bytes())?;

        let mut key_file = File::create(&key_path)?;
        key_file.write_all(cert.signing_key.serialize_pem().as_bytes())?;

        Ok(Self::new(cert_path, key_path))
    }

    /// Generate a self-signed certificate for `hosts`, kept in memory.
    pub fn self_signed(hosts: Vec<String>) -> Result<Self> {
        let cert = rcgen::generate_simple_self_signed(hosts)
            .map_err(|e| ProtocolError::TlsError(format!("Certificate generation error: {e}")))?;

        Ok(Self {
            identity: Identity::InMemory {
                chain: vec![Certificate(cert.cert.der().to_vec())],
                key: PrivateKey(cert.signing_key.serialize_der()),
            },
        })
    }

    /// The certificate chain this server presents, leaf first.
    pub fn certificate_chain(&self) -> Result<Vec<Certificate>> {
        match &self.identity {
            Identity::Files { cert_path, .. } => load_certificates(cert_path),
            Identity::InMemory { chain, .. } => Ok(chain.clone()),
        }
    }

    /// Build the rustls server configuration
    pub fn load_server_config(&self) -> Result<ServerConfig> {
        let (chain, key) = match &self.identity {
            Identity::Files {
                cert_path,
                key_path,
            } => (load_certificates(cert_path)?, load_private_key(key_path)?),
            Identity::InMemory { chain, key } => (chain.clone(), key.clone()),
        };

        ServerConfig::builder()
            .with_safe_defaults()
            .with_no_client_auth()
            .with_single_cert(chain, key)
            .map_err(|e| ProtocolError::TlsError(format!("TLS error: {e}")))
    }

    pub fn acceptor(&self) -> Result<TlsAcceptor> {
        Ok(TlsAcceptor::from(Arc::new(self.load_server_config()?)))
    }
}

fn load_certificates(path: &str) -> Result<Vec<Certificate>> {
    let file = File::open(path)
        .map_err(|e| ProtocolError::TlsError(format!("Failed to open cert file: {e}")))?;
    let chain = certs(&mut BufReader::new(file))
        .map_err(|_| ProtocolError::TlsError("Failed to parse certificate".into()))?;
    if chain.is_empty() {
        return Err(ProtocolError::TlsError("No certificates found".into()));
    }
    Ok(chain.into_iter().map(Certificate).collect())
}

fn load_private_key(path: &str) -> Result<PrivateKey> {
    let file = File::open(path)
        .map_err(|e| ProtocolError::TlsError(format!("Failed to open key file: {e}")))?;
    let keys = pkcs8_private_keys(&mut BufReader::new(file))
        .map_err(|_| ProtocolError::TlsError("Failed to parse private key".into()))?;
    keys.into_iter()
        .next()
        .map(PrivateKey)
        .ok_or_else(|| ProtocolError::TlsError("No private keys found".into()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Verification {
    AcceptAny,
    NativeRoots,
    Pinned(Vec<u8>),
}

/// TLS client configuration
#[derive(Debug, Clone)]
pub struct TlsClientConfig {
    server_name: String,
    verification: Verification,
}

impl TlsClientConfig {
    /// Client config for `server_name` that accepts any device certificate.
    pub fn new<S: Into<String>>(server_name: S) -> Self {
        Self {
            server_name: server_name.into(),
            verification: Verification::AcceptAny,
        }
    }

    /// Skip certificate verification. This is the default; cast devices
    /// present self-signed certificates.
    pub fn insecure(mut self) -> Self {
        debug!(server_name = %self.server_name, "certificate verification disabled");
        self.verification = Verification::AcceptAny;
        self
    }

    /// Verify the server against the platform's native root store.
    pub fn verify_native_roots(mut self) -> Self {
        self.verification = Verification::NativeRoots;
        self
    }

    /// Accept only a server whose leaf certificate has this SHA-256 hash.
    pub fn with_pinned_cert_hash(mut self, hash: Vec<u8>) -> Self {
        if hash.len() != 32 {
            warn!(
                "Certificate hash has unexpected length: {} (expected 32 bytes for SHA-256)",
                hash.len()
            );
        }
        self.verification = Verification::Pinned(hash);
        self
    }

    pub fn is_verifying(&self) -> bool {
        self.verification != Verification::AcceptAny
    }

    /// Calculate SHA-256 hash for a certificate to use with pinning
    pub fn calculate_cert_hash(cert: &Certificate) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(&cert.0);
        hasher.finalize().to_vec()
    }

    /// Build the rustls client configuration
    pub fn load_client_config(&self) -> Result<ClientConfig> {
        let builder = ClientConfig::builder().with_safe_defaults();

        let config = match &self.verification {
            Verification::NativeRoots => {
                let mut root_store = RootCertStore::empty();
                let native_certs = rustls_native_certs::load_native_certs().map_err(|e| {
                    ProtocolError::TlsError(format!("Failed to load native certs: {e}"))
                })?;
                for cert in native_certs {
                    root_store.add(&Certificate(cert.0)).map_err(|e| {
                        ProtocolError::TlsError(format!("Failed to add cert to root store: {e}"))
                    })?;
                }
                builder
                    .with_root_certificates(root_store)
                    .with_no_client_auth()
            }
            Verification::Pinned(hash) => builder
                .with_custom_certificate_verifier(Arc::new(CertificateFingerprint {
                    fingerprint: hash.clone(),
                }))
                .with_no_client_auth(),
            Verification::AcceptAny => builder
                .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
                .with_no_client_auth(),
        };

        Ok(config)
    }

    /// Get the server name as a rustls::ServerName
    pub fn server_name(&self) -> Result<ServerName> {
        ServerName::try_from(self.server_name.as_str())
            .map_err(|_| ProtocolError::TlsError("Invalid server name".into()))
    }
}

struct CertificateFingerprint {
    fingerprint: Vec<u8>,
}

impl ServerCertVerifier for CertificateFingerprint {
    fn verify_server_cert(
        &self,
        end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        if TlsClientConfig::calculate_cert_hash(end_entity) == self.fingerprint {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(rustls::Error::General(
                "Pinned certificate hash mismatch".into(),
            ))
        }
    }
}

struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}

/// Open a TCP connection to `host:port` and complete the TLS handshake.
#[instrument(skip(config))]
pub async fn connect(
    host: &str,
    port: u16,
    config: &TlsClientConfig,
) -> Result<ClientTlsStream<TcpStream>> {
    let connector = TlsConnector::from(Arc::new(config.load_client_config()?));
    let domain = config.server_name()?;

    let stream = TcpStream::connect((host, port))
        .await
        .map_err(|e| ProtocolError::TransportError(format!("Failed to connect: {e}")))?;
    stream.set_nodelay(true)?;

    connector
        .connect(domain, stream)
        .await
        .map_err(|e| ProtocolError::TlsError(format!("TLS connection failed: {e}")))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn in_memory_self_signed_builds_server_config() {
        let config = TlsServerConfig::self_signed(vec!["localhost".into()]).unwrap();
        assert!(config.load_server_config().is_ok());
        assert_eq!(config.certificate_chain().unwrap().len(), 1);
    }

    #[test]
    fn missing_files_are_tls_errors() {
        let config = TlsServerConfig::new("/nonexistent/cert.pem", "/nonexistent/key.pem");
        assert!(matches!(
            config.load_server_config(),
            Err(ProtocolError::TlsError(_))
        ));
    }

    #[test]
    fn client_defaults_to_accepting_any_certificate() {
        let config = TlsClientConfig::new("192.168.1.20");
        assert!(!config.is_verifying());
        assert!(config.load_client_config().is_ok());
        assert!(config.server_name().is_ok());
    }

    #[test]
    fn pinning_hash_is_sha256() {
        let server = TlsServerConfig::self_signed(vec!["localhost".into()]).unwrap();
        let leaf = server.certificate_chain().unwrap().remove(0);
        let hash = TlsClientConfig::calculate_cert_hash(&leaf);
        assert_eq!(hash.len(), 32);

        let client = TlsClientConfig::new("localhost").with_pinned_cert_hash(hash);
        assert!(client.is_verifying());
        assert!(client.load_client_config().is_ok());
    }
}
