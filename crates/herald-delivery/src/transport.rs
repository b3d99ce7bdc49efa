//! Name resolution, TCP connect, TLS handshake and close.
//!
//! The client depends on the `Resolver` and `Connector` traits only, so
//! tests can script failures without touching the network. Deadlines are
//! applied by the caller.

use std::{fmt, io, net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
};
use tokio_rustls::TlsConnector;
use tracing::{debug, info};

use crate::error::{DeliveryError, Result};

/// Byte stream a request can be written to, plain or TLS.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

/// Owned, type-erased transport.
pub type BoxedStream = Box<dyn Transport>;

/// Turns a host and port into socket addresses.
#[async_trait]
pub trait Resolver: Send + Sync + fmt::Debug {
    /// Resolves `host:port`. An empty list is a valid answer here; the
    /// connection machine treats it as a failure.
    async fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>>;
}

/// Establishes the byte stream to a destination.
#[async_trait]
pub trait Connector: Send + Sync + fmt::Debug {
    /// Connects to the first endpoint that accepts, in order.
    async fn connect(&self, endpoints: &[SocketAddr]) -> Result<BoxedStream>;

    /// Runs a client TLS handshake over an established stream.
    async fn handshake(&self, host: &str, stream: BoxedStream) -> Result<BoxedStream>;
}

/// System resolver backed by `tokio::net::lookup_host`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DnsResolver;

#[async_trait]
impl Resolver for DnsResolver {
    async fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>> {
        let addrs = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| DeliveryError::resolve(host, e.to_string()))?;
        Ok(addrs.collect())
    }
}

/// TCP connector with rustls for https destinations.
#[derive(Clone)]
pub struct TcpConnector {
    tls: TlsConnector,
}

impl fmt::Debug for TcpConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpConnector").finish_non_exhaustive()
    }
}

impl TcpConnector {
    /// Creates a connector trusting the webpki root set.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Tls` if the TLS configuration cannot be built.
    pub fn new() -> Result<Self> {
        Ok(Self::with_tls_config(default_tls_config()?))
    }

    /// Creates a connector using a caller-supplied TLS configuration.
    pub fn with_tls_config(config: Arc<rustls::ClientConfig>) -> Self {
        Self { tls: TlsConnector::from(config) }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, endpoints: &[SocketAddr]) -> Result<BoxedStream> {
        let mut last_error = None;

        for endpoint in endpoints {
            match TcpStream::connect(*endpoint).await {
                Ok(stream) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(endpoint = %endpoint, error = %e, "failed to set TCP_NODELAY");
                    }
                    debug!(endpoint = %endpoint, "tcp connection established");
                    return Ok(Box::new(stream));
                },
                Err(e) => {
                    debug!(endpoint = %endpoint, error = %e, "endpoint refused connection");
                    last_error = Some(e);
                },
            }
        }

        Err(DeliveryError::connect(
            last_error.map_or_else(|| "no endpoints to connect to".to_string(), |e| e.to_string()),
        ))
    }

    async fn handshake(&self, host: &str, stream: BoxedStream) -> Result<BoxedStream> {
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| DeliveryError::tls(format!("invalid server name '{host}': {e}")))?;

        let tls_stream = self
            .tls
            .connect(server_name, stream)
            .await
            .map_err(|e| DeliveryError::tls(e.to_string()))?;

        Ok(Box::new(tls_stream))
    }
}

/// TLS 1.2 and 1.3 client configuration trusting the webpki roots.
///
/// # Errors
///
/// Returns `DeliveryError::Tls` if the provider rejects the protocol set.
pub fn default_tls_config() -> Result<Arc<rustls::ClientConfig>> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])
    .map_err(|e| DeliveryError::tls(e.to_string()))?
    .with_root_certificates(roots)
    .with_no_client_auth();

    Ok(Arc::new(config))
}

/// Shuts the stream down, sending `close_notify` first on TLS.
///
/// Errors are logged, never returned. A peer that already went away
/// without a clean TLS shutdown counts as a normal close.
pub async fn shutdown(stream: &mut BoxedStream) {
    match stream.shutdown().await {
        Ok(()) => debug!("connection closed gracefully"),
        Err(e) if is_truncation(&e) => info!("connection closed by server"),
        Err(e) => debug!(error = %e, "connection shutdown failed"),
    }
}

fn is_truncation(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::UnexpectedEof | io::ErrorKind::NotConnected | io::ErrorKind::BrokenPipe
    )
}
