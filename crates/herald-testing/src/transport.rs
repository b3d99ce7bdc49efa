//! Resolver and connector doubles.
//!
//! These let client tests reach a local listener under any hostname, fail
//! a chosen number of connects, or stall forever, without touching DNS.

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use herald_delivery::{BoxedStream, Connector, DeliveryError, Resolver, Result};
use tokio::net::TcpStream;

/// Resolves every host to a fixed set of addresses.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    addrs: Vec<SocketAddr>,
    calls: Arc<AtomicUsize>,
}

impl StaticResolver {
    /// Resolver answering with `addrs`. The port of each address is kept
    /// as-is; the requested port is ignored.
    pub fn new(addrs: impl IntoIterator<Item = SocketAddr>) -> Self {
        Self { addrs: addrs.into_iter().collect(), calls: Arc::default() }
    }

    /// Resolver answering with an empty list.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of lookups performed.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn resolve(&self, _host: &str, _port: u16) -> Result<Vec<SocketAddr>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.addrs.clone())
    }
}

/// Resolver whose every lookup fails.
#[derive(Debug, Clone, Default)]
pub struct FailingResolver {
    calls: Arc<AtomicUsize>,
}

impl FailingResolver {
    /// Creates the resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of lookups performed.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Resolver for FailingResolver {
    async fn resolve(&self, host: &str, _port: u16) -> Result<Vec<SocketAddr>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(DeliveryError::resolve(host, "name or service not known"))
    }
}

/// Plain TCP connector that refuses a scripted number of attempts.
///
/// Handshakes always fail, so the connector is only suitable for `http`
/// destinations or for exercising TLS failure handling.
#[derive(Debug, Clone)]
pub struct ScriptedConnector {
    failures: Option<usize>,
    attempts: Arc<AtomicUsize>,
    handshakes: Arc<AtomicUsize>,
}

impl ScriptedConnector {
    /// Connector that refuses every attempt.
    pub fn always_failing() -> Self {
        Self { failures: None, attempts: Arc::default(), handshakes: Arc::default() }
    }

    /// Connector that refuses the first `failures` attempts, then connects
    /// over plain TCP.
    pub fn failing_first(failures: usize) -> Self {
        Self { failures: Some(failures), attempts: Arc::default(), handshakes: Arc::default() }
    }

    /// Connector that always connects over plain TCP.
    pub fn passthrough() -> Self {
        Self::failing_first(0)
    }

    /// Connect attempts so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Handshake attempts so far.
    pub fn handshakes(&self) -> usize {
        self.handshakes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, endpoints: &[SocketAddr]) -> Result<BoxedStream> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failures.map_or(true, |failures| attempt < failures) {
            return Err(DeliveryError::connect("connection refused"));
        }

        let endpoint = endpoints
            .first()
            .ok_or_else(|| DeliveryError::connect("no endpoints to connect to"))?;
        let stream = TcpStream::connect(*endpoint)
            .await
            .map_err(|e| DeliveryError::connect(e.to_string()))?;
        Ok(Box::new(stream))
    }

    async fn handshake(&self, _host: &str, _stream: BoxedStream) -> Result<BoxedStream> {
        self.handshakes.fetch_add(1, Ordering::SeqCst);
        Err(DeliveryError::tls("certificate verify failed"))
    }
}

/// Connector whose connects never complete.
#[derive(Debug, Clone, Copy, Default)]
pub struct StallingConnector;

#[async_trait]
impl Connector for StallingConnector {
    async fn connect(&self, _endpoints: &[SocketAddr]) -> Result<BoxedStream> {
        std::future::pending().await
    }

    async fn handshake(&self, _host: &str, _stream: BoxedStream) -> Result<BoxedStream> {
        std::future::pending().await
    }
}
