//! Scriptable raw-TCP HTTP subscriber.
//!
//! Unlike a full HTTP server, `MockSubscriber` answers each request with the
//! exact bytes a test asks for: a status with or without keep-alive, a
//! hang-up without any response, or arbitrary raw bytes. It records every
//! request body and counts accepted connections, which is what keep-alive
//! and reconnect tests need to observe.

use std::{
    collections::VecDeque,
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use anyhow::{Context, Result};
use bytes::BytesMut;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};
use tracing::debug;

/// How the subscriber answers one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Status with an empty body, connection kept open.
    Status(u16),
    /// Status with `Connection: close`, then the socket is closed.
    StatusAndClose(u16),
    /// Raw bytes written verbatim; the connection stays open.
    Raw(Vec<u8>),
    /// Close the socket without answering.
    HangUp,
}

impl Reply {
    fn encode(&self) -> Option<Vec<u8>> {
        match self {
            Self::Status(status) => Some(
                format!("HTTP/1.1 {status} {}\r\ncontent-length: 0\r\n\r\n", reason(*status))
                    .into_bytes(),
            ),
            Self::StatusAndClose(status) => Some(
                format!(
                    "HTTP/1.1 {status} {}\r\nconnection: close\r\ncontent-length: 0\r\n\r\n",
                    reason(*status)
                )
                .into_bytes(),
            ),
            Self::Raw(bytes) => Some(bytes.clone()),
            Self::HangUp => None,
        }
    }

    fn closes(&self) -> bool {
        matches!(self, Self::StatusAndClose(_) | Self::HangUp)
    }
}

/// A request as seen by the subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    /// Request method.
    pub method: String,
    /// Request target.
    pub path: String,
    /// Header names (lowercased) and values in arrival order.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: String,
    /// Index of the connection that carried it (0-based).
    pub connection: usize,
}

impl RecordedRequest {
    /// First value of a header, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers.iter().find(|(n, _)| *n == name).map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Default)]
struct Shared {
    script: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<RecordedRequest>>,
    connections: AtomicUsize,
}

/// Local HTTP/1.1 listener with scripted replies.
///
/// Replies are consumed in order, one per request, across all
/// connections. Once the script runs out every request gets `200`.
#[derive(Debug)]
pub struct MockSubscriber {
    addr: SocketAddr,
    shared: Arc<Shared>,
    accept_task: JoinHandle<()>,
}

impl MockSubscriber {
    /// Starts a subscriber that answers every request with `200`.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot bind to localhost.
    pub async fn start() -> Result<Self> {
        Self::with_script(Vec::new()).await
    }

    /// Starts a subscriber that plays `script` before falling back to `200`.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot bind to localhost.
    pub async fn with_script(script: Vec<Reply>) -> Result<Self> {
        let listener =
            TcpListener::bind("127.0.0.1:0").await.context("failed to bind mock subscriber")?;
        let addr = listener.local_addr()?;
        let shared = Arc::new(Shared { script: Mutex::new(script.into()), ..Shared::default() });

        let accept_shared = shared.clone();
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, peer)) = listener.accept().await {
                let connection = accept_shared.connections.fetch_add(1, Ordering::SeqCst);
                debug!(peer = %peer, connection, "mock subscriber accepted connection");
                tokio::spawn(serve_connection(stream, connection, accept_shared.clone()));
            }
        });

        Ok(Self { addr, shared, accept_task })
    }

    /// Listening address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `http://127.0.0.1:<port><path>`.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    /// Appends replies to the script.
    pub fn push_replies(&self, replies: impl IntoIterator<Item = Reply>) {
        if let Ok(mut script) = self.shared.script.lock() {
            script.extend(replies);
        }
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.shared.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Bodies of the requests received so far, in arrival order.
    pub fn bodies(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.body).collect()
    }

    /// Number of TCP connections accepted so far.
    pub fn connection_count(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }
}

impl Drop for MockSubscriber {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve_connection(mut stream: TcpStream, connection: usize, shared: Arc<Shared>) {
    let mut buf = BytesMut::with_capacity(4096);

    loop {
        let request = match read_request(&mut stream, &mut buf, connection).await {
            Ok(Some(request)) => request,
            Ok(None) => return,
            Err(e) => {
                debug!(connection, error = %e, "mock subscriber failed to read request");
                return;
            },
        };

        if let Ok(mut requests) = shared.requests.lock() {
            requests.push(request);
        }

        let reply = shared
            .script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front())
            .unwrap_or(Reply::Status(200));

        if let Some(bytes) = reply.encode() {
            if stream.write_all(&bytes).await.is_err() {
                return;
            }
        }

        if reply.closes() {
            let _ = stream.shutdown().await;
            return;
        }
    }
}

async fn read_request(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
    connection: usize,
) -> Result<Option<RecordedRequest>> {
    loop {
        if let Some((request, consumed)) = parse_request(buf, connection)? {
            let _ = buf.split_to(consumed);
            return Ok(Some(request));
        }
        if stream.read_buf(buf).await? == 0 {
            return Ok(None);
        }
    }
}

fn parse_request(buf: &[u8], connection: usize) -> Result<Option<(RecordedRequest, usize)>> {
    let mut headers = [httparse::EMPTY_HEADER; 64];
    let mut request = httparse::Request::new(&mut headers);

    let head_len = match request.parse(buf)? {
        httparse::Status::Complete(len) => len,
        httparse::Status::Partial => return Ok(None),
    };

    let headers: Vec<(String, String)> = request
        .headers
        .iter()
        .map(|h| (h.name.to_ascii_lowercase(), String::from_utf8_lossy(h.value).into_owned()))
        .collect();
    let content_length = headers
        .iter()
        .find(|(name, _)| name == "content-length")
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    if buf.len() < head_len + content_length {
        return Ok(None);
    }

    let body = String::from_utf8_lossy(&buf[head_len..head_len + content_length]).into_owned();
    let recorded = RecordedRequest {
        method: request.method.unwrap_or_default().to_string(),
        path: request.path.unwrap_or_default().to_string(),
        headers,
        body,
        connection,
    };

    Ok(Some((recorded, head_len + content_length)))
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Status",
    }
}
