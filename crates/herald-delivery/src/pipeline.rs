//! Request encoding and bounded response parsing.
//!
//! One request per exchange, HTTP/1.1, no pipelining. The response reader
//! only needs the status line and enough of the headers to decide whether
//! the connection can be reused, but it still consumes the body so the
//! next request starts on a clean stream.

use std::io;

use bytes::{BufMut, Bytes, BytesMut};
use herald_core::Destination;
use http::header;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{DeliveryError, Result};

/// Default ceiling for a response body, in bytes.
pub const DEFAULT_RESPONSE_BODY_LIMIT: usize = 8192;

/// Largest response head accepted before giving up.
pub const HEADER_BUFFER_LIMIT: usize = 16 * 1024;

const MAX_HEADERS: usize = 64;
const READ_CHUNK: usize = 4096;

/// The parts of a response the connection machine acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHead {
    /// HTTP status code.
    pub status: u16,
    /// Whether the connection may carry another request.
    pub keep_alive: bool,
    /// Declared body length, if any.
    pub content_length: Option<usize>,
}

impl ResponseHead {
    /// Status is in `200..300`.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Body framing of a parsed response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Empty,
    Sized(usize),
    Chunked,
    UntilClose,
}

/// Encodes a POST of `payload` to the destination path.
pub fn encode_request(destination: &Destination, payload: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(256 + payload.len());

    buf.put_slice(b"POST ");
    buf.put_slice(destination.path().as_bytes());
    buf.put_slice(b" HTTP/1.1\r\n");

    for (name, value) in destination.headers() {
        buf.put_slice(name.as_str().as_bytes());
        buf.put_slice(b": ");
        buf.put_slice(value.as_bytes());
        buf.put_slice(b"\r\n");
    }

    buf.put_slice(format!("content-length: {}\r\n\r\n", payload.len()).as_bytes());
    buf.put_slice(payload.as_bytes());

    buf.freeze()
}

/// Writes an encoded request and flushes the stream.
///
/// # Errors
///
/// Returns `DeliveryError::Write` if the transport rejects the bytes.
pub async fn write_request<S>(stream: &mut S, request: &[u8]) -> Result<()>
where
    S: AsyncWrite + Unpin + ?Sized,
{
    stream.write_all(request).await.map_err(|e| DeliveryError::write(e.to_string()))?;
    stream.flush().await.map_err(|e| DeliveryError::write(e.to_string()))
}

/// Reads one response, consuming its body up to `body_limit` bytes.
///
/// A TLS peer that closes without `close_notify` is treated as a plain end
/// of stream, so it only fails the exchange if the response was cut short.
///
/// # Errors
///
/// Returns `DeliveryError::Read` for transport errors,
/// `DeliveryError::IncompleteResponse` if the stream ends early,
/// `DeliveryError::MalformedResponse` / `HeaderLimitExceeded` for a bad
/// head, and `DeliveryError::BodyLimitExceeded` for an oversized body.
pub async fn read_response<S>(stream: &mut S, body_limit: usize) -> Result<ResponseHead>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let mut buf = BytesMut::with_capacity(READ_CHUNK);

    let (head, framing, head_len) = loop {
        if let Some(parsed) = parse_head(&buf)? {
            break parsed;
        }
        if buf.len() >= HEADER_BUFFER_LIMIT {
            return Err(DeliveryError::HeaderLimitExceeded { limit: HEADER_BUFFER_LIMIT });
        }
        if fill(stream, &mut buf).await? == 0 {
            return Err(DeliveryError::IncompleteResponse);
        }
    };

    match framing {
        Framing::Empty => {},
        Framing::Sized(len) => {
            if len > body_limit {
                return Err(DeliveryError::BodyLimitExceeded { limit: body_limit });
            }
            while buf.len() - head_len < len {
                if fill(stream, &mut buf).await? == 0 {
                    return Err(DeliveryError::IncompleteResponse);
                }
            }
        },
        Framing::Chunked => drain_chunked(stream, &mut buf, head_len, body_limit).await?,
        Framing::UntilClose => loop {
            if buf.len() - head_len > body_limit {
                return Err(DeliveryError::BodyLimitExceeded { limit: body_limit });
            }
            if fill(stream, &mut buf).await? == 0 {
                break;
            }
        },
    }

    Ok(head)
}

/// Best-effort numeric `Id` of a JSON payload, for log fields only.
pub fn extract_event_id(payload: &str) -> Option<u64> {
    let value: serde_json::Value = serde_json::from_str(payload).ok()?;
    value.get("Id")?.as_u64()
}

fn parse_head(buf: &[u8]) -> Result<Option<(ResponseHead, Framing, usize)>> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut response = httparse::Response::new(&mut headers);

    let head_len = match response.parse(buf) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(httparse::Error::TooManyHeaders) => {
            return Err(DeliveryError::HeaderLimitExceeded { limit: HEADER_BUFFER_LIMIT })
        },
        Err(e) => return Err(DeliveryError::malformed(e.to_string())),
    };

    let status = response.code.ok_or_else(|| DeliveryError::malformed("missing status code"))?;
    let minor_version = response.version.unwrap_or(1);

    let mut connection_close = false;
    let mut connection_keep_alive = false;
    let mut chunked = false;
    let mut content_length = None;

    for h in response.headers.iter() {
        if h.name.eq_ignore_ascii_case(header::CONNECTION.as_str()) {
            let value = String::from_utf8_lossy(h.value).to_ascii_lowercase();
            for token in value.split(',').map(str::trim) {
                match token {
                    "close" => connection_close = true,
                    "keep-alive" => connection_keep_alive = true,
                    _ => {},
                }
            }
        } else if h.name.eq_ignore_ascii_case(header::TRANSFER_ENCODING.as_str()) {
            let value = String::from_utf8_lossy(h.value).to_ascii_lowercase();
            chunked = value.split(',').map(str::trim).any(|t| t == "chunked");
        } else if h.name.eq_ignore_ascii_case(header::CONTENT_LENGTH.as_str()) {
            let len = std::str::from_utf8(h.value)
                .ok()
                .and_then(|v| v.trim().parse::<usize>().ok())
                .ok_or_else(|| DeliveryError::malformed("invalid content-length"))?;
            content_length = Some(len);
        }
    }

    let framing = if (100..200).contains(&status) || status == 204 || status == 304 {
        Framing::Empty
    } else if chunked {
        Framing::Chunked
    } else if let Some(len) = content_length {
        Framing::Sized(len)
    } else {
        Framing::UntilClose
    };

    let requested = if minor_version == 0 {
        connection_keep_alive && !connection_close
    } else {
        !connection_close
    };
    let keep_alive = requested && framing != Framing::UntilClose;

    Ok(Some((ResponseHead { status, keep_alive, content_length }, framing, head_len)))
}

async fn drain_chunked<S>(
    stream: &mut S,
    buf: &mut BytesMut,
    mut pos: usize,
    body_limit: usize,
) -> Result<()>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let mut body_len = 0usize;

    loop {
        let parsed = httparse::parse_chunk_size(&buf[pos..]);
        let (consumed, size) = match parsed {
            Ok(httparse::Status::Complete(chunk)) => chunk,
            Ok(httparse::Status::Partial) => {
                if fill(stream, buf).await? == 0 {
                    return Err(DeliveryError::IncompleteResponse);
                }
                continue;
            },
            Err(_) => return Err(DeliveryError::malformed("invalid chunk size")),
        };
        pos += consumed;

        if size == 0 {
            break;
        }

        let size = usize::try_from(size)
            .map_err(|_| DeliveryError::BodyLimitExceeded { limit: body_limit })?;
        body_len = body_len.saturating_add(size);
        if body_len > body_limit {
            return Err(DeliveryError::BodyLimitExceeded { limit: body_limit });
        }

        let chunk_end = pos + size + 2;
        while buf.len() < chunk_end {
            if fill(stream, buf).await? == 0 {
                return Err(DeliveryError::IncompleteResponse);
            }
        }
        if &buf[pos + size..chunk_end] != b"\r\n" {
            return Err(DeliveryError::malformed("chunk not terminated by CRLF"));
        }
        pos = chunk_end;
    }

    // Trailer section ends with an empty line.
    loop {
        let line_end = buf[pos..].windows(2).position(|w| w == b"\r\n");
        match line_end {
            Some(0) => return Ok(()),
            Some(len) => pos += len + 2,
            None => {
                if buf.len() - pos > HEADER_BUFFER_LIMIT {
                    return Err(DeliveryError::HeaderLimitExceeded { limit: HEADER_BUFFER_LIMIT });
                }
                if fill(stream, buf).await? == 0 {
                    return Err(DeliveryError::IncompleteResponse);
                }
            },
        }
    }
}

async fn fill<S>(stream: &mut S, buf: &mut BytesMut) -> Result<usize>
where
    S: AsyncRead + Unpin + ?Sized,
{
    buf.reserve(READ_CHUNK);
    match stream.read_buf(buf).await {
        Ok(n) => Ok(n),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(0),
        Err(e) => Err(DeliveryError::read(e.to_string())),
    }
}
