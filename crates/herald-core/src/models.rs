//! Destination identity and strongly-typed identifiers.
//!
//! A `Destination` is fixed for the lifetime of a delivery client: host,
//! port, request target, scheme, and the header set every request carries.
//! Nothing in here changes once the client has been created.

use std::{fmt, str::FromStr};

use http::{header, HeaderMap, HeaderName, HeaderValue, Uri};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Identifier of the event subscription a destination belongs to.
///
/// Subscription managers hand these out (Redfish uses short numeric
/// strings), so the value is kept opaque.
///
/// # Example
///
/// ```
/// use herald_core::models::SubscriptionId;
/// let id = SubscriptionId::new("17");
/// assert_eq!(id.to_string(), "17");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub String);

impl SubscriptionId {
    /// Creates a subscription id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SubscriptionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SubscriptionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Protocol scheme of a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// Plain HTTP over TCP.
    Http,
    /// HTTP over TLS.
    Https,
}

impl Scheme {
    /// Port used when the URL does not name one.
    pub fn default_port(self) -> u16 {
        match self {
            Self::Http => 80,
            Self::Https => 443,
        }
    }

    /// Whether a TLS layer wraps the TCP stream.
    pub fn is_tls(self) -> bool {
        matches!(self, Self::Https)
    }

    /// Lowercase scheme name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scheme {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "https" => Ok(Self::Https),
            _ => Err(CoreError::UnsupportedScheme(s.to_string())),
        }
    }
}

/// Remote event subscriber a client delivers payloads to.
///
/// The header set is assembled once: subscriber-supplied headers first,
/// then the headers the client manages itself (`Host`, `Content-Type`,
/// `Connection`). Managed headers cannot be overridden by the subscriber.
#[derive(Debug, Clone)]
pub struct Destination {
    subscription_id: SubscriptionId,
    scheme: Scheme,
    host: String,
    port: u16,
    path: String,
    headers: HeaderMap,
}

impl Destination {
    /// Creates a destination from its parts.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidDestination` for an empty host or a path
    /// that does not start with `/`, and `CoreError::InvalidHeader` for a
    /// header name or value that is not valid HTTP.
    pub fn new(
        subscription_id: impl Into<SubscriptionId>,
        scheme: Scheme,
        host: impl Into<String>,
        port: u16,
        path: impl Into<String>,
        extra_headers: &[(String, String)],
    ) -> Result<Self> {
        let host = host.into();
        let path = path.into();

        if host.trim().is_empty() {
            return Err(CoreError::InvalidDestination("host must not be empty".to_string()));
        }
        if !path.starts_with('/') {
            return Err(CoreError::InvalidDestination(format!(
                "path '{path}' must start with '/'"
            )));
        }

        let headers = build_headers(scheme, &host, port, extra_headers)?;

        Ok(Self { subscription_id: subscription_id.into(), scheme, host, port, path, headers })
    }

    /// Parses a destination from a subscriber URL such as
    /// `https://listener.example.com:8443/redfish/events`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidUrl` if the URL has no scheme or host,
    /// `CoreError::UnsupportedScheme` for anything but http/https, and the
    /// errors of [`Destination::new`].
    pub fn from_url(
        subscription_id: impl Into<SubscriptionId>,
        url: &str,
        extra_headers: &[(String, String)],
    ) -> Result<Self> {
        let uri: Uri = url.parse().map_err(|e| CoreError::invalid_url(url, format!("{e}")))?;

        let scheme: Scheme = uri
            .scheme_str()
            .ok_or_else(|| CoreError::invalid_url(url, "missing scheme"))?
            .parse()?;
        let host = uri.host().ok_or_else(|| CoreError::invalid_url(url, "missing host"))?;
        let host = host.trim_start_matches('[').trim_end_matches(']').to_string();
        let port = uri.port_u16().unwrap_or_else(|| scheme.default_port());
        let path = uri.path_and_query().map_or_else(|| "/".to_string(), |pq| pq.as_str().to_string());
        let path = if path.is_empty() { "/".to_string() } else { path };

        Self::new(subscription_id, scheme, host, port, path, extra_headers)
    }

    /// Subscription this destination belongs to.
    pub fn subscription_id(&self) -> &SubscriptionId {
        &self.subscription_id
    }

    /// Destination scheme.
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Host name or IP literal.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Request target (path plus optional query).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Header set sent with every request.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Whether the transport needs a TLS handshake.
    pub fn is_tls(&self) -> bool {
        self.scheme.is_tls()
    }

    /// `host:port` form used in log fields.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}{}", self.scheme, self.host, self.port, self.path)
    }
}

fn build_headers(
    scheme: Scheme,
    host: &str,
    port: u16,
    extra_headers: &[(String, String)],
) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();

    for (name, value) in extra_headers {
        if is_managed_header(name) {
            continue;
        }
        let header_name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|e| CoreError::invalid_header(name.as_str(), e.to_string()))?;
        let header_value = HeaderValue::from_str(value.trim())
            .map_err(|e| CoreError::invalid_header(name.as_str(), e.to_string()))?;
        headers.append(header_name, header_value);
    }

    let host_value = if port == scheme.default_port() {
        host.to_string()
    } else if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    };
    let host_value = HeaderValue::from_str(&host_value)
        .map_err(|e| CoreError::invalid_header("host", e.to_string()))?;

    headers.insert(header::HOST, host_value);
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));

    Ok(headers)
}

/// Headers the client sets itself; subscriber values for these are ignored.
fn is_managed_header(header_name: &str) -> bool {
    let lowercase = header_name.trim().to_lowercase();
    matches!(
        lowercase.as_str(),
        "content-length"
            | "content-type"
            | "host"
            | "connection"
            | "keep-alive"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_http_url() {
        let dest = Destination::from_url("1", "http://10.0.0.5:9000/events", &[]).unwrap();

        assert_eq!(dest.scheme(), Scheme::Http);
        assert_eq!(dest.host(), "10.0.0.5");
        assert_eq!(dest.port(), 9000);
        assert_eq!(dest.path(), "/events");
        assert!(!dest.is_tls());
        assert_eq!(dest.headers()[header::HOST], "10.0.0.5:9000");
    }

    #[test]
    fn defaults_port_and_path() {
        let dest = Destination::from_url("1", "https://listener.example.com", &[]).unwrap();

        assert_eq!(dest.port(), 443);
        assert_eq!(dest.path(), "/");
        assert!(dest.is_tls());
        assert_eq!(dest.headers()[header::HOST], "listener.example.com");
    }

    #[test]
    fn rejects_unsupported_scheme() {
        let err = Destination::from_url("1", "ftp://example.com/events", &[]).unwrap_err();
        assert_eq!(err, CoreError::UnsupportedScheme("ftp".to_string()));
    }

    #[test]
    fn rejects_url_without_scheme() {
        assert!(Destination::from_url("1", "/events", &[]).is_err());
    }

    #[test]
    fn managed_headers_cannot_be_overridden() {
        let extra = vec![
            ("Content-Type".to_string(), "text/plain".to_string()),
            ("X-Auth-Token".to_string(), "secret".to_string()),
        ];
        let dest = Destination::from_url("1", "http://example.com/events", &extra).unwrap();

        assert_eq!(dest.headers()[header::CONTENT_TYPE], "application/json");
        assert_eq!(dest.headers()["x-auth-token"], "secret");
        assert_eq!(dest.headers()[header::CONNECTION], "keep-alive");
    }

    #[test]
    fn invalid_header_is_reported() {
        let extra = vec![("Bad Header".to_string(), "value".to_string())];
        let err = Destination::from_url("1", "http://example.com/", &extra).unwrap_err();
        assert!(matches!(err, CoreError::InvalidHeader { .. }));
    }

    #[test]
    fn rejects_relative_path() {
        let err = Destination::new("1", Scheme::Http, "example.com", 80, "events", &[]).unwrap_err();
        assert!(matches!(err, CoreError::InvalidDestination(_)));
    }

    #[test]
    fn scheme_parsing_is_case_insensitive() {
        assert_eq!("HTTPS".parse::<Scheme>().unwrap(), Scheme::Https);
        assert_eq!(Scheme::Http.default_port(), 80);
    }
}
