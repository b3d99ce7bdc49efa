//! Wiremock-backed subscriber for tests that need a real HTTP server.

use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer as WiremockServer, ResponseTemplate,
};

/// HTTP mock server accepting event POSTs.
pub struct MockServer {
    server: WiremockServer,
}

impl MockServer {
    /// Starts a new mock server on a random port.
    pub async fn start() -> Self {
        Self { server: WiremockServer::start().await }
    }

    /// Base URL of the mock server.
    pub fn url(&self) -> String {
        self.server.uri()
    }

    /// Full URL for `path`.
    pub fn url_for(&self, path: &str) -> String {
        format!("{}{path}", self.server.uri())
    }

    /// Answers every JSON POST to `endpoint` with `status`.
    pub async fn mock_status(&self, endpoint: &str, status: u16) {
        Mock::given(method("POST"))
            .and(path(endpoint))
            .and(header("content-type", "application/json"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Answers the next `times` POSTs to `endpoint` with `status`.
    ///
    /// Mounts with a higher priority than `mock_status`, so a sequence of
    /// failures followed by a catch-all success can be expressed as
    /// `mock_status_times(path, 503, 2)` plus `mock_status(path, 200)`.
    pub async fn mock_status_times(&self, endpoint: &str, status: u16, times: u64) {
        Mock::given(method("POST"))
            .and(path(endpoint))
            .respond_with(ResponseTemplate::new(status))
            .up_to_n_times(times)
            .with_priority(1)
            .mount(&self.server)
            .await;
    }

    /// Bodies of every request received so far, in arrival order.
    pub async fn received_bodies(&self) -> Vec<String> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .map(|request| String::from_utf8_lossy(&request.body).into_owned())
            .collect()
    }

    /// Asserts that exactly `expected` requests were received.
    pub async fn assert_request_count(&self, expected: usize) {
        let received = self.received_bodies().await.len();
        assert_eq!(received, expected, "expected {expected} requests, received {received}");
    }
}
