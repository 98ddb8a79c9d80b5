//! Request entry point.

use std::sync::Arc;
use std::time::Duration;

use http::header::{CONTENT_LENGTH, HOST};
use http::{Request, Response};

use super::body::Body;
use super::inbound::InboundStream;
use super::sender::HttpSender;
use crate::config::non_zero_or_fallback;
use crate::error::{Result, SeacatError};
use crate::protocol::{Headers, SynStream};
use crate::reactor::Reactor;

/// Sends `http` requests over the reactor's gateway connection.
///
/// Cheap to clone; every request gets its own stream.
#[derive(Clone)]
pub struct HttpClient {
    reactor: Arc<Reactor>,
    priority: u8,
    timeout: Duration,
}

impl HttpClient {
    /// Priority and reply timeout come from the reactor's `http` config.
    pub fn new(reactor: Arc<Reactor>) -> Self {
        let http = &reactor.config().http;
        let priority = http.priority;
        let timeout = non_zero_or_fallback(http.response_timeout);
        Self {
            reactor,
            priority,
            timeout,
        }
    }

    /// Stream priority, 0 (first) to 7.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(7);
        self
    }

    /// How long to wait for the SYN_REPLY. Zero means the 3 minute default.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = non_zero_or_fallback(timeout);
        self
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send a request and wait for the response head.
    ///
    /// The host comes from the URI, or from the `Host` header for a
    /// path-only URI. The body streams in the background while the request
    /// is set up.
    pub async fn send(&self, request: Request<Body>) -> Result<Response<InboundStream>> {
        let (parts, body) = request.into_parts();

        let host = match parts.uri.host() {
            Some(host) => host.to_string(),
            None => parts
                .headers
                .get(HOST)
                .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
                .ok_or_else(|| SeacatError::Protocol(format!("No host in request to {}", parts.uri)))?,
        };
        let path = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .filter(|pq| !pq.is_empty())
            .unwrap_or("/")
            .to_string();

        let mut headers: Headers = parts
            .headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        if let Some(length) = body.content_length().filter(|len| *len > 0) {
            if !headers.contains(CONTENT_LENGTH.as_str()) {
                headers.set(CONTENT_LENGTH.as_str(), length.to_string());
            }
        }

        let syn = SynStream {
            stream_id: 0,
            priority: self.priority,
            host,
            method: parts.method.as_str().to_string(),
            path,
            headers,
        };
        HttpSender::send(&self.reactor, syn, body, self.timeout).await
    }

    /// `GET` without a body.
    pub async fn get(&self, uri: &str) -> Result<Response<InboundStream>> {
        let request = Request::get(uri).body(Body::Empty)?;
        self.send(request).await
    }
}
