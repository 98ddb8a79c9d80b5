//! Client builder and session facade.
//!
//! The [`ClientBuilder`] provides a fluent API over [`ReactorConfig`]. The
//! [`Client`] owns one reactor session:
//! 1. Initialize the transport engine
//! 2. Start its run loop and wait until it is up
//! 3. Drive the link (`connect`, `disconnect`, `renew`, `reset`)
//! 4. Send HTTP requests over multiplexed streams
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use seacat_client::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::builder()
//!         .app_name("demo")
//!         .storage_dir("/var/lib/demo")
//!         .start(engine)
//!         .await?;
//!
//!     client.connect()?;
//!     if client.wait_ready(Duration::from_secs(30)).await {
//!         let response = client.http().get("http://api.seacat/posts/1").await?;
//!         println!("{}", response.body().text().await?);
//!     }
//!
//!     client.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::config::{ProxyConfig, ReactorConfig};
use crate::error::Result;
use crate::http::HttpClient;
use crate::keepalive::PingOutcome;
use crate::reactor::{Reactor, SeacatState, TransportEngine, Yield};

/// Builder for configuring and starting a client session.
///
/// Every setter has the default listed in [`ReactorConfig`].
#[derive(Debug, Clone, Default)]
pub struct ClientBuilder {
    config: ReactorConfig,
}

impl ClientBuilder {
    /// Create a builder with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration, e.g. one loaded from JSON.
    pub fn config(mut self, config: ReactorConfig) -> Self {
        self.config = config;
        self
    }

    /// Application name handed to the engine.
    ///
    /// Default: "seacat"
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.config.app_name = name.into();
        self
    }

    pub fn app_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.config.app_suffix = Some(suffix.into());
        self
    }

    /// Default: "rust"
    pub fn platform(mut self, platform: impl Into<String>) -> Self {
        self.config.platform = platform.into();
        self
    }

    /// Base directory for the engine state; `.seacat` is appended.
    pub fn storage_dir(mut self, dir: impl Into<String>) -> Self {
        self.config.storage_dir = dir.into();
        self
    }

    /// Suffix stripped from request hosts.
    ///
    /// Default: ".seacat"
    pub fn host_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.config.host_suffix = suffix.into();
        self
    }

    /// Frame pool watermarks. Buffers beyond `low` are dropped when returned;
    /// no more than `high` exist at once.
    ///
    /// Default: 16 / 40960
    pub fn pool_water_marks(mut self, low: usize, high: usize) -> Self {
        self.config.pool.low_water_mark = low;
        self.config.pool.high_water_mark = high;
        self
    }

    /// Size of each frame buffer.
    ///
    /// Default: 16384
    pub fn frame_capacity(mut self, capacity: usize) -> Self {
        self.config.pool.frame_capacity = capacity;
        self
    }

    /// Default: 5 seconds
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    /// How long a ping waits for its pong.
    ///
    /// Default: 60 seconds
    pub fn ping_timeout(mut self, timeout: Duration) -> Self {
        self.config.ping_timeout = timeout;
        self
    }

    /// Default: 5 seconds
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    /// Default request priority, 0 (first) to 7.
    ///
    /// Default: 3
    pub fn http_priority(mut self, priority: u8) -> Self {
        self.config.http.priority = priority.min(7);
        self
    }

    /// How long a request waits for its reply.
    ///
    /// Default: 3 minutes
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.config.http.response_timeout = timeout;
        self
    }

    /// Response body read timeout. Zero means 3 minutes.
    ///
    /// Default: 30 seconds
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.http.read_timeout = timeout;
        self
    }

    /// Request body flush timeout. Zero means 3 minutes.
    ///
    /// Default: 30 seconds
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.config.http.write_timeout = timeout;
        self
    }

    /// Request body frames queued per stream before writes wait.
    ///
    /// Default: 64
    pub fn max_pending_frames(mut self, limit: usize) -> Self {
        self.config.http.max_pending_frames = limit;
        self
    }

    /// Proxy applied every time the link starts connecting.
    pub fn proxy(mut self, host: impl Into<String>, port: u16) -> Self {
        self.config.proxy = Some(ProxyConfig {
            host: host.into(),
            port,
        });
        self
    }

    /// CSR subject field, e.g. `("CN", "device-42")`.
    pub fn csr(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.csr.insert(field.into(), value.into());
        self
    }

    /// Start a session on `engine`.
    ///
    /// This will:
    /// 1. Initialize the engine with the callback surface
    /// 2. Start the engine run loop on a blocking task
    /// 3. Wait until the loop reports it has started
    pub async fn start(self, engine: Arc<dyn TransportEngine>) -> Result<Client> {
        let reactor = Reactor::init(engine, self.config).await?;
        Ok(Client { reactor })
    }
}

/// A running session.
pub struct Client {
    reactor: Arc<Reactor>,
}

impl Client {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Ask the engine to connect to the gateway.
    pub fn connect(&self) -> Result<()> {
        self.reactor.yield_cmd(Yield::Connect)
    }

    /// Ask the engine to drop the gateway connection.
    pub fn disconnect(&self) -> Result<()> {
        self.reactor.yield_cmd(Yield::Disconnect)
    }

    /// Throw away the client identity and start over.
    pub fn reset(&self) -> Result<()> {
        self.reactor.yield_cmd(Yield::ResetIdentity)
    }

    /// Renew the client certificate.
    pub fn renew(&self) -> Result<()> {
        self.reactor.yield_cmd(Yield::RenewCert)
    }

    pub fn state(&self) -> SeacatState {
        self.reactor.state()
    }

    pub fn client_id(&self) -> String {
        self.reactor.client_id()
    }

    pub fn client_tag(&self) -> String {
        self.reactor.client_tag()
    }

    pub fn is_ready(&self) -> bool {
        self.reactor.is_ready()
    }

    /// Wait until the gateway signed us in. Returns `false` on timeout.
    pub async fn wait_ready(&self, timeout: Duration) -> bool {
        self.reactor.wait_ready(timeout).await
    }

    /// Ping the gateway and wait for the pong, or for the ping to be
    /// cancelled by a timeout or a reset.
    pub async fn ping(&self) -> Result<PingOutcome> {
        let outcome = self.reactor.ping()?;
        Ok(outcome.await.unwrap_or(PingOutcome::Cancelled))
    }

    /// HTTP client using the configured priority and timeout.
    pub fn http(&self) -> HttpClient {
        HttpClient::new(self.reactor.clone())
    }

    pub fn set_proxy(&self, host: &str, port: u16) {
        self.reactor.set_proxy(host, port);
    }

    pub fn reactor(&self) -> &Arc<Reactor> {
        &self.reactor
    }

    /// Stop the engine and wait for its run loop to finish.
    pub async fn shutdown(self) -> Result<()> {
        self.reactor.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_default() {
        let builder = ClientBuilder::default();
        assert_eq!(builder.config, ReactorConfig::default());
    }

    #[test]
    fn test_builder_configuration() {
        let builder = Client::builder()
            .app_name("demo")
            .storage_dir("/tmp/demo")
            .pool_water_marks(4, 128)
            .frame_capacity(4096)
            .http_priority(1)
            .response_timeout(Duration::from_secs(10))
            .max_pending_frames(8)
            .proxy("proxy.local", 3128)
            .csr("CN", "device-42");

        let config = builder.config;
        assert_eq!(config.app_name, "demo");
        assert_eq!(config.engine_storage_dir(), "/tmp/demo/.seacat");
        assert_eq!(config.pool.low_water_mark, 4);
        assert_eq!(config.pool.high_water_mark, 128);
        assert_eq!(config.pool.frame_capacity, 4096);
        assert_eq!(config.http.priority, 1);
        assert_eq!(config.http.response_timeout, Duration::from_secs(10));
        assert_eq!(config.http.max_pending_frames, 8);
        assert_eq!(
            config.proxy,
            Some(ProxyConfig {
                host: "proxy.local".to_string(),
                port: 3128
            })
        );
        assert_eq!(config.csr.get("CN").map(String::as_str), Some("device-42"));
    }

    #[test]
    fn test_priority_is_clamped() {
        let builder = Client::builder().http_priority(12);
        assert_eq!(builder.config.http.priority, 7);
    }
}
