//! Session configuration.
//!
//! Every knob has a default; a JSON document only needs the fields it wants
//! to override.
//!
//! # Example
//!
//! ```
//! use seacat_client::ReactorConfig;
//!
//! let config = ReactorConfig::from_json(r#"{ "app_name": "demo", "http": { "priority": 1 } }"#).unwrap();
//! assert_eq!(config.app_name, "demo");
//! assert_eq!(config.http.priority, 1);
//! assert_eq!(config.pool.high_water_mark, 40960);
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backpressure;
use crate::error::Result;

/// Directory name the engine keeps its state in, below `storage_dir`.
pub const STORAGE_SUFFIX: &str = ".seacat";

/// Fallback used when a read or write timeout is configured as zero.
pub const ZERO_TIMEOUT_FALLBACK: Duration = Duration::from_secs(3 * 60);

/// Top-level configuration for a [`Reactor`](crate::reactor::Reactor).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactorConfig {
    /// Application name handed to the engine.
    #[serde(default = "ReactorConfig::default_app_name")]
    pub app_name: String,

    /// Optional application id suffix handed to the engine.
    #[serde(default)]
    pub app_suffix: Option<String>,

    /// Platform tag handed to the engine.
    #[serde(default = "ReactorConfig::default_platform")]
    pub platform: String,

    /// Base directory for the engine's persistent state.
    #[serde(default = "ReactorConfig::default_storage_dir")]
    pub storage_dir: String,

    /// Suffix stripped from request hosts before they go on the wire.
    #[serde(default = "ReactorConfig::default_host_suffix")]
    pub host_suffix: String,

    /// Frame pool sizing.
    #[serde(default)]
    pub pool: PoolConfig,

    /// Returned from every heartbeat as the longest acceptable delay.
    #[serde(
        default = "ReactorConfig::default_heartbeat_interval",
        with = "duration_secs"
    )]
    pub heartbeat_interval: Duration,

    /// How long a ping waits for its pong.
    #[serde(default = "ReactorConfig::default_ping_timeout", with = "duration_secs")]
    pub ping_timeout: Duration,

    /// Bound on waiting for the engine run task after shutdown.
    #[serde(
        default = "ReactorConfig::default_shutdown_timeout",
        with = "duration_secs"
    )]
    pub shutdown_timeout: Duration,

    /// HTTP binding defaults.
    #[serde(default)]
    pub http: HttpConfig,

    /// Proxy applied whenever the link starts connecting.
    #[serde(default)]
    pub proxy: Option<ProxyConfig>,

    /// Certificate signing request subject fields (`CN`, `O`, `emailAddress`, ...).
    #[serde(default)]
    pub csr: BTreeMap<String, String>,
}

impl ReactorConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Storage directory with the `.seacat` component appended.
    pub fn engine_storage_dir(&self) -> String {
        let base = self.storage_dir.trim_end_matches('/');
        if base.ends_with(STORAGE_SUFFIX) {
            base.to_string()
        } else {
            format!("{}/{}", base, STORAGE_SUFFIX)
        }
    }

    fn default_app_name() -> String {
        "seacat".to_string()
    }

    fn default_platform() -> String {
        "rust".to_string()
    }

    fn default_storage_dir() -> String {
        ".".to_string()
    }

    fn default_host_suffix() -> String {
        ".seacat".to_string()
    }

    fn default_heartbeat_interval() -> Duration {
        Duration::from_secs(5)
    }

    fn default_ping_timeout() -> Duration {
        Duration::from_secs(60)
    }

    fn default_shutdown_timeout() -> Duration {
        Duration::from_secs(5)
    }
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            app_name: Self::default_app_name(),
            app_suffix: None,
            platform: Self::default_platform(),
            storage_dir: Self::default_storage_dir(),
            host_suffix: Self::default_host_suffix(),
            pool: PoolConfig::default(),
            heartbeat_interval: Self::default_heartbeat_interval(),
            ping_timeout: Self::default_ping_timeout(),
            shutdown_timeout: Self::default_shutdown_timeout(),
            http: HttpConfig::default(),
            proxy: None,
            csr: BTreeMap::new(),
        }
    }
}

/// Frame pool watermarks and buffer size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Idle buffers kept around; extra ones are freed on give-back.
    pub low_water_mark: usize,
    /// Hard cap on buffers in existence.
    pub high_water_mark: usize,
    /// Size of every buffer in bytes.
    pub frame_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            low_water_mark: 16,
            high_water_mark: 40960,
            frame_capacity: 16 * 1024,
        }
    }
}

/// Defaults for HTTP exchanges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Priority of request frames (lower is sent first, 0..=7 on the wire).
    pub priority: u8,
    /// Wait for SYN_REPLY when the request sets no timeout.
    #[serde(with = "duration_secs")]
    pub response_timeout: Duration,
    /// Wait for a response body frame. Zero means three minutes.
    #[serde(with = "duration_secs")]
    pub read_timeout: Duration,
    /// Wait for room in the outbound queue. Zero means three minutes.
    #[serde(with = "duration_secs")]
    pub write_timeout: Duration,
    /// Outbound body frames queued per request before writes wait.
    pub max_pending_frames: usize,
}

impl HttpConfig {
    /// Read timeout with the zero fallback applied.
    pub fn effective_read_timeout(&self) -> Duration {
        non_zero_or_fallback(self.read_timeout)
    }

    /// Write timeout with the zero fallback applied.
    pub fn effective_write_timeout(&self) -> Duration {
        non_zero_or_fallback(self.write_timeout)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            priority: 3,
            response_timeout: Duration::from_secs(3 * 60),
            read_timeout: Duration::from_secs(30),
            write_timeout: backpressure::DEFAULT_TIMEOUT,
            max_pending_frames: backpressure::DEFAULT_MAX_PENDING,
        }
    }
}

/// HTTP proxy the engine should tunnel through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
}

pub(crate) fn non_zero_or_fallback(timeout: Duration) -> Duration {
    if timeout.is_zero() {
        ZERO_TIMEOUT_FALLBACK
    } else {
        timeout
    }
}

/// Durations as (fractional) seconds in JSON.
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
