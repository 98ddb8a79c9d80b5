//! # seacat-client
//!
//! Client-side core of a multiplexing transport that carries HTTP exchanges
//! to a gateway over one long-lived connection, using a SPDY-derived framing
//! protocol.
//!
//! The TLS link itself belongs to a native transport engine, reached through
//! the [`TransportEngine`] trait. This crate supplies the callback surface
//! the engine drives ([`CoreCallbacks`]) and everything above it.
//!
//! ## Architecture
//!
//! - **Protocol**: 8-byte frame headers, VLE strings, pooled frame buffers
//! - **Streams**: id allocation and routing of inbound frames per stream
//! - **Reactor**: provider scheduling by priority, dispatch, engine lifecycle
//! - **Keepalive**: ping/pong with deadlines
//! - **HTTP**: one stream per request, body streaming in both directions
//!
//! ## Example
//!
//! ```ignore
//! use seacat_client::Client;
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = Client::builder()
//!         .app_name("demo")
//!         .start(engine)
//!         .await
//!         .unwrap();
//!
//!     client.connect().unwrap();
//!     let response = client.http().get("http://api.seacat/status").await.unwrap();
//!     assert_eq!(response.status(), 200);
//! }
//! ```

pub mod backpressure;
pub mod config;
pub mod error;
pub mod http;
pub mod keepalive;
pub mod protocol;
pub mod reactor;
pub mod stream;

mod client;

pub use client::{Client, ClientBuilder};
pub use config::ReactorConfig;
pub use error::{Result, SeacatError};
pub use crate::http::{Body, HttpClient, InboundStream};
pub use keepalive::PingOutcome;
pub use reactor::{CoreCallbacks, Reactor, TransportEngine, Yield};
