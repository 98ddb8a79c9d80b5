//! HTTP over multiplexed streams.
//!
//! Each request becomes one stream: a SYN_STREAM carrying the request line
//! and headers, optional data frames with the body, and a SYN_REPLY plus data
//! frames coming back.
//!
//! # Example
//!
//! ```no_run
//! use seacat_client::http::HttpClient;
//! # async fn demo(reactor: std::sync::Arc<seacat_client::Reactor>) -> seacat_client::Result<()> {
//! let client = HttpClient::new(reactor);
//! let response = client.get("http://api.seacat/posts/1/comments").await?;
//! println!("{} {}", response.status(), response.body().text().await?);
//! # Ok(())
//! # }
//! ```

mod body;
mod client;
mod inbound;
mod outbound;
mod sender;

pub use body::Body;
pub use client::HttpClient;
pub use inbound::InboundStream;
pub use outbound::OutboundStream;
pub use sender::{HttpSender, ResponseHead, HANDLER_ID_HEADER, RESET_STATUS};
