//! AESP - Attic Emulator Server Protocol
//!
//! A framed binary protocol for remotely controlling a running Atari
//! 800 XL emulator process over three independent TCP channels
//! (Control, Video, Audio), plus a companion line-oriented CLI text
//! protocol over a Unix-domain socket.
//!
//! # Features
//! - **Framed binary protocol**: fixed 8-byte header, big-endian fields,
//!   a disjoint message-type taxonomy by numeric range.
//! - **Pub/sub channels**: independent Video/Audio subscriber fan-out,
//!   each subscriber paced independently.
//! - **Capability-trait delegate**: `server::Delegate` instead of global
//!   delegate state, so more than one server can run per process.
//! - **CLI text protocol**: a separate, AESP-independent transport for
//!   scripting and bridging.
//!
//! # Quick Start
//! ```rust,no_run
//! use aesp::{Server, ServerConfig};
//! use aesp::server::{Delegate, ClientId, BoxFuture};
//! use aesp::protocol::Frame;
//! use std::sync::Arc;
//!
//! struct NoopDelegate;
//! impl Delegate for NoopDelegate {
//!     fn on_message(&self, _client: ClientId, _frame: Frame) -> BoxFuture<'_, Option<Frame>> {
//!         Box::pin(async { None })
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::new(ServerConfig::default(), Arc::new(NoopDelegate));
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod server;

pub use client::Client;
pub use config::{ChannelPorts, ClientConfig, ServerConfig};
pub use error::{ClientError, ProtocolError};
pub use protocol::{Channel, Frame, FrameError, MessageType};
pub use server::{Delegate, Server};

/// Crate version, exposed for `INFO` responses and diagnostics.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol name, exposed for `INFO` responses and diagnostics.
pub const PROTOCOL_NAME: &str = "aesp";

/// Only protocol version this crate speaks.
pub fn is_supported_version(version: u8) -> bool {
    version == protocol::VERSION
}
