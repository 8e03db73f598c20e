//! Crate-wide error taxonomy: one typed error per layer, `thiserror`-backed.
//!
//! `anyhow` is reserved for the `src/bin/` entry points; everything below
//! this line is a concrete enum a caller can match on.

use crate::protocol::{FrameError, MessageType};
use thiserror::Error;

/// Errors surfaced by the AESP server while servicing a connection.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("payload error: {0}")]
    Payload(#[from] crate::protocol::PayloadError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected message type on this channel: {0:?}")]
    UnexpectedMessageType(MessageType),

    #[error("delegate rejected message: {0}")]
    Delegate(String),
}

/// Errors surfaced by the AESP client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("payload error: {0}")]
    Payload(#[from] crate::protocol::PayloadError),

    #[error("request timed out waiting for a response")]
    Timeout,

    #[error("channel is not connected")]
    NotConnected,

    #[error("server returned an error frame: code {code}, {message}")]
    ServerError { code: u8, message: String },

    #[error("connection closed before a response arrived")]
    ConnectionClosed,
}
