//! Server/client configuration.
//!
//! `ServerConfig` mirrors the shape of the teacher crate's own
//! `ServerConfig`: plain-old-data with a `Default` impl good enough to
//! run in-process. Both configs derive `serde::Deserialize` so a binary
//! entry point embedding its own config format can reuse these structs
//! directly; no file format is parsed here.

use serde::{Deserialize, Serialize};

/// The three TCP ports an AESP server listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelPorts {
    pub control: u16,
    pub video: u16,
    pub audio: u16,
}

impl Default for ChannelPorts {
    fn default() -> Self {
        Self {
            control: 47800,
            video: 47801,
            audio: 47802,
        }
    }
}

/// AESP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind host for all three channels (distinct ports, shared host).
    pub host: String,
    pub ports: ChannelPorts,
    /// Per-connection outbound queue depth before unicast sends start
    /// closing the connection and broadcast sends start dropping frames.
    pub outbound_queue_depth: usize,
    /// How long a connection may go without traffic before it's dropped.
    pub idle_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            ports: ChannelPorts::default(),
            outbound_queue_depth: 64,
            idle_timeout_secs: 300,
        }
    }
}

impl ServerConfig {
    pub fn control_addr(&self) -> String {
        format!("{}:{}", self.host, self.ports.control)
    }

    pub fn video_addr(&self) -> String {
        format!("{}:{}", self.host, self.ports.video)
    }

    pub fn audio_addr(&self) -> String {
        format!("{}:{}", self.host, self.ports.audio)
    }
}

/// AESP client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub host: String,
    pub ports: ChannelPorts,
    pub request_timeout_secs: u64,
    /// Capacity of the bounded channel backing a video/audio stream.
    pub stream_buffer_depth: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            ports: ChannelPorts::default(),
            request_timeout_secs: 5,
            stream_buffer_depth: 32,
        }
    }
}

impl ClientConfig {
    pub fn control_addr(&self) -> String {
        format!("{}:{}", self.host, self.ports.control)
    }

    pub fn video_addr(&self) -> String {
        format!("{}:{}", self.host, self.ports.video)
    }

    pub fn audio_addr(&self) -> String {
        format!("{}:{}", self.host, self.ports.audio)
    }
}
