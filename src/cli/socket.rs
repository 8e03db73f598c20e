//! Unix-domain socket discovery and connection handshake for the CLI
//! transport: `/tmp/attic-<pid>.sock`, discovered by scanning `/tmp` for
//! `attic-*.sock` entries and picking the most recently modified one.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

#[derive(Debug, Error)]
pub enum SocketDiscoveryError {
    #[error("no attic-*.sock found under {dir}")]
    NotFound { dir: String },

    #[error("i/o error scanning for sockets: {0}")]
    Io(#[from] std::io::Error),

    #[error("handshake with {path} timed out")]
    HandshakeTimeout { path: String },

    #[error("handshake with {path} failed: {reason}")]
    HandshakeFailed { path: String, reason: String },
}

const SOCKET_DIR: &str = "/tmp";
const SOCKET_PREFIX: &str = "attic-";
const SOCKET_SUFFIX: &str = ".sock";

/// Path an emulator process listening for CLI connections should bind,
/// given its own pid.
pub fn socket_path_for_pid(pid: u32) -> PathBuf {
    PathBuf::from(format!("{SOCKET_DIR}/{SOCKET_PREFIX}{pid}{SOCKET_SUFFIX}"))
}

/// Find every `attic-*.sock` entry under `/tmp`, newest (by mtime) first.
pub fn list_candidate_sockets() -> Result<Vec<PathBuf>, SocketDiscoveryError> {
    let mut candidates: Vec<(SystemTime, PathBuf)> = Vec::new();

    for entry in std::fs::read_dir(SOCKET_DIR)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with(SOCKET_PREFIX) || !name.ends_with(SOCKET_SUFFIX) {
            continue;
        }
        let metadata = entry.metadata()?;
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        candidates.push((modified, entry.path()));
    }

    candidates.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(candidates.into_iter().map(|(_, path)| path).collect())
}

/// Discover the newest live CLI socket and verify it responds to a
/// `ping` within one second (spec.md §4.5's handshake).
pub async fn discover_socket() -> Result<UnixStream, SocketDiscoveryError> {
    let candidates = list_candidate_sockets()?;
    if candidates.is_empty() {
        return Err(SocketDiscoveryError::NotFound {
            dir: SOCKET_DIR.to_string(),
        });
    }

    for path in candidates {
        match handshake(&path).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                tracing::debug!("candidate socket {path:?} failed handshake: {e}");
                continue;
            }
        }
    }

    Err(SocketDiscoveryError::NotFound {
        dir: SOCKET_DIR.to_string(),
    })
}

async fn handshake(path: &std::path::Path) -> Result<UnixStream, SocketDiscoveryError> {
    let path_str = path.to_string_lossy().to_string();
    let connect = UnixStream::connect(path);
    let mut stream = tokio::time::timeout(Duration::from_secs(1), connect)
        .await
        .map_err(|_| SocketDiscoveryError::HandshakeTimeout { path: path_str.clone() })?
        .map_err(|e| SocketDiscoveryError::HandshakeFailed {
            path: path_str.clone(),
            reason: e.to_string(),
        })?;

    stream
        .write_all(b"CMD:ping\n")
        .await
        .map_err(|e| SocketDiscoveryError::HandshakeFailed {
            path: path_str.clone(),
            reason: e.to_string(),
        })?;

    let mut reader = BufReader::new(&mut stream);
    let mut line = String::new();
    let read = tokio::time::timeout(Duration::from_secs(1), reader.read_line(&mut line));
    match read.await {
        Ok(Ok(0)) => Err(SocketDiscoveryError::HandshakeFailed {
            path: path_str,
            reason: "connection closed before a reply".to_string(),
        }),
        Ok(Ok(_)) if line.trim_end() == "OK:pong" => Ok(stream),
        Ok(Ok(_)) => Err(SocketDiscoveryError::HandshakeFailed {
            path: path_str,
            reason: format!("unexpected handshake reply: {line:?}"),
        }),
        Ok(Err(e)) => Err(SocketDiscoveryError::HandshakeFailed {
            path: path_str,
            reason: e.to_string(),
        }),
        Err(_) => Err(SocketDiscoveryError::HandshakeTimeout { path: path_str }),
    }
}
