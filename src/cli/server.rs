//! CLI server (C5, server side): a Unix-domain socket listener that
//! parses `CMD:` lines into [`Command`]s, dispatches them to a
//! [`CliDelegate`], and writes back `OK:`/`ERR:` lines. Also exposes an
//! `EVENT:` broadcast surface so a delegate can push breakpoint/stopped/
//! error notifications to every currently-connected CLI client
//! (spec.md §4.5's event grammar), independent of any request/response
//! exchange.
//!
//! Grounded on the same shape as the AESP server (`crate::server`): a
//! cheaply-`Clone`able shared state struct, one accept loop, a
//! per-connection reader/writer split with a dedicated outbound `mpsc`
//! queue so broadcast and response writes never interleave on one
//! socket.

use super::command::Command;
use super::framer::cli_line_codec;
use super::message::join_record_separator;
use crate::protocol::Registers;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_util::codec::Decoder;
use tracing::{debug, info, warn};

/// A boxed future, mirroring [`crate::server::BoxFuture`] so
/// [`CliDelegate`] stays object-safe without an `async-trait` macro
/// dependency.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Opaque identity of one connected CLI client, unique within this
/// process's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CliClientId(u64);

impl std::fmt::Display for CliClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cli-{}", self.0)
    }
}

struct ClientIdAllocator(AtomicU64);

impl ClientIdAllocator {
    fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    fn next(&self) -> CliClientId {
        CliClientId(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

/// The outcome of handling one parsed [`Command`] (spec.md §4.5's
/// response grammar): either an `OK:` body (possibly multi-line, joined
/// with the Record Separator on the wire) or an `ERR:` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliOutcome {
    Ok(Vec<String>),
    Err(String),
}

impl CliOutcome {
    pub fn ok_empty() -> Self {
        CliOutcome::Ok(Vec::new())
    }

    pub fn ok_line(line: impl Into<String>) -> Self {
        CliOutcome::Ok(vec![line.into()])
    }

    pub fn err(message: impl Into<String>) -> Self {
        CliOutcome::Err(message.into())
    }

    fn render(&self) -> String {
        match self {
            CliOutcome::Ok(lines) => format!("OK:{}\n", join_record_separator(lines)),
            CliOutcome::Err(message) => format!("ERR:{message}\n"),
        }
    }
}

/// Capability set a CLI server embedder implements (spec.md §4.5/§6):
/// turn a parsed command into a response. `quit`/`shutdown` are handled
/// by [`CliServer`] itself (connection close / listener shutdown) after
/// the delegate's acknowledgement is sent, so a delegate only needs to
/// decide what the acknowledgement body says.
pub trait CliDelegate: Send + Sync {
    fn handle(&self, client: CliClientId, command: Command) -> BoxFuture<'_, CliOutcome>;
}

type ClientMap = HashMap<CliClientId, mpsc::Sender<String>>;

/// Shared CLI server state, cheaply cloned into every connection task.
#[derive(Clone)]
pub struct CliServer {
    delegate: Arc<dyn CliDelegate>,
    ids: Arc<ClientIdAllocator>,
    clients: Arc<RwLock<ClientMap>>,
    shutdown: broadcast::Sender<()>,
}

impl CliServer {
    pub fn new(delegate: Arc<dyn CliDelegate>) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            delegate,
            ids: Arc::new(ClientIdAllocator::new()),
            clients: Arc::new(RwLock::new(HashMap::new())),
            shutdown,
        }
    }

    /// Bind `socket_path` and serve connections until [`CliServer::stop`]
    /// is called or the listener fails. Removes a stale socket file left
    /// behind by a crashed prior run before binding, and removes its own
    /// socket file on the way out.
    pub async fn run(&self, socket_path: impl AsRef<Path>) -> std::io::Result<()> {
        let path = socket_path.as_ref().to_path_buf();
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path)?;
        info!("CLI server listening on {}", path.display());

        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, _addr) = accepted?;
                    let server = self.clone();
                    tokio::spawn(async move {
                        server.handle_connection(stream).await;
                    });
                }
                _ = shutdown_rx.recv() => break,
            }
        }

        let _ = std::fs::remove_file(&path);
        Ok(())
    }

    /// Convenience over [`CliServer::run`] using spec.md §4.5's standard
    /// `/tmp/attic-<pid>.sock` path for this process.
    pub async fn run_default(&self) -> std::io::Result<()> {
        self.run(super::socket::socket_path_for_pid(std::process::id())).await
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(());
    }

    /// Broadcast an `EVENT:<name> <fields>` line to every currently
    /// connected CLI client (spec.md §4.5's event grammar). Best-effort:
    /// a client whose outbound queue is full simply misses this event,
    /// mirroring the binary protocol's broadcast backpressure policy.
    pub async fn notify_event(&self, name: &str, fields: &str) {
        let line = if fields.is_empty() {
            format!("EVENT:{name}\n")
        } else {
            format!("EVENT:{name} {fields}\n")
        };
        let subscribers: Vec<mpsc::Sender<String>> = self.clients.read().await.values().cloned().collect();
        for tx in subscribers {
            if tx.try_send(line.clone()).is_err() {
                debug!("CLI client outbound queue full, dropping {name} event");
            }
        }
    }

    /// `EVENT:breakpoint $XXXX A=$XX X=$XX Y=$XX S=$XX P=$XX` (spec.md §4.5).
    pub async fn notify_breakpoint(&self, addr: u16, regs: Registers) {
        let fields = format!(
            "${addr:04X} A=${:02X} X=${:02X} Y=${:02X} S=${:02X} P=${:02X}",
            regs.a, regs.x, regs.y, regs.s, regs.p
        );
        self.notify_event("breakpoint", &fields).await;
    }

    /// `EVENT:stopped $XXXX` (spec.md §4.5).
    pub async fn notify_stopped(&self, addr: u16) {
        self.notify_event("stopped", &format!("${addr:04X}")).await;
    }

    /// `EVENT:error <free-text>` (spec.md §4.5).
    pub async fn notify_error(&self, message: &str) {
        self.notify_event("error", message).await;
    }

    async fn handle_connection(&self, stream: UnixStream) {
        let client_id = self.ids.next();
        debug!("{client_id} connected");

        let (mut read_half, mut write_half) = tokio::io::split(stream);
        let (tx, mut rx) = mpsc::channel::<String>(32);
        self.clients.write().await.insert(client_id, tx.clone());

        let writer = tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                if write_half.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        let mut codec = cli_line_codec();
        let mut buf = bytes::BytesMut::with_capacity(4096);

        'read: loop {
            match read_half.read_buf(&mut buf).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!("{client_id}: read error: {e}");
                    break;
                }
            }

            loop {
                match codec.decode(&mut buf) {
                    Ok(Some(line)) => {
                        if self.dispatch_line(client_id, &line, &tx).await.is_err() {
                            break 'read;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        // Overlong line: the codec already discarded its
                        // bytes up to the next `\n` (spec.md §4.5's "4096
                        // bytes before discard"). Tell the client and
                        // keep the connection open.
                        warn!("{client_id}: {e}");
                        if tx.try_send("ERR:line too long, discarded\n".to_string()).is_err() {
                            break 'read;
                        }
                    }
                }
            }
        }

        drop(tx);
        let _ = writer.await;
        self.clients.write().await.remove(&client_id);
        debug!("{client_id} disconnected");
    }

    /// Returns `Err(())` when the connection must close: either the
    /// outbound queue is gone, or the client asked to `quit`.
    async fn dispatch_line(&self, client_id: CliClientId, line: &str, tx: &mpsc::Sender<String>) -> Result<(), ()> {
        let Some(request) = line.strip_prefix("CMD:") else {
            return send(tx, "ERR:expected CMD: prefix\n".to_string());
        };

        let command = match Command::parse(request) {
            Ok(command) => command,
            Err(e) => return send(tx, CliOutcome::err(e.to_string()).render()),
        };

        let is_quit = matches!(command, Command::Quit);
        let is_shutdown = matches!(command, Command::Shutdown);

        let outcome = self.delegate.handle(client_id, command).await;
        send(tx, outcome.render())?;

        if is_shutdown {
            self.stop();
        }
        if is_quit {
            return Err(());
        }
        Ok(())
    }
}

fn send(tx: &mpsc::Sender<String>, line: String) -> Result<(), ()> {
    tx.try_send(line).map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};

    struct EchoDelegate;

    impl CliDelegate for EchoDelegate {
        fn handle(&self, _client: CliClientId, command: Command) -> BoxFuture<'_, CliOutcome> {
            Box::pin(async move {
                match command {
                    Command::Ping => CliOutcome::ok_line("pong"),
                    Command::Status => CliOutcome::ok_line("running"),
                    Command::Quit => CliOutcome::ok_empty(),
                    _ => CliOutcome::err("unsupported in this test fixture"),
                }
            })
        }
    }

    fn test_socket_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "aesp-cli-test-{name}-{}-{}.sock",
            std::process::id(),
            name.len() + 7
        ))
    }

    #[tokio::test]
    async fn ping_roundtrip_over_unix_socket() {
        let path = test_socket_path("ping");
        let _ = std::fs::remove_file(&path);
        let server = CliServer::new(Arc::new(EchoDelegate));
        let server_clone = server.clone();
        let path_clone = path.clone();
        tokio::spawn(async move {
            let _ = server_clone.run(&path_clone).await;
        });
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;

        let mut stream = UnixStream::connect(&path).await.unwrap();
        stream.write_all(b"CMD:ping\n").await.unwrap();
        let mut reader = BufReader::new(&mut stream);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line.trim_end(), "OK:pong");

        server.stop();
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn unknown_line_prefix_gets_err() {
        let path = test_socket_path("badprefix");
        let _ = std::fs::remove_file(&path);
        let server = CliServer::new(Arc::new(EchoDelegate));
        let server_clone = server.clone();
        let path_clone = path.clone();
        tokio::spawn(async move {
            let _ = server_clone.run(&path_clone).await;
        });
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;

        let mut stream = UnixStream::connect(&path).await.unwrap();
        stream.write_all(b"nonsense\n").await.unwrap();
        let mut reader = BufReader::new(&mut stream);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert!(line.starts_with("ERR:"));

        server.stop();
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn quit_closes_the_connection_after_its_ack() {
        let path = test_socket_path("quit");
        let _ = std::fs::remove_file(&path);
        let server = CliServer::new(Arc::new(EchoDelegate));
        let server_clone = server.clone();
        let path_clone = path.clone();
        tokio::spawn(async move {
            let _ = server_clone.run(&path_clone).await;
        });
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;

        let mut stream = UnixStream::connect(&path).await.unwrap();
        stream.write_all(b"CMD:quit\n").await.unwrap();
        let mut reader = BufReader::new(&mut stream);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line.trim_end(), "OK:");

        // The server closes its half after `quit`; a further read
        // observes EOF rather than hanging.
        let mut probe = String::new();
        let n = reader.read_line(&mut probe).await.unwrap();
        assert_eq!(n, 0);

        server.stop();
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn notify_event_reaches_connected_clients() {
        let path = test_socket_path("events");
        let _ = std::fs::remove_file(&path);
        let server = CliServer::new(Arc::new(EchoDelegate));
        let server_clone = server.clone();
        let path_clone = path.clone();
        tokio::spawn(async move {
            let _ = server_clone.run(&path_clone).await;
        });
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;

        let stream = UnixStream::connect(&path).await.unwrap();
        let mut reader = BufReader::new(stream);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        server.notify_stopped(0x0600).await;

        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line.trim_end(), "EVENT:stopped $0600");

        server.stop();
        let _ = std::fs::remove_file(&path);
    }
}
