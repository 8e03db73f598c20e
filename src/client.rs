//! AESP client (C4): per-channel connection lifecycle, a pending-response
//! table for request/response pairing, and lazy restartable video/audio
//! streams.
//!
//! Each channel (Control/Video/Audio) gets its own TCP connection and its
//! own reader task. The Control channel additionally routes replies back
//! to whichever caller is waiting on that message type via
//! [`PendingTable`]. A second in-flight request of the same type
//! *replaces* the first waiter rather than being rejected (see
//! `DESIGN.md`): the first caller's future resolves with
//! [`ClientError::ConnectionClosed`] when its sender is dropped.

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::protocol::{self, Frame, FrameCodec, MessageType};
use bytes::BytesMut;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, warn};

/// Lifecycle state of a single channel connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Observable callbacks for a [`ControlConnection`]/[`Client`]: one for
/// state transitions, one for unsolicited messages, one for errors
/// (spec.md §4.4's "Client observable surface"). All methods are
/// optional no-ops so an embedder only implements what it needs.
pub trait ClientObserver: Send + Sync {
    /// Fires once per transition into or out of `Connected` (spec.md
    /// §4.4's state machine note), not on every intermediate state.
    fn on_state_change(&self, _state: ConnectionState) {}

    /// A frame arrived that wasn't claimed by a pending request (e.g.
    /// `BREAKPOINT_HIT`).
    fn on_message(&self, _frame: &Frame) {}

    /// A semantic `ERROR` frame or transport failure occurred.
    fn on_error(&self, _error: &ClientError) {}
}

struct NoopObserver;
impl ClientObserver for NoopObserver {}

type PendingTable = Arc<Mutex<HashMap<MessageType, oneshot::Sender<Frame>>>>;

/// Completes every still-pending waiter (dropping its sender resolves the
/// caller's `oneshot::Receiver` with `RecvError`, surfaced by `request()`
/// as [`ClientError::ConnectionClosed`]) and drives `state` to
/// `Disconnected`. Idempotent and shared by the explicit `disconnect()`
/// path and the reader task's own EOF/error cleanup, so whichever one
/// runs first wins and the other is a no-op.
async fn finish_disconnect(
    pending: &PendingTable,
    state: &Arc<Mutex<ConnectionState>>,
    observer: &Arc<dyn ClientObserver>,
) {
    pending.lock().await.clear();

    let mut guard = state.lock().await;
    if *guard == ConnectionState::Disconnected {
        return;
    }
    *guard = ConnectionState::Disconnecting;
    drop(guard);
    observer.on_state_change(ConnectionState::Disconnecting);
    *state.lock().await = ConnectionState::Disconnected;
}

/// A connected Control channel: request/response plus unsolicited
/// notification delivery (e.g. `BREAKPOINT_HIT`).
pub struct ControlConnection {
    outbound: Mutex<Option<mpsc::Sender<Frame>>>,
    pending: PendingTable,
    notifications: Mutex<mpsc::Receiver<Frame>>,
    state: Arc<Mutex<ConnectionState>>,
    observer: Arc<dyn ClientObserver>,
    shutdown: broadcast::Sender<()>,
    timeout: std::time::Duration,
}

impl ControlConnection {
    pub async fn connect(config: &ClientConfig) -> Result<Self, ClientError> {
        Self::connect_with_observer(config, Arc::new(NoopObserver)).await
    }

    pub async fn connect_with_observer(
        config: &ClientConfig,
        observer: Arc<dyn ClientObserver>,
    ) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(config.control_addr()).await?;
        let (mut read_half, mut write_half) = tokio::io::split(stream);

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Frame>(32);
        let (notify_tx, notify_rx) = mpsc::channel::<Frame>(config.stream_buffer_depth);
        let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));
        let state = Arc::new(Mutex::new(ConnectionState::Connected));
        let (shutdown_tx, _) = broadcast::channel::<()>(1);

        let mut writer_shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut codec = FrameCodec;
            let mut out = BytesMut::new();
            loop {
                tokio::select! {
                    _ = writer_shutdown.recv() => break,
                    maybe_frame = outbound_rx.recv() => {
                        match maybe_frame {
                            Some(frame) => {
                                out.clear();
                                if codec.encode(frame, &mut out).is_err() {
                                    break;
                                }
                                if write_half.write_all(&out).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                }
            }
        });

        let pending_for_reader = pending.clone();
        let state_for_reader = state.clone();
        let observer_for_reader = observer.clone();
        let mut reader_shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut codec = FrameCodec;
            let mut buf = BytesMut::with_capacity(4096);
            'conn: loop {
                tokio::select! {
                    _ = reader_shutdown.recv() => break 'conn,
                    result = read_half.read_buf(&mut buf) => {
                        match result {
                            Ok(0) => break 'conn,
                            Ok(_) => {}
                            Err(e) => {
                                observer_for_reader.on_error(&ClientError::Io(e));
                                break 'conn;
                            }
                        }
                    }
                }
                loop {
                    match codec.decode(&mut buf) {
                        Ok(Some(frame)) => {
                            route_incoming(frame, &pending_for_reader, &notify_tx, &observer_for_reader).await;
                        }
                        Ok(None) => break,
                        Err(_) => break,
                    }
                }
            }
            // The reader stops either because the transport closed on its
            // own (EOF/IO error) or because `disconnect()` signalled
            // `shutdown`; either way the connection is gone (spec.md
            // §4.4/§5/§7).
            finish_disconnect(&pending_for_reader, &state_for_reader, &observer_for_reader).await;
        });

        observer.on_state_change(ConnectionState::Connected);

        Ok(Self {
            outbound: Mutex::new(Some(outbound_tx)),
            pending,
            notifications: Mutex::new(notify_rx),
            state,
            observer,
            shutdown: shutdown_tx,
            timeout: std::time::Duration::from_secs(config.request_timeout_secs),
        })
    }

    /// Send `frame` on the outbound channel, failing with
    /// [`ClientError::NotConnected`] if the connection has already been
    /// torn down by [`ControlConnection::disconnect`].
    async fn send_outbound(&self, frame: Frame) -> Result<(), ClientError> {
        let sender = self.outbound.lock().await.clone();
        let sender = sender.ok_or(ClientError::NotConnected)?;
        sender.send(frame).await.map_err(|_| ClientError::NotConnected)
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.lock().await
    }

    pub async fn is_connected(&self) -> bool {
        self.state().await == ConnectionState::Connected
    }

    /// Send `frame` and wait for the reply whose type is `expect_reply`.
    /// A second concurrent call expecting the same reply type replaces
    /// the first waiter (the "replace" pending-table policy).
    ///
    /// `expect_reply` is the type the *resolved* reply will carry once
    /// `response_key_for` has unwrapped it: for most requests this is
    /// the request's own type (an `ACK` for it references that type in
    /// its payload, and a same-typed response reuses the byte directly,
    /// per spec.md §3/§4.1), except `PING`, whose reply is the
    /// genuinely distinct type `PONG`.
    pub async fn request(&self, frame: Frame, expect_reply: MessageType) -> Result<Frame, ClientError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(expect_reply, tx);
        }

        self.send_outbound(frame).await?;

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(reply)) => {
                if reply.msg_type == MessageType::Error {
                    let err = protocol::ErrorPayload::parse(reply.payload())?;
                    return Err(ClientError::ServerError {
                        code: err.code,
                        message: err.message,
                    });
                }
                Ok(reply)
            }
            Ok(Err(_)) => Err(ClientError::ConnectionClosed),
            Err(_) => {
                self.pending.lock().await.remove(&expect_reply);
                Err(ClientError::Timeout)
            }
        }
    }

    pub async fn ping(&self) -> Result<(), ClientError> {
        self.request(protocol::ping_frame(), MessageType::Pong).await?;
        Ok(())
    }

    /// Await the next unsolicited notification (e.g. `BREAKPOINT_HIT`).
    /// Returns `None` once the connection is gone.
    pub async fn next_notification(&self) -> Option<Frame> {
        self.notifications.lock().await.recv().await
    }

    /// Idempotent: closes this channel, completing any pending request
    /// waiters with [`ClientError::ConnectionClosed`] and driving the
    /// state machine to `Disconnected` (spec.md §4.4/§5). Signals the
    /// reader/writer tasks directly rather than only dropping the
    /// outbound sender, so a reader blocked on a slow read (or a writer
    /// blocked on a full socket buffer) is also unblocked immediately
    /// instead of waiting on the peer.
    pub async fn disconnect(&self) {
        let _ = self.shutdown.send(());
        self.outbound.lock().await.take();
        finish_disconnect(&self.pending, &self.state, &self.observer).await;
    }

    // -- Targeted request/response helpers (spec.md §4.4 "Public operations") --

    pub async fn pause(&self) -> Result<(), ClientError> {
        self.request(Frame::empty(MessageType::Pause), MessageType::Pause).await?;
        Ok(())
    }

    pub async fn resume(&self) -> Result<(), ClientError> {
        self.request(Frame::empty(MessageType::Resume), MessageType::Resume).await?;
        Ok(())
    }

    pub async fn reset(&self, cold: bool) -> Result<(), ClientError> {
        let payload = protocol::ResetRequest { cold }.encode();
        self.request(Frame::new(MessageType::Reset, payload), MessageType::Reset).await?;
        Ok(())
    }

    pub async fn press_key(&self, key_char: u8, key_code: u8, shift: bool, control: bool) -> Result<(), ClientError> {
        let mut flags = 0u8;
        if shift {
            flags |= protocol::KeyEvent::SHIFT;
        }
        if control {
            flags |= protocol::KeyEvent::CONTROL;
        }
        let payload = protocol::KeyEvent { key_char, key_code, flags }.encode();
        self.send_outbound(Frame::new(MessageType::KeyDown, payload)).await
    }

    pub async fn joystick(&self, port: u8, bits: u8) -> Result<(), ClientError> {
        let payload = protocol::JoystickEvent { port, bits }.encode();
        self.send_outbound(Frame::new(MessageType::Joystick, payload)).await
    }

    pub async fn paddle(&self, number: u8, position: u8) -> Result<(), ClientError> {
        let payload = protocol::PaddleEvent { number, position }.encode();
        self.send_outbound(Frame::new(MessageType::Paddle, payload)).await
    }

    pub async fn request_status_with_disks(&self) -> Result<protocol::StatusResponse, ClientError> {
        let reply = self.request(Frame::empty(MessageType::Status), MessageType::Status).await?;
        Ok(protocol::StatusResponse::parse(reply.payload())?)
    }

    pub async fn request_registers(&self) -> Result<protocol::Registers, ClientError> {
        let reply = self
            .request(Frame::empty(MessageType::RegistersRead), MessageType::RegistersRead)
            .await?;
        Ok(protocol::Registers::parse(reply.payload())?)
    }

    pub async fn request_info(&self) -> Result<String, ClientError> {
        let reply = self.request(Frame::empty(MessageType::Info), MessageType::Info).await?;
        Ok(protocol::InfoResponse::parse(reply.payload())?.json)
    }

    pub async fn read_memory(&self, addr: u16, count: u16) -> Result<Vec<u8>, ClientError> {
        let payload = protocol::MemoryReadRequest { addr, count }.encode();
        let reply = self
            .request(Frame::new(MessageType::MemoryRead, payload), MessageType::MemoryRead)
            .await?;
        Ok(reply.payload().to_vec())
    }

    pub async fn boot_file(&self, path: impl Into<String>) -> Result<(bool, String), ClientError> {
        let payload = protocol::BootFileRequest { path: path.into() }.encode();
        let reply = self
            .request(Frame::new(MessageType::BootFile, payload), MessageType::BootFile)
            .await?;
        let resp = protocol::BootFileResponse::parse(reply.payload())?;
        Ok((resp.status == 0, resp.message))
    }
}

async fn route_incoming(
    frame: Frame,
    pending: &PendingTable,
    notify_tx: &mpsc::Sender<Frame>,
    observer: &Arc<dyn ClientObserver>,
) {
    let mut table = pending.lock().await;

    if frame.msg_type == MessageType::Error {
        // ERROR replies don't name the request type they refer to. With
        // exactly one request in flight, route it there so `request()`
        // surfaces `ClientError::ServerError` instead of timing out;
        // with zero or more than one, there's no way to pick the right
        // waiter, so fall through to the notification channel.
        if table.len() == 1 {
            let key = *table.keys().next().unwrap();
            let waiter = table.remove(&key).unwrap();
            let _ = waiter.send(frame);
            return;
        }
        drop(table);
        debug!("unsolicited ERROR frame, delivering as notification");
        if let Ok(err) = protocol::ErrorPayload::parse(frame.payload()) {
            observer.on_error(&ClientError::ServerError {
                code: err.code,
                message: err.message,
            });
        }
        let _ = notify_tx.try_send(frame);
        return;
    }

    let key = response_key_for(&frame);
    if let Some(waiter) = key.and_then(|k| table.remove(&k)) {
        let _ = waiter.send(frame);
        return;
    }
    drop(table);

    // An unsolicited PONG (no in-flight ping) is swallowed internally per
    // spec.md §4.4 step 1 -- it never reaches the message callback or the
    // notification channel.
    if frame.msg_type == MessageType::Pong {
        return;
    }

    debug!("unsolicited frame {:?}, delivering as notification", frame.msg_type);
    observer.on_message(&frame);
    let _ = notify_tx.try_send(frame);
}

/// Maps a reply frame back to the request type a caller is waiting on.
/// `ACK` replies reference their request type in the payload; `ERROR`
/// replies are handled separately in [`route_incoming`] since they
/// don't name one explicitly.
fn response_key_for(frame: &Frame) -> Option<MessageType> {
    match frame.msg_type {
        MessageType::Ack => {
            let ack = protocol::AckPayload::parse(frame.payload()).ok()?;
            MessageType::from_u8(ack.referenced_type)
        }
        MessageType::Error => None,
        other => Some(other),
    }
}

/// A lazily-opened, restartable frame stream: `FRAME_RAW`/`FRAME_DELTA`
/// for video, or raw `AUDIO_PCM` frames for audio. Backed by a bounded
/// channel; ends (`recv()` returns `None`) when the underlying
/// connection closes.
pub struct FrameStream {
    rx: mpsc::Receiver<Frame>,
    _outbound: mpsc::Sender<Frame>,
}

impl FrameStream {
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    /// A stream that ends immediately with no elements: used when a
    /// channel was never opened by `connect()` (spec.md §4.4/§8
    /// Property 7 — "a client that did not open the Video (Audio)
    /// channel yields an empty frame (audio) stream regardless of
    /// server broadcasts").
    fn empty() -> Self {
        let (_tx, rx) = mpsc::channel::<Frame>(1);
        let (outbound_tx, _outbound_rx) = mpsc::channel::<Frame>(1);
        // `_tx` is dropped here, so `rx.recv()` resolves to `None` right away.
        Self { rx, _outbound: outbound_tx }
    }
}

async fn open_subscribed_stream(
    addr: String,
    subscribe: MessageType,
    unsubscribe: MessageType,
    buffer_depth: usize,
    shutdown: &broadcast::Sender<()>,
) -> Result<FrameStream, ClientError> {
    let stream = TcpStream::connect(addr).await?;
    let (mut read_half, mut write_half) = tokio::io::split(stream);
    let (data_tx, data_rx) = mpsc::channel::<Frame>(buffer_depth);
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Frame>(4);

    outbound_tx
        .send(Frame::empty(subscribe))
        .await
        .map_err(|_| ClientError::NotConnected)?;

    let mut writer_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let mut codec = FrameCodec;
        let mut out = BytesMut::new();
        loop {
            tokio::select! {
                _ = writer_shutdown.recv() => break,
                maybe_frame = outbound_rx.recv() => {
                    match maybe_frame {
                        Some(frame) => {
                            out.clear();
                            if codec.encode(frame, &mut out).is_err() {
                                break;
                            }
                            if write_half.write_all(&out).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }
    });

    let mut reader_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::with_capacity(8192);
        'conn: loop {
            tokio::select! {
                _ = reader_shutdown.recv() => break 'conn,
                result = read_half.read_buf(&mut buf) => {
                    match result {
                        Ok(0) => break 'conn,
                        Ok(_) => {}
                        Err(_) => break 'conn,
                    }
                }
            }
            loop {
                match codec.decode(&mut buf) {
                    Ok(Some(frame)) => {
                        if frame.msg_type == unsubscribe || frame.msg_type == MessageType::Ack {
                            continue;
                        }
                        if data_tx.try_send(frame).is_err() {
                            warn!("stream consumer lagging, dropping frame");
                        }
                    }
                    Ok(None) => break,
                    Err(_) => break,
                }
            }
        }
    });

    Ok(FrameStream {
        rx: data_rx,
        _outbound: outbound_tx,
    })
}

/// Video channel connection: control-style `connect`/`ping` plus a lazy
/// `frames()` stream. `enabled` reflects whether `Client::connect` was
/// asked to open this channel; when it wasn't, `frames()` returns an
/// empty stream without touching the network (spec.md §8 Property 7).
/// `shutdown` is shared by every stream this connection has ever opened,
/// so [`VideoConnection::disconnect`] ends all of them at once.
pub struct VideoConnection {
    config: ClientConfig,
    enabled: bool,
    shutdown: broadcast::Sender<()>,
}

impl VideoConnection {
    fn new(config: ClientConfig, enabled: bool) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self { config, enabled, shutdown }
    }

    /// Open (or reopen, if previously ended) the video frame stream.
    /// Restartable: a fresh call after the previous stream ended opens
    /// a fresh connection rather than replaying buffered elements
    /// (spec.md §9).
    pub async fn frames(&self) -> Result<FrameStream, ClientError> {
        if !self.enabled {
            return Ok(FrameStream::empty());
        }
        open_subscribed_stream(
            self.config.video_addr(),
            MessageType::VideoSubscribe,
            MessageType::VideoUnsubscribe,
            self.config.stream_buffer_depth,
            &self.shutdown,
        )
        .await
    }

    /// Ends every frame stream currently open on this channel (spec.md
    /// §4.4/§5: `disconnect()` unblocks stream consumers by ending the
    /// stream).
    fn disconnect(&self) {
        let _ = self.shutdown.send(());
    }
}

/// Audio channel connection: mirrors [`VideoConnection`].
pub struct AudioConnection {
    config: ClientConfig,
    enabled: bool,
    shutdown: broadcast::Sender<()>,
}

impl AudioConnection {
    fn new(config: ClientConfig, enabled: bool) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self { config, enabled, shutdown }
    }

    pub async fn samples(&self) -> Result<FrameStream, ClientError> {
        if !self.enabled {
            return Ok(FrameStream::empty());
        }
        open_subscribed_stream(
            self.config.audio_addr(),
            MessageType::AudioSubscribe,
            MessageType::AudioUnsubscribe,
            self.config.stream_buffer_depth,
            &self.shutdown,
        )
        .await
    }

    /// Ends every sample stream currently open on this channel.
    fn disconnect(&self) {
        let _ = self.shutdown.send(());
    }
}

/// Top-level AESP client: opens the Control channel eagerly; Video and
/// Audio are opened only if requested at `connect()` time (spec.md
/// §4.4). Whether a channel was opened gates `video()`/`audio()`'s
/// stream methods, not a separate always-on TCP connection — the
/// streaming connections themselves stay lazy/restartable per channel
/// call (spec.md §9).
pub struct Client {
    pub control: ControlConnection,
    video: VideoConnection,
    audio: AudioConnection,
}

impl Client {
    /// Connect with Video and Audio both requested, for callers that
    /// want every channel (equivalent to `connect_channels(config,
    /// true, true)`).
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        Self::connect_channels(config, true, true).await
    }

    /// Open Control, and Video/Audio only if requested. Completes when
    /// every requested channel has confirmed it's reachable; if any
    /// channel fails to connect, already-opened channels are closed
    /// (spec.md §4.4's `connect(video, audio)` contract).
    pub async fn connect_channels(config: ClientConfig, video: bool, audio: bool) -> Result<Self, ClientError> {
        Self::connect_channels_with_observer(config, video, audio, Arc::new(NoopObserver)).await
    }

    pub async fn connect_channels_with_observer(
        config: ClientConfig,
        video: bool,
        audio: bool,
        observer: Arc<dyn ClientObserver>,
    ) -> Result<Self, ClientError> {
        let control = ControlConnection::connect_with_observer(&config, observer).await?;

        if video {
            if let Err(e) = TcpStream::connect(config.video_addr()).await {
                control.disconnect().await;
                return Err(ClientError::Io(e));
            }
        }
        if audio {
            if let Err(e) = TcpStream::connect(config.audio_addr()).await {
                control.disconnect().await;
                return Err(ClientError::Io(e));
            }
        }

        Ok(Self {
            control,
            video: VideoConnection::new(config.clone(), video),
            audio: AudioConnection::new(config, audio),
        })
    }

    pub fn video(&self) -> &VideoConnection {
        &self.video
    }

    pub fn audio(&self) -> &AudioConnection {
        &self.audio
    }

    pub async fn is_connected(&self) -> bool {
        self.control.is_connected().await
    }

    /// Closes Control and ends any currently open video/audio streams
    /// (spec.md §4.4 `disconnect()`: "closes all open channels").
    pub async fn disconnect(&self) {
        self.video.disconnect();
        self.audio.disconnect();
        self.control.disconnect().await;
    }
}
