//! AESP server (C3): three independent TCP channels (Control, Video,
//! Audio), pub/sub broadcast fan-out per channel, and a capability-trait
//! delegate in place of global delegate state.
//!
//! Each channel is its own listener task. A connection on the Control
//! channel gets request/response dispatch through [`Delegate`] plus
//! automatic `PING`→`PONG` handled entirely inside this module (the
//! delegate never sees a `PING`). A connection on the Video or Audio
//! channel additionally may subscribe to that channel's broadcast
//! stream; subscribed connections receive every frame `broadcast_frame`/
//! `broadcast_audio` is called with, each at its own pace.

use crate::config::ServerConfig;
use crate::error::ProtocolError;
use crate::protocol::{self, Channel, Frame, FrameCodec, MessageType};
use bytes::BytesMut;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, error, info, warn};

/// A boxed future, used to keep [`Delegate`] object-safe without pulling
/// in an `async_trait`-style macro dependency (grounded in the boxed
/// future pattern used elsewhere in the example pack).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Opaque client identity, unique within this process's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u128);

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client-{:032x}", self.0)
    }
}

struct ClientIdAllocator(AtomicU64);

impl ClientIdAllocator {
    fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    fn next(&self) -> ClientId {
        let counter = self.0.fetch_add(1, Ordering::Relaxed) as u128;
        let salt = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        ClientId((salt << 64) | counter)
    }
}

/// Capability interface a server embedder implements to react to
/// control-channel traffic. Deliberately a per-server trait object
/// rather than global delegate state (spec.md §9's design note) so a
/// process can run more than one independently-configured server.
pub trait Delegate: Send + Sync {
    /// A client connected on `channel`.
    fn on_connect(&self, client: ClientId, channel: Channel) -> BoxFuture<'_, ()> {
        let _ = (client, channel);
        Box::pin(async {})
    }

    /// A client disconnected from `channel`.
    fn on_disconnect(&self, client: ClientId, channel: Channel) -> BoxFuture<'_, ()> {
        let _ = (client, channel);
        Box::pin(async {})
    }

    /// A control/input frame arrived from `client`. Returning `Some(frame)`
    /// sends that frame back to the same client; `None` sends nothing
    /// beyond whatever the delegate already pushed out of band.
    fn on_message(&self, client: ClientId, frame: Frame) -> BoxFuture<'_, Option<Frame>>;
}

type Outbound = mpsc::Sender<Frame>;
type SubscriberMap = HashMap<ClientId, Outbound>;

/// Live client counts per channel, returned by [`Server::client_counts`]
/// (spec.md §4.3/§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClientCounts {
    pub control: usize,
    pub video: usize,
    pub audio: usize,
}

/// Send a frame directly to one client. Per spec.md §5's backpressure
/// policy, unicast sends never silently drop: a full queue is treated as
/// fatal for the connection.
fn unicast(tx: &Outbound, frame: Frame) -> Result<(), ()> {
    tx.try_send(frame).map_err(|_| ())
}

/// Fan a frame out to every current subscriber, cloned out from under
/// the lock first so the broadcast itself never holds it. A full
/// subscriber queue drops this frame for that subscriber only (spec.md
/// §5) — other subscribers and the connection itself are unaffected.
async fn broadcast(map: &RwLock<SubscriberMap>, frame: Frame) {
    let subscribers: Vec<(ClientId, Outbound)> = {
        let guard = map.read().await;
        guard.iter().map(|(id, tx)| (*id, tx.clone())).collect()
    };
    for (id, tx) in subscribers {
        if tx.try_send(frame.clone()).is_err() {
            debug!("dropping broadcast frame for {id}: outbound queue full");
        }
    }
}

/// Shared server state, cheaply cloned into every connection task.
#[derive(Clone)]
pub struct Server {
    config: ServerConfig,
    delegate: Arc<dyn Delegate>,
    ids: Arc<ClientIdAllocator>,
    /// Every currently-connected client, regardless of subscription
    /// state, keyed for the targeted `send` capability and `client_counts`.
    clients: Arc<RwLock<HashMap<ClientId, (Channel, Outbound)>>>,
    video_subs: Arc<RwLock<SubscriberMap>>,
    audio_subs: Arc<RwLock<SubscriberMap>>,
    frame_counter: Arc<AtomicU64>,
    shutdown: broadcast::Sender<()>,
}

impl Server {
    pub fn new(config: ServerConfig, delegate: Arc<dyn Delegate>) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            config,
            delegate,
            ids: Arc::new(ClientIdAllocator::new()),
            clients: Arc::new(RwLock::new(HashMap::new())),
            video_subs: Arc::new(RwLock::new(HashMap::new())),
            audio_subs: Arc::new(RwLock::new(HashMap::new())),
            frame_counter: Arc::new(AtomicU64::new(0)),
            shutdown,
        }
    }

    /// Wrap `pixels` in a `FRAME_RAW` message, increment the frame
    /// counter, and write it to every current Video subscriber (spec.md
    /// §4.3). Returns the frame number just assigned.
    pub async fn broadcast_frame(&self, pixels: Vec<u8>) -> u64 {
        let number = self.frame_counter.fetch_add(1, Ordering::SeqCst) + 1;
        broadcast(&self.video_subs, Frame::new(MessageType::FrameRaw, pixels)).await;
        number
    }

    /// Wrap `samples` in an `AUDIO_PCM` message and write it to every
    /// current Audio subscriber (spec.md §4.3).
    pub async fn broadcast_audio(&self, samples: &[i16]) {
        let payload = protocol::encode_pcm_samples(samples);
        broadcast(&self.audio_subs, Frame::new(MessageType::AudioPcm, payload)).await;
    }

    /// Targeted unicast to one connected client on its own channel,
    /// regardless of subscription state (spec.md §4.3/§6). Returns
    /// `Err(())` if the client is no longer connected or its outbound
    /// queue is full (unicast never drops silently per spec.md §5).
    pub async fn send(&self, client: ClientId, frame: Frame) -> Result<(), ()> {
        let tx = {
            let guard = self.clients.read().await;
            guard.get(&client).map(|(_, tx)| tx.clone())
        };
        match tx {
            Some(tx) => unicast(&tx, frame),
            None => Err(()),
        }
    }

    /// Count of currently-connected clients per channel (spec.md §3/§6).
    pub async fn client_counts(&self) -> ClientCounts {
        let guard = self.clients.read().await;
        let mut counts = ClientCounts::default();
        for (channel, _) in guard.values() {
            match channel {
                Channel::Control => counts.control += 1,
                Channel::Video => counts.video += 1,
                Channel::Audio => counts.audio += 1,
            }
        }
        counts
    }

    /// The most recently assigned video frame number, or 0 if no frame
    /// has been broadcast yet (spec.md §3/§6).
    pub fn current_frame_number(&self) -> u64 {
        self.frame_counter.load(Ordering::SeqCst)
    }

    /// Run all three channel listeners until `shutdown` is called or one
    /// of the binds fails. Alias: [`Server::run`] is this method's
    /// implementation; `start` is the spec's external-interface name
    /// for it (spec.md §6).
    pub async fn start(&self) -> Result<(), std::io::Error> {
        self.run().await
    }

    /// Stop the server: alias for [`Server::shutdown`] matching the
    /// spec's external-interface naming (spec.md §6).
    pub fn stop(&self) {
        self.shutdown();
    }

    /// Run all three channel listeners until `shutdown` is called or one
    /// of the binds fails.
    pub async fn run(&self) -> Result<(), std::io::Error> {
        info!("starting AESP server: control/video/audio channels");

        let control = TcpListener::bind(self.config.control_addr()).await?;
        let video = TcpListener::bind(self.config.video_addr()).await?;
        let audio = TcpListener::bind(self.config.audio_addr()).await?;

        info!(
            "listening: control={} video={} audio={}",
            self.config.control_addr(),
            self.config.video_addr(),
            self.config.audio_addr()
        );

        let mut shutdown_rx = self.shutdown.subscribe();

        let control_task = self.clone().run_channel(control, Channel::Control);
        let video_task = self.clone().run_channel(video, Channel::Video);
        let audio_task = self.clone().run_channel(audio, Channel::Audio);

        tokio::select! {
            r = control_task => { if let Err(e) = r { error!("control listener error: {e}"); } }
            r = video_task => { if let Err(e) = r { error!("video listener error: {e}"); } }
            r = audio_task => { if let Err(e) = r { error!("audio listener error: {e}"); } }
            _ = shutdown_rx.recv() => {
                info!("shutdown requested");
            }
        }

        Ok(())
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    async fn run_channel(
        self,
        listener: TcpListener,
        channel: Channel,
    ) -> Result<(), std::io::Error> {
        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    let server = self.clone();
                    tokio::spawn(async move {
                        server.handle_connection(stream, peer, channel).await;
                    });
                }
                _ = shutdown_rx.recv() => return Ok(()),
            }
        }
    }

    async fn handle_connection(&self, stream: TcpStream, peer: SocketAddr, channel: Channel) {
        let client_id = self.ids.next();
        info!("{client_id} connected on {channel:?} from {peer}");
        self.delegate.on_connect(client_id, channel).await;

        if let Err(e) = self.serve_connection(stream, client_id, channel).await {
            warn!("{client_id} on {channel:?} ended with error: {e}");
        }

        self.clients.write().await.remove(&client_id);
        self.unsubscribe(client_id, channel).await;
        self.delegate.on_disconnect(client_id, channel).await;
        info!("{client_id} disconnected from {channel:?}");
    }

    async fn unsubscribe(&self, client_id: ClientId, channel: Channel) {
        match channel {
            Channel::Video => {
                self.video_subs.write().await.remove(&client_id);
            }
            Channel::Audio => {
                self.audio_subs.write().await.remove(&client_id);
            }
            Channel::Control => {}
        }
    }

    async fn serve_connection<S>(
        &self,
        stream: S,
        client_id: ClientId,
        channel: Channel,
    ) -> Result<(), ProtocolError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut read_half, mut write_half) = tokio::io::split(stream);
        let (tx, mut rx) = mpsc::channel::<Frame>(self.config.outbound_queue_depth);

        self.clients.write().await.insert(client_id, (channel, tx.clone()));

        let writer = tokio::spawn(async move {
            let mut codec = FrameCodec;
            let mut out = BytesMut::new();
            while let Some(frame) = rx.recv().await {
                out.clear();
                if codec.encode(frame, &mut out).is_err() {
                    break;
                }
                if write_half.write_all(&out).await.is_err() {
                    break;
                }
            }
        });

        let mut codec = FrameCodec;
        let mut buf = BytesMut::with_capacity(4096);

        'read: loop {
            match read_half.read_buf(&mut buf).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => return Err(ProtocolError::Io(e)),
            }

            loop {
                match codec.decode(&mut buf) {
                    Ok(Some(frame)) => {
                        if self.dispatch(client_id, channel, frame, &tx).await.is_err() {
                            break 'read;
                        }
                    }
                    Ok(None) => break,
                    Err(e) if e.is_fatal() => {
                        warn!("{client_id} on {channel:?}: fatal frame error: {e}");
                        break 'read;
                    }
                    Err(e) => {
                        // FrameCodec already discarded the offending
                        // frame's bytes (spec.md §4.2); continue.
                        warn!("{client_id} on {channel:?}: isolated frame error: {e}");
                    }
                }
            }
        }

        drop(tx);
        let _ = writer.await;
        Ok(())
    }

    /// Returns `Err(())` when the connection must be torn down (unicast
    /// backpressure or a subscribe/unsubscribe on the wrong channel).
    async fn dispatch(
        &self,
        client_id: ClientId,
        channel: Channel,
        frame: Frame,
        tx: &Outbound,
    ) -> Result<(), ()> {
        if frame.msg_type == MessageType::Ping {
            return unicast(tx, protocol::pong_frame());
        }

        match channel {
            Channel::Video => self.dispatch_video(client_id, frame, tx).await,
            Channel::Audio => self.dispatch_audio(client_id, frame, tx).await,
            Channel::Control => self.dispatch_control(client_id, frame, tx).await,
        }
    }

    async fn dispatch_video(&self, client_id: ClientId, frame: Frame, tx: &Outbound) -> Result<(), ()> {
        match frame.msg_type {
            MessageType::VideoSubscribe => {
                self.video_subs.write().await.insert(client_id, tx.clone());
                unicast(tx, protocol::ack_frame(MessageType::VideoSubscribe))
            }
            MessageType::VideoUnsubscribe => {
                self.video_subs.write().await.remove(&client_id);
                unicast(tx, protocol::ack_frame(MessageType::VideoUnsubscribe))
            }
            other => unicast(
                tx,
                protocol::error_frame(1, format!("unexpected message on video channel: {other:?}")),
            ),
        }
    }

    async fn dispatch_audio(&self, client_id: ClientId, frame: Frame, tx: &Outbound) -> Result<(), ()> {
        match frame.msg_type {
            MessageType::AudioSubscribe => {
                self.audio_subs.write().await.insert(client_id, tx.clone());
                unicast(tx, protocol::ack_frame(MessageType::AudioSubscribe))
            }
            MessageType::AudioUnsubscribe => {
                self.audio_subs.write().await.remove(&client_id);
                unicast(tx, protocol::ack_frame(MessageType::AudioUnsubscribe))
            }
            other => unicast(
                tx,
                protocol::error_frame(1, format!("unexpected message on audio channel: {other:?}")),
            ),
        }
    }

    async fn dispatch_control(&self, client_id: ClientId, frame: Frame, tx: &Outbound) -> Result<(), ()> {
        let msg_type = frame.msg_type;
        match self.delegate.on_message(client_id, frame).await {
            Some(response) => unicast(tx, response),
            None => {
                debug!("{client_id}: {msg_type:?} produced no direct response");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageType;
    use std::sync::atomic::AtomicBool;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    struct EchoDelegate {
        seen: AtomicBool,
    }

    impl Delegate for EchoDelegate {
        fn on_message(&self, _client: ClientId, frame: Frame) -> BoxFuture<'_, Option<Frame>> {
            self.seen.store(true, Ordering::SeqCst);
            Box::pin(async move {
                if frame.msg_type == MessageType::Pause {
                    Some(protocol::ack_frame(MessageType::Pause))
                } else {
                    None
                }
            })
        }
    }

    #[test]
    fn client_id_allocator_is_monotonic_and_unique() {
        let alloc = ClientIdAllocator::new();
        let a = alloc.next();
        let b = alloc.next();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn control_channel_acks_pause_and_pings_automatically() {
        let config = ServerConfig {
            host: "127.0.0.1".into(),
            ports: crate::config::ChannelPorts {
                control: 0,
                video: 0,
                audio: 0,
            },
            ..ServerConfig::default()
        };
        let delegate = Arc::new(EchoDelegate {
            seen: AtomicBool::new(false),
        });
        let server = Server::new(config, delegate);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server_clone = server.clone();
        tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            server_clone.handle_connection(stream, peer, Channel::Control).await;
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(&Frame::empty(MessageType::Ping).encode())
            .await
            .unwrap();
        let mut buf = [0u8; 8];
        client.read_exact(&mut buf).await.unwrap();
        let (reply, _) = Frame::decode(&buf).unwrap().unwrap();
        assert_eq!(reply.msg_type, MessageType::Pong);

        client
            .write_all(&Frame::empty(MessageType::Pause).encode())
            .await
            .unwrap();
        let mut buf2 = [0u8; 9];
        client.read_exact(&mut buf2).await.unwrap();
        let (reply2, _) = Frame::decode(&buf2).unwrap().unwrap();
        assert_eq!(reply2.msg_type, MessageType::Ack);
        assert_eq!(reply2.payload()[0], MessageType::Pause.to_u8());
    }

    #[tokio::test]
    async fn video_subscribe_then_broadcast_reaches_subscriber() {
        let config = ServerConfig::default();
        let delegate = Arc::new(EchoDelegate {
            seen: AtomicBool::new(false),
        });
        let server = Server::new(config, delegate);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server_clone = server.clone();
        tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            server_clone.handle_connection(stream, peer, Channel::Video).await;
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(&Frame::empty(MessageType::VideoSubscribe).encode())
            .await
            .unwrap();
        let mut ack_buf = [0u8; 9];
        client.read_exact(&mut ack_buf).await.unwrap();

        // Give the subscribe a moment to land in the map before broadcasting.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let number = server.broadcast_frame(vec![1, 2, 3]).await;
        assert_eq!(number, 1);
        assert_eq!(server.current_frame_number(), 1);

        let mut header = [0u8; 8];
        client.read_exact(&mut header).await.unwrap();
        let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
        let mut payload = vec![0u8; len];
        client.read_exact(&mut payload).await.unwrap();
        assert_eq!(payload, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn client_counts_reflect_connected_channels() {
        let config = ServerConfig::default();
        let delegate = Arc::new(EchoDelegate {
            seen: AtomicBool::new(false),
        });
        let server = Server::new(config, delegate);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server_clone = server.clone();
        tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            server_clone.handle_connection(stream, peer, Channel::Control).await;
        });

        let _client = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let counts = server.client_counts().await;
        assert_eq!(counts.control, 1);
        assert_eq!(counts.video, 0);
        assert_eq!(counts.audio, 0);
    }

    #[tokio::test]
    async fn targeted_send_reaches_only_named_client() {
        let config = ServerConfig::default();
        let delegate = Arc::new(EchoDelegate {
            seen: AtomicBool::new(false),
        });
        let server = Server::new(config, delegate);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server_clone = server.clone();
        tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            server_clone.handle_connection(stream, peer, Channel::Control).await;
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let client_id = {
            let guard = server.clients.read().await;
            *guard.keys().next().expect("one connected client")
        };
        server
            .send(client_id, protocol::ack_frame(MessageType::Pause))
            .await
            .unwrap();

        let mut buf = [0u8; 9];
        client.read_exact(&mut buf).await.unwrap();
        let (frame, _) = Frame::decode(&buf).unwrap().unwrap();
        assert_eq!(frame.msg_type, MessageType::Ack);
    }
}
