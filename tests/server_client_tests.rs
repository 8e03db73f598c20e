//! Loopback server+client integration tests covering the end-to-end
//! scenario catalog: subscribe/broadcast fan-out, request/response over
//! the control channel, and backpressure/recovery behavior.

use aesp::client::{Client, ControlConnection};
use aesp::config::{ChannelPorts, ClientConfig, ServerConfig};
use aesp::protocol::{self, Frame, MessageType};
use aesp::server::{BoxFuture, ClientId, Delegate, Server};
use std::sync::Arc;
use tokio::net::TcpListener;

struct ScriptedDelegate;

impl Delegate for ScriptedDelegate {
    fn on_message(&self, _client: ClientId, frame: Frame) -> BoxFuture<'_, Option<Frame>> {
        Box::pin(async move {
            match frame.msg_type {
                MessageType::Pause => Some(protocol::ack_frame(MessageType::Pause)),
                MessageType::Resume => Some(protocol::ack_frame(MessageType::Resume)),
                MessageType::Status => {
                    let status = protocol::StatusResponse {
                        is_running: true,
                        drives: vec![protocol::DriveEntry {
                            drive: 1,
                            name: "GAME.ATR".to_string(),
                        }],
                    };
                    Some(Frame::new(MessageType::Status, status.encode()))
                }
                MessageType::RegistersRead => {
                    let regs = protocol::Registers {
                        a: 0x42,
                        x: 0,
                        y: 0,
                        s: 0xFF,
                        p: 0,
                        pc: 0x0600,
                        reserved: 0,
                    };
                    Some(Frame::new(MessageType::RegistersRead, regs.encode()))
                }
                MessageType::BreakpointSet => Some(protocol::ack_frame(MessageType::BreakpointSet)),
                _ => None,
            }
        })
    }
}

async fn reserve_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

async fn start_server() -> (ServerConfig, Server) {
    let config = ServerConfig {
        host: "127.0.0.1".to_string(),
        ports: ChannelPorts {
            control: reserve_port().await,
            video: reserve_port().await,
            audio: reserve_port().await,
        },
        ..ServerConfig::default()
    };
    let server = Server::new(config.clone(), Arc::new(ScriptedDelegate));
    let handle = server.clone();
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    (config, handle)
}

fn client_config_for(server: &ServerConfig) -> ClientConfig {
    ClientConfig {
        host: server.host.clone(),
        ports: server.ports,
        ..ClientConfig::default()
    }
}

#[tokio::test]
async fn scenario_ping_pong_over_control_channel() {
    let (server_config, _server) = start_server().await;
    let control = ControlConnection::connect(&client_config_for(&server_config))
        .await
        .unwrap();
    control.ping().await.unwrap();
}

#[tokio::test]
async fn scenario_pause_then_resume_round_trip() {
    let (server_config, _server) = start_server().await;
    let control = ControlConnection::connect(&client_config_for(&server_config))
        .await
        .unwrap();

    let ack = control
        .request(Frame::empty(MessageType::Pause), MessageType::Pause)
        .await
        .unwrap();
    assert_eq!(ack.msg_type, MessageType::Ack);
    assert_eq!(ack.payload()[0], MessageType::Pause.to_u8());

    let ack2 = control
        .request(Frame::empty(MessageType::Resume), MessageType::Resume)
        .await
        .unwrap();
    assert_eq!(ack2.payload()[0], MessageType::Resume.to_u8());
}

#[tokio::test]
async fn scenario_status_reports_running_drive() {
    let (server_config, _server) = start_server().await;
    let control = ControlConnection::connect(&client_config_for(&server_config))
        .await
        .unwrap();

    let reply = control
        .request(Frame::empty(MessageType::Status), MessageType::Status)
        .await
        .unwrap();
    let status = protocol::StatusResponse::parse(reply.payload()).unwrap();
    assert!(status.is_running);
    assert_eq!(status.drives[0].name, "GAME.ATR");
}

#[tokio::test]
async fn scenario_registers_read() {
    let (server_config, _server) = start_server().await;
    let control = ControlConnection::connect(&client_config_for(&server_config))
        .await
        .unwrap();

    let reply = control
        .request(Frame::empty(MessageType::RegistersRead), MessageType::RegistersRead)
        .await
        .unwrap();
    let regs = protocol::Registers::parse(reply.payload()).unwrap();
    assert_eq!(regs.a, 0x42);
    assert_eq!(regs.pc, 0x0600);
}

#[tokio::test]
async fn scenario_video_subscribe_then_receive_broadcast_frames() {
    let (server_config, server) = start_server().await;
    let client_config = client_config_for(&server_config);
    let client = Client::connect(client_config).await.unwrap();

    let mut stream = client.video().frames().await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;

    server.broadcast_frame(vec![9, 9, 9]).await;

    let frame = tokio::time::timeout(std::time::Duration::from_millis(200), stream.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(frame.msg_type, MessageType::FrameRaw);
    assert_eq!(frame.payload(), &[9, 9, 9]);
}

#[tokio::test]
async fn scenario_video_stream_stays_idle_without_a_broadcast() {
    let (server_config, _server) = start_server().await;
    let client_config = client_config_for(&server_config);
    let client = Client::connect(client_config).await.unwrap();

    let mut stream = client.video().frames().await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;

    let res = tokio::time::timeout(std::time::Duration::from_millis(100), stream.recv()).await;
    assert!(res.is_err(), "no frames were broadcast, recv should still be pending");
}

#[tokio::test]
async fn scenario_unknown_message_on_video_channel_gets_error_reply() {
    let (server_config, _server) = start_server().await;
    let stream = tokio::net::TcpStream::connect(format!(
        "{}:{}",
        server_config.host, server_config.ports.video
    ))
    .await
    .unwrap();
    let (mut read_half, mut write_half) = tokio::io::split(stream);
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    write_half
        .write_all(&Frame::empty(MessageType::Pause).encode())
        .await
        .unwrap();

    let mut header = [0u8; 8];
    read_half.read_exact(&mut header).await.unwrap();
    assert_eq!(header[3], MessageType::Error.to_u8());
}

#[tokio::test]
async fn scenario_breakpoint_set_then_ack() {
    let (server_config, _server) = start_server().await;
    let control = ControlConnection::connect(&client_config_for(&server_config))
        .await
        .unwrap();

    let bp = protocol::BreakpointAddr { addr: 0x0600 };
    let reply = control
        .request(
            Frame::new(MessageType::BreakpointSet, bp.encode()),
            MessageType::BreakpointSet,
        )
        .await
        .unwrap();
    assert_eq!(reply.payload()[0], MessageType::BreakpointSet.to_u8());
}

#[tokio::test]
async fn scenario_broadcast_reaches_every_subscriber_in_order() {
    // Property 6: with N >= 2 Video subscribers, a single broadcast_frame
    // call causes each subscriber's stream to yield the same bytes, one
    // element per broadcast, independent of the others' pace.
    let (server_config, server) = start_server().await;
    let client_config = client_config_for(&server_config);

    let client_a = Client::connect(client_config.clone()).await.unwrap();
    let client_b = Client::connect(client_config).await.unwrap();
    let mut stream_a = client_a.video().frames().await.unwrap();
    let mut stream_b = client_b.video().frames().await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;

    server.broadcast_frame(vec![1, 2, 3]).await;
    server.broadcast_frame(vec![4, 5, 6]).await;

    for stream in [&mut stream_a, &mut stream_b] {
        let first = tokio::time::timeout(std::time::Duration::from_millis(200), stream.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.payload(), &[1, 2, 3]);
        let second = tokio::time::timeout(std::time::Duration::from_millis(200), stream.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.payload(), &[4, 5, 6]);
    }
}

#[tokio::test]
async fn scenario_unknown_type_then_ping_still_yields_pong() {
    // End-to-end scenario 4 / Property 9: an unknown-type frame followed
    // by a PING on the same connection still produces a PONG.
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let (server_config, _server) = start_server().await;
    let mut stream = tokio::net::TcpStream::connect(server_config.control_addr())
        .await
        .unwrap();

    stream.write_all(&[0xAE, 0x50, 0x01, 0xFE, 0, 0, 0, 0]).await.unwrap();
    stream
        .write_all(&Frame::empty(MessageType::Ping).encode())
        .await
        .unwrap();

    let mut header = [0u8; 8];
    stream.read_exact(&mut header).await.unwrap();
    let (reply, _) = Frame::decode(&header).unwrap().unwrap();
    assert_eq!(reply.msg_type, MessageType::Pong);
}

#[tokio::test]
async fn scenario_oversized_frame_drops_only_that_connection() {
    // End-to-end scenario 5 / Property 10: an unrecoverable frame on one
    // connection closes that connection without affecting others' ability
    // to complete PING/PONG.
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let (server_config, _server) = start_server().await;

    let mut bad = tokio::net::TcpStream::connect(server_config.control_addr())
        .await
        .unwrap();
    let mut oversized_header = vec![0xAE, 0x50, 0x01, 0x02];
    oversized_header.extend_from_slice(&(32 * 1024 * 1024u32).to_be_bytes());
    bad.write_all(&oversized_header).await.unwrap();
    let mut probe = [0u8; 1];
    let n = bad.read(&mut probe).await.unwrap_or(0);
    assert_eq!(n, 0, "server must close the connection after an oversized frame");

    let control = ControlConnection::connect(&client_config_for(&server_config))
        .await
        .unwrap();
    control.ping().await.unwrap();
}

#[tokio::test]
async fn scenario_unopened_video_channel_yields_empty_stream() {
    // Property 7: a client that did not open the Video channel gets an
    // empty frame stream regardless of server broadcasts.
    let (server_config, server) = start_server().await;
    let client_config = client_config_for(&server_config);
    let client = Client::connect_channels(client_config, false, false).await.unwrap();

    let mut stream = client.video().frames().await.unwrap();
    server.broadcast_frame(vec![1, 2, 3]).await;

    let res = tokio::time::timeout(std::time::Duration::from_millis(100), stream.recv()).await;
    assert_eq!(res.unwrap(), None, "stream should end immediately with no elements");
}
