//! `aesp-server`: runs the AESP server with a small in-process toy
//! emulator delegate, for smoke testing and as a reference embedding.
//!
//! Real emulator integration lives outside this crate's scope; this
//! delegate tracks just enough state (registers, a breakpoint set, a
//! flat memory image) to exercise every control/input message type.

use aesp::cli::server::BoxFuture as CliBoxFuture;
use aesp::cli::{CliClientId, CliDelegate, CliOutcome, CliServer, Command};
use aesp::protocol::{self, Frame, MessageType};
use aesp::server::{BoxFuture, ClientId, Delegate, Server};
use aesp::{ChannelPorts, ServerConfig};
use anyhow::{Context, Result};
use clap::Parser;
use std::sync::{Arc, Mutex};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "aesp-server", about = "AESP emulator-control server")]
struct Args {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(long, default_value_t = ChannelPorts::default().control)]
    control_port: u16,

    #[arg(long, default_value_t = ChannelPorts::default().video)]
    video_port: u16,

    #[arg(long, default_value_t = ChannelPorts::default().audio)]
    audio_port: u16,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

struct ToyState {
    running: bool,
    registers: protocol::Registers,
    breakpoints: Vec<u16>,
    memory: Vec<u8>,
}

impl Default for ToyState {
    fn default() -> Self {
        Self {
            running: true,
            registers: protocol::Registers {
                a: 0,
                x: 0,
                y: 0,
                s: 0xFF,
                p: 0,
                pc: 0x0600,
                reserved: 0,
            },
            breakpoints: Vec::new(),
            memory: vec![0u8; 1 << 16],
        }
    }
}

struct ToyDelegate {
    state: Arc<Mutex<ToyState>>,
}

impl Delegate for ToyDelegate {
    fn on_connect(&self, client: ClientId, channel: aesp::Channel) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            info!("{client} connected on {channel:?}");
        })
    }

    fn on_disconnect(&self, client: ClientId, channel: aesp::Channel) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            info!("{client} disconnected from {channel:?}");
        })
    }

    fn on_message(&self, client: ClientId, frame: Frame) -> BoxFuture<'_, Option<Frame>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            match frame.msg_type {
                MessageType::Pause => {
                    state.running = false;
                    Some(protocol::ack_frame(MessageType::Pause))
                }
                MessageType::Resume => {
                    state.running = true;
                    Some(protocol::ack_frame(MessageType::Resume))
                }
                MessageType::Reset => {
                    *state = ToyState::default();
                    Some(protocol::ack_frame(MessageType::Reset))
                }
                MessageType::Status => {
                    let response = protocol::StatusResponse {
                        is_running: state.running,
                        drives: Vec::new(),
                    };
                    Some(Frame::new(MessageType::Status, response.encode()))
                }
                MessageType::RegistersRead => {
                    Some(Frame::new(MessageType::RegistersRead, state.registers.encode()))
                }
                MessageType::RegistersWrite => {
                    if let Ok(regs) = protocol::Registers::parse(frame.payload()) {
                        state.registers = regs;
                        Some(protocol::ack_frame(MessageType::RegistersWrite))
                    } else {
                        Some(protocol::error_frame(2, "malformed REGISTERS_WRITE payload"))
                    }
                }
                MessageType::MemoryRead => {
                    match protocol::MemoryReadRequest::parse(frame.payload()) {
                        Ok(req) => {
                            let start = req.addr as usize;
                            let end = (start + req.count as usize).min(state.memory.len());
                            let data = state.memory.get(start..end).unwrap_or(&[]).to_vec();
                            Some(Frame::new(MessageType::MemoryRead, data))
                        }
                        Err(_) => Some(protocol::error_frame(2, "malformed MEMORY_READ payload")),
                    }
                }
                MessageType::MemoryWrite => {
                    match protocol::MemoryWriteRequest::parse(frame.payload()) {
                        Ok(req) => {
                            let start = req.addr as usize;
                            for (i, byte) in req.data.iter().enumerate() {
                                if let Some(slot) = state.memory.get_mut(start + i) {
                                    *slot = *byte;
                                }
                            }
                            Some(protocol::ack_frame(MessageType::MemoryWrite))
                        }
                        Err(_) => Some(protocol::error_frame(2, "malformed MEMORY_WRITE payload")),
                    }
                }
                MessageType::BreakpointSet => {
                    match protocol::BreakpointAddr::parse(frame.payload()) {
                        Ok(bp) => {
                            if !state.breakpoints.contains(&bp.addr) {
                                state.breakpoints.push(bp.addr);
                            }
                            Some(protocol::ack_frame(MessageType::BreakpointSet))
                        }
                        Err(_) => Some(protocol::error_frame(2, "malformed BREAKPOINT_SET payload")),
                    }
                }
                MessageType::BreakpointClear => {
                    match protocol::BreakpointAddr::parse(frame.payload()) {
                        Ok(bp) => {
                            state.breakpoints.retain(|a| *a != bp.addr);
                            Some(protocol::ack_frame(MessageType::BreakpointClear))
                        }
                        Err(_) => Some(protocol::error_frame(2, "malformed BREAKPOINT_CLEAR payload")),
                    }
                }
                MessageType::BreakpointListOrHit => {
                    let response = protocol::BreakpointListResponse {
                        addrs: state.breakpoints.clone(),
                    };
                    Some(Frame::new(MessageType::BreakpointListOrHit, response.encode()))
                }
                MessageType::Info => {
                    let body = protocol::InfoResponse {
                        json: format!(r#"{{"running":{}}}"#, state.running),
                    };
                    Some(Frame::new(MessageType::Info, body.encode()))
                }
                MessageType::BootFile => {
                    match protocol::BootFileRequest::parse(frame.payload()) {
                        Ok(req) => {
                            *state = ToyState::default();
                            let response = protocol::BootFileResponse {
                                status: 0,
                                message: format!("booted {}", req.path),
                            };
                            Some(Frame::new(MessageType::BootFile, response.encode()))
                        }
                        Err(_) => Some(protocol::error_frame(2, "malformed BOOT_FILE payload")),
                    }
                }
                MessageType::KeyDown
                | MessageType::KeyUp
                | MessageType::Joystick
                | MessageType::ConsoleKeys
                | MessageType::Paddle => {
                    // Input events have no direct response; a real
                    // delegate would forward these into the emulator's
                    // input queue.
                    None
                }
                other => Some(protocol::error_frame(1, format!("unhandled message type {other:?}"))),
            }
        })
    }
}

/// Bridges the CLI text protocol (C5) onto the same toy state the AESP
/// delegate above drives, so `aesp-cli status` and an AESP `STATUS`
/// request observe the same emulator. Verb families the spec marks as
/// the emulator's own concern (disassembly, BASIC, DOS) are out of
/// scope for this reference embedding and get a plain "unsupported"
/// `ERR:`, same as `ToyDelegate::on_message`'s catch-all arm.
struct CliBridge {
    state: Arc<Mutex<ToyState>>,
    shutdown: Arc<tokio::sync::Notify>,
}

impl CliDelegate for CliBridge {
    fn handle(&self, _client: CliClientId, command: Command) -> CliBoxFuture<'_, CliOutcome> {
        Box::pin(async move {
            match command {
                Command::Ping => CliOutcome::ok_line("pong"),
                Command::Version => CliOutcome::ok_line(format!("aesp/{}", aesp::VERSION)),
                Command::Quit => CliOutcome::ok_empty(),
                Command::Shutdown => {
                    self.shutdown.notify_waiters();
                    CliOutcome::ok_empty()
                }
                Command::Pause => {
                    self.state.lock().unwrap().running = false;
                    CliOutcome::ok_empty()
                }
                Command::Resume => {
                    self.state.lock().unwrap().running = true;
                    CliOutcome::ok_empty()
                }
                Command::Status => {
                    let running = self.state.lock().unwrap().running;
                    CliOutcome::ok_line(if running { "running" } else { "paused" })
                }
                Command::Drives => CliOutcome::ok_empty(),
                Command::Reset { cold } => {
                    *self.state.lock().unwrap() = ToyState::default();
                    CliOutcome::ok_line(if cold { "cold reset" } else { "warm reset" })
                }
                Command::Read { addr, count } => {
                    let state = self.state.lock().unwrap();
                    let start = addr as usize;
                    let end = (start + count as usize).min(state.memory.len());
                    let hex = state
                        .memory
                        .get(start..end)
                        .unwrap_or(&[])
                        .iter()
                        .map(|b| format!("{b:02X}"))
                        .collect::<Vec<_>>()
                        .join(",");
                    CliOutcome::ok_line(format!("data {hex}"))
                }
                Command::Write { addr, bytes } => {
                    let mut state = self.state.lock().unwrap();
                    let start = addr as usize;
                    for (i, byte) in bytes.iter().enumerate() {
                        if let Some(slot) = state.memory.get_mut(start + i) {
                            *slot = *byte;
                        }
                    }
                    CliOutcome::ok_empty()
                }
                Command::RegistersRead => {
                    let regs = self.state.lock().unwrap().registers;
                    CliOutcome::ok_line(format!(
                        "A=${:02X} X=${:02X} Y=${:02X} S=${:02X} P=${:02X} PC=${:04X}",
                        regs.a, regs.x, regs.y, regs.s, regs.p, regs.pc
                    ))
                }
                Command::RegistersWrite { assignments } => {
                    let mut state = self.state.lock().unwrap();
                    for assignment in assignments {
                        let value = assignment.value;
                        match assignment.register.as_str() {
                            "A" => state.registers.a = value as u8,
                            "X" => state.registers.x = value as u8,
                            "Y" => state.registers.y = value as u8,
                            "S" => state.registers.s = value as u8,
                            "P" => state.registers.p = value as u8,
                            "PC" => state.registers.pc = value,
                            _ => {}
                        }
                    }
                    CliOutcome::ok_empty()
                }
                Command::BreakpointSet { addr } => {
                    let mut state = self.state.lock().unwrap();
                    if !state.breakpoints.contains(&addr) {
                        state.breakpoints.push(addr);
                    }
                    CliOutcome::ok_empty()
                }
                Command::BreakpointClear { addr } => {
                    self.state.lock().unwrap().breakpoints.retain(|a| *a != addr);
                    CliOutcome::ok_empty()
                }
                Command::BreakpointClearAll => {
                    self.state.lock().unwrap().breakpoints.clear();
                    CliOutcome::ok_empty()
                }
                Command::BreakpointList => {
                    let addrs = self.state.lock().unwrap().breakpoints.clone();
                    CliOutcome::Ok(addrs.iter().map(|a| format!("${a:04X}")).collect())
                }
                Command::BootFile { path } => {
                    *self.state.lock().unwrap() = ToyState::default();
                    CliOutcome::ok_line(format!("booted {path}"))
                }
                other => CliOutcome::err(format!("{other:?} unsupported by this reference delegate")),
            }
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| level.to_string()),
        ))
        .init();

    let config = ServerConfig {
        host: args.host,
        ports: ChannelPorts {
            control: args.control_port,
            video: args.video_port,
            audio: args.audio_port,
        },
        ..ServerConfig::default()
    };

    let state = Arc::new(Mutex::new(ToyState::default()));
    let shutdown = Arc::new(tokio::sync::Notify::new());

    let delegate = Arc::new(ToyDelegate { state: state.clone() });
    let server = Server::new(config, delegate);

    let cli_delegate = Arc::new(CliBridge { state, shutdown: shutdown.clone() });
    let cli_server = CliServer::new(cli_delegate);

    info!(
        "CLI socket: {}",
        aesp::cli::socket_path_for_pid(std::process::id()).display()
    );

    tokio::select! {
        r = server.run() => r.context("AESP server exited with an error")?,
        r = cli_server.run_default() => r.context("CLI server exited with an error")?,
        _ = shutdown.notified() => {
            info!("shutdown requested over the CLI protocol");
            server.stop();
            cli_server.stop();
        }
    }

    Ok(())
}
