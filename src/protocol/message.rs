//! Message taxonomy and typed payload parsers.
//!
//! Each [`MessageType`] carries metadata (category, request/response
//! classification, human-readable name) per spec.md §3. Payload parsers
//! below are total: given bytes, they either produce a value or a
//! [`PayloadError`] describing exactly how the bytes fell short.
//!
//! Multi-byte integers inside payloads are big-endian, per spec.md §4.1,
//! with the one documented exception: `AUDIO_PCM` sample bodies are
//! little-endian 16-bit signed PCM (a payload convention, not a framing
//! convention).

use std::collections::BTreeMap;
use thiserror::Error;

/// Disjoint message categories, partitioned by numeric range (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Control,
    Input,
    Video,
    Audio,
}

/// The AESP channel a message type travels over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Control,
    Video,
    Audio,
}

impl Channel {
    /// Default TCP port for this channel (spec.md §6).
    pub const fn default_port(self) -> u16 {
        match self {
            Channel::Control => 47800,
            Channel::Video => 47801,
            Channel::Audio => 47802,
        }
    }
}

/// Every AESP message type, tagged by its wire byte.
///
/// `BreakpointListOrHit` is deliberately a single variant: the
/// `BREAKPOINT_LIST` request (client->server) and `BREAKPOINT_HIT`
/// notification (server->client) share one type byte (`0x0E`). Callers
/// disambiguate by direction: an empty payload from a client is a list
/// request, a 2-byte payload from the server is a hit notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    // Control 0x00-0x3F
    Ping = 0x00,
    Pong = 0x01,
    Pause = 0x02,
    Resume = 0x03,
    Reset = 0x04,
    Status = 0x05,
    Info = 0x06,
    BootFile = 0x07,
    MemoryRead = 0x08,
    MemoryWrite = 0x09,
    RegistersRead = 0x0A,
    RegistersWrite = 0x0B,
    BreakpointSet = 0x0C,
    BreakpointClear = 0x0D,
    BreakpointListOrHit = 0x0E,
    Ack = 0x0F,
    Error = 0x3F,

    // Input 0x40-0x5F
    KeyDown = 0x40,
    KeyUp = 0x41,
    Joystick = 0x42,
    ConsoleKeys = 0x43,
    Paddle = 0x44,

    // Video 0x60-0x7F
    FrameRaw = 0x60,
    FrameDelta = 0x61,
    FrameConfig = 0x62,
    VideoSubscribe = 0x63,
    VideoUnsubscribe = 0x64,

    // Audio 0x80-0x9F
    AudioPcm = 0x80,
    AudioConfig = 0x81,
    AudioSync = 0x82,
    AudioSubscribe = 0x83,
    AudioUnsubscribe = 0x84,
}

impl MessageType {
    pub fn from_u8(byte: u8) -> Option<Self> {
        use MessageType::*;
        Some(match byte {
            0x00 => Ping,
            0x01 => Pong,
            0x02 => Pause,
            0x03 => Resume,
            0x04 => Reset,
            0x05 => Status,
            0x06 => Info,
            0x07 => BootFile,
            0x08 => MemoryRead,
            0x09 => MemoryWrite,
            0x0A => RegistersRead,
            0x0B => RegistersWrite,
            0x0C => BreakpointSet,
            0x0D => BreakpointClear,
            0x0E => BreakpointListOrHit,
            0x0F => Ack,
            0x3F => Error,
            0x40 => KeyDown,
            0x41 => KeyUp,
            0x42 => Joystick,
            0x43 => ConsoleKeys,
            0x44 => Paddle,
            0x60 => FrameRaw,
            0x61 => FrameDelta,
            0x62 => FrameConfig,
            0x63 => VideoSubscribe,
            0x64 => VideoUnsubscribe,
            0x80 => AudioPcm,
            0x81 => AudioConfig,
            0x82 => AudioSync,
            0x83 => AudioSubscribe,
            0x84 => AudioUnsubscribe,
            _ => return None,
        })
    }

    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    pub const fn category(self) -> Category {
        let byte = self.to_u8();
        match byte {
            0x00..=0x3F => Category::Control,
            0x40..=0x5F => Category::Input,
            0x60..=0x7F => Category::Video,
            _ => Category::Audio,
        }
    }

    pub const fn channel(self) -> Channel {
        match self.category() {
            Category::Control | Category::Input => Channel::Control,
            Category::Video => Channel::Video,
            Category::Audio => Channel::Audio,
        }
    }

    /// Whether a client typically originates this message type (request),
    /// as opposed to the server (response/notification). `BreakpointListOrHit`
    /// is request-or-notification depending on direction, see its doc comment.
    pub const fn is_request(self) -> bool {
        use MessageType::*;
        matches!(
            self,
            Ping | Pause
                | Resume
                | Reset
                | Status
                | Info
                | BootFile
                | MemoryRead
                | MemoryWrite
                | RegistersRead
                | RegistersWrite
                | BreakpointSet
                | BreakpointClear
                | BreakpointListOrHit
                | KeyDown
                | KeyUp
                | Joystick
                | ConsoleKeys
                | Paddle
                | VideoSubscribe
                | VideoUnsubscribe
                | AudioSubscribe
                | AudioUnsubscribe
        )
    }

    pub const fn name(self) -> &'static str {
        use MessageType::*;
        match self {
            Ping => "PING",
            Pong => "PONG",
            Pause => "PAUSE",
            Resume => "RESUME",
            Reset => "RESET",
            Status => "STATUS",
            Info => "INFO",
            BootFile => "BOOT_FILE",
            MemoryRead => "MEMORY_READ",
            MemoryWrite => "MEMORY_WRITE",
            RegistersRead => "REGISTERS_READ",
            RegistersWrite => "REGISTERS_WRITE",
            BreakpointSet => "BREAKPOINT_SET",
            BreakpointClear => "BREAKPOINT_CLEAR",
            BreakpointListOrHit => "BREAKPOINT_LIST_OR_HIT",
            Ack => "ACK",
            Error => "ERROR",
            KeyDown => "KEY_DOWN",
            KeyUp => "KEY_UP",
            Joystick => "JOYSTICK",
            ConsoleKeys => "CONSOLE_KEYS",
            Paddle => "PADDLE",
            FrameRaw => "FRAME_RAW",
            FrameDelta => "FRAME_DELTA",
            FrameConfig => "FRAME_CONFIG",
            VideoSubscribe => "VIDEO_SUBSCRIBE",
            VideoUnsubscribe => "VIDEO_UNSUBSCRIBE",
            AudioPcm => "AUDIO_PCM",
            AudioConfig => "AUDIO_CONFIG",
            AudioSync => "AUDIO_SYNC",
            AudioSubscribe => "AUDIO_SUBSCRIBE",
            AudioUnsubscribe => "AUDIO_UNSUBSCRIBE",
        }
    }

    pub const ALL: &'static [MessageType] = &[
        MessageType::Ping,
        MessageType::Pong,
        MessageType::Pause,
        MessageType::Resume,
        MessageType::Reset,
        MessageType::Status,
        MessageType::Info,
        MessageType::BootFile,
        MessageType::MemoryRead,
        MessageType::MemoryWrite,
        MessageType::RegistersRead,
        MessageType::RegistersWrite,
        MessageType::BreakpointSet,
        MessageType::BreakpointClear,
        MessageType::BreakpointListOrHit,
        MessageType::Ack,
        MessageType::Error,
        MessageType::KeyDown,
        MessageType::KeyUp,
        MessageType::Joystick,
        MessageType::ConsoleKeys,
        MessageType::Paddle,
        MessageType::FrameRaw,
        MessageType::FrameDelta,
        MessageType::FrameConfig,
        MessageType::VideoSubscribe,
        MessageType::VideoUnsubscribe,
        MessageType::AudioPcm,
        MessageType::AudioConfig,
        MessageType::AudioSync,
        MessageType::AudioSubscribe,
        MessageType::AudioUnsubscribe,
    ];
}

/// Errors returned by typed payload parsers. Parsers are total: every
/// byte slice produces either `Ok(value)` or one of these.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("payload too short: need at least {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },

    #[error("payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("trailing bytes after expected payload: {extra} extra bytes")]
    TrailingBytes { extra: usize },
}

fn require(payload: &[u8], n: usize) -> Result<(), PayloadError> {
    if payload.len() < n {
        Err(PayloadError::Truncated {
            expected: n,
            got: payload.len(),
        })
    } else {
        Ok(())
    }
}

fn utf8(bytes: &[u8]) -> Result<String, PayloadError> {
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|_| PayloadError::InvalidUtf8)
}

/// `KEY_DOWN` / `KEY_UP` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub key_char: u8,
    pub key_code: u8,
    pub flags: u8,
}

impl KeyEvent {
    pub const SHIFT: u8 = 1 << 0;
    pub const CONTROL: u8 = 1 << 1;

    pub fn shift(&self) -> bool {
        self.flags & Self::SHIFT != 0
    }

    pub fn control(&self) -> bool {
        self.flags & Self::CONTROL != 0
    }

    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        require(payload, 3)?;
        Ok(Self {
            key_char: payload[0],
            key_code: payload[1],
            flags: payload[2],
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        vec![self.key_char, self.key_code, self.flags]
    }
}

/// `JOYSTICK` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoystickEvent {
    pub port: u8,
    pub bits: u8,
}

impl JoystickEvent {
    pub const UP: u8 = 1 << 0;
    pub const DOWN: u8 = 1 << 1;
    pub const LEFT: u8 = 1 << 2;
    pub const RIGHT: u8 = 1 << 3;
    pub const TRIGGER: u8 = 1 << 4;

    pub fn up(&self) -> bool {
        self.bits & Self::UP != 0
    }
    pub fn down(&self) -> bool {
        self.bits & Self::DOWN != 0
    }
    pub fn left(&self) -> bool {
        self.bits & Self::LEFT != 0
    }
    pub fn right(&self) -> bool {
        self.bits & Self::RIGHT != 0
    }
    pub fn trigger(&self) -> bool {
        self.bits & Self::TRIGGER != 0
    }

    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        require(payload, 2)?;
        Ok(Self {
            port: payload[0],
            bits: payload[1],
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        vec![self.port, self.bits]
    }
}

/// `CONSOLE_KEYS` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsoleKeysEvent {
    pub flags: u8,
}

impl ConsoleKeysEvent {
    pub const START: u8 = 1 << 0;
    pub const SELECT: u8 = 1 << 1;
    pub const OPTION: u8 = 1 << 2;

    pub fn start(&self) -> bool {
        self.flags & Self::START != 0
    }
    pub fn select(&self) -> bool {
        self.flags & Self::SELECT != 0
    }
    pub fn option(&self) -> bool {
        self.flags & Self::OPTION != 0
    }

    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        require(payload, 1)?;
        Ok(Self { flags: payload[0] })
    }

    pub fn encode(&self) -> Vec<u8> {
        vec![self.flags]
    }
}

/// `PADDLE` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaddleEvent {
    pub number: u8,
    pub position: u8,
}

impl PaddleEvent {
    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        require(payload, 2)?;
        Ok(Self {
            number: payload[0],
            position: payload[1],
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        vec![self.number, self.position]
    }
}

/// `RESET` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetRequest {
    pub cold: bool,
}

impl ResetRequest {
    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        require(payload, 1)?;
        Ok(Self {
            cold: payload[0] == 0x01,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        vec![if self.cold { 0x01 } else { 0x00 }]
    }
}

/// `ACK` payload: echoes the type byte being acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckPayload {
    pub referenced_type: u8,
}

impl AckPayload {
    pub fn new(referenced: MessageType) -> Self {
        Self {
            referenced_type: referenced.to_u8(),
        }
    }

    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        require(payload, 1)?;
        Ok(Self {
            referenced_type: payload[0],
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        vec![self.referenced_type]
    }
}

/// `ERROR` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPayload {
    pub code: u8,
    pub message: String,
}

impl ErrorPayload {
    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        require(payload, 1)?;
        Ok(Self {
            code: payload[0],
            message: utf8(&payload[1..])?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![self.code];
        out.extend_from_slice(self.message.as_bytes());
        out
    }
}

/// One drive entry within a `STATUS` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveEntry {
    pub drive: u8,
    pub name: String,
}

/// `STATUS` response payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusResponse {
    pub is_running: bool,
    pub drives: Vec<DriveEntry>,
}

impl StatusResponse {
    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        require(payload, 1)?;
        let is_running = payload[0] != 0;
        let mut drives = Vec::new();
        let mut rest = &payload[1..];
        while !rest.is_empty() {
            require(rest, 2)?;
            let drive = rest[0];
            let name_len = rest[1] as usize;
            require(&rest[2..], name_len)?;
            let name = utf8(&rest[2..2 + name_len])?;
            drives.push(DriveEntry { drive, name });
            rest = &rest[2 + name_len..];
        }
        Ok(Self { is_running, drives })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![if self.is_running { 1 } else { 0 }];
        for d in &self.drives {
            out.push(d.drive);
            out.push(d.name.len() as u8);
            out.extend_from_slice(d.name.as_bytes());
        }
        out
    }
}

/// `REGISTERS_READ` response / `REGISTERS_WRITE` request payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registers {
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub s: u8,
    pub p: u8,
    pub pc: u16,
    pub reserved: u8,
}

impl Registers {
    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        require(payload, 8)?;
        Ok(Self {
            a: payload[0],
            x: payload[1],
            y: payload[2],
            s: payload[3],
            p: payload[4],
            pc: u16::from_be_bytes([payload[5], payload[6]]),
            reserved: payload[7],
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![self.a, self.x, self.y, self.s, self.p];
        out.extend_from_slice(&self.pc.to_be_bytes());
        out.push(self.reserved);
        out
    }
}

/// `MEMORY_READ` request payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryReadRequest {
    pub addr: u16,
    pub count: u16,
}

impl MemoryReadRequest {
    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        require(payload, 4)?;
        Ok(Self {
            addr: u16::from_be_bytes([payload[0], payload[1]]),
            count: u16::from_be_bytes([payload[2], payload[3]]),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4);
        out.extend_from_slice(&self.addr.to_be_bytes());
        out.extend_from_slice(&self.count.to_be_bytes());
        out
    }
}

/// `MEMORY_WRITE` request payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryWriteRequest {
    pub addr: u16,
    pub data: Vec<u8>,
}

impl MemoryWriteRequest {
    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        require(payload, 2)?;
        Ok(Self {
            addr: u16::from_be_bytes([payload[0], payload[1]]),
            data: payload[2..].to_vec(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + self.data.len());
        out.extend_from_slice(&self.addr.to_be_bytes());
        out.extend_from_slice(&self.data);
        out
    }
}

/// `BREAKPOINT_SET` / `BREAKPOINT_CLEAR` request payload, and the server
/// notification payload used for `BreakpointListOrHit` when acting as a
/// "hit" notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakpointAddr {
    pub addr: u16,
}

impl BreakpointAddr {
    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        require(payload, 2)?;
        Ok(Self {
            addr: u16::from_be_bytes([payload[0], payload[1]]),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        self.addr.to_be_bytes().to_vec()
    }
}

/// `BREAKPOINT_LIST` response payload (server→client direction of
/// `BreakpointListOrHit`): repeated `addr:u16`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointListResponse {
    pub addrs: Vec<u16>,
}

impl BreakpointListResponse {
    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        if payload.len() % 2 != 0 {
            return Err(PayloadError::TrailingBytes {
                extra: payload.len() % 2,
            });
        }
        let addrs = payload
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        Ok(Self { addrs })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.addrs.len() * 2);
        for addr in &self.addrs {
            out.extend_from_slice(&addr.to_be_bytes());
        }
        out
    }
}

/// `FRAME_CONFIG` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameConfig {
    pub width: u16,
    pub height: u16,
    pub bpp: u8,
    pub fps: u8,
}

impl FrameConfig {
    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        require(payload, 6)?;
        Ok(Self {
            width: u16::from_be_bytes([payload[0], payload[1]]),
            height: u16::from_be_bytes([payload[2], payload[3]]),
            bpp: payload[4],
            fps: payload[5],
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(6);
        out.extend_from_slice(&self.width.to_be_bytes());
        out.extend_from_slice(&self.height.to_be_bytes());
        out.push(self.bpp);
        out.push(self.fps);
        out
    }
}

/// `AUDIO_CONFIG` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub bits_per_sample: u8,
    pub channels: u8,
}

impl AudioConfig {
    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        require(payload, 6)?;
        Ok(Self {
            sample_rate: u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]),
            bits_per_sample: payload[4],
            channels: payload[5],
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(6);
        out.extend_from_slice(&self.sample_rate.to_be_bytes());
        out.push(self.bits_per_sample);
        out.push(self.channels);
        out
    }
}

/// `AUDIO_SYNC` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSync {
    pub frame_number: u64,
}

impl AudioSync {
    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        require(payload, 8)?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&payload[..8]);
        Ok(Self {
            frame_number: u64::from_be_bytes(bytes),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        self.frame_number.to_be_bytes().to_vec()
    }
}

/// `BOOT_FILE` request payload: a UTF-8 path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootFileRequest {
    pub path: String,
}

impl BootFileRequest {
    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        Ok(Self { path: utf8(payload)? })
    }

    pub fn encode(&self) -> Vec<u8> {
        self.path.as_bytes().to_vec()
    }
}

/// `BOOT_FILE` response payload: a status byte then a UTF-8 message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootFileResponse {
    pub status: u8,
    pub message: String,
}

impl BootFileResponse {
    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        require(payload, 1)?;
        Ok(Self {
            status: payload[0],
            message: utf8(&payload[1..])?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![self.status];
        out.extend_from_slice(self.message.as_bytes());
        out
    }
}

/// `INFO` response payload: an opaque UTF-8 JSON body. The protocol core
/// does not interpret the JSON; it is produced/consumed by the delegate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoResponse {
    pub json: String,
}

impl InfoResponse {
    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        Ok(Self { json: utf8(payload)? })
    }

    pub fn encode(&self) -> Vec<u8> {
        self.json.as_bytes().to_vec()
    }
}

/// Convert little-endian 16-bit signed PCM sample bytes (the `AUDIO_PCM`
/// payload convention, spec.md §4.1) into sample values.
pub fn decode_pcm_samples(payload: &[u8]) -> Result<Vec<i16>, PayloadError> {
    if payload.len() % 2 != 0 {
        return Err(PayloadError::TrailingBytes {
            extra: payload.len() % 2,
        });
    }
    Ok(payload
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect())
}

/// Encode sample values into the `AUDIO_PCM` little-endian payload.
pub fn encode_pcm_samples(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

/// Metadata map type used by a couple of CLI/debug surfaces; kept here so
/// callers needing ordered key output can reach for a `BTreeMap` without
/// re-importing `std::collections`.
pub type MetadataMap = BTreeMap<String, String>;
