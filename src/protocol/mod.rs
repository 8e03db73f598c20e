//! AESP wire protocol: framing (C1/C2) and message taxonomy.

pub mod frame;
pub mod message;

pub use frame::{Frame, FrameCodec, FrameError, HEADER_SIZE, MAGIC, MAX_PAYLOAD_BYTES, VERSION};
pub use message::{
    AckPayload, AudioConfig, AudioSync, BootFileRequest, BootFileResponse, BreakpointAddr,
    BreakpointListResponse, Category, Channel, ConsoleKeysEvent, DriveEntry, ErrorPayload,
    FrameConfig, InfoResponse, JoystickEvent, KeyEvent, MemoryReadRequest, MemoryWriteRequest,
    MessageType, PaddleEvent, PayloadError, Registers, ResetRequest, StatusResponse,
    decode_pcm_samples, encode_pcm_samples,
};

/// Build a PING or PONG frame: both are empty-payload control frames.
pub fn ping_frame() -> Frame {
    Frame::empty(MessageType::Ping)
}

pub fn pong_frame() -> Frame {
    Frame::empty(MessageType::Pong)
}

/// Build an `ACK` frame acknowledging a given request type.
pub fn ack_frame(referenced: MessageType) -> Frame {
    Frame::new(MessageType::Ack, AckPayload::new(referenced).encode())
}

/// Build an `ERROR` frame.
pub fn error_frame(code: u8, message: impl Into<String>) -> Frame {
    let payload = ErrorPayload {
        code,
        message: message.into(),
    };
    Frame::new(MessageType::Error, payload.encode())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_pong_are_empty() {
        assert!(ping_frame().payload().is_empty());
        assert!(pong_frame().payload().is_empty());
        assert_eq!(ping_frame().msg_type, MessageType::Ping);
        assert_eq!(pong_frame().msg_type, MessageType::Pong);
    }

    #[test]
    fn ack_frame_references_type() {
        let frame = ack_frame(MessageType::Pause);
        assert_eq!(frame.msg_type, MessageType::Ack);
        assert_eq!(frame.payload()[0], MessageType::Pause.to_u8());
    }
}
