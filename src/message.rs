use crate::error::Error;
use crate::frame::{Frame, OpCode};

/// RFC 6455 status codes used throughout the crate. The 3000..=4999 range
/// is application-defined and accepted verbatim.
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const PROTOCOL_ERROR: u16 = 1002;
    pub const UNSUPPORTED_DATA: u16 = 1003;
    /// Synthesized locally for a payload-free close, never sent on the wire.
    pub const NO_STATUS: u16 = 1005;
    /// Synthesized locally when the transport drops, never sent on the wire.
    pub const ABNORMAL: u16 = 1006;
    pub const INVALID_PAYLOAD: u16 = 1007;
    pub const POLICY_VIOLATION: u16 = 1008;
    pub const MESSAGE_TOO_BIG: u16 = 1009;
    pub const MANDATORY_EXTENSION: u16 = 1010;
    pub const INTERNAL_ERROR: u16 = 1011;
}

/// Status code and human-readable reason carried by a close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseControl {
    pub code: u16,
    pub reason: String,
}

impl CloseControl {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Wire payload of the close frame: two big-endian code bytes followed
    /// by the UTF-8 reason. The synthetic codes 1005 and 1006 exist only on
    /// this side of the socket, so they serialize to an empty payload.
    pub fn to_payload(&self) -> Vec<u8> {
        if self.code == close_code::NO_STATUS || self.code == close_code::ABNORMAL {
            return Vec::new();
        }
        let mut payload = Vec::with_capacity(2 + self.reason.len());
        payload.extend_from_slice(&self.code.to_be_bytes());
        payload.extend_from_slice(self.reason.as_bytes());
        payload
    }
}

/// Checks a closing code received from the peer against the values the RFC
/// allows on the wire.
pub fn is_valid_close_code(code: u16) -> bool {
    matches!(
        code,
        1000 | 1001 | 1002 | 1003 | 1007 | 1008 | 1009 | 1010 | 1011
    ) || (3000..=4999).contains(&code)
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close(CloseControl),
}

impl Message {
    pub fn opcode(&self) -> OpCode {
        match self {
            Message::Text(_) => OpCode::Text,
            Message::Binary(_) => OpCode::Binary,
            Message::Ping(_) => OpCode::Ping,
            Message::Pong(_) => OpCode::Pong,
            Message::Close(_) => OpCode::Close,
        }
    }

    pub fn is_control(&self) -> bool {
        self.opcode().is_control()
    }

    // Function to get the payload as binary (Vec<u8>)
    pub fn as_binary(&self) -> Vec<u8> {
        match self {
            Message::Text(text) => text.as_bytes().to_vec(),
            Message::Binary(data) | Message::Ping(data) | Message::Pong(data) => data.clone(),
            Message::Close(close) => close.to_payload(),
        }
    }

    // Function to get the payload as a String
    pub fn as_text(&self) -> Result<String, Error> {
        match self {
            Message::Text(text) => Ok(text.clone()),
            Message::Binary(data) | Message::Ping(data) | Message::Pong(data) => {
                Ok(String::from_utf8(data.clone())?)
            }
            Message::Close(close) => Ok(close.reason.clone()),
        }
    }

    /// Builds the single frame of an unfragmented message, fin bit set.
    pub fn single(self) -> Frame {
        Frame::new(true, self.opcode(), self.into_payload())
    }

    /// Splits a data message into frames of at most `fragment_size` bytes.
    ///
    /// Per the RFC the first frame of a fragmented message carries the data
    /// opcode with fin 0, every following frame carries the Continue opcode,
    /// and only the last one has fin set. Control messages never fragment,
    /// whatever size was asked for.
    pub fn to_frames(self, fragment_size: usize) -> Vec<Frame> {
        let opcode = self.opcode();
        if opcode.is_control() {
            return vec![self.single()];
        }

        let payload = self.into_payload();
        if payload.is_empty() || fragment_size == 0 || payload.len() <= fragment_size {
            return vec![Frame::new(true, opcode, payload)];
        }

        let mut frames = Vec::new();
        for chunk in payload.chunks(fragment_size) {
            frames.push(Frame::new(
                false,
                if frames.is_empty() {
                    opcode
                } else {
                    OpCode::Continue
                },
                chunk.to_vec(),
            ));
        }

        if let Some(last_frame) = frames.last_mut() {
            last_frame.final_fragment = true;
        }

        frames
    }

    fn into_payload(self) -> Vec<u8> {
        match self {
            Message::Text(text) => text.into_bytes(),
            Message::Binary(data) | Message::Ping(data) | Message::Pong(data) => data,
            Message::Close(close) => close.to_payload(),
        }
    }
}
