use crate::error::Error;
use bytes::{Buf, BytesMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continue,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    pub fn from(byte: u8) -> Result<Self, Error> {
        match byte {
            0x0 => Ok(OpCode::Continue),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            // 0x3..=0x7 and 0xB..=0xF are reserved by the RFC
            _ => Err(Error::InvalidOpcode),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            OpCode::Continue => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }

    pub fn is_control(&self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

/// The smallest transmission unit of the protocol: a header, an optional
/// 4-byte masking key and the payload. The payload is always held unmasked;
/// masking is applied while the frame is serialized.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub final_fragment: bool,
    pub rsv1: bool,
    pub rsv2: bool,
    pub rsv3: bool,
    pub opcode: OpCode,
    pub masking_key: Option<[u8; 4]>,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(final_fragment: bool, opcode: OpCode, payload: Vec<u8>) -> Self {
        Self {
            final_fragment,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            masking_key: None,
            payload,
        }
    }

    pub fn masked(mut self, key: [u8; 4]) -> Self {
        self.masking_key = Some(key);
        self
    }

    /// Serializes the frame for the wire.
    ///
    /// The first byte of a websockets frame contains the final fragment bit,
    /// the three reserved bits and the opcode. In
    /// (final_fragment as u8) << 7 we are doing a left bitwise shift, so if
    /// final_fragment is true the bit 0b10000000 is set, and a bitwise OR
    /// stacks the remaining flags and the opcode below it.
    pub fn build(&self) -> Result<Vec<u8>, Error> {
        let payload_len = self.payload.len();

        // The extended 8-byte length field keeps its most significant bit
        // zero, so anything at or past 2^63 can't be represented
        if payload_len as u64 >= 1 << 63 {
            return Err(Error::FrameTooLarge);
        }

        let first_byte = (self.final_fragment as u8) << 7
            | (self.rsv1 as u8) << 6
            | (self.rsv2 as u8) << 5
            | (self.rsv3 as u8) << 4
            | self.opcode.as_u8();

        let mask_bit: u8 = if self.masking_key.is_some() {
            0b1000_0000
        } else {
            0
        };

        let mut bytes = Vec::with_capacity(payload_len + 14);
        bytes.push(first_byte);

        // According to Websockets RFC, if the payload length is less or equal
        // 125 it's written into the 7-bit field directly, between 126 and
        // 65535 it's the marker 126 plus 2 big-endian bytes, and above that
        // the marker 127 plus 8 big-endian bytes.
        if payload_len <= 125 {
            bytes.push(mask_bit | payload_len as u8);
        } else if payload_len <= 65535 {
            bytes.push(mask_bit | 126);
            bytes.extend_from_slice(&(payload_len as u16).to_be_bytes());
        } else {
            bytes.push(mask_bit | 127);
            bytes.extend_from_slice(&(payload_len as u64).to_be_bytes());
        }

        match self.masking_key {
            Some(key) => {
                bytes.extend_from_slice(&key);
                let mut masked = self.payload.clone();
                apply_mask(&mut masked, key);
                bytes.extend_from_slice(&masked);
            }
            None => bytes.extend_from_slice(&self.payload),
        }

        Ok(bytes)
    }
}

/// XORs every payload byte with the corresponding byte (modulo 4) of the
/// masking key. Applying the same key twice restores the original data, so
/// this single function both masks and unmasks.
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    HeaderByte1,
    HeaderByte2,
    ExtendedLength16,
    ExtendedLength64,
    MaskingKey,
    Body,
}

#[derive(Debug)]
pub enum ParseOutcome {
    /// At least this many additional bytes are required before the parser
    /// can make progress.
    NeedMore(usize),
    Ready(Frame),
}

/// Resumable frame parser.
///
/// Callers feed it bytes in whatever granularity the transport produced
/// them; partial reads are buffered internally, so splitting a frame at any
/// byte boundary yields the same result as handing over the whole buffer.
/// Bytes past the end of a completed frame are kept for the next one.
pub struct FrameParser {
    state: ParseState,
    buf: BytesMut,
    max_frame_size: Option<usize>,
    final_fragment: bool,
    rsv1: bool,
    rsv2: bool,
    rsv3: bool,
    opcode: OpCode,
    masked: bool,
    payload_length: u64,
    masking_key: Option<[u8; 4]>,
}

impl FrameParser {
    pub fn new(max_frame_size: Option<usize>) -> Self {
        Self {
            state: ParseState::HeaderByte1,
            buf: BytesMut::with_capacity(1024),
            max_frame_size,
            final_fragment: false,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode: OpCode::Continue,
            masked: false,
            payload_length: 0,
            masking_key: None,
        }
    }

    pub fn feed(&mut self, data: &[u8]) -> Result<ParseOutcome, Error> {
        self.buf.extend_from_slice(data);

        loop {
            match self.state {
                ParseState::HeaderByte1 => {
                    if self.buf.is_empty() {
                        return Ok(ParseOutcome::NeedMore(1));
                    }
                    let first_byte = self.buf.get_u8();

                    // The first bit tells us whether this frame is the final
                    // fragment of a message, the last 4 bits carry the opcode
                    self.final_fragment = (first_byte & 0b1000_0000) != 0;
                    self.opcode = OpCode::from(first_byte & 0b0000_1111)?;

                    // RSV is short for "Reserved": optional flags only
                    // meaningful when an extension was negotiated. None is
                    // negotiated here, so any non-zero bit fails the
                    // connection immediately
                    self.rsv1 = (first_byte & 0b0100_0000) != 0;
                    self.rsv2 = (first_byte & 0b0010_0000) != 0;
                    self.rsv3 = (first_byte & 0b0001_0000) != 0;
                    if self.rsv1 || self.rsv2 || self.rsv3 {
                        return Err(Error::RSVNotZero);
                    }

                    // Control opcodes (close, ping, pong) can't be split
                    // between multiple frames
                    if !self.final_fragment && self.opcode.is_control() {
                        return Err(Error::ControlFramesFragmented);
                    }

                    self.state = ParseState::HeaderByte2;
                }
                ParseState::HeaderByte2 => {
                    if self.buf.is_empty() {
                        return Ok(ParseOutcome::NeedMore(1));
                    }
                    let second_byte = self.buf.get_u8();

                    // First bit is the mask flag, the remaining 7 carry the
                    // payload length or one of the extended-length markers
                    self.masked = (second_byte & 0b1000_0000) != 0;
                    let length = (second_byte & 0b0111_1111) as u64;

                    // Control frames are only allowed a payload up to and
                    // including 125 octets, which also rules out both
                    // extended length encodings for them
                    if length > 125 && self.opcode.is_control() {
                        return Err(Error::ControlFramePayloadSize);
                    }

                    if length == 126 {
                        self.state = ParseState::ExtendedLength16;
                    } else if length == 127 {
                        self.state = ParseState::ExtendedLength64;
                    } else {
                        self.payload_length = length;
                        self.check_frame_size()?;
                        self.state = self.state_after_length();
                    }
                }
                ParseState::ExtendedLength16 => {
                    if self.buf.len() < 2 {
                        return Ok(ParseOutcome::NeedMore(2 - self.buf.len()));
                    }
                    self.payload_length = self.buf.get_u16() as u64;
                    self.check_frame_size()?;
                    self.state = self.state_after_length();
                }
                ParseState::ExtendedLength64 => {
                    if self.buf.len() < 8 {
                        return Ok(ParseOutcome::NeedMore(8 - self.buf.len()));
                    }
                    let length = self.buf.get_u64();
                    if length & (1 << 63) != 0 {
                        return Err(Error::FrameTooLarge);
                    }
                    self.payload_length = length;
                    self.check_frame_size()?;
                    self.state = self.state_after_length();
                }
                ParseState::MaskingKey => {
                    if self.buf.len() < 4 {
                        return Ok(ParseOutcome::NeedMore(4 - self.buf.len()));
                    }
                    let mut key = [0u8; 4];
                    self.buf.copy_to_slice(&mut key);
                    self.masking_key = Some(key);
                    self.state = ParseState::Body;
                }
                ParseState::Body => {
                    let needed = self.payload_length as usize;
                    if self.buf.len() < needed {
                        return Ok(ParseOutcome::NeedMore(needed - self.buf.len()));
                    }
                    let mut payload = self.buf.split_to(needed).to_vec();

                    // Frames sent from a client are masked by a four byte
                    // value that is part of the frame itself; XORing the
                    // payload with it (modulo 4) recovers the original data
                    if let Some(key) = self.masking_key {
                        apply_mask(&mut payload, key);
                    }

                    let frame = Frame {
                        final_fragment: self.final_fragment,
                        rsv1: self.rsv1,
                        rsv2: self.rsv2,
                        rsv3: self.rsv3,
                        opcode: self.opcode,
                        masking_key: self.masking_key,
                        payload,
                    };

                    self.restart();
                    return Ok(ParseOutcome::Ready(frame));
                }
            }
        }
    }

    /// Leftover bytes beyond the frame that just completed stay buffered for
    /// the next frame; only the per-frame fields are cleared.
    fn restart(&mut self) {
        self.state = ParseState::HeaderByte1;
        self.final_fragment = false;
        self.rsv1 = false;
        self.rsv2 = false;
        self.rsv3 = false;
        self.opcode = OpCode::Continue;
        self.masked = false;
        self.payload_length = 0;
        self.masking_key = None;
    }

    fn state_after_length(&self) -> ParseState {
        if self.masked {
            ParseState::MaskingKey
        } else {
            ParseState::Body
        }
    }

    fn check_frame_size(&self) -> Result<(), Error> {
        if let Some(max) = self.max_frame_size {
            if self.payload_length > max as u64 {
                return Err(Error::MaxFrameSize);
            }
        }
        Ok(())
    }
}
