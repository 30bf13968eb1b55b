use crate::config::WebSocketConfig;
use crate::error::Error;
use crate::frame::{Frame, FrameParser, OpCode, ParseOutcome};
use crate::message::{close_code, is_valid_close_code, CloseControl, Message};
use crate::utf8::Utf8Validator;
use std::collections::VecDeque;

/// Initial read hint: enough for the two fixed header bytes of the next
/// frame, after which the parser knows how much it actually wants.
pub const DEFAULT_READING_SIZE: usize = 2;

struct FragmentedMessage {
    op_code: OpCode,
    fragments: Vec<u8>,
    completed: bool,
}

/// The message-assembly layer between the frame codec and the endpoint.
///
/// The stream knows nothing about sockets. Its owner feeds it whatever
/// bytes the transport produced and inspects the outcome afterwards:
/// completed data messages, queued pings and pongs, a close frame from the
/// peer, or protocol errors that should fail the connection. `feed` returns
/// how many bytes the parser would like next, which the endpoint uses as
/// its reading size.
///
/// A server-side stream expects every incoming frame to be masked, a
/// client-side stream expects none of them to be.
pub struct MessageStream {
    parser: FrameParser,
    fragmented_message: Option<FragmentedMessage>,
    messages: VecDeque<Message>,
    pings: VecDeque<Vec<u8>>,
    pongs: VecDeque<Vec<u8>>,
    closing: Option<CloseControl>,
    errors: VecDeque<CloseControl>,
    utf8validator: Utf8Validator,
    expect_masking: bool,
    config: WebSocketConfig,
}

impl MessageStream {
    pub fn new(expect_masking: bool, config: WebSocketConfig) -> Self {
        Self {
            parser: FrameParser::new(config.max_frame_size),
            fragmented_message: None,
            messages: VecDeque::new(),
            pings: VecDeque::new(),
            pongs: VecDeque::new(),
            closing: None,
            errors: VecDeque::new(),
            utf8validator: Utf8Validator::new(),
            expect_masking,
            config,
        }
    }

    /// Stream for the server end of a connection.
    pub fn server(config: WebSocketConfig) -> Self {
        Self::new(true, config)
    }

    /// Stream for the client end of a connection.
    pub fn client(config: WebSocketConfig) -> Self {
        Self::new(false, config)
    }

    /// Runs `data` through the frame parser, dispatching every frame that
    /// completes. Consumption stops once a close or an error is queued;
    /// nothing past that point is interpreted.
    ///
    /// Returns the next reading-size hint.
    pub fn feed(&mut self, data: &[u8]) -> usize {
        if self.closing.is_some() || !self.errors.is_empty() {
            return DEFAULT_READING_SIZE;
        }

        let mut chunk = data;
        loop {
            match self.parser.feed(chunk) {
                Ok(ParseOutcome::NeedMore(n)) => return n,
                Ok(ParseOutcome::Ready(frame)) => {
                    self.dispatch(frame);
                    if self.closing.is_some() || !self.errors.is_empty() {
                        return DEFAULT_READING_SIZE;
                    }
                }
                Err(error) => {
                    self.push_error(error);
                    return DEFAULT_READING_SIZE;
                }
            }
            // Everything was handed to the parser on the first pass; keep
            // draining whatever it still has buffered
            chunk = &[];
        }
    }

    pub fn has_message(&self) -> bool {
        !self.messages.is_empty()
    }

    pub fn next_message(&mut self) -> Option<Message> {
        self.messages.pop_front()
    }

    pub fn next_ping(&mut self) -> Option<Vec<u8>> {
        self.pings.pop_front()
    }

    pub fn next_pong(&mut self) -> Option<Vec<u8>> {
        self.pongs.pop_front()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn next_error(&mut self) -> Option<CloseControl> {
        self.errors.pop_front()
    }

    /// The close message received from the peer, if any.
    pub fn closing(&self) -> Option<&CloseControl> {
        self.closing.as_ref()
    }

    fn dispatch(&mut self, frame: Frame) {
        // Frames from a client must be masked, frames from a server must
        // not be. An empty payload carries no evidence either way, so only
        // frames with actual data are held to the policy
        if !frame.payload.is_empty() {
            if self.expect_masking && frame.masking_key.is_none() {
                self.push_error(Error::MissingMasking);
                return;
            }
            if !self.expect_masking && frame.masking_key.is_some() {
                self.push_error(Error::UnexpectedMasking);
                return;
            }
        }

        match frame.opcode {
            // A data opcode starts a new message; receiving one while a
            // fragmented message is still open is a protocol violation
            OpCode::Text | OpCode::Binary => {
                if self.fragmented_message.is_some() {
                    self.push_error(Error::FragmentedInProgress);
                    return;
                }

                let message = FragmentedMessage {
                    op_code: frame.opcode,
                    fragments: frame.payload,
                    completed: frame.final_fragment,
                };

                if message.op_code == OpCode::Text {
                    let (is_valid, end_on_code_point) =
                        self.utf8validator.validate(&message.fragments);
                    if !is_valid || (message.completed && !end_on_code_point) {
                        self.push_error(Error::InvalidUtf8);
                        return;
                    }
                }

                if self.exceeds_message_size(message.fragments.len()) {
                    return;
                }

                if message.completed {
                    self.complete_message(message);
                } else {
                    self.fragmented_message = Some(message);
                }
            }
            // Continuation frames only make sense from the second frame of
            // a fragmented message onwards
            OpCode::Continue => {
                let Some(mut message) = self.fragmented_message.take() else {
                    self.push_error(Error::InvalidContinuationFrame);
                    return;
                };

                message.fragments.extend_from_slice(&frame.payload);
                message.completed = frame.final_fragment;

                if self.exceeds_message_size(message.fragments.len()) {
                    return;
                }

                if message.op_code == OpCode::Text {
                    let (is_valid, end_on_code_point) = self.utf8validator.validate(&frame.payload);
                    if !is_valid || (message.completed && !end_on_code_point) {
                        self.push_error(Error::InvalidUtf8);
                        return;
                    }
                }

                if message.completed {
                    self.complete_message(message);
                } else {
                    self.fragmented_message = Some(message);
                }
            }
            OpCode::Close => self.dispatch_close(frame.payload),
            OpCode::Ping => self.pings.push_back(frame.payload),
            OpCode::Pong => self.pongs.push_back(frame.payload),
        }
    }

    fn dispatch_close(&mut self, payload: Vec<u8>) {
        if payload.is_empty() {
            // No status present. The RFC reserves 1005 exactly for this:
            // reported locally, never echoed onto the wire
            self.closing = Some(CloseControl::new(close_code::NO_STATUS, ""));
            return;
        }

        if payload.len() == 1 {
            self.push_error(Error::InvalidClosePayload);
            return;
        }

        let code = u16::from_be_bytes([payload[0], payload[1]]);
        if !is_valid_close_code(code) {
            self.push_error(Error::InvalidCloseCode(code));
            return;
        }

        // A close frame may interleave a fragmented text message whose
        // validator is legitimately parked mid-code-point, so the reason is
        // checked with a validator of its own
        let mut validator = Utf8Validator::new();
        let (is_valid, end_on_code_point) = validator.validate(&payload[2..]);
        if !is_valid || !end_on_code_point {
            self.push_error(Error::InvalidUtf8);
            return;
        }

        match String::from_utf8(payload[2..].to_vec()) {
            Ok(reason) => self.closing = Some(CloseControl::new(code, reason)),
            Err(_) => self.push_error(Error::InvalidUtf8),
        }
    }

    fn complete_message(&mut self, message: FragmentedMessage) {
        self.utf8validator.reset();
        match message.op_code {
            OpCode::Text => match String::from_utf8(message.fragments) {
                Ok(text) => self.messages.push_back(Message::Text(text)),
                Err(_) => self.push_error(Error::InvalidUtf8),
            },
            _ => self.messages.push_back(Message::Binary(message.fragments)),
        }
    }

    fn exceeds_message_size(&mut self, len: usize) -> bool {
        match self.config.max_message_size {
            Some(max) if len > max => {
                self.push_error(Error::MaxMessageSize);
                true
            }
            _ => false,
        }
    }

    /// Files the failure under the close code the peer should see.
    fn push_error(&mut self, error: Error) {
        self.errors
            .push_back(CloseControl::new(error.close_code(), error.to_string()));
    }
}
