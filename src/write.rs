use crate::config::WebSocketConfig;
use crate::error::Error;
use crate::frame::{Frame, OpCode};
use crate::message::{close_code, CloseControl, Message};
use crate::transport::Transport;
use crate::utils::generate_masking_key;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub enum WriterKind {
    Client,
    Server,
}

/// Serializes frames onto the transport's write side.
///
/// According to Websockets RFC, all frames sent from the client need to
/// have the payload masked, with a fresh key per frame, while frames sent
/// from a server to a client are never masked. The kind decides which rule
/// applies.
pub struct Writer {
    transport: Arc<dyn Transport>,
    kind: WriterKind,
}

impl Writer {
    pub fn new(transport: Arc<dyn Transport>, kind: WriterKind) -> Self {
        Self { transport, kind }
    }

    pub fn write_frame(&mut self, mut frame: Frame) -> Result<(), Error> {
        frame.masking_key = match self.kind {
            WriterKind::Client => Some(generate_masking_key()),
            WriterKind::Server => None,
        };

        let bytes = frame.build()?;
        self.transport.send_all(&bytes)?;
        Ok(())
    }
}

// A poisoned writer mutex means some thread panicked mid-send; the frame it
// was writing is torn either way, and the connection is about to die on a
// protocol error, so the lock stays usable
pub(crate) fn lock_writer(writer: &Arc<Mutex<Writer>>) -> MutexGuard<'_, Writer> {
    writer.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Application-facing send handle of an endpoint.
///
/// It shares the frame writer with the endpoint's run loop, so sends from
/// application threads serialize with automatic pongs and close replies
/// instead of interleaving with them. Cheap to hand around: every callback
/// receives one, and more can be created from the endpoint at will.
pub struct WSWriter {
    writer: Arc<Mutex<Writer>>,
    server_terminated: Arc<AtomicBool>,
    pub web_socket_config: WebSocketConfig,
}

impl WSWriter {
    pub(crate) fn new(
        writer: Arc<Mutex<Writer>>,
        server_terminated: Arc<AtomicBool>,
        web_socket_config: WebSocketConfig,
    ) -> Self {
        Self {
            writer,
            server_terminated,
            web_socket_config,
        }
    }

    pub fn send_message(&mut self, message: Message) -> Result<(), Error> {
        if let Some(max) = self.web_socket_config.max_message_size {
            if message.as_binary().len() > max {
                return Err(Error::MaxMessageSize);
            }
        }

        let frames = message.to_frames(self.web_socket_config.max_frame_size.unwrap_or(0));
        self.write_frames(frames)
    }

    // This function will be used to send general data as a vector of bytes,
    // and by default it will be sent with a text opcode
    pub fn send(&mut self, data: Vec<u8>) -> Result<(), Error> {
        self.send_message(Message::Text(String::from_utf8(data)?))
    }

    pub fn send_as_text(&mut self, data: String) -> Result<(), Error> {
        self.send_message(Message::Text(data))
    }

    pub fn send_as_binary(&mut self, data: Vec<u8>) -> Result<(), Error> {
        self.send_message(Message::Binary(data))
    }

    pub fn send_ping(&mut self, data: Vec<u8>) -> Result<(), Error> {
        if data.len() > 125 {
            return Err(Error::ControlFramePayloadSize);
        }
        self.write_frames(vec![Frame::new(true, OpCode::Ping, data)])
    }

    pub fn send_pong(&mut self, data: Vec<u8>) -> Result<(), Error> {
        if data.len() > 125 {
            return Err(Error::ControlFramePayloadSize);
        }
        self.write_frames(vec![Frame::new(true, OpCode::Pong, data)])
    }

    /// Streams a finite sequence of chunks as one fragmented message: the
    /// first chunk goes out with the data opcode and fin 0, interior chunks
    /// as continuations, and the last chunk as a continuation with fin set.
    /// One chunk of lookahead is held back so the final one can be told
    /// apart without knowing the sequence length up front.
    pub fn send_fragmented<I>(&mut self, chunks: I, binary: bool) -> Result<(), Error>
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        let opcode = if binary { OpCode::Binary } else { OpCode::Text };

        let mut chunks = chunks.into_iter();
        let mut pending = match chunks.next() {
            Some(chunk) => chunk,
            None => return self.write_frames(vec![Frame::new(true, opcode, Vec::new())]),
        };

        let mut first = true;
        for chunk in chunks {
            let frame_opcode = if first { opcode } else { OpCode::Continue };
            self.write_frames(vec![Frame::new(false, frame_opcode, pending)])?;
            pending = chunk;
            first = false;
        }

        let frame_opcode = if first { opcode } else { OpCode::Continue };
        self.write_frames(vec![Frame::new(true, frame_opcode, pending)])
    }

    // This function can be used to send large payloads, that will be divided
    // in chunks using fragmented messages and the Continue opcode
    pub fn send_large_data_fragmented(
        &mut self,
        message: Message,
        fragment_size: usize,
    ) -> Result<(), Error> {
        let max_frame_size = self.web_socket_config.max_frame_size.unwrap_or(usize::MAX);
        if fragment_size > max_frame_size {
            return Err(Error::CustomFragmentSizeExceeded(
                fragment_size,
                max_frame_size,
            ));
        }

        if let Some(max) = self.web_socket_config.max_message_size {
            if message.as_binary().len() > max {
                return Err(Error::MaxMessageSize);
            }
        }

        self.write_frames(message.to_frames(fragment_size))
    }

    /// Initiates the closing handshake. Idempotent: only the first call
    /// puts a close frame on the wire, and the transport itself stays open
    /// until the peer answers or the connection dies.
    pub fn close(&mut self, code: u16, reason: &str) -> Result<(), Error> {
        if self.server_terminated.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let payload = CloseControl::new(code, reason).to_payload();
        self.write_frames(vec![Frame::new(true, OpCode::Close, payload)])
    }

    /// Close with the default normal-closure code.
    pub fn close_default(&mut self) -> Result<(), Error> {
        self.close(close_code::NORMAL, "")
    }

    pub(crate) fn write_frames(&mut self, frames: Vec<Frame>) -> Result<(), Error> {
        let mut writer = lock_writer(&self.writer);
        for frame in frames {
            writer.write_frame(frame)?;
        }
        Ok(())
    }
}
