use crate::config::WebSocketConfig;
use crate::frame::{Frame, OpCode};
use crate::message::{close_code, CloseControl, Message};
use crate::stream::{MessageStream, DEFAULT_READING_SIZE};
use crate::transport::{format_addresses, Transport};
use crate::write::{lock_writer, WSWriter, Writer, WriterKind};
use log::{debug, error, warn};
use std::os::unix::io::RawFd;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Lifecycle callbacks an endpoint delivers to its host.
///
/// Every method has an empty default so hosts only implement what they care
/// about. Callbacks that may want to answer receive the connection's send
/// handle. A panicking callback doesn't tear the process down: it is
/// caught, logged, and the endpoint is failed with 1011.
pub trait ConnectionHandler: Send {
    /// The upgrade handshake succeeded and the frame loop is about to run.
    fn opened(&mut self, _writer: &mut WSWriter) {}

    /// A complete text or binary message arrived.
    fn received_message(&mut self, _writer: &mut WSWriter, _message: Message) {}

    /// The peer answered one of our pings.
    fn ponged(&mut self, _writer: &mut WSWriter, _pong: &[u8]) {}

    /// The websocket stream and connection are finally closed. `code` is
    /// the status the closing side supplied, or 1006 when the transport
    /// dropped without a closing handshake.
    fn closed(&mut self, _code: u16, _reason: &str) {}
}

/// One side of a websocket connection: the bound pair of a transport and a
/// message stream, plus the host's handler.
///
/// After the handshake, either hand it to [`run`](WSConnection::run) on a
/// dedicated thread (it blocks until the connection is over), or register
/// it with a `WebSocketManager` which advances it one
/// [`once`](WSConnection::once) step whenever the socket turns readable.
pub struct WSConnection {
    transport: Arc<dyn Transport>,
    stream: MessageStream,
    writer: Arc<Mutex<Writer>>,
    handler: Box<dyn ConnectionHandler>,
    client_terminated: Arc<AtomicBool>,
    server_terminated: Arc<AtomicBool>,
    reading_buffer_size: usize,
    /// Close we failed the connection with, remembered so teardown reports
    /// that code instead of a generic 1006.
    sent_error_close: Option<CloseControl>,
    closed_notified: bool,
    config: WebSocketConfig,
    /// Bytes the handshake read past the end of the HTTP head.
    leftover: Vec<u8>,
    sub_protocols: Vec<String>,
    extensions: Vec<String>,
}

impl WSConnection {
    pub fn new(
        transport: Arc<dyn Transport>,
        handler: Box<dyn ConnectionHandler>,
        kind: WriterKind,
        config: WebSocketConfig,
    ) -> Self {
        // A server reads masked frames and writes unmasked ones; a client
        // the other way around
        let stream = match kind {
            WriterKind::Server => MessageStream::server(config.clone()),
            WriterKind::Client => MessageStream::client(config.clone()),
        };
        let writer = Arc::new(Mutex::new(Writer::new(transport.clone(), kind)));

        Self {
            transport,
            stream,
            writer,
            handler,
            client_terminated: Arc::new(AtomicBool::new(false)),
            server_terminated: Arc::new(AtomicBool::new(false)),
            reading_buffer_size: DEFAULT_READING_SIZE,
            sent_error_close: None,
            closed_notified: false,
            config,
            leftover: Vec::new(),
            sub_protocols: Vec::new(),
            extensions: Vec::new(),
        }
    }

    pub(crate) fn set_leftover(&mut self, bytes: Vec<u8>) {
        self.leftover = bytes;
    }

    pub(crate) fn set_negotiated(&mut self, sub_protocols: Vec<String>, extensions: Vec<String>) {
        self.sub_protocols = sub_protocols;
        self.extensions = extensions;
    }

    /// Subprotocols agreed on during the handshake.
    pub fn sub_protocols(&self) -> &[String] {
        &self.sub_protocols
    }

    /// Extensions agreed on during the handshake (always empty for now).
    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// A fresh send handle sharing this connection's writer; hand these to
    /// other threads to publish from outside the handler callbacks.
    pub fn ws_writer(&self) -> WSWriter {
        WSWriter::new(
            self.writer.clone(),
            self.server_terminated.clone(),
            self.config.clone(),
        )
    }

    pub fn fileno(&self) -> RawFd {
        self.transport.fileno()
    }

    pub(crate) fn peer_description(&self) -> String {
        format_addresses(self.transport.as_ref())
    }

    /// True once both ends are done with the connection.
    pub fn terminated(&self) -> bool {
        self.client_terminated.load(Ordering::SeqCst)
            && self.server_terminated.load(Ordering::SeqCst)
    }

    pub fn send_message(&self, message: Message) -> Result<(), crate::error::Error> {
        self.ws_writer().send_message(message)
    }

    /// Initiates the closing handshake towards the peer. Idempotent; the
    /// transport stays open until the run loop sees the answer (or gives
    /// up), so calling this from another thread is safe.
    pub fn close(&mut self, code: u16, reason: &str) {
        if let Err(err) = self.ws_writer().close(code, reason) {
            warn!(
                "failed to send close frame to {}: {}",
                format_addresses(self.transport.as_ref()),
                err
            );
        }
    }

    /// Delivers `opened` to the handler. Called by `run`, or by the manager
    /// when the endpoint is registered instead.
    pub fn opened(&mut self) {
        let mut writer = self.ws_writer();
        let handler = &mut *self.handler;
        if catch_unwind(AssertUnwindSafe(move || handler.opened(&mut writer))).is_err() {
            self.fail_after_handler_panic();
        }
    }

    /// Reads from the underlying connection to feed the stream of bytes.
    ///
    /// We start with a reading size of two bytes to quickly parse an
    /// incoming frame header, after which the stream dictates whatever size
    /// must be read next, since it knows the frame payload length.
    ///
    /// Closing messages are answered with a closing message, pings with
    /// pongs, and any error raised by the stream initiates the closing of
    /// the connection with the matching status code. This method blocks
    /// until the connection is over and should likely get its own thread.
    pub fn run(&mut self) {
        self.opened();

        if self.sent_error_close.is_none() {
            let leftover = std::mem::take(&mut self.leftover);
            let keep_going = leftover.is_empty() || self.process(&leftover);

            if keep_going {
                while !self.terminated() {
                    let mut buf = vec![0u8; self.reading_buffer_size.max(1)];
                    match self.transport.recv(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            if !self.process(&buf[..n]) {
                                break;
                            }
                        }
                        Err(err) => {
                            debug!(
                                "transport error on {}: {}",
                                format_addresses(self.transport.as_ref()),
                                err
                            );
                            break;
                        }
                    }
                }
            }
        }

        self.terminate();
    }

    /// Advances the endpoint by exactly one read step. Returns false when
    /// the endpoint is done and should be terminated. This is the unit of
    /// progress the manager's driver thread uses.
    pub fn once(&mut self) -> bool {
        if self.terminated() {
            return false;
        }

        if !self.leftover.is_empty() {
            let leftover = std::mem::take(&mut self.leftover);
            return self.process(&leftover);
        }

        let mut buf = vec![0u8; self.reading_buffer_size.max(1)];
        match self.transport.recv(&mut buf) {
            Ok(0) => false,
            Ok(n) => self.process(&buf[..n]),
            Err(err) => {
                debug!(
                    "transport error on {}: {}",
                    format_addresses(self.transport.as_ref()),
                    err
                );
                false
            }
        }
    }

    /// Feeds bytes through the stream's parser and acts on whatever came
    /// out: complete messages reach the handler, a closing message makes us
    /// answer in kind, errors fail the connection with their status code,
    /// pings are answered with pongs carrying the same payload, and pongs
    /// reach the handler. Returns false when processing should stop.
    pub fn process(&mut self, data: &[u8]) -> bool {
        if data.is_empty() && self.reading_buffer_size > 0 {
            return false;
        }

        self.reading_buffer_size = self.stream.feed(data);

        // Data messages are delivered before a close or error that arrived
        // in the same chunk is honored, preserving arrival order
        while let Some(message) = self.stream.next_message() {
            if !self.invoke_received(message) {
                return false;
            }
        }

        if let Some(closing) = self.stream.closing().cloned() {
            if !self.server_terminated.load(Ordering::SeqCst) {
                // The peer spoke first: answer with its own code and reason
                self.close(closing.code, &closing.reason);
            } else {
                // We spoke first and this is the answer
                self.client_terminated.store(true, Ordering::SeqCst);
            }
            return false;
        }

        if let Some(err) = self.stream.next_error() {
            self.close(err.code, &err.reason);
            self.sent_error_close = Some(err);
            return false;
        }

        while let Some(ping) = self.stream.next_ping() {
            let pong = Frame::new(true, OpCode::Pong, ping);
            if let Err(err) = lock_writer(&self.writer).write_frame(pong) {
                debug!("failed to answer a ping: {}", err);
                return false;
            }
        }

        while let Some(pong) = self.stream.next_pong() {
            if !self.invoke_ponged(&pong) {
                return false;
            }
        }

        true
    }

    /// Final teardown: marks both sides terminated, delivers `closed`
    /// exactly once and shuts the transport down. The code reported is the
    /// peer's closing code, or the code we failed the connection with, or
    /// 1006 when the transport just went away.
    pub fn terminate(&mut self) {
        self.client_terminated.store(true, Ordering::SeqCst);
        self.server_terminated.store(true, Ordering::SeqCst);

        if !self.closed_notified {
            self.closed_notified = true;

            let (code, reason) = match self.stream.closing() {
                Some(closing) => (closing.code, closing.reason.clone()),
                None => match self.sent_error_close.take() {
                    Some(sent) => (sent.code, sent.reason),
                    None => (close_code::ABNORMAL, String::from("Going away")),
                },
            };

            let handler = &mut *self.handler;
            if catch_unwind(AssertUnwindSafe(move || handler.closed(code, &reason))).is_err() {
                error!("connection handler panicked inside closed()");
            }
        }

        self.transport.shutdown();
    }

    fn invoke_received(&mut self, message: Message) -> bool {
        let mut writer = self.ws_writer();
        let handler = &mut *self.handler;
        let outcome = catch_unwind(AssertUnwindSafe(move || {
            handler.received_message(&mut writer, message)
        }));
        if outcome.is_err() {
            self.fail_after_handler_panic();
            return false;
        }
        true
    }

    fn invoke_ponged(&mut self, pong: &[u8]) -> bool {
        let mut writer = self.ws_writer();
        let handler = &mut *self.handler;
        if catch_unwind(AssertUnwindSafe(move || handler.ponged(&mut writer, pong))).is_err() {
            self.fail_after_handler_panic();
            return false;
        }
        true
    }

    fn fail_after_handler_panic(&mut self) {
        error!(
            "connection handler panicked, failing websocket {}",
            format_addresses(self.transport.as_ref())
        );
        let control = CloseControl::new(close_code::INTERNAL_ERROR, "Handler failure");
        self.close(control.code, &control.reason);
        self.sent_error_close = Some(control);
    }
}
