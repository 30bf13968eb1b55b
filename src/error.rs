use httparse::Error as HttpParseError;
use std::io;
use std::string::FromUtf8Error;
use thiserror::Error;
use url::ParseError;

#[derive(Error, Debug)]
pub enum Error {
    // General Errors
    #[error("IO Error happened: {source}")]
    IOError {
        #[from]
        source: io::Error,
    },

    #[error("{source}")]
    FromUtf8Error {
        #[from]
        source: FromUtf8Error,
    },

    // Handshake Errors
    #[error("Invalid handshake request method and version")]
    InvalidHTTPHandshake,

    #[error("Connection: Upgrade header missing in the request")]
    NoConnectionHeaderPresent,

    #[error("Upgrade: websocket header missing in the request")]
    NoUpgradeHeaderPresent,

    #[error("Host header missing in the request")]
    NoHostHeaderPresent,

    #[error("Couldn't find Sec-WebSocket-Key header in the request")]
    NoSecWebsocketKey,

    #[error("Sec-WebSocket-Key must decode to 16 bytes")]
    InvalidSecWebsocketKey,

    #[error("Unsupported Sec-WebSocket-Version, only 13 is spoken here")]
    InvalidWebsocketVersion,

    #[error("Server didn't upgrade the connection")]
    NoUpgrade,

    #[error("Server didn't send a valid Sec-WebSocket-Accept key")]
    InvalidAcceptKey,

    #[error("Server selected a subprotocol that was never offered: `{0}`")]
    UnrequestedSubProtocol(String),

    #[error("Server selected an extension that was never offered: `{0}`")]
    UnrequestedExtension(String),

    #[error("Incomplete HTTP request")]
    IncompleteHTTPRequest,

    #[error("{source}")]
    HttpParseError {
        #[from]
        source: HttpParseError,
    },

    // Framing Errors
    #[error("RSV not zero")]
    RSVNotZero,

    #[error("Control frames must not be fragmented")]
    ControlFramesFragmented,

    #[error("Control frame with invalid payload size, can't be greater than 125")]
    ControlFramePayloadSize,

    #[error("Frame payload length exceeds the 63-bit range")]
    FrameTooLarge,

    #[error("Max frame size reached")]
    MaxFrameSize,

    #[error("fragment_size: `{0}` can't be greater than max_frame_size: `{1}`")]
    CustomFragmentSizeExceeded(usize, usize),

    #[error("Max message size reached")]
    MaxMessageSize,

    #[error("Invalid Opcode")]
    InvalidOpcode,

    // Fragmentation Errors
    #[error("Invalid frame while there is a fragmented message in progress")]
    InvalidFrameFragmentation,

    #[error("Incoming fragmented message but there is one already in progress")]
    FragmentedInProgress,

    #[error("Invalid continuation frame: no fragmented message to continue")]
    InvalidContinuationFrame,

    // Masking Errors
    #[error("Missing masking when expected")]
    MissingMasking,

    #[error("Masked when not expected")]
    UnexpectedMasking,

    // Closing Errors
    #[error("Close frame payload has invalid length")]
    InvalidClosePayload,

    #[error("Invalid closing frame code: `{0}`")]
    InvalidCloseCode(u16),

    #[error("Invalid UTF-8 bytes")]
    InvalidUtf8,

    // HTTP / URL Errors
    #[error("{source}")]
    URLParseError {
        #[from]
        source: ParseError,
    },

    #[error("Invalid scheme in WebSocket URL")]
    InvalidSchemeURL,

    #[error("Scheme `{0}` needs a TLS transport, connect over one explicitly")]
    TlsTransportRequired(String),

    #[error("URL has no host")]
    URLNoHost,
}

impl Error {
    /// Maps a stream-level failure to the RFC 6455 status code the peer
    /// should receive in the resulting close frame.
    pub fn close_code(&self) -> u16 {
        match self {
            Error::InvalidOpcode => 1003,
            Error::FromUtf8Error { .. } | Error::InvalidUtf8 => 1007,
            Error::MaxFrameSize | Error::MaxMessageSize => 1009,
            _ => 1002,
        }
    }
}
