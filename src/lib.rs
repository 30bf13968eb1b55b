//! Synchronous WebSockets implementation for clients and servers.
//!
//! This library offers a full implementation of the
//! [WebSocket Protocol RFC](https://datatracker.ietf.org/doc/html/rfc6455)
//! over plain blocking sockets: it performs the upgrade handshake on either
//! end, reads frames incrementally, parses masks, handles opcodes and
//! assembles fragmented messages, and it drives the closing handshake in
//! both directions.
//!
//! Two deployment shapes are supported by the same core. An endpoint can be
//! run on a thread of its own with [`WSConnection::run`], which blocks on
//! the socket until the connection is over; or many endpoints can be handed
//! to a [`manager::WebSocketManager`], which watches their descriptors with
//! a readiness poller and advances each one a step at a time from a single
//! driver thread.

pub mod client;
pub mod config;
mod connection;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod manager;
pub mod message;
pub mod poller;
mod request;
pub mod server;
pub mod stream;
pub mod transport;
mod utf8;
mod utils;
mod write;


pub use crate::connection::{ConnectionHandler, WSConnection};
pub use crate::frame::{Frame, OpCode};
pub use crate::message::{close_code, CloseControl, Message};
pub use crate::request::{parse_ws_url, ConnectionDetails};
pub use crate::transport::Transport;
pub use crate::utf8::Utf8Validator;
pub use crate::write::{WSWriter, WriterKind};
