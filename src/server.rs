use crate::config::ServerConfig;
use crate::connection::{ConnectionHandler, WSConnection};
use crate::error::Error;
use crate::handshake::{
    build_upgrade_response, parse_upgrade_request, UpgradeRequest, BAD_REQUEST_RESPONSE,
};
use crate::transport::Transport;
use crate::write::WriterKind;
use bytes::BytesMut;
use log::{debug, warn};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread;

// Upper bound on the upgrade request head. Limiting the amount of data read
// shakes off peers that connect and then stream garbage at the endpoint.
const MAX_HEADER_BLOCK: usize = 16 * 1024;

/// Performs the server half of the upgrade on a freshly accepted TCP
/// stream. `make_handler` receives the validated request, so the host can
/// look at the resource, Origin or any other header before deciding how the
/// connection is handled.
pub fn accept_connection<F>(
    stream: TcpStream,
    config: &ServerConfig,
    make_handler: F,
) -> Result<WSConnection, Error>
where
    F: FnOnce(&UpgradeRequest) -> Box<dyn ConnectionHandler>,
{
    accept_over_transport(Arc::new(stream), config, make_handler)
}

/// Same as [`accept_connection`] for hosts that bring their own transport
/// (TLS wrappers, unix sockets, ...). On success the transport has seen the
/// `101 Switching Protocols` response and belongs to the returned endpoint.
pub fn accept_over_transport<F>(
    transport: Arc<dyn Transport>,
    config: &ServerConfig,
    make_handler: F,
) -> Result<WSConnection, Error>
where
    F: FnOnce(&UpgradeRequest) -> Box<dyn ConnectionHandler>,
{
    transport.set_read_timeout(config.web_socket_config.handshake_timeout)?;

    let mut head = BytesMut::with_capacity(1024);
    let (request, offset) = loop {
        if head.len() > MAX_HEADER_BLOCK {
            let _ = transport.send_all(BAD_REQUEST_RESPONSE.as_bytes());
            return Err(Error::IncompleteHTTPRequest);
        }

        let mut buf = [0u8; 1024];
        let n = transport.recv(&mut buf)?;
        if n == 0 {
            return Err(Error::IncompleteHTTPRequest);
        }
        head.extend_from_slice(&buf[..n]);

        match parse_upgrade_request(&head) {
            Ok(Some(parsed)) => break parsed,
            Ok(None) => continue,
            Err(err) => {
                // A broken upgrade still deserves an HTTP answer before the
                // connection goes away
                let _ = transport.send_all(BAD_REQUEST_RESPONSE.as_bytes());
                return Err(err);
            }
        }
    };

    let handler = make_handler(&request);

    let (response, negotiated) = build_upgrade_response(&request, &config.sub_protocols, &[]);
    transport.send_all(response.as_bytes())?;
    transport.set_read_timeout(None)?;

    // From here on the transport belongs to the endpoint; bytes the head
    // read past the header block are the first frames
    let mut connection = WSConnection::new(
        transport,
        handler,
        WriterKind::Server,
        config.web_socket_config.clone(),
    );
    connection.set_negotiated(negotiated.sub_protocols, negotiated.extensions);
    connection.set_leftover(head[offset..].to_vec());

    Ok(connection)
}

/// A ready to use websockets server.
///
/// Binds `addr`, upgrades every incoming connection and runs each endpoint
/// on a thread of its own, which is the single-endpoint blocking deployment
/// of the core. Hosts that want the multiplexed deployment instead should
/// accept connections themselves, upgrade them with [`accept_connection`]
/// and register the endpoints with a `WebSocketManager`.
///
/// Blocks the calling thread for as long as the listener lives.
pub fn serve<A, F>(addr: A, config: ServerConfig, mut factory: F) -> Result<(), Error>
where
    A: ToSocketAddrs,
    F: FnMut(&UpgradeRequest) -> Box<dyn ConnectionHandler>,
{
    let listener = TcpListener::bind(addr)?;

    loop {
        let (stream, peer_addr) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!("failed to accept a connection: {}", err);
                continue;
            }
        };
        debug!("incoming connection from {}", peer_addr);

        match accept_connection(stream, &config, &mut factory) {
            Ok(mut connection) => {
                thread::spawn(move || connection.run());
            }
            Err(err) => warn!("handshake with {} failed: {}", peer_addr, err),
        }
    }
}
