use crate::config::ClientConfig;
use crate::connection::{ConnectionHandler, WSConnection};
use crate::error::Error;
use crate::handshake::validate_upgrade_response;
use crate::request::{construct_http_request, parse_ws_url};
use crate::transport::Transport;
use crate::utils::generate_websocket_key;
use crate::write::WriterKind;
use bytes::BytesMut;
use log::debug;
use std::net::TcpStream;
use std::os::unix::net::UnixStream;
use std::sync::Arc;

const MAX_HEADER_BLOCK: usize = 16 * 1024;

/// Connects to a `ws://` or `ws+unix://` URL, performs the client side of
/// the upgrade and returns the endpoint, ready for [`WSConnection::run`] or
/// a manager.
///
/// The `wss` schemes are not dialed here: TLS lives behind the transport
/// seam, so a host terminates it however it likes and hands the wrapped
/// transport to [`connect_over_transport`].
pub fn connect(
    ws_url: &str,
    handler: Box<dyn ConnectionHandler>,
    config: ClientConfig,
) -> Result<WSConnection, Error> {
    let (details, _) = parse_ws_url(ws_url)?;
    if details.secure {
        return Err(Error::TlsTransportRequired(String::from("wss")));
    }

    let transport: Arc<dyn Transport> = match &details.unix_socket_path {
        Some(path) => Arc::new(UnixStream::connect(path)?),
        None => Arc::new(TcpStream::connect(details.addr())?),
    };

    connect_over_transport(ws_url, transport, handler, config)
}

/// Client handshake over a transport the host already opened. On success
/// the transport belongs to the returned endpoint.
pub fn connect_over_transport(
    ws_url: &str,
    transport: Arc<dyn Transport>,
    handler: Box<dyn ConnectionHandler>,
    config: ClientConfig,
) -> Result<WSConnection, Error> {
    let key = generate_websocket_key();
    let (request, _) = construct_http_request(ws_url, &key, &config.sub_protocols)?;

    transport.set_read_timeout(config.web_socket_config.handshake_timeout)?;
    transport.send_all(request.as_bytes())?;

    let mut head = BytesMut::with_capacity(1024);
    let (negotiated, offset) = loop {
        if head.len() > MAX_HEADER_BLOCK {
            transport.shutdown();
            return Err(Error::IncompleteHTTPRequest);
        }

        let mut buf = [0u8; 1024];
        let n = transport.recv(&mut buf)?;
        if n == 0 {
            transport.shutdown();
            return Err(Error::NoUpgrade);
        }
        head.extend_from_slice(&buf[..n]);

        match validate_upgrade_response(&head, &key, &config.sub_protocols) {
            Ok(Some(validated)) => break validated,
            Ok(None) => continue,
            Err(err) => {
                // A failed handshake closes the transport; there is nothing
                // to talk about over it anymore
                transport.shutdown();
                return Err(err);
            }
        }
    };
    transport.set_read_timeout(None)?;

    debug!(
        "handshake with {} complete, subprotocols: {:?}",
        ws_url, negotiated.sub_protocols
    );

    let mut connection = WSConnection::new(
        transport,
        handler,
        WriterKind::Client,
        config.web_socket_config.clone(),
    );
    connection.set_negotiated(negotiated.sub_protocols, negotiated.extensions);
    connection.set_leftover(head[offset..].to_vec());

    Ok(connection)
}
