use crate::error::Error;
use url::Url;

pub(crate) const WS_VERSION: u8 = 13;

/// Where a client should point its transport, resolved from a WebSocket
/// URL. `ws` and `wss` carry a host and port; the `+unix` variants carry a
/// filesystem socket path instead, with the host fixed to localhost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDetails {
    pub secure: bool,
    pub host: String,
    pub port: Option<u16>,
    pub unix_socket_path: Option<String>,
    pub resource: String,
}

impl ConnectionDetails {
    /// `host:port` pair used to open the TCP connection.
    pub fn addr(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.host, port),
            None => self.host.clone(),
        }
    }

    /// Value of the Host header: the port is only mentioned when the URL
    /// spelled one out.
    pub(crate) fn host_field(&self, explicit_port: bool) -> String {
        if explicit_port {
            self.addr()
        } else {
            self.host.clone()
        }
    }
}

/// Parses a `(ws|wss|ws+unix|wss+unix)://` URL into the coordinates the
/// client needs. Default ports are 80 for ws and 443 for wss. A URL without
/// a scheme or hostname is rejected.
pub fn parse_ws_url(ws_url: &str) -> Result<(ConnectionDetails, bool), Error> {
    // The url crate has no authority form for filesystem paths, so the
    // unix-socket schemes are split by hand: everything after the scheme
    // marker is the socket path
    for (scheme, secure) in [("ws+unix://", false), ("wss+unix://", true)] {
        if let Some(path) = ws_url.strip_prefix(scheme) {
            if path.is_empty() {
                return Err(Error::URLNoHost);
            }
            let details = ConnectionDetails {
                secure,
                host: String::from("localhost"),
                port: None,
                unix_socket_path: Some(path.to_string()),
                resource: String::from("/"),
            };
            return Ok((details, false));
        }
    }

    let parsed_url = Url::parse(ws_url)?;

    let (secure, default_port) = match parsed_url.scheme() {
        "ws" => (false, 80),
        "wss" => (true, 443),
        _ => return Err(Error::InvalidSchemeURL),
    };

    let host = parsed_url.host_str().ok_or(Error::URLNoHost)?.to_string();
    let explicit_port = parsed_url.port().is_some();
    let port = parsed_url.port().unwrap_or(default_port);

    let resource = match parsed_url.query() {
        Some(query) => format!("{}?{}", parsed_url.path(), query),
        None => parsed_url.path().to_string(),
    };

    let details = ConnectionDetails {
        secure,
        host,
        port: Some(port),
        unix_socket_path: None,
        resource: if resource.is_empty() {
            String::from("/")
        } else {
            resource
        },
    };

    Ok((details, explicit_port))
}

/// Builds the client side of the upgrade: a GET on the resource carrying
/// the upgrade headers, the random key, the original URL as Origin and the
/// requested subprotocols, if any.
///
/// Since everything ends up as bytes in the TCP packets anyway, the request
/// is assembled as a string and converted when it's written to the server.
pub(crate) fn construct_http_request(
    ws_url: &str,
    key: &str,
    sub_protocols: &[String],
) -> Result<(String, ConnectionDetails), Error> {
    let (details, explicit_port) = parse_ws_url(ws_url)?;

    let mut request = format!(
        "GET {} HTTP/1.1\r\n\
         Host: {}\r\n\
         Connection: Upgrade\r\n\
         Upgrade: websocket\r\n\
         Sec-WebSocket-Key: {}\r\n\
         Origin: {}\r\n\
         Sec-WebSocket-Version: {}\r\n",
        details.resource,
        details.host_field(explicit_port),
        key,
        ws_url,
        WS_VERSION,
    );

    if !sub_protocols.is_empty() {
        request.push_str(&format!(
            "Sec-WebSocket-Protocol: {}\r\n",
            sub_protocols.join(", ")
        ));
    }

    request.push_str("\r\n");

    Ok((request, details))
}

/// Splits a comma-separated header value into its trimmed entries.
pub(crate) fn split_header_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim().to_string())
        .filter(|entry| !entry.is_empty())
        .collect()
}
