use crate::error::Error;
use crate::request::split_header_list;
use crate::utils::generate_websocket_accept_value;
use base64::prelude::BASE64_STANDARD;
use base64::Engine;

const MAX_HEADERS: usize = 32;

/// Answer for a request that doesn't qualify as a websocket upgrade. The
/// version hint tells well-behaved clients which version is spoken here.
pub(crate) const BAD_REQUEST_RESPONSE: &str =
    "HTTP/1.1 400 Bad Request\r\nSec-WebSocket-Version: 13\r\n\r\n";

/// A validated client upgrade request.
#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    pub resource: String,
    pub key: String,
    pub sub_protocols: Vec<String>,
    pub extensions: Vec<String>,
    /// Every header of the request, untouched. Origin policy is the host's
    /// business, so it can be found here rather than being enforced.
    pub headers: Vec<(String, String)>,
}

fn header_value(headers: &[(String, String)], name: &str) -> Option<String> {
    headers
        .iter()
        .find(|(header, _)| header.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.clone())
}

// The Connection header is a comma-separated token list (browsers send
// "keep-alive, Upgrade"), so a plain equality check is too strict
fn contains_token(value: &str, token: &str) -> bool {
    value
        .split(',')
        .any(|entry| entry.trim().eq_ignore_ascii_case(token))
}

/// Parses and validates an upgrade request from the raw bytes read off the
/// socket. Returns `None` while the request is still incomplete, otherwise
/// the validated request plus how many bytes of the buffer it consumed --
/// anything past that offset already belongs to the frame stream.
pub fn parse_upgrade_request(buf: &[u8]) -> Result<Option<(UpgradeRequest, usize)>, Error> {
    let mut header_storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut request = httparse::Request::new(&mut header_storage);

    let offset = match request.parse(buf)? {
        httparse::Status::Partial => return Ok(None),
        httparse::Status::Complete(offset) => offset,
    };

    if request.method != Some("GET") || request.version != Some(1) {
        return Err(Error::InvalidHTTPHandshake);
    }
    let resource = request.path.ok_or(Error::InvalidHTTPHandshake)?.to_string();

    let headers: Vec<(String, String)> = request
        .headers
        .iter()
        .map(|header| {
            (
                header.name.to_string(),
                String::from_utf8_lossy(header.value).into_owned(),
            )
        })
        .collect();

    let upgrade = header_value(&headers, "Upgrade").ok_or(Error::NoUpgradeHeaderPresent)?;
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return Err(Error::NoUpgradeHeaderPresent);
    }

    let connection = header_value(&headers, "Connection").ok_or(Error::NoConnectionHeaderPresent)?;
    if !contains_token(&connection, "upgrade") {
        return Err(Error::NoConnectionHeaderPresent);
    }

    header_value(&headers, "Host").ok_or(Error::NoHostHeaderPresent)?;

    let version =
        header_value(&headers, "Sec-WebSocket-Version").ok_or(Error::InvalidWebsocketVersion)?;
    if version.trim() != "13" {
        return Err(Error::InvalidWebsocketVersion);
    }

    let key = header_value(&headers, "Sec-WebSocket-Key").ok_or(Error::NoSecWebsocketKey)?;
    let key = key.trim().to_string();
    match BASE64_STANDARD.decode(&key) {
        Ok(decoded) if decoded.len() == 16 => {}
        _ => return Err(Error::InvalidSecWebsocketKey),
    }

    let sub_protocols = header_value(&headers, "Sec-WebSocket-Protocol")
        .map(|value| split_header_list(&value))
        .unwrap_or_default();
    let extensions = header_value(&headers, "Sec-WebSocket-Extensions")
        .map(|value| split_header_list(&value))
        .unwrap_or_default();

    Ok(Some((
        UpgradeRequest {
            resource,
            key,
            sub_protocols,
            extensions,
            headers,
        },
        offset,
    )))
}

/// What the server ended up agreeing to.
#[derive(Debug, Clone, Default)]
pub struct Negotiated {
    pub sub_protocols: Vec<String>,
    pub extensions: Vec<String>,
}

/// Builds the `101 Switching Protocols` answer for a validated request:
/// the accept token proves the key round-tripped through the fixed UUID,
/// and only the intersection of offered and allowed subprotocols and
/// extensions is echoed back. Nothing is allowed by default, which is how
/// the handshake negotiates no extensions.
pub fn build_upgrade_response(
    request: &UpgradeRequest,
    allowed_protocols: &[String],
    allowed_extensions: &[String],
) -> (String, Negotiated) {
    let accept_value = generate_websocket_accept_value(&request.key);

    let negotiated = Negotiated {
        sub_protocols: intersect(&request.sub_protocols, allowed_protocols),
        extensions: intersect(&request.extensions, allowed_extensions),
    };

    let mut response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Connection: Upgrade\r\n\
         Upgrade: websocket\r\n\
         Sec-WebSocket-Accept: {}\r\n",
        accept_value
    );
    if !negotiated.sub_protocols.is_empty() {
        response.push_str(&format!(
            "Sec-WebSocket-Protocol: {}\r\n",
            negotiated.sub_protocols.join(", ")
        ));
    }
    if !negotiated.extensions.is_empty() {
        response.push_str(&format!(
            "Sec-WebSocket-Extensions: {}\r\n",
            negotiated.extensions.join(", ")
        ));
    }
    response.push_str("\r\n");

    (response, negotiated)
}

fn intersect(offered: &[String], allowed: &[String]) -> Vec<String> {
    offered
        .iter()
        .filter(|entry| allowed.iter().any(|a| a.eq_ignore_ascii_case(entry)))
        .cloned()
        .collect()
}

/// Validates the server's answer to our upgrade request. Returns `None`
/// while the response head is still incomplete, otherwise what was
/// negotiated plus how many bytes were consumed; whatever follows is
/// already websocket frames.
///
/// The server proves itself with the accept token, and it may only select
/// from what we offered; anything else fails the handshake.
pub fn validate_upgrade_response(
    buf: &[u8],
    key: &str,
    requested_protocols: &[String],
) -> Result<Option<(Negotiated, usize)>, Error> {
    let mut header_storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut response = httparse::Response::new(&mut header_storage);

    let offset = match response.parse(buf)? {
        httparse::Status::Partial => return Ok(None),
        httparse::Status::Complete(offset) => offset,
    };

    if response.version != Some(1) || response.code != Some(101) {
        return Err(Error::NoUpgrade);
    }

    let headers: Vec<(String, String)> = response
        .headers
        .iter()
        .map(|header| {
            (
                header.name.to_string(),
                String::from_utf8_lossy(header.value).into_owned(),
            )
        })
        .collect();

    let upgrade = header_value(&headers, "Upgrade").ok_or(Error::NoUpgrade)?;
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return Err(Error::NoUpgrade);
    }
    let connection = header_value(&headers, "Connection").ok_or(Error::NoUpgrade)?;
    if !contains_token(&connection, "upgrade") {
        return Err(Error::NoUpgrade);
    }

    let accept = header_value(&headers, "Sec-WebSocket-Accept").ok_or(Error::InvalidAcceptKey)?;
    if accept.trim() != generate_websocket_accept_value(key) {
        return Err(Error::InvalidAcceptKey);
    }

    let selected_protocols = header_value(&headers, "Sec-WebSocket-Protocol")
        .map(|value| split_header_list(&value))
        .unwrap_or_default();
    for protocol in &selected_protocols {
        if !requested_protocols
            .iter()
            .any(|p| p.eq_ignore_ascii_case(protocol))
        {
            return Err(Error::UnrequestedSubProtocol(protocol.clone()));
        }
    }

    // No extensions are ever offered, so a server claiming one is lying
    let selected_extensions = header_value(&headers, "Sec-WebSocket-Extensions")
        .map(|value| split_header_list(&value))
        .unwrap_or_default();
    if let Some(extension) = selected_extensions.first() {
        return Err(Error::UnrequestedExtension(extension.clone()));
    }

    Ok(Some((
        Negotiated {
            sub_protocols: selected_protocols,
            extensions: selected_extensions,
        },
        offset,
    )))
}
