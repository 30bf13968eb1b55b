use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    pub web_socket_config: WebSocketConfig,
    /// Subprotocols the server is willing to speak. The handshake echoes
    /// the intersection of this list and whatever the client offered.
    pub sub_protocols: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub web_socket_config: WebSocketConfig,
    /// Subprotocols requested in the upgrade, in preference order.
    pub sub_protocols: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    pub max_frame_size: Option<usize>,
    pub max_message_size: Option<usize>,
    /// Socket read timeout applied while the HTTP upgrade is exchanged,
    /// cleared before the frame loop starts. Guards against peers that
    /// open a TCP connection and never speak.
    pub handshake_timeout: Option<Duration>,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        WebSocketConfig {
            max_message_size: Some(64 << 20),
            max_frame_size: Some(16 << 20),
            handshake_timeout: Some(Duration::from_secs(10)),
        }
    }
}
