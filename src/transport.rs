use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::time::Duration;

/// The byte transport a websocket endpoint is driven over.
///
/// The core never opens sockets itself; it is handed something speaking
/// this contract after the upgrade handshake. Methods take `&self` so one
/// thread can sit in `recv` while another writes, which is what the close
/// and broadcast paths do. The endpoint exclusively owns its transport;
/// dropping the last reference releases the descriptor.
pub trait Transport: Send + Sync {
    /// Reads up to `buf.len()` bytes. Returning 0 means the peer is gone.
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes the whole buffer.
    fn send_all(&self, data: &[u8]) -> io::Result<()>;

    /// Shuts down both directions. Unblocks any thread parked in `recv`,
    /// which is also how a forced cancellation from another thread works.
    fn shutdown(&self);

    /// Raw descriptor, used as the endpoint's identity in the manager and
    /// its pollers.
    fn fileno(&self) -> RawFd;

    /// Read timeout passthrough; the handshake uses it so a silent peer
    /// can't park a thread forever.
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;

    fn local_addr(&self) -> Option<String>;

    fn peer_addr(&self) -> Option<String>;
}

impl Transport for TcpStream {
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut stream: &TcpStream = self;
        stream.read(buf)
    }

    fn send_all(&self, data: &[u8]) -> io::Result<()> {
        let mut stream: &TcpStream = self;
        stream.write_all(data)
    }

    fn shutdown(&self) {
        let _ = TcpStream::shutdown(self, Shutdown::Both);
    }

    fn fileno(&self) -> RawFd {
        self.as_raw_fd()
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }

    fn local_addr(&self) -> Option<String> {
        TcpStream::local_addr(self).map(|addr| addr.to_string()).ok()
    }

    fn peer_addr(&self) -> Option<String> {
        TcpStream::peer_addr(self).map(|addr| addr.to_string()).ok()
    }
}

impl Transport for UnixStream {
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut stream: &UnixStream = self;
        stream.read(buf)
    }

    fn send_all(&self, data: &[u8]) -> io::Result<()> {
        let mut stream: &UnixStream = self;
        stream.write_all(data)
    }

    fn shutdown(&self) {
        let _ = UnixStream::shutdown(self, Shutdown::Both);
    }

    fn fileno(&self) -> RawFd {
        self.as_raw_fd()
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        UnixStream::set_read_timeout(self, timeout)
    }

    fn local_addr(&self) -> Option<String> {
        UnixStream::local_addr(self)
            .map(|addr| format!("{:?}", addr))
            .ok()
    }

    fn peer_addr(&self) -> Option<String> {
        UnixStream::peer_addr(self)
            .map(|addr| format!("{:?}", addr))
            .ok()
    }
}

/// Renders both ends of a transport for log lines.
pub(crate) fn format_addresses(transport: &dyn Transport) -> String {
    format!(
        "[local => {} | remote => {}]",
        transport.local_addr().unwrap_or_else(|| String::from("?")),
        transport.peer_addr().unwrap_or_else(|| String::from("?")),
    )
}
