use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::net::TcpSocket;
use tokio::time;
use tracing::trace;

use crate::types::PortStatus;

/// TCP connect probe.
///
/// - Connect completes within `timeout`: `Open`. The stream is dropped right
///   away; nothing is written.
/// - Peer refuses: `Closed`.
/// - Timeout or any other connect error: `Filtered`.
/// - The local socket cannot be created (e.g. descriptor exhaustion): `Error`.
///
/// The socket is owned by this call and closed on every return path.
pub async fn probe(target: IpAddr, port: u16, timeout: Duration) -> PortStatus {
    let addr = SocketAddr::new(target, port);
    let socket = match new_socket(&addr) {
        Ok(s) => s,
        Err(e) => {
            trace!(%addr, error = %e, "tcp socket creation failed");
            return PortStatus::Error;
        }
    };

    let status = match time::timeout(timeout, socket.connect(addr)).await {
        Ok(Ok(stream)) => {
            drop(stream);
            PortStatus::Open
        }
        Ok(Err(e)) => {
            trace!(%addr, error = %e, "tcp connect failed");
            classify_connect_error(&e)
        }
        Err(_) => PortStatus::Filtered,
    };
    trace!(%addr, %status, "tcp probe done");
    status
}

/// Map a failed connect to a port status. Only an explicit refusal proves
/// the port closed; everything else is folded into `Filtered`.
pub fn classify_connect_error(e: &io::Error) -> PortStatus {
    match e.kind() {
        io::ErrorKind::ConnectionRefused => PortStatus::Closed,
        _ => PortStatus::Filtered,
    }
}

fn new_socket(addr: &SocketAddr) -> io::Result<TcpSocket> {
    if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refusal_is_closed_everything_else_filtered() {
        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert_eq!(classify_connect_error(&refused), PortStatus::Closed);
        for kind in [
            io::ErrorKind::TimedOut,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::PermissionDenied,
            io::ErrorKind::Other,
        ] {
            assert_eq!(classify_connect_error(&io::Error::from(kind)), PortStatus::Filtered);
        }
    }
}
