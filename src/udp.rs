//! UDP Endpoint (`spec.md` §2 component C / §4.A).
//!
//! Bound with `socket2` so broadcast and address reuse can be configured
//! before handing the socket to Tokio, the way
//! `kaelenfae-LXMonitor/src-tauri/src/network/listener.rs` and
//! `firezone-firezone/rust/relay/src/udp_socket.rs` both set theirs up.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use crate::error::UdpError;

const READ_DEADLINE: Duration = Duration::from_millis(500);

pub struct UdpEndpoint {
    socket: UdpSocket,
    running: AtomicBool,
}

impl UdpEndpoint {
    pub async fn bind(addr: SocketAddr) -> std::io::Result<Self> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };
        let socket2 = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket2.set_reuse_address(true)?;
        socket2.set_nonblocking(true)?;
        socket2.set_broadcast(true)?;
        socket2.bind(&addr.into())?;

        let std_socket: std::net::UdpSocket = socket2.into();
        let socket = UdpSocket::from_std(std_socket)?;

        Ok(Self {
            socket,
            running: AtomicBool::new(true),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn close(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    /// Read with a 500ms deadline. `Ok(None)` is a liveness tick, not an
    /// error — callers must not treat a timeout as failure (`spec.md` §4.A,
    /// §7).
    pub async fn read(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, UdpError> {
        match tokio::time::timeout(READ_DEADLINE, self.socket.recv_from(buf)).await {
            Ok(Ok((n, src))) => Ok(Some((n, src))),
            Ok(Err(e)) => Err(UdpError::Read(None, e)),
            Err(_elapsed) => Ok(None),
        }
    }

    pub async fn write(&self, bytes: &[u8], dst: SocketAddr) -> Result<usize, UdpError> {
        self.socket
            .send_to(bytes, dst)
            .await
            .map_err(|e| UdpError::Write(dst, e))
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

/// Resolve the local IPv4 address this process would use to reach the
/// public internet, by "connecting" an ephemeral UDP socket (no packets are
/// actually sent — UDP connect only sets routing state). Falls back to
/// loopback on failure, per `spec.md` §4.G. The target is a parameter
/// rather than hard-coded so deployments that can't reach the public
/// internet can still get a meaningful answer (`spec.md` §9).
pub async fn local_ipv4(probe_target: SocketAddr) -> std::net::Ipv4Addr {
    match resolve_local_ipv4(probe_target).await {
        Ok(ip) => ip,
        Err(_) => std::net::Ipv4Addr::LOCALHOST,
    }
}

async fn resolve_local_ipv4(probe_target: SocketAddr) -> std::io::Result<std::net::Ipv4Addr> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect(probe_target).await?;
    match socket.local_addr()?.ip() {
        std::net::IpAddr::V4(v4) => Ok(v4),
        std::net::IpAddr::V6(_) => Ok(std::net::Ipv4Addr::LOCALHOST),
    }
}
