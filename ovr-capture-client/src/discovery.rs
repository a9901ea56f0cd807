//! Listening for zero-config advertisements of capture targets.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::time::{Duration, Instant};
use log::{debug, trace};
use ovr_capture_core::headers::ZeroConfigPacket;
use crate::error::{ClientError, Result};

/// A capture target that announced itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveredHost {
    /// Sender's IP with the advertised TCP port
    pub addr: SocketAddr,
    pub package_name: String,
}

pub struct DiscoveryListener {
    socket: UdpSocket,
}

impl DiscoveryListener {
    /// Binds the UDP port the targets broadcast to. Port 0 picks a free one, see
    /// [`DiscoveryListener::local_port`].
    pub fn bind(port: u16) -> Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))?;
        Ok(Self { socket })
    }

    pub fn local_port(&self) -> Result<u16> {
        Ok(self.socket.local_addr()?.port())
    }

    /// Waits up to `timeout` for the next valid advertisement. Foreign datagrams are ignored.
    pub fn recv_host(&self, timeout: Duration) -> Result<DiscoveredHost> {
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; 512];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ClientError::Timeout);
            }
            self.socket.set_read_timeout(Some(remaining))?;

            let (len, from) = match self.socket.recv_from(&mut buf) {
                Ok(received) => received,
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    return Err(ClientError::Timeout);
                }
                Err(e) => return Err(e.into()),
            };
            let Some(packet) = ZeroConfigPacket::from_bytes(&buf[..len]) else {
                trace!("Ignoring {} byte datagram from {}", len, from);
                continue;
            };
            let Ok(port) = u16::try_from(packet.tcp_port) else {
                trace!("Ignoring advertisement with port {} from {}", packet.tcp_port, from);
                continue;
            };

            let host = DiscoveredHost {
                addr: SocketAddr::new(from.ip(), port),
                package_name: packet.package_name().to_string(),
            };
            debug!("Discovered {} at {}", host.package_name, host.addr);
            return Ok(host);
        }
    }
}

/// Collects every distinct target heard on `port` within `timeout`.
pub fn discover(port: u16, timeout: Duration) -> Result<Vec<DiscoveredHost>> {
    let listener = DiscoveryListener::bind(port)?;
    let deadline = Instant::now() + timeout;
    let mut hosts: Vec<DiscoveredHost> = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match listener.recv_host(remaining) {
            Ok(host) => {
                if !hosts.contains(&host) {
                    hosts.push(host);
                }
            }
            Err(ClientError::Timeout) => return Ok(hosts),
            Err(e) => return Err(e),
        }
    }
}
