//! Multicast datagram transport for beacons.
//!
//! `socket2::Socket` is used for construction because `SO_REUSEADDR` and
//! multicast group membership must be configured *before* `bind`, which the
//! platform-portable parts of `std::net` do not expose. Once configured, the
//! socket is converted to a plain `std::net::UdpSocket` for the actual
//! send/recv calls the control loop drives every frame.

use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};

use crate::beacon::Beacon;

/// Leader-side socket: sends beacons to `(group, port)`, never receives.
pub struct LeaderTransport {
    socket: UdpSocket,
    destination: SocketAddrV4,
}

impl LeaderTransport {
    pub fn new(group: Ipv4Addr, port: u16) -> std::io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0).into())?;
        let socket: UdpSocket = socket.into();
        Ok(Self {
            socket,
            destination: SocketAddrV4::new(group, port),
        })
    }

    /// Sends `beacon` to the multicast destination. Errors are returned for
    /// the caller to log; a failed send is not retried — the next beacon is
    /// the natural retry point.
    pub fn send(&self, beacon: &Beacon) -> std::io::Result<usize> {
        self.socket.send_to(&beacon.encode(), self.destination)
    }
}

/// Follower-side socket: joins the multicast group, non-blocking, and
/// drains whatever beacons arrived since the last frame.
pub struct FollowerTransport {
    socket: UdpSocket,
}

impl FollowerTransport {
    pub fn new(group: Ipv4Addr, port: u16) -> std::io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into())?;
        socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
        Ok(Self {
            socket: socket.into(),
        })
    }

    /// Repeatedly `recv_from`s until the socket would block, returning only
    /// the last fully-decoded beacon received this call along with its
    /// source address. A malformed datagram is logged and dropped without
    /// replacing whatever good beacon was already found.
    pub fn drain(&self) -> Option<(Beacon, SocketAddr)> {
        let mut buf = [0u8; 512];
        let mut last = None;
        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((n, src)) => match Beacon::decode(&buf[..n]) {
                    Ok(beacon) => last = Some((beacon, src)),
                    Err(e) => {
                        log::warn!("dropping malformed beacon datagram: {e}");
                    }
                },
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }
        last
    }
}

/// Determines the IP address the kernel would use to reach the outside
/// world, without sending any packet: `connect` a throwaway UDP socket to a
/// well-known address and read back the locally assigned address via
/// `local_addr`.
pub fn detect_self_ip() -> std::io::Result<std::net::IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.connect(("8.8.8.8", 53))?;
    Ok(socket.local_addr()?.ip())
}
