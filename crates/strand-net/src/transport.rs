//! Datagram transports.
//!
//! A [`Transport`] moves whole datagrams between numbered nodes. Node ids are
//! positions in the network roster, so every node in a session agrees on them.
//!
//! Two implementations ship with the crate:
//!
//! - [`UdpTransport`]: non-blocking UDP socket, one address per roster entry
//! - [`LoopbackHub`]: in-process channels, for tests and single-process
//!   multi-node setups

use std::io;
use std::net::{SocketAddr, UdpSocket};

use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};

use crate::error::{NetError, Result};

/// Largest datagram [`UdpTransport`] will receive.
pub const MAX_DATAGRAM: usize = 65_507;

/// Roster position of a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u16);

impl NodeId {
    /// Roster index.
    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// A received datagram and the node that sent it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    /// Sender as resolved by the transport.
    pub from: NodeId,
    /// Raw bytes.
    pub bytes: Vec<u8>,
}

/// Moves datagrams between roster nodes.
///
/// A transport has exactly one owner at a time: the session while the audio
/// thread runs cycles, or the sync worker while a handshake is pending.
pub trait Transport: Send {
    /// This node's id.
    fn local(&self) -> NodeId;

    /// Sends one datagram. Delivery is not guaranteed.
    fn send(&mut self, to: NodeId, bytes: &[u8]) -> Result<()>;

    /// Appends every datagram received so far to `out` without blocking.
    ///
    /// Returns how many were appended.
    fn drain_pending(&mut self, out: &mut Vec<Datagram>) -> Result<usize>;
}

/// UDP transport over a non-blocking socket.
///
/// Datagrams from addresses outside the roster are dropped with a warning.
pub struct UdpTransport {
    socket: UdpSocket,
    local: NodeId,
    roster: Vec<SocketAddr>,
    buf: Box<[u8]>,
}

impl UdpTransport {
    /// Binds the roster address of `local`.
    pub fn bind(local: NodeId, roster: Vec<SocketAddr>) -> Result<Self> {
        let addr = *roster
            .get(local.index())
            .ok_or_else(|| NetError::NetNodeNotFound(local.to_string()))?;
        let socket = UdpSocket::bind(addr).map_err(NetError::NetTransportFailed)?;
        socket
            .set_nonblocking(true)
            .map_err(NetError::NetTransportFailed)?;
        tracing::debug!(%local, %addr, "udp transport bound");
        Ok(Self {
            socket,
            local,
            roster,
            buf: vec![0; MAX_DATAGRAM].into_boxed_slice(),
        })
    }

    /// Address the socket is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().map_err(NetError::NetTransportFailed)
    }

    fn node_of(&self, addr: SocketAddr) -> Option<NodeId> {
        self.roster
            .iter()
            .position(|&a| a == addr)
            .and_then(|i| u16::try_from(i).ok())
            .map(NodeId)
    }
}

impl Transport for UdpTransport {
    fn local(&self) -> NodeId {
        self.local
    }

    fn send(&mut self, to: NodeId, bytes: &[u8]) -> Result<()> {
        let addr = self
            .roster
            .get(to.index())
            .ok_or_else(|| NetError::NetNodeNotFound(to.to_string()))?;
        match self.socket.send_to(bytes, addr) {
            Ok(_) => Ok(()),
            // Full socket buffer: the datagram is lost, like any other.
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(NetError::NetTransportFailed(e)),
        }
    }

    fn drain_pending(&mut self, out: &mut Vec<Datagram>) -> Result<usize> {
        let mut count = 0;
        loop {
            match self.socket.recv_from(&mut self.buf) {
                Ok((len, addr)) => {
                    let Some(from) = self.node_of(addr) else {
                        tracing::warn!(%addr, "dropping datagram from unknown sender");
                        continue;
                    };
                    out.push(Datagram {
                        from,
                        bytes: self.buf[..len].to_vec(),
                    });
                    count += 1;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(count),
                // ICMP unreachable from an earlier send on some platforms.
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionRefused
                    ) => {}
                Err(e) => return Err(NetError::NetTransportFailed(e)),
            }
        }
    }
}

/// In-process network of [`LoopbackTransport`]s.
pub struct LoopbackHub;

impl LoopbackHub {
    /// Creates `nodes` connected transports, one per roster position.
    pub fn connect(nodes: u16) -> Vec<LoopbackTransport> {
        let (senders, receivers): (Vec<Sender<Datagram>>, Vec<Receiver<Datagram>>) =
            (0..nodes).map(|_| unbounded()).unzip();
        receivers
            .into_iter()
            .zip(0..nodes)
            .map(|(rx, id)| LoopbackTransport {
                local: NodeId(id),
                peers: senders.clone(),
                rx,
                drop_next: 0,
            })
            .collect()
    }
}

/// Channel-backed transport created by [`LoopbackHub::connect`].
pub struct LoopbackTransport {
    local: NodeId,
    peers: Vec<Sender<Datagram>>,
    rx: Receiver<Datagram>,
    drop_next: usize,
}

impl LoopbackTransport {
    /// Silently discards the next `count` outgoing datagrams.
    pub fn drop_next(&mut self, count: usize) {
        self.drop_next = count;
    }
}

impl Transport for LoopbackTransport {
    fn local(&self) -> NodeId {
        self.local
    }

    fn send(&mut self, to: NodeId, bytes: &[u8]) -> Result<()> {
        let peer = self
            .peers
            .get(to.index())
            .ok_or_else(|| NetError::NetNodeNotFound(to.to_string()))?;
        if self.drop_next > 0 {
            self.drop_next -= 1;
            return Ok(());
        }
        // A peer whose transport is gone behaves like an unreachable host.
        let _ = peer.send(Datagram {
            from: self.local,
            bytes: bytes.to_vec(),
        });
        Ok(())
    }

    fn drain_pending(&mut self, out: &mut Vec<Datagram>) -> Result<usize> {
        let mut count = 0;
        loop {
            match self.rx.try_recv() {
                Ok(d) => {
                    out.push(d);
                    count += 1;
                }
                Err(TryRecvError::Empty) => return Ok(count),
                Err(TryRecvError::Disconnected) => {
                    return Err(NetError::NetTransportFailed(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "loopback hub closed",
                    )));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_delivers_with_sender_id() {
        let mut nodes = LoopbackHub::connect(3);
        nodes[0].send(NodeId(2), b"hi").unwrap();
        nodes[1].send(NodeId(2), b"yo").unwrap();

        let mut out = Vec::new();
        assert_eq!(nodes[2].drain_pending(&mut out).unwrap(), 2);
        assert_eq!(out[0].from, NodeId(0));
        assert_eq!(out[1].bytes, b"yo");
        assert_eq!(nodes[0].drain_pending(&mut out).unwrap(), 0);
    }

    #[test]
    fn loopback_unknown_node() {
        let mut nodes = LoopbackHub::connect(1);
        assert!(matches!(
            nodes[0].send(NodeId(4), b"x"),
            Err(NetError::NetNodeNotFound(_))
        ));
    }

    #[test]
    fn loopback_can_drop() {
        let mut nodes = LoopbackHub::connect(2);
        nodes[0].drop_next(1);
        nodes[0].send(NodeId(1), b"lost").unwrap();
        nodes[0].send(NodeId(1), b"kept").unwrap();
        let mut out = Vec::new();
        nodes[1].drain_pending(&mut out).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].bytes, b"kept");
    }

    #[test]
    fn udp_round_trip_on_localhost() {
        let probe_a = UdpSocket::bind("127.0.0.1:0").unwrap();
        let probe_b = UdpSocket::bind("127.0.0.1:0").unwrap();
        let roster = vec![probe_a.local_addr().unwrap(), probe_b.local_addr().unwrap()];
        drop((probe_a, probe_b));

        let mut a = UdpTransport::bind(NodeId(0), roster.clone()).unwrap();
        let mut b = UdpTransport::bind(NodeId(1), roster).unwrap();
        a.send(NodeId(1), b"ping").unwrap();

        let mut out = Vec::new();
        for _ in 0..200 {
            b.drain_pending(&mut out).unwrap();
            if !out.is_empty() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].from, NodeId(0));
        assert_eq!(out[0].bytes, b"ping");
    }
}
