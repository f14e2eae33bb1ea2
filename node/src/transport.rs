//! Datagram transports carrying update, status and snapshot messages.
//!
//! [`UdpTransport`] sends to a UDP multicast group (and optionally a
//! duplicate destination). [`MemoryNetwork`] connects any number of
//! in-process [`MemoryTransport`]s for tests.

use crate::config::Config;
use async_trait::async_trait;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, Mutex};

/// Largest datagram accepted from the network.
const MAX_RECV_BYTES: usize = 65_536;

/// A best-effort broadcast medium shared by all nodes.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Send one message to every node.
    async fn broadcast(&self, payload: &[u8]) -> io::Result<()>;

    /// Wait for the next message and the address it came from.
    async fn recv(&self) -> io::Result<(Vec<u8>, SocketAddr)>;
}

/// UDP multicast transport.
#[derive(Debug)]
pub struct UdpTransport {
    recv_socket: UdpSocket,
    send_socket: UdpSocket,
    group: SocketAddrV4,
    duplicate: Option<(UdpSocket, SocketAddrV4)>,
}

impl UdpTransport {
    /// Bind the sockets described by `config` and join the multicast group.
    pub async fn bind(config: &Config) -> io::Result<Self> {
        let group = SocketAddrV4::new(config.send_recv_address, config.send_recv_port);

        let recv_socket =
            UdpSocket::bind((Ipv4Addr::UNSPECIFIED, config.send_recv_port)).await?;
        if group.ip().is_multicast() {
            recv_socket.join_multicast_v4(*group.ip(), config.send_recv_if_address)?;
        }

        let send_socket = sender_socket(config.send_recv_if_address, group).await?;

        let duplicate = if config.use_duplicate_sender {
            let target =
                SocketAddrV4::new(config.duplicate_send_address, config.duplicate_send_port);
            let socket = sender_socket(config.duplicate_send_if_address, target).await?;
            Some((socket, target))
        } else {
            None
        };

        tracing::info!(
            group = %group,
            interface = %config.send_recv_if_address,
            duplicate = ?duplicate.as_ref().map(|(_, addr)| *addr),
            "UDP transport bound"
        );

        Ok(Self {
            recv_socket,
            send_socket,
            group,
            duplicate,
        })
    }
}

/// Bind a socket for sending to `target` out of `interface`.
///
/// Binding to the interface address makes the kernel route multicast
/// traffic out of that interface.
async fn sender_socket(interface: Ipv4Addr, target: SocketAddrV4) -> io::Result<UdpSocket> {
    let socket = UdpSocket::bind((interface, 0)).await?;
    if target.ip().is_multicast() {
        socket.set_multicast_loop_v4(true)?;
    } else if target.ip().is_broadcast() {
        socket.set_broadcast(true)?;
    }
    Ok(socket)
}

#[async_trait]
impl Transport for UdpTransport {
    async fn broadcast(&self, payload: &[u8]) -> io::Result<()> {
        let primary = self.send_socket.send_to(payload, self.group);
        match &self.duplicate {
            Some((socket, target)) => {
                let (primary, duplicate) =
                    futures::future::join(primary, socket.send_to(payload, *target)).await;
                if let Err(e) = &duplicate {
                    tracing::warn!(target = %target, error = %e, "Duplicate send failed");
                }
                primary.map(|_| ())
            }
            None => primary.await.map(|_| ()),
        }
    }

    async fn recv(&self) -> io::Result<(Vec<u8>, SocketAddr)> {
        let mut buf = vec![0u8; MAX_RECV_BYTES];
        let (len, from) = self.recv_socket.recv_from(&mut buf).await?;
        buf.truncate(len);
        Ok((buf, from))
    }
}

/// Shared in-memory medium connecting [`MemoryTransport`]s.
#[derive(Clone, Debug)]
pub struct MemoryNetwork {
    sender: broadcast::Sender<(SocketAddr, Vec<u8>)>,
    next_port: Arc<AtomicU16>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self {
            sender: broadcast::channel(1024).0,
            next_port: Arc::new(AtomicU16::new(40_000)),
        }
    }

    /// Attach a new transport with its own fake source address.
    pub fn transport(&self) -> MemoryTransport {
        let port = self.next_port.fetch_add(1, Ordering::SeqCst);
        MemoryTransport {
            addr: SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
            sender: self.sender.clone(),
            receiver: Mutex::new(self.sender.subscribe()),
            drop_next_message: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

/// In-memory transport. Never delivers a node its own messages.
#[derive(Debug)]
pub struct MemoryTransport {
    addr: SocketAddr,
    sender: broadcast::Sender<(SocketAddr, Vec<u8>)>,
    receiver: Mutex<broadcast::Receiver<(SocketAddr, Vec<u8>)>>,
    drop_next_message: Arc<AtomicBool>,
}

impl MemoryTransport {
    /// Source address other nodes see for this transport.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Drop the next incoming message, simulating datagram loss.
    pub fn drop_next_incoming_message(&self) {
        self.drop_next_message.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn broadcast(&self, payload: &[u8]) -> io::Result<()> {
        // No receivers is not an error for a broadcast medium.
        let _ = self.sender.send((self.addr, payload.to_vec()));
        Ok(())
    }

    async fn recv(&self) -> io::Result<(Vec<u8>, SocketAddr)> {
        let mut receiver = self.receiver.lock().await;
        loop {
            match receiver.recv().await {
                Ok((from, _)) if from == self.addr => continue,
                Ok((from, payload)) => {
                    if self
                        .drop_next_message
                        .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok()
                    {
                        tracing::info!(from = %from, "TEST: dropping incoming message");
                        continue;
                    }
                    return Ok((payload, from));
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(lagged = n, "Memory transport receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "memory network closed",
                    ));
                }
            }
        }
    }
}
