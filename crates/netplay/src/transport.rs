use std::collections::VecDeque;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::protocol::{NET_PACKET_SIZE, PacketKind};

/// Connectionless datagram primitive bound to a single opponent.
pub trait Transport {
    /// Resolves the opponent and directs all further sends at it.
    fn resolve(&mut self, host: &str, port: u16) -> io::Result<SocketAddr>;

    fn send(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Non-blocking receive. `Ok(None)` means nothing is waiting.
    fn try_receive(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>>;

    fn close(&mut self);
}

pub struct UdpTransport {
    socket: Option<UdpSocket>,
    local_addr: SocketAddr,
    remote_addr: Option<SocketAddr>,
}

impl UdpTransport {
    pub fn open(port: u16) -> io::Result<Self> {
        Self::bind((Ipv4Addr::UNSPECIFIED, port))
    }

    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;

        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket: Some(socket),
            local_addr,
            remote_addr: None,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    fn socket(&self) -> io::Result<&UdpSocket> {
        self.socket
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "transport is closed"))
    }
}

impl Transport for UdpTransport {
    fn resolve(&mut self, host: &str, port: u16) -> io::Result<SocketAddr> {
        let candidates: Vec<SocketAddr> = (host, port).to_socket_addrs()?.collect();

        let addr = candidates
            .iter()
            .find(|a| a.is_ipv4() == self.local_addr.is_ipv4())
            .or_else(|| candidates.first())
            .copied()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no address found for {}", host),
                )
            })?;

        self.remote_addr = Some(addr);
        Ok(addr)
    }

    fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        let addr = self
            .remote_addr
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "No remote address set"))?;

        if data.len() > NET_PACKET_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Packet exceeds packet size",
            ));
        }

        self.socket()?.send_to(data, addr)
    }

    fn try_receive(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        match self.socket()?.recv_from(buf) {
            Ok((size, from)) => {
                if self.remote_addr.is_some_and(|remote| remote != from) {
                    log::trace!("ignoring datagram from stranger {}", from);
                    return Ok(None);
                }
                Ok(Some(size))
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn close(&mut self) {
        self.socket = None;
    }
}

type Queue = Arc<Mutex<VecDeque<Vec<u8>>>>;

/// Returns `true` for datagrams that should be lost in transit.
pub type LossFilter = Box<dyn FnMut(&[u8]) -> bool + Send>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Every datagram a [`MemoryTransport`] was asked to send, lost or not.
#[derive(Debug, Clone, Default)]
pub struct SentLog {
    entries: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl SentLog {
    fn record(&self, data: &[u8]) {
        lock(&self.entries).push(data.to_vec());
    }

    pub fn snapshot(&self) -> Vec<Vec<u8>> {
        lock(&self.entries).clone()
    }

    /// Sequence numbers of the logged datagrams of one kind, in send order.
    pub fn sequences_of(&self, kind: PacketKind) -> Vec<u16> {
        lock(&self.entries)
            .iter()
            .filter(|d| d.len() >= 4 && u16::from_be_bytes([d[0], d[1]]) == kind.as_u16())
            .map(|d| u16::from_be_bytes([d[2], d[3]]))
            .collect()
    }

    pub fn count_of(&self, kind: PacketKind) -> usize {
        self.sequences_of(kind).len()
    }
}

/// In-process datagram link. Both ends may live on different threads.
pub struct MemoryTransport {
    inbox: Queue,
    outbox: Queue,
    sent: SentLog,
    loss: Option<LossFilter>,
    closed: bool,
}

/// Creates two connected ends of an in-memory link.
pub fn memory_link() -> (MemoryTransport, MemoryTransport) {
    let a_to_b: Queue = Arc::default();
    let b_to_a: Queue = Arc::default();

    let a = MemoryTransport {
        inbox: Arc::clone(&b_to_a),
        outbox: Arc::clone(&a_to_b),
        sent: SentLog::default(),
        loss: None,
        closed: false,
    };
    let b = MemoryTransport {
        inbox: a_to_b,
        outbox: b_to_a,
        sent: SentLog::default(),
        loss: None,
        closed: false,
    };
    (a, b)
}

impl MemoryTransport {
    /// Drops outbound datagrams for which `filter` returns `true`.
    pub fn set_loss_filter<F>(&mut self, filter: F)
    where
        F: FnMut(&[u8]) -> bool + Send + 'static,
    {
        self.loss = Some(Box::new(filter));
    }

    pub fn sent_log(&self) -> SentLog {
        self.sent.clone()
    }

    pub fn pending(&self) -> usize {
        lock(&self.inbox).len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Transport for MemoryTransport {
    fn resolve(&mut self, _host: &str, port: u16) -> io::Result<SocketAddr> {
        Ok(SocketAddr::from((Ipv4Addr::LOCALHOST, port)))
    }

    fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "transport is closed",
            ));
        }

        self.sent.record(data);

        if self.loss.as_mut().is_some_and(|lose| lose(data)) {
            return Ok(data.len());
        }

        lock(&self.outbox).push_back(data.to_vec());
        Ok(data.len())
    }

    fn try_receive(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        if self.closed {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "transport is closed",
            ));
        }

        let Some(datagram) = lock(&self.inbox).pop_front() else {
            return Ok(None);
        };

        let size = datagram.len().min(buf.len());
        buf[..size].copy_from_slice(&datagram[..size]);
        Ok(Some(size))
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
