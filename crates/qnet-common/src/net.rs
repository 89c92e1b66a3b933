// net.rs — addresses and the datagram transport abstraction.
//
// The session layer picks a driver and hands endpoints to the core; the core
// never opens sockets on its own except for the per-peer ephemeral endpoint
// the server allocates during the connect handshake. Receives are polled:
// no data pending returns Ok(None) rather than suspending.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::rc::Rc;

use crate::error::NetError;
use crate::wire::MAX_PACKET;

// =============================================================================
// Addresses
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetAdrType {
    /// In-process loopback driver; peers are distinguished by port.
    Loop,
    Ip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetAdr {
    pub adr_type: NetAdrType,
    pub ip: [u8; 4],
    pub port: u16,
}

impl NetAdr {
    pub fn loopback(port: u16) -> Self {
        Self {
            adr_type: NetAdrType::Loop,
            ip: [0; 4],
            port,
        }
    }

    pub fn ip(ip: [u8; 4], port: u16) -> Self {
        Self {
            adr_type: NetAdrType::Ip,
            ip,
            port,
        }
    }

    /// Same peer endpoint, including port.
    pub fn compare(&self, other: &NetAdr) -> bool {
        self == other
    }

    /// Same host, ignoring port.
    pub fn compare_base(&self, other: &NetAdr) -> bool {
        self.adr_type == other.adr_type && self.ip == other.ip
    }

    pub fn with_port(&self, port: u16) -> NetAdr {
        NetAdr { port, ..*self }
    }
}

impl std::fmt::Display for NetAdr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.adr_type {
            NetAdrType::Loop => write!(f, "loop:{}", self.port),
            NetAdrType::Ip => write!(
                f,
                "{}.{}.{}.{}:{}",
                self.ip[0], self.ip[1], self.ip[2], self.ip[3], self.port
            ),
        }
    }
}

/// Parse "host", "host:port", or "localhost[:port]" into an address.
pub fn string_to_adr(s: &str) -> Option<NetAdr> {
    let (host, port) = match s.rfind(':') {
        Some(pos) => (&s[..pos], s[pos + 1..].parse::<u16>().ok()?),
        None => (s, 0u16),
    };

    if host == "localhost" {
        return Some(NetAdr::loopback(port));
    }

    let addr: Ipv4Addr = host.parse().ok()?;
    Some(NetAdr::ip(addr.octets(), port))
}

// =============================================================================
// Driver / endpoint traits
// =============================================================================

/// One bound transport endpoint (a socket, for the UDP driver).
pub trait Endpoint {
    fn send_to(&mut self, data: &[u8], to: &NetAdr) -> Result<(), NetError>;

    /// Non-blocking receive. Returns the payload length and source address,
    /// or None when nothing is pending.
    fn recv_from(&mut self, buf: &mut [u8]) -> Result<Option<(usize, NetAdr)>, NetError>;

    fn local_addr(&self) -> NetAdr;
}

/// Opens endpoints. Port 0 binds an ephemeral port, which the server uses to
/// dedicate an endpoint to each accepted peer.
pub trait Driver {
    type Endpoint: Endpoint;

    fn open(&mut self, port: u16) -> Result<Self::Endpoint, NetError>;
}

// =============================================================================
// UDP driver
// =============================================================================

pub struct UdpDriver;

pub struct UdpEndpoint {
    socket: UdpSocket,
}

fn to_socket_addr(adr: &NetAdr) -> SocketAddr {
    let ip = match adr.adr_type {
        NetAdrType::Loop => Ipv4Addr::LOCALHOST,
        NetAdrType::Ip => Ipv4Addr::from(adr.ip),
    };
    SocketAddr::V4(SocketAddrV4::new(ip, adr.port))
}

impl Driver for UdpDriver {
    type Endpoint = UdpEndpoint;

    fn open(&mut self, port: u16) -> Result<UdpEndpoint, NetError> {
        let socket = UdpSocket::bind(("0.0.0.0", port))?;
        socket.set_nonblocking(true)?;
        Ok(UdpEndpoint { socket })
    }
}

impl Endpoint for UdpEndpoint {
    fn send_to(&mut self, data: &[u8], to: &NetAdr) -> Result<(), NetError> {
        self.socket.send_to(data, to_socket_addr(to))?;
        Ok(())
    }

    fn recv_from(&mut self, buf: &mut [u8]) -> Result<Option<(usize, NetAdr)>, NetError> {
        match self.socket.recv_from(buf) {
            Ok((len, SocketAddr::V4(from))) => {
                Ok(Some((len, NetAdr::ip(from.ip().octets(), from.port()))))
            }
            Ok((_, SocketAddr::V6(_))) => Ok(None),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn local_addr(&self) -> NetAdr {
        match self.socket.local_addr() {
            Ok(SocketAddr::V4(a)) => NetAdr::ip(a.ip().octets(), a.port()),
            _ => NetAdr::ip([0; 4], 0),
        }
    }
}

// =============================================================================
// Loopback driver
// =============================================================================

// In-memory port-addressed queues. Single-threaded by design: each endpoint
// is owned and pumped by one tick loop.

#[derive(Default)]
struct LoopState {
    next_port: u16,
    queues: HashMap<u16, VecDeque<(Vec<u8>, NetAdr)>>,
}

#[derive(Clone, Default)]
pub struct LoopDriver {
    state: Rc<RefCell<LoopState>>,
}

impl LoopDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

pub struct LoopEndpoint {
    state: Rc<RefCell<LoopState>>,
    port: u16,
}

impl Driver for LoopDriver {
    type Endpoint = LoopEndpoint;

    fn open(&mut self, port: u16) -> Result<LoopEndpoint, NetError> {
        let mut state = self.state.borrow_mut();
        let port = if port == 0 {
            loop {
                state.next_port = state.next_port.wrapping_add(1).max(1024);
                if !state.queues.contains_key(&state.next_port) {
                    break state.next_port;
                }
            }
        } else {
            if state.queues.contains_key(&port) {
                return Err(NetError::Transport(std::io::Error::new(
                    ErrorKind::AddrInUse,
                    "port in use",
                )));
            }
            port
        };
        state.queues.insert(port, VecDeque::new());
        Ok(LoopEndpoint {
            state: Rc::clone(&self.state),
            port,
        })
    }
}

impl Endpoint for LoopEndpoint {
    fn send_to(&mut self, data: &[u8], to: &NetAdr) -> Result<(), NetError> {
        if data.len() > MAX_PACKET {
            return Err(NetError::Transport(std::io::Error::new(
                ErrorKind::InvalidInput,
                "oversized datagram",
            )));
        }
        let from = NetAdr::loopback(self.port);
        let mut state = self.state.borrow_mut();
        // a send to an unbound port is dropped, like UDP
        if let Some(queue) = state.queues.get_mut(&to.port) {
            queue.push_back((data.to_vec(), from));
        }
        Ok(())
    }

    fn recv_from(&mut self, buf: &mut [u8]) -> Result<Option<(usize, NetAdr)>, NetError> {
        let mut state = self.state.borrow_mut();
        let queue = match state.queues.get_mut(&self.port) {
            Some(q) => q,
            None => return Ok(None),
        };
        match queue.pop_front() {
            Some((data, from)) => {
                let len = data.len().min(buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                Ok(Some((len, from)))
            }
            None => Ok(None),
        }
    }

    fn local_addr(&self) -> NetAdr {
        NetAdr::loopback(self.port)
    }
}

impl Drop for LoopEndpoint {
    fn drop(&mut self) {
        self.state.borrow_mut().queues.remove(&self.port);
    }
}
