use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use mio::net::UdpSocket;
use mio::{Events, Interest, Poll, Token};

/// All advertisement traffic stays on the loopback interface.
const LOCAL_HOST: Ipv4Addr = Ipv4Addr::LOCALHOST;

/// The input sockets, one per configured input port, registered with a
/// readiness poller. Sockets are nonblocking; the only place the daemon ever
/// waits is [`InputBank::wait_ready`].
pub struct InputBank {
    poll: Poll,
    events: Events,
    sockets: Vec<UdpSocket>,
}

impl InputBank {
    pub fn bind(ports: &[u16]) -> io::Result<Self> {
        let poll = Poll::new()?;
        let mut sockets = Vec::with_capacity(ports.len());
        for (index, &port) in ports.iter().enumerate() {
            let addr = SocketAddr::V4(SocketAddrV4::new(LOCAL_HOST, port));
            let mut socket = UdpSocket::bind(addr)?;
            poll.registry()
                .register(&mut socket, Token(index), Interest::READABLE)?;
            sockets.push(socket);
        }
        Ok(Self {
            poll,
            events: Events::with_capacity(ports.len().max(1)),
            sockets,
        })
    }

    /// Waits up to `timeout` and returns the indices of the ready sockets.
    /// An empty result means the wait timed out.
    pub fn wait_ready(&mut self, timeout: Duration) -> io::Result<Vec<usize>> {
        self.poll.poll(&mut self.events, Some(timeout))?;
        Ok(self.events.iter().map(|event| event.token().0).collect())
    }

    /// Reads one datagram from the socket at `index`. `None` means the
    /// socket had nothing left to read.
    pub fn recv_on(&self, index: usize, buf: &mut [u8]) -> io::Result<Option<usize>> {
        match self.sockets[index].recv_from(buf) {
            Ok((len, _addr)) => Ok(Some(len)),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn len(&self) -> usize {
        self.sockets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sockets.is_empty()
    }
}

/// The single socket all advertisements are sent from.
pub struct OutputSocket {
    socket: std::net::UdpSocket,
}

impl OutputSocket {
    pub fn bind(port: u16) -> io::Result<Self> {
        let socket = std::net::UdpSocket::bind((LOCAL_HOST, port))?;
        socket.set_nonblocking(true)?;
        Ok(Self { socket })
    }

    pub fn send_to_port(&self, payload: &[u8], port: u16) -> io::Result<usize> {
        self.socket.send_to(payload, (LOCAL_HOST, port))
    }
}
