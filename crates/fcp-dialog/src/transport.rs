//! Socket transport to the node.
//!
//! Wraps TCP and Unix streams in a single [`NodeStream`] so the connection
//! layer stays transport agnostic.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use fcp_config::NodeEndpoint;

#[cfg(unix)]
use std::os::unix::net::UnixStream;

#[cfg(unix)]
use socket2::{Domain, SockAddr, Socket, Type};

use crate::errors::FcpError;

pub(crate) enum NodeStream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl NodeStream {
    pub(crate) fn try_clone(&self) -> io::Result<Self> {
        match self {
            Self::Tcp(stream) => stream.try_clone().map(Self::Tcp),
            #[cfg(unix)]
            Self::Unix(stream) => stream.try_clone().map(Self::Unix),
        }
    }

    pub(crate) fn shutdown(&self) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.shutdown(Shutdown::Both),
            #[cfg(unix)]
            Self::Unix(stream) => stream.shutdown(Shutdown::Both),
        }
    }

    pub(crate) fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.set_read_timeout(timeout),
            #[cfg(unix)]
            Self::Unix(stream) => stream.set_read_timeout(timeout),
        }
    }
}

impl Read for NodeStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for NodeStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            Self::Unix(stream) => stream.flush(),
        }
    }
}

/// Opens a stream to `endpoint`; `None` waits for the OS connect timeout.
pub(crate) fn connect(
    endpoint: &NodeEndpoint,
    timeout: Option<Duration>,
) -> Result<NodeStream, FcpError> {
    match endpoint {
        NodeEndpoint::Tcp { host, port } => {
            let address = resolve_tcp_address(host, *port).map_err(|source| FcpError::Resolve {
                endpoint: endpoint.to_string(),
                source: Arc::new(source),
            })?;

            let connected = match timeout {
                Some(timeout) => TcpStream::connect_timeout(&address, timeout),
                None => TcpStream::connect(address),
            };
            let stream = connected.map_err(|source| FcpError::Connect {
                endpoint: endpoint.to_string(),
                source: Arc::new(source),
            })?;
            stream.set_nodelay(true)?;
            Ok(NodeStream::Tcp(stream))
        }
        #[cfg(unix)]
        NodeEndpoint::Unix { path } => {
            connect_unix(path.as_str(), timeout).map_err(|source| FcpError::Connect {
                endpoint: endpoint.to_string(),
                source: Arc::new(source),
            })
        }
        #[cfg(not(unix))]
        NodeEndpoint::Unix { .. } => Err(FcpError::UnsupportedUnixTransport {
            endpoint: endpoint.to_string(),
        }),
    }
}

fn resolve_tcp_address(host: &str, port: u16) -> io::Result<SocketAddr> {
    let mut addrs = (host, port).to_socket_addrs()?;
    addrs
        .find(|addr| matches!(addr, SocketAddr::V4(_) | SocketAddr::V6(_)))
        .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no resolved addresses"))
}

#[cfg(unix)]
fn connect_unix(path: &str, timeout: Option<Duration>) -> io::Result<NodeStream> {
    let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
    let address = SockAddr::unix(path)?;
    match timeout {
        Some(timeout) => socket.connect_timeout(&address, timeout)?,
        None => socket.connect(&address)?,
    }
    let stream = UnixStream::from(std::os::fd::OwnedFd::from(socket));
    Ok(NodeStream::Unix(stream))
}
