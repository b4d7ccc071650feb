// src/core/client/transport.rs

//! Byte streams the wire client talks over, and the connectors that open them.

use crate::core::SpinelQError;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 6379;

/// A blocking, bidirectional byte stream to the backing store.
pub trait Transport: Read + Write + Send {
    /// Reports whether the peer has closed its side of the stream, without
    /// consuming any buffered bytes. Must not block.
    fn is_closed(&mut self) -> bool;
}

/// Opens fresh transports. The client calls it once on connect and again for
/// each transparent reconnect.
pub trait Connector: Send + Sync + fmt::Debug {
    fn connect(&self) -> Result<Box<dyn Transport>, SpinelQError>;
}

/// An enum to wrap the supported socket types into a single `Transport`.
#[derive(Debug)]
pub enum AnyStream {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl AnyStream {
    fn raw_fd(&self) -> RawFd {
        match self {
            AnyStream::Tcp(s) => s.as_raw_fd(),
            AnyStream::Unix(s) => s.as_raw_fd(),
        }
    }
}

impl Read for AnyStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            AnyStream::Tcp(s) => s.read(buf),
            AnyStream::Unix(s) => s.read(buf),
        }
    }
}

impl Write for AnyStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            AnyStream::Tcp(s) => s.write(buf),
            AnyStream::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            AnyStream::Tcp(s) => s.flush(),
            AnyStream::Unix(s) => s.flush(),
        }
    }
}

impl Transport for AnyStream {
    fn is_closed(&mut self) -> bool {
        peer_closed(self.raw_fd())
    }
}

/// Non-blocking one-byte peek: `0` means orderly shutdown by the peer.
fn peer_closed(fd: RawFd) -> bool {
    let mut probe = [0u8; 1];
    // SAFETY: `fd` is owned by a live socket and `probe` outlives the call.
    let n = unsafe {
        libc::recv(
            fd,
            probe.as_mut_ptr() as *mut libc::c_void,
            probe.len(),
            libc::MSG_PEEK | libc::MSG_DONTWAIT,
        )
    };
    match n {
        0 => true,
        n if n > 0 => false,
        _ => {
            let err = io::Error::last_os_error();
            !matches!(
                err.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
            )
        }
    }
}

/// Where the backing store listens: `host:port`, or a unix socket path given
/// as `unix:/path/to/socket`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendAddress {
    Tcp { host: String, port: u16 },
    Unix(PathBuf),
}

impl Default for BackendAddress {
    fn default() -> Self {
        BackendAddress::Tcp {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl FromStr for BackendAddress {
    type Err = SpinelQError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(SpinelQError::Configuration(
                "backend address cannot be empty".to_string(),
            ));
        }

        if let Some(path) = s.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(SpinelQError::Configuration(format!(
                    "backend address '{s}' has an empty socket path"
                )));
            }
            return Ok(BackendAddress::Unix(PathBuf::from(path)));
        }

        match s.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| {
                    SpinelQError::Configuration(format!("invalid port in backend address '{s}'"))
                })?;
                if host.is_empty() || port == 0 {
                    return Err(SpinelQError::Configuration(format!(
                        "invalid backend address '{s}'"
                    )));
                }
                Ok(BackendAddress::Tcp {
                    host: host.to_string(),
                    port,
                })
            }
            None => Ok(BackendAddress::Tcp {
                host: s.to_string(),
                port: DEFAULT_PORT,
            }),
        }
    }
}

impl fmt::Display for BackendAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendAddress::Tcp { host, port } => write!(f, "{host}:{port}"),
            BackendAddress::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

impl Connector for BackendAddress {
    fn connect(&self) -> Result<Box<dyn Transport>, SpinelQError> {
        let stream = match self {
            BackendAddress::Tcp { host, port } => {
                let stream = TcpStream::connect((host.as_str(), *port))
                    .map_err(|e| SpinelQError::connection(&e))?;
                // Commands are already batched by the client; do not delay them further.
                stream
                    .set_nodelay(true)
                    .map_err(|e| SpinelQError::connection(&e))?;
                AnyStream::Tcp(stream)
            }
            BackendAddress::Unix(path) => {
                AnyStream::Unix(UnixStream::connect(path).map_err(|e| SpinelQError::connection(&e))?)
            }
        };
        Ok(Box::new(stream))
    }
}
