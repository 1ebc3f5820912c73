//! The host console pipe.
//!
//! SOL bytes flow to and from the host through a stream socket owned by
//! the console daemon, conventionally an abstract-namespace socket named
//! `obmc-console`. The pipe degrades gracefully: a missing console makes
//! SOL writes fail (the remote console sees NACKs) without taking the
//! daemon down.

use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;

use crate::config::ConsoleEndpoint;

/// Non-blocking connection to the host console socket.
#[derive(Debug)]
pub struct ConsolePipe {
    stream: Option<UnixStream>,
}

impl ConsolePipe {
    /// Connects per the configured endpoint. Connection failure is logged,
    /// not fatal; the daemon runs without a console.
    pub fn connect(endpoint: &ConsoleEndpoint) -> Self {
        let stream = match endpoint {
            ConsoleEndpoint::None => None,
            ConsoleEndpoint::Path(path) => match UnixStream::connect(path) {
                Ok(stream) => Some(stream),
                Err(err) => {
                    tracing::warn!(path, error = %err, "host console unavailable");
                    None
                }
            },
            ConsoleEndpoint::Abstract(name) => match connect_abstract(name) {
                Ok(stream) => Some(stream),
                Err(err) => {
                    tracing::warn!(name, error = %err, "host console unavailable");
                    None
                }
            },
        };

        if let Some(stream) = &stream {
            if let Err(err) = stream.set_nonblocking(true) {
                tracing::warn!(error = %err, "cannot make console socket non-blocking");
            }
        }

        Self { stream }
    }

    /// A pipe with no backing socket.
    pub fn disconnected() -> Self {
        Self { stream: None }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn stream(&self) -> Option<&UnixStream> {
        self.stream.as_ref()
    }

    /// Writes remote-console bytes toward the host.
    pub fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "host console not connected",
            ));
        };
        match stream.write_all(data) {
            Ok(()) => Ok(()),
            Err(err) => {
                tracing::warn!(error = %err, "console write failed; dropping pipe");
                self.stream = None;
                Err(err)
            }
        }
    }

    /// Drains whatever the host console has produced. `Ok(None)` means the
    /// peer closed the stream.
    pub fn try_read(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(Some(0));
        };
        match stream.read(buf) {
            Ok(0) => {
                tracing::info!("host console closed the pipe");
                self.stream = None;
                Ok(None)
            }
            Ok(n) => Ok(Some(n)),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(Some(0)),
            Err(err) => {
                self.stream = None;
                Err(err)
            }
        }
    }
}

#[cfg(target_os = "linux")]
fn connect_abstract(name: &str) -> io::Result<UnixStream> {
    use std::os::linux::net::SocketAddrExt;
    use std::os::unix::net::SocketAddr;

    let addr = SocketAddr::from_abstract_name(name.as_bytes())?;
    UnixStream::connect_addr(&addr)
}

#[cfg(not(target_os = "linux"))]
fn connect_abstract(_name: &str) -> io::Result<UnixStream> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "abstract socket namespace requires linux",
    ))
}
