//! Session operations abstraction
//!
//! The HTTP/2 connection runs a reader thread and a writer (driver)
//! thread over one transport. A [`SessionOps`] implementation is split
//! into a blocking reader half and a writer half; closing the writer half
//! must unblock a read in progress on the reader half.
//!
//! TLS is outside this crate; any already-established byte stream can be
//! plugged in by implementing [`SessionOps`].

use super::Result;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Session operations trait
///
/// A fully established, reliable, ordered byte stream.
pub trait SessionOps: Send + 'static {
    /// Blocking read half, owned by the reader thread
    type Reader: Read + Send + 'static;

    /// Write half, owned by the driver thread
    type Writer: SessionWrite;

    /// Split the session into its two halves
    fn split(self) -> Result<(Self::Reader, Self::Writer)>;
}

/// Write half of a session
pub trait SessionWrite: Write + Send + 'static {
    /// Close the transport. A read blocked on the other half must return.
    fn close(&mut self) -> Result<()>;
}

/// Plain TCP session
#[derive(Debug)]
pub struct TcpSession {
    stream: TcpStream,
}

impl TcpSession {
    /// Wrap an already connected stream
    pub fn new(stream: TcpStream) -> Self {
        TcpSession { stream }
    }

    /// Connect to the first reachable address, with Nagle disabled and
    /// keepalive enabled.
    pub fn connect<A: ToSocketAddrs>(addr: A, timeout: Duration) -> Result<Self> {
        let mut last_err = None;
        for addr in addr.to_socket_addrs()? {
            let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
            socket.set_nodelay(true)?;
            socket.set_keepalive(true)?;
            match socket.connect_timeout(&SockAddr::from(addr), timeout) {
                Ok(()) => return Ok(TcpSession::new(socket.into())),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "address resolved to nothing"))
            .into())
    }

    /// Get a reference to the underlying stream
    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }
}

impl SessionOps for TcpSession {
    type Reader = TcpStream;
    type Writer = TcpWriter;

    fn split(self) -> Result<(TcpStream, TcpWriter)> {
        let reader = self.stream.try_clone()?;
        Ok((reader, TcpWriter { stream: self.stream }))
    }
}

/// Write half of a [`TcpSession`]
#[derive(Debug)]
pub struct TcpWriter {
    stream: TcpStream,
}

impl Write for TcpWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl SessionWrite for TcpWriter {
    fn close(&mut self) -> Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e.into()),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_tcp_session_split() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(b"Hello").unwrap();
            let mut buf = [0u8; 5];
            stream.read_exact(&mut buf).unwrap();
            assert_eq!(&buf, b"World");
        });

        let session = TcpSession::connect(addr, Duration::from_secs(1)).unwrap();
        let (mut reader, mut writer) = session.split().unwrap();

        let mut buf = [0u8; 5];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"Hello");

        writer.write_all(b"World").unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_close_unblocks_reader() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_millis(500));
            drop(stream);
        });

        let session = TcpSession::connect(addr, Duration::from_secs(1)).unwrap();
        let (mut reader, mut writer) = session.split().unwrap();

        let blocked = thread::spawn(move || {
            let mut buf = [0u8; 1];
            reader.read(&mut buf)
        });
        thread::sleep(Duration::from_millis(50));
        writer.close().unwrap();

        // Either EOF or an error, but the read returns
        let result = blocked.join().unwrap();
        assert!(matches!(result, Ok(0) | Err(_)));
        server.join().unwrap();
    }

    #[test]
    fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        assert!(TcpSession::connect(addr, Duration::from_millis(200)).is_err());
    }
}
