use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;

use crate::channel::Role;
use crate::error::Result;

const RECV_CHUNK_SIZE: usize = 8 * 1024;

/// A bound, role-tagged channel endpoint.
///
/// Holds one half per direction so a caller can split reading and writing
/// into independently owned objects (the socket variant clones the
/// descriptor, the fifo variant is naturally two files).
#[derive(Debug)]
pub struct Endpoint {
    rx: EndpointHalf,
    tx: EndpointHalf,
    role: Role,
}

impl Endpoint {
    pub(crate) fn from_socket(rx: UnixStream, tx: UnixStream, role: Role) -> Self {
        Self {
            rx: EndpointHalf {
                inner: HalfInner::Socket(rx),
            },
            tx: EndpointHalf {
                inner: HalfInner::Socket(tx),
            },
            role,
        }
    }

    pub(crate) fn from_fifo(rx: File, tx: File, role: Role) -> Self {
        Self {
            rx: EndpointHalf {
                inner: HalfInner::Fifo(rx),
            },
            tx: EndpointHalf {
                inner: HalfInner::Fifo(tx),
            },
            role,
        }
    }

    /// The role this endpoint was bound with.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Receive one chunk of raw bytes.
    ///
    /// Blocking mode waits for data and returns an empty buffer only on
    /// EOF; non-blocking mode returns an empty buffer immediately when
    /// nothing is pending.
    pub fn recv(&mut self, block: bool) -> Result<Vec<u8>> {
        self.rx.recv_chunk(block)
    }

    /// Send raw bytes, returning the number written.
    ///
    /// Blocking mode writes the whole buffer; non-blocking mode returns
    /// after the first short write.
    pub fn send(&mut self, buf: &[u8], block: bool) -> Result<usize> {
        self.tx.send_chunk(buf, block)
    }

    /// Take the two halves: `(read half, write half)`.
    pub fn into_split(self) -> (EndpointHalf, EndpointHalf) {
        (self.rx, self.tx)
    }
}

impl Read for Endpoint {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.rx.read(buf)
    }
}

impl Write for Endpoint {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.tx.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.tx.flush()
    }
}

/// One direction of a bound endpoint.
#[derive(Debug)]
pub struct EndpointHalf {
    inner: HalfInner,
}

#[derive(Debug)]
enum HalfInner {
    Socket(UnixStream),
    Fifo(File),
}

impl EndpointHalf {
    /// Toggle non-blocking mode on the underlying descriptor.
    pub fn set_nonblocking(&self, nonblocking: bool) -> std::io::Result<()> {
        match &self.inner {
            HalfInner::Socket(stream) => stream.set_nonblocking(nonblocking),
            HalfInner::Fifo(file) => set_fd_nonblocking(file.as_raw_fd(), nonblocking),
        }
    }

    /// Receive one chunk. See [`Endpoint::recv`].
    pub fn recv_chunk(&mut self, block: bool) -> Result<Vec<u8>> {
        self.set_nonblocking(!block)?;
        let mut buf = vec![0u8; RECV_CHUNK_SIZE];
        loop {
            match self.read(&mut buf) {
                Ok(n) => {
                    buf.truncate(n);
                    return Ok(buf);
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock && !block => {
                    return Ok(Vec::new());
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Send one chunk. See [`Endpoint::send`].
    pub fn send_chunk(&mut self, buf: &[u8], block: bool) -> Result<usize> {
        self.set_nonblocking(!block)?;
        let mut offset = 0usize;
        while offset < buf.len() {
            match self.write(&buf[offset..]) {
                Ok(0) => break,
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock && !block => break,
                Err(err) => return Err(err.into()),
            }
        }
        if block {
            self.flush()?;
        }
        Ok(offset)
    }
}

impl Read for EndpointHalf {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            HalfInner::Socket(stream) => stream.read(buf),
            HalfInner::Fifo(file) => file.read(buf),
        }
    }
}

impl Write for EndpointHalf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            HalfInner::Socket(stream) => stream.write(buf),
            HalfInner::Fifo(file) => file.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            HalfInner::Socket(stream) => stream.flush(),
            HalfInner::Fifo(file) => file.flush(),
        }
    }
}

fn set_fd_nonblocking(fd: std::os::fd::RawFd, nonblocking: bool) -> std::io::Result<()> {
    // SAFETY: fd is an open descriptor owned by this process; F_GETFL and
    // F_SETFL do not touch memory.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 {
            return Err(std::io::Error::last_os_error());
        }
        let flags = if nonblocking {
            flags | libc::O_NONBLOCK
        } else {
            flags & !libc::O_NONBLOCK
        };
        if libc::fcntl(fd, libc::F_SETFL, flags) < 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Channel, ChannelKind};

    fn socket_endpoints() -> (Endpoint, Endpoint) {
        Channel::create(ChannelKind::Socket)
            .unwrap()
            .split()
            .unwrap()
    }

    #[test]
    fn blocking_recv_returns_pending_bytes() {
        let (mut master, mut child) = socket_endpoints();

        master.send(b"payload", true).unwrap();
        let got = child.recv(true).unwrap();
        assert_eq!(got, b"payload");
    }

    #[test]
    fn nonblocking_recv_returns_empty_when_idle() {
        let (_master, mut child) = socket_endpoints();

        let got = child.recv(false).unwrap();
        assert!(got.is_empty());
    }

    #[test]
    fn nonblocking_recv_picks_up_later_data() {
        let (mut master, mut child) = socket_endpoints();

        assert!(child.recv(false).unwrap().is_empty());
        master.send(b"late", true).unwrap();
        // Socket delivery is immediate for a connected pair.
        let got = child.recv(true).unwrap();
        assert_eq!(got, b"late");
    }

    #[test]
    fn recv_sees_eof_as_empty_after_peer_close() {
        let (master, mut child) = socket_endpoints();
        drop(master);

        let got = child.recv(true).unwrap();
        assert!(got.is_empty());
    }

    #[test]
    fn send_reports_bytes_written() {
        let (mut master, mut child) = socket_endpoints();

        let n = master.send(b"12345", true).unwrap();
        assert_eq!(n, 5);
        assert_eq!(child.recv(true).unwrap(), b"12345");
    }

    #[test]
    fn split_halves_carry_both_directions() {
        let (master, child) = socket_endpoints();
        let (mut m_rx, mut m_tx) = master.into_split();
        let (mut c_rx, mut c_tx) = child.into_split();

        m_tx.write_all(b"down").unwrap();
        let mut buf = [0u8; 4];
        c_rx.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"down");

        c_tx.write_all(b"up").unwrap();
        let mut buf = [0u8; 2];
        m_rx.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"up");
    }

    #[test]
    fn socket_half_nonblocking_toggle_roundtrips() {
        let (master, _child) = socket_endpoints();
        let (rx, _tx) = master.into_split();

        rx.set_nonblocking(true).unwrap();
        rx.set_nonblocking(false).unwrap();
    }
}
