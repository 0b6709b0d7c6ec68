//! Byte stream transports the handshake and record channel run over.
//!
//! A transport may be blocking or non-blocking. Non-blocking transports report
//! [`TransportError::WouldBlock`] and the caller retries after
//! [`Transport::wait`].

use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use thiserror::Error;

use crate::Error as SeclinkError;

/// Which way an operation was waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

#[derive(Debug, Error)]
pub enum TransportError {
    /// No progress possible right now. Retry later.
    #[error("Operation would block")]
    WouldBlock,

    /// The peer has closed the stream (EOF) or the stream was closed locally.
    #[error("Transport closed")]
    Closed,

    #[error("Transport i/o: {0}")]
    Io(#[from] io::Error),
}

impl From<TransportError> for SeclinkError {
    fn from(value: TransportError) -> Self {
        match value {
            TransportError::Closed => SeclinkError::TransportClosed,
            TransportError::Io(e) => SeclinkError::Transport(e),
            TransportError::WouldBlock => {
                SeclinkError::Transport(io::Error::new(ErrorKind::WouldBlock, "would block"))
            }
        }
    }
}

/// A reliable, in-order byte stream.
pub trait Transport {
    /// Send some prefix of `data`, returning how much was taken.
    fn send(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// Receive at least one byte into `buf`.
    ///
    /// EOF is reported as [`TransportError::Closed`], never as `Ok(0)`.
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Close both directions. Idempotent.
    fn close(&mut self);

    /// Called after `WouldBlock` before retrying.
    fn wait(&mut self, _direction: Direction) {
        thread::yield_now();
    }

    /// Bound how long a single send/recv may block.
    fn set_io_timeout(&mut self, _timeout: Option<Duration>) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Source of inbound transports for a server.
pub trait Listener {
    type Transport: Transport;

    /// Accept one pending transport, `None` if there is none right now.
    fn accept(&mut self) -> Result<Option<Self::Transport>, TransportError>;
}

fn map_io(e: io::Error) -> TransportError {
    match e.kind() {
        // A blocking stream whose timeout expired reports one of these.
        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted => {
            TransportError::WouldBlock
        }
        ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::BrokenPipe
        | ErrorKind::UnexpectedEof => TransportError::Closed,
        _ => TransportError::Io(e),
    }
}

impl Transport for TcpStream {
    fn send(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        match self.write(data) {
            Ok(0) if !data.is_empty() => Err(TransportError::Closed),
            Ok(n) => Ok(n),
            Err(e) => Err(map_io(e)),
        }
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        match self.read(buf) {
            Ok(0) => Err(TransportError::Closed),
            Ok(n) => Ok(n),
            Err(e) => Err(map_io(e)),
        }
    }

    fn close(&mut self) {
        // Fails with NotConnected if the peer already went away.
        let _ = self.shutdown(Shutdown::Both);
    }

    fn wait(&mut self, _direction: Direction) {
        thread::sleep(Duration::from_millis(1));
    }

    fn set_io_timeout(&mut self, timeout: Option<Duration>) -> Result<(), TransportError> {
        self.set_read_timeout(timeout)?;
        self.set_write_timeout(timeout)?;
        Ok(())
    }
}

impl Listener for TcpListener {
    type Transport = TcpStream;

    fn accept(&mut self) -> Result<Option<TcpStream>, TransportError> {
        match TcpListener::accept(self) {
            Ok((stream, addr)) => {
                trace!("Accepted TCP connection from {}", addr);
                stream.set_nonblocking(false)?;
                Ok(Some(stream))
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(TransportError::Io(e)),
        }
    }
}

/// Open a TCP connection to `host:port`.
pub fn connect(host: &str, port: u16) -> Result<TcpStream, SeclinkError> {
    let stream = TcpStream::connect((host, port))?;
    stream.set_nodelay(true)?;
    debug!("Connected to {}:{}", host, port);
    Ok(stream)
}

#[derive(Debug, Default)]
struct Pipe {
    data: VecDeque<u8>,
    closed: bool,
}

#[derive(Debug, Default)]
struct Wire {
    pipes: [Pipe; 2],
}

/// One end of an in-memory transport pair.
///
/// Test hooks allow limiting how many bytes move per call, injecting
/// would-blocks and flipping bits of outgoing bytes.
#[derive(Debug)]
pub struct MemoryTransport {
    wire: Arc<Mutex<Wire>>,
    side: usize,
    chunk_limit: Option<usize>,
    would_block: usize,
    sent: u64,
    corrupt: Option<(u64, u8)>,
}

impl MemoryTransport {
    /// Two connected ends.
    pub fn pair() -> (MemoryTransport, MemoryTransport) {
        let wire = Arc::new(Mutex::new(Wire::default()));
        let end = |side| MemoryTransport {
            wire: wire.clone(),
            side,
            chunk_limit: None,
            would_block: 0,
            sent: 0,
            corrupt: None,
        };
        (end(0), end(1))
    }

    /// Move at most `limit` bytes per send/recv call.
    pub fn set_chunk_limit(&mut self, limit: Option<usize>) {
        self.chunk_limit = limit.map(|l| l.max(1));
    }

    /// Make the next `count` send/recv calls report `WouldBlock`.
    pub fn inject_would_block(&mut self, count: usize) {
        self.would_block += count;
    }

    /// XOR `mask` into the outgoing byte at stream offset `offset`.
    pub fn corrupt_outgoing(&mut self, offset: u64, mask: u8) {
        self.corrupt = Some((offset, mask));
    }

    /// Total bytes sent from this end.
    pub fn sent_bytes(&self) -> u64 {
        self.sent
    }

    /// Copy of the bytes waiting to be received by this end.
    pub fn peek_inbound(&self) -> Vec<u8> {
        let wire = self.lock();
        wire.pipes[1 - self.side].data.iter().copied().collect()
    }

    fn lock(&self) -> MutexGuard<'_, Wire> {
        self.wire.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn take_would_block(&mut self) -> bool {
        if self.would_block > 0 {
            self.would_block -= 1;
            true
        } else {
            false
        }
    }
}

impl Transport for MemoryTransport {
    fn send(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        if self.take_would_block() {
            return Err(TransportError::WouldBlock);
        }

        let n = data.len().min(self.chunk_limit.unwrap_or(usize::MAX));
        let start = self.sent;
        let corrupt = self.corrupt;

        let mut wire = self.lock();
        let pipe = &mut wire.pipes[self.side];
        if pipe.closed {
            return Err(TransportError::Closed);
        }

        for (i, byte) in data[..n].iter().enumerate() {
            let offset = start + i as u64;
            let byte = match corrupt {
                Some((at, mask)) if at == offset => byte ^ mask,
                _ => *byte,
            };
            pipe.data.push_back(byte);
        }
        drop(wire);

        self.sent += n as u64;
        Ok(n)
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if self.take_would_block() {
            return Err(TransportError::WouldBlock);
        }

        let limit = buf.len().min(self.chunk_limit.unwrap_or(usize::MAX));
        let mut wire = self.lock();
        let pipe = &mut wire.pipes[1 - self.side];

        if pipe.data.is_empty() {
            return Err(if pipe.closed {
                TransportError::Closed
            } else {
                TransportError::WouldBlock
            });
        }

        let n = limit.min(pipe.data.len());
        for (slot, byte) in buf.iter_mut().zip(pipe.data.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn close(&mut self) {
        let mut wire = self.lock();
        wire.pipes[0].closed = true;
        wire.pipes[1].closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_flow_both_ways() {
        let (mut a, mut b) = MemoryTransport::pair();
        assert_eq!(a.send(b"ping").unwrap(), 4);
        assert_eq!(b.send(b"pong").unwrap(), 4);

        let mut buf = [0u8; 16];
        assert_eq!(b.recv(&mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], b"ping");
        assert_eq!(a.recv(&mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], b"pong");

        assert!(matches!(a.recv(&mut buf), Err(TransportError::WouldBlock)));
    }

    #[test]
    fn chunk_limit_and_would_block() {
        let (mut a, mut b) = MemoryTransport::pair();
        a.set_chunk_limit(Some(1));
        a.inject_would_block(2);

        assert!(matches!(a.send(b"xy"), Err(TransportError::WouldBlock)));
        assert!(matches!(a.send(b"xy"), Err(TransportError::WouldBlock)));
        assert_eq!(a.send(b"xy").unwrap(), 1);
        assert_eq!(a.sent_bytes(), 1);
        assert_eq!(b.peek_inbound(), b"x");
    }

    #[test]
    fn corruption_hits_one_offset() {
        let (mut a, b) = MemoryTransport::pair();
        a.corrupt_outgoing(2, 0xFF);
        a.send(&[0, 0]).unwrap();
        a.send(&[0, 0]).unwrap();
        assert_eq!(b.peek_inbound(), [0, 0, 0xFF, 0]);
    }

    #[test]
    fn close_drains_then_reports_closed() {
        let (mut a, mut b) = MemoryTransport::pair();
        a.send(b"last").unwrap();
        a.close();

        let mut buf = [0u8; 8];
        assert_eq!(b.recv(&mut buf).unwrap(), 4);
        assert!(matches!(b.recv(&mut buf), Err(TransportError::Closed)));
        assert!(matches!(b.send(b"x"), Err(TransportError::Closed)));
    }
}
