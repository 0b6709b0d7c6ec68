//! Byte buffers sitting between a [`Transport`] and the protocol.
//!
//! [`Outbound`] holds serialized records until the transport takes them and
//! [`Inbound`] holds received bytes until a full record has arrived. Both keep
//! a read offset so partial progress never copies or re-sends data.

use std::fmt;

use crate::transport::{Transport, TransportError};

/// Size of a single transport read.
const READ_CHUNK: usize = 4096;

/// Bytes queued for sending, front first.
#[derive(Default)]
pub(crate) struct Outbound {
    buf: Vec<u8>,
    pos: usize,
}

impl Outbound {
    /// Buffer to serialize new output into.
    pub fn queue(&mut self) -> &mut Vec<u8> {
        self.compact();
        &mut self.buf
    }

    pub fn is_empty(&self) -> bool {
        self.pos == self.buf.len()
    }

    pub fn len(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Send as much as the transport takes.
    ///
    /// Returns `true` once everything queued has been sent.
    pub fn flush<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<bool, TransportError> {
        while !self.is_empty() {
            match transport.send(&self.buf[self.pos..]) {
                Ok(n) => {
                    trace!("Sent {} bytes", n);
                    self.pos += n;
                }
                Err(TransportError::WouldBlock) => return Ok(false),
                Err(e) => return Err(e),
            }
        }
        self.buf.clear();
        self.pos = 0;
        Ok(true)
    }

    fn compact(&mut self) {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
    }
}

impl fmt::Debug for Outbound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Outbound").field("pending", &self.len()).finish()
    }
}

/// Received bytes not yet consumed.
#[derive(Default)]
pub(crate) struct Inbound {
    buf: Vec<u8>,
    pos: usize,
}

impl Inbound {
    pub fn from_vec(buf: Vec<u8>) -> Self {
        Inbound { buf, pos: 0 }
    }

    pub fn data(&self) -> &[u8] {
        &self.buf[self.pos..]
    }

    pub fn is_empty(&self) -> bool {
        self.pos == self.buf.len()
    }

    pub fn consume(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.buf.len());
        if self.pos == self.buf.len() {
            self.buf.clear();
            self.pos = 0;
        }
    }

    /// One read from the transport appended to the buffer.
    pub fn fill<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<usize, TransportError> {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }

        let start = self.buf.len();
        self.buf.resize(start + READ_CHUNK, 0);

        match transport.recv(&mut self.buf[start..]) {
            Ok(n) => {
                self.buf.truncate(start + n);
                trace!("Received {} bytes", n);
                Ok(n)
            }
            Err(e) => {
                self.buf.truncate(start);
                Err(e)
            }
        }
    }

    /// Everything not yet consumed, leaving the buffer empty.
    pub fn take_remaining(&mut self) -> Vec<u8> {
        let rest = self.buf.split_off(self.pos);
        self.buf.clear();
        self.pos = 0;
        rest
    }
}

impl fmt::Debug for Inbound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inbound")
            .field("pending", &self.data().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;

    #[test]
    fn partial_flush_resumes() {
        let (mut a, b) = MemoryTransport::pair();
        a.set_chunk_limit(Some(3));

        let mut out = Outbound::default();
        out.queue().extend_from_slice(b"abcdefg");

        a.inject_would_block(1);
        assert!(!out.flush(&mut a).unwrap());
        assert_eq!(out.len(), 7);

        assert!(out.flush(&mut a).unwrap());
        assert!(out.is_empty());
        assert_eq!(b.peek_inbound(), b"abcdefg");
    }

    #[test]
    fn inbound_consume_and_take() {
        let (mut a, mut b) = MemoryTransport::pair();
        a.send(b"hello world").unwrap();

        let mut inbound = Inbound::default();
        assert_eq!(inbound.fill(&mut b).unwrap(), 11);
        inbound.consume(6);
        assert_eq!(inbound.data(), b"world");

        assert!(matches!(inbound.fill(&mut b), Err(TransportError::WouldBlock)));
        assert_eq!(inbound.data(), b"world");

        assert_eq!(inbound.take_remaining(), b"world");
        assert!(inbound.is_empty());
    }
}
