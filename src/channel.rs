//! Encrypted record channel used once the handshake is established.
//!
//! Every record carries the next sequence number of its direction and is
//! sealed with the session's AEAD. A record that fails to authenticate
//! poisons the channel: no plaintext from it is returned and every later call
//! fails.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::buffer::{Inbound, Outbound};
use crate::config::{Config, MAX_RECORD_SIZE};
use crate::handshake::Step;
use crate::message::{Alert, AlertDescription, ContentType, Record, RECORD_HEADER_LEN};
use crate::session::Session;
use crate::transport::{Direction, Transport, TransportError};
use crate::Error;

/// Result of [`SecureChannel::read`].
#[derive(Debug, PartialEq, Eq)]
pub enum Received {
    /// Decrypted application data, never empty.
    Data(Vec<u8>),
    /// No complete record available right now.
    WouldBlock,
    /// The peer sent close_notify, or closed the transport at a record boundary.
    EndOfStream,
}

pub struct SecureChannel {
    config: Arc<Config>,
    session: Session,
    out: Outbound,
    inbound: Inbound,
    /// Decrypted data not yet handed to the caller.
    pending: VecDeque<u8>,
    end_of_stream: bool,
    close_sent: bool,
    poisoned: Option<String>,
}

impl SecureChannel {
    /// Channel over `session`. `leftover` are bytes already received past the
    /// end of the handshake.
    pub fn new(config: Arc<Config>, session: Session, leftover: Vec<u8>) -> SecureChannel {
        SecureChannel {
            config,
            session,
            out: Outbound::default(),
            inbound: Inbound::from_vec(leftover),
            pending: VecDeque::new(),
            end_of_stream: false,
            close_sent: false,
            poisoned: None,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Encrypt `plaintext` into records of at most `record_size` bytes and
    /// send as much as the transport takes.
    ///
    /// Returns the number of plaintext bytes accepted, always all of them.
    /// Anything the transport did not take is sent by [`SecureChannel::flush`].
    pub fn write<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        plaintext: &[u8],
    ) -> Result<usize, Error> {
        self.check_poisoned(Error::RecordWriteFailed)?;
        if self.close_sent {
            return Err(Error::RecordWriteFailed("Write after close_notify".into()));
        }

        let result = self.seal_all(plaintext);
        if let Err(e) = result {
            return Err(self.poison(Error::RecordWriteFailed(e)));
        }

        self.flush_out(transport)?;
        Ok(plaintext.len())
    }

    fn seal_all(&mut self, plaintext: &[u8]) -> Result<(), String> {
        let record_size = self.config.record_size();

        if plaintext.is_empty() {
            return self
                .session
                .seal(ContentType::ApplicationData, &[], self.out.queue());
        }

        for chunk in plaintext.chunks(record_size) {
            self.session
                .seal(ContentType::ApplicationData, chunk, self.out.queue())?;
        }
        trace!(
            "Sealed {} bytes, next write sequence {}",
            plaintext.len(),
            self.session.write_sequence()
        );
        Ok(())
    }

    /// Push buffered records to the transport.
    pub fn flush<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<Step, Error> {
        self.check_poisoned(Error::RecordWriteFailed)?;
        if self.flush_out(transport)? {
            Ok(Step::Done)
        } else {
            Ok(Step::WouldBlock(Direction::Write))
        }
    }

    fn flush_out<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<bool, Error> {
        match self.out.flush(transport) {
            Ok(done) => Ok(done),
            Err(e) => {
                let e = match e {
                    TransportError::Closed => Error::TransportClosed,
                    e => Error::RecordWriteFailed(e.to_string()),
                };
                Err(self.poison(e))
            }
        }
    }

    /// Read up to `max_len` bytes of application data.
    ///
    /// A `max_len` of zero consumes nothing and returns
    /// [`Received::WouldBlock`], or [`Received::EndOfStream`] once the stream
    /// has ended.
    pub fn read<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        max_len: usize,
    ) -> Result<Received, Error> {
        self.check_poisoned(Error::RecordReadFailed)?;

        if max_len == 0 {
            if self.is_end_of_stream() {
                return Ok(Received::EndOfStream);
            }
            return Ok(Received::WouldBlock);
        }

        loop {
            if !self.pending.is_empty() {
                let n = max_len.min(self.pending.len());
                let data: Vec<u8> = self.pending.drain(..n).collect();
                return Ok(Received::Data(data));
            }

            if self.end_of_stream {
                return Ok(Received::EndOfStream);
            }

            match self.read_record(transport) {
                Ok(true) => {}
                Ok(false) => return Ok(Received::WouldBlock),
                Err(e) => return Err(self.poison(e)),
            }
        }
    }

    /// Read and open one record. `false` if more input is needed.
    fn read_record<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<bool, Error> {
        loop {
            if let Some(len) = Record::frame_len(self.inbound.data()) {
                if len - RECORD_HEADER_LEN > MAX_RECORD_SIZE + self.session.cipher_suite().tag_len()
                {
                    return Err(Error::RecordReadFailed(format!(
                        "Record of {} bytes exceeds limit",
                        len
                    )));
                }

                if self.inbound.data().len() >= len {
                    let result = match Record::parse(&self.inbound.data()[..len]) {
                        Ok((_, record)) => {
                            let content_type = record.header.content_type;
                            self.session
                                .open(&record.header, record.fragment)
                                .map(|plaintext| (content_type, plaintext))
                        }
                        Err(e) => {
                            let e = Error::RecordReadFailed(format!("Bad record: {}", e));
                            return Err(self.fatal(transport, AlertDescription::DecodeError, e));
                        }
                    };
                    self.inbound.consume(len);

                    let (content_type, plaintext) = match result {
                        Ok(opened) => opened,
                        Err(e) => {
                            let e = Error::RecordReadFailed(e);
                            return Err(self.fatal(transport, AlertDescription::BadRecordMac, e));
                        }
                    };
                    self.accept(transport, content_type, plaintext)?;
                    return Ok(true);
                }
            }

            match self.inbound.fill(transport) {
                Ok(_) => {}
                Err(TransportError::WouldBlock) => return Ok(false),
                Err(TransportError::Closed) => {
                    if self.inbound.is_empty() {
                        debug!("Transport closed at record boundary");
                        self.end_of_stream = true;
                        return Ok(true);
                    }
                    return Err(Error::RecordReadFailed(
                        "Transport closed inside a record".into(),
                    ));
                }
                Err(TransportError::Io(e)) => return Err(Error::Transport(e)),
            }
        }
    }

    fn accept<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        content_type: ContentType,
        plaintext: Vec<u8>,
    ) -> Result<(), Error> {
        match content_type {
            ContentType::ApplicationData => {
                trace!("Opened record with {} bytes", plaintext.len());
                self.pending.extend(plaintext);
                Ok(())
            }
            ContentType::Alert => {
                let Ok((_, alert)) = Alert::parse(&plaintext) else {
                    let e = Error::RecordReadFailed("Malformed alert".into());
                    return Err(self.fatal(transport, AlertDescription::DecodeError, e));
                };
                if alert.is_close_notify() {
                    debug!("Received close_notify");
                    self.end_of_stream = true;
                    Ok(())
                } else {
                    Err(Error::RecordReadFailed(format!(
                        "Peer sent alert {:?}",
                        alert.description
                    )))
                }
            }
            other => {
                let e = Error::RecordReadFailed(format!("Unexpected {:?} record", other));
                Err(self.fatal(transport, AlertDescription::UnexpectedMessage, e))
            }
        }
    }

    /// Seal a fatal alert and give it one send attempt before `error`
    /// poisons the channel. Delivery failures are ignored.
    fn fatal<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        description: AlertDescription,
        error: Error,
    ) -> Error {
        if self.close_sent {
            return error;
        }

        let mut body = Vec::with_capacity(2);
        Alert::fatal(description).serialize(&mut body);
        match self.session.seal(ContentType::Alert, &body, self.out.queue()) {
            Ok(()) => {
                if let Err(e) = self.out.flush(transport) {
                    trace!("Alert {:?} not delivered: {}", description, e);
                }
            }
            Err(e) => trace!("Alert {:?} not sealed: {}", description, e),
        }
        error
    }

    /// Send an encrypted close_notify. Only the first call queues it.
    pub fn close<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<Step, Error> {
        self.check_poisoned(Error::RecordWriteFailed)?;

        if !self.close_sent {
            let mut body = Vec::with_capacity(2);
            Alert::CLOSE_NOTIFY.serialize(&mut body);

            if let Err(e) = self.session.seal(ContentType::Alert, &body, self.out.queue()) {
                return Err(self.poison(Error::RecordWriteFailed(e)));
            }
            self.close_sent = true;
            debug!("Queued close_notify");
        }

        self.flush(transport)
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.end_of_stream && self.pending.is_empty()
    }

    fn check_poisoned(&self, wrap: fn(String) -> Error) -> Result<(), Error> {
        match &self.poisoned {
            Some(reason) => Err(wrap(format!("Channel failed earlier: {}", reason))),
            None => Ok(()),
        }
    }

    fn poison(&mut self, error: Error) -> Error {
        warn!("Record channel failed: {}", error);
        self.poisoned = Some(error.to_string());
        self.pending.clear();
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::session_pair;
    use crate::transport::MemoryTransport;

    fn channels(record_size: usize) -> (SecureChannel, SecureChannel) {
        let config = Arc::new(Config::builder().record_size(record_size).build().unwrap());
        let (c, s) = session_pair();
        (
            SecureChannel::new(config.clone(), c, Vec::new()),
            SecureChannel::new(config, s, Vec::new()),
        )
    }

    fn read_all(ch: &mut SecureChannel, t: &mut MemoryTransport) -> Vec<u8> {
        let mut out = Vec::new();
        while let Received::Data(d) = ch.read(t, usize::MAX).unwrap() {
            out.extend_from_slice(&d);
        }
        out
    }

    #[test]
    fn chunks_by_record_size() {
        let (mut c, mut s) = channels(16);
        let (mut ct, mut st) = MemoryTransport::pair();

        let data: Vec<u8> = (0..50).collect();
        assert_eq!(c.write(&mut ct, &data).unwrap(), 50);
        assert_eq!(c.session().write_sequence(), 4);

        assert_eq!(read_all(&mut s, &mut st), data);
        assert_eq!(s.session().read_sequence(), 4);
    }

    #[test]
    fn empty_write_is_one_record() {
        let (mut c, mut s) = channels(16);
        let (mut ct, mut st) = MemoryTransport::pair();

        c.write(&mut ct, &[]).unwrap();
        assert_eq!(c.session().write_sequence(), 1);
        assert_eq!(s.read(&mut st, 10).unwrap(), Received::WouldBlock);
        assert_eq!(s.session().read_sequence(), 1);
    }

    #[test]
    fn read_respects_max_len() {
        let (mut c, mut s) = channels(2048);
        let (mut ct, mut st) = MemoryTransport::pair();

        c.write(&mut ct, b"abcdef").unwrap();
        assert_eq!(s.read(&mut st, 4).unwrap(), Received::Data(b"abcd".to_vec()));
        assert_eq!(s.read(&mut st, 4).unwrap(), Received::Data(b"ef".to_vec()));
        assert_eq!(s.read(&mut st, 4).unwrap(), Received::WouldBlock);
    }

    #[test]
    fn zero_length_read_consumes_nothing() {
        let (mut c, mut s) = channels(2048);
        let (mut ct, mut st) = MemoryTransport::pair();

        c.write(&mut ct, b"abc").unwrap();
        assert_eq!(s.read(&mut st, 0).unwrap(), Received::WouldBlock);
        assert_eq!(s.session().read_sequence(), 0);

        assert_eq!(s.read(&mut st, 1).unwrap(), Received::Data(b"a".to_vec()));
        assert_eq!(s.read(&mut st, 0).unwrap(), Received::WouldBlock);
        assert_eq!(s.read(&mut st, 10).unwrap(), Received::Data(b"bc".to_vec()));

        c.close(&mut ct).unwrap();
        assert_eq!(s.read(&mut st, 10).unwrap(), Received::EndOfStream);
        assert_eq!(s.read(&mut st, 0).unwrap(), Received::EndOfStream);
    }

    #[test]
    fn close_notify_ends_stream() {
        let (mut c, mut s) = channels(2048);
        let (mut ct, mut st) = MemoryTransport::pair();

        c.write(&mut ct, b"bye").unwrap();
        assert_eq!(c.close(&mut ct).unwrap(), Step::Done);
        assert_eq!(c.close(&mut ct).unwrap(), Step::Done);
        assert_eq!(c.session().write_sequence(), 2);
        assert!(c.write(&mut ct, b"more").is_err());

        assert_eq!(s.read(&mut st, 100).unwrap(), Received::Data(b"bye".to_vec()));
        assert_eq!(s.read(&mut st, 100).unwrap(), Received::EndOfStream);
        assert!(s.is_end_of_stream());
    }

    #[test]
    fn tampered_record_poisons() {
        let (mut c, mut s) = channels(2048);
        let (mut ct, mut st) = MemoryTransport::pair();

        // Last byte of the tag of the first record.
        let wire_len = (RECORD_HEADER_LEN + 5 + 16) as u64;
        ct.corrupt_outgoing(wire_len - 1, 0x01);
        c.write(&mut ct, b"hello").unwrap();
        c.write(&mut ct, b"world").unwrap();

        assert!(matches!(
            s.read(&mut st, 100),
            Err(Error::RecordReadFailed(_))
        ));
        // Poisoned even though the next record is intact.
        assert!(matches!(
            s.read(&mut st, 100),
            Err(Error::RecordReadFailed(_))
        ));

        // The writer learns why.
        match c.read(&mut ct, 100) {
            Err(Error::RecordReadFailed(reason)) => {
                assert!(reason.contains("BadRecordMac"), "{}", reason)
            }
            other => panic!("expected alert, got {:?}", other),
        }
    }

    #[test]
    fn unexpected_record_type_is_answered() {
        let (mut c, mut s) = channels(2048);
        let (mut ct, mut st) = MemoryTransport::pair();

        // A handshake record sealed with valid keys is still not application data.
        let mut wire = Vec::new();
        c.session.seal(ContentType::Handshake, b"hi", &mut wire).unwrap();
        ct.send(&wire).unwrap();

        assert!(s.read(&mut st, 100).is_err());
        match c.read(&mut ct, 100) {
            Err(Error::RecordReadFailed(reason)) => {
                assert!(reason.contains("UnexpectedMessage"), "{}", reason)
            }
            other => panic!("expected alert, got {:?}", other),
        }
    }

    #[test]
    fn replayed_record_is_rejected() {
        let (mut c, mut s) = channels(2048);
        let (mut ct, mut st) = MemoryTransport::pair();

        c.write(&mut ct, b"once").unwrap();
        let wire = st.peek_inbound();
        assert_eq!(s.read(&mut st, 100).unwrap(), Received::Data(b"once".to_vec()));

        // Same bytes again, sequence 0 where 1 is expected.
        ct.send(&wire).unwrap();
        assert!(matches!(
            s.read(&mut st, 100),
            Err(Error::RecordReadFailed(_))
        ));
    }

    #[test]
    fn eof_at_boundary_and_inside_record() {
        let (mut c, mut s) = channels(2048);
        let (mut ct, mut st) = MemoryTransport::pair();
        c.write(&mut ct, b"data").unwrap();
        ct.close();
        assert_eq!(s.read(&mut st, 100).unwrap(), Received::Data(b"data".to_vec()));
        assert_eq!(s.read(&mut st, 100).unwrap(), Received::EndOfStream);

        let (mut c, s) = session_pair();
        let mut s = SecureChannel::new(Arc::new(Config::default()), s, Vec::new());
        let (mut ct, mut st) = MemoryTransport::pair();
        let mut wire = Vec::new();
        c.seal(ContentType::ApplicationData, b"truncated", &mut wire).unwrap();
        ct.send(&wire[..10]).unwrap();
        ct.close();
        assert!(matches!(
            s.read(&mut st, 100),
            Err(Error::RecordReadFailed(_))
        ));
    }

    #[test]
    fn sequence_overflow_is_fatal() {
        let (mut c, _s) = channels(2048);
        let (mut ct, _st) = MemoryTransport::pair();

        c.session.set_sequences(u64::MAX, 0);
        assert!(matches!(
            c.write(&mut ct, b"x"),
            Err(Error::RecordWriteFailed(_))
        ));
        assert!(c.write(&mut ct, b"x").is_err());
    }

    #[test]
    fn leftover_bytes_are_read_first() {
        let config = Arc::new(Config::default());
        let (mut c, s) = session_pair();
        let mut wire = Vec::new();
        c.seal(ContentType::ApplicationData, b"early", &mut wire).unwrap();

        let mut s = SecureChannel::new(config, s, wire);
        let (_ct, mut st) = MemoryTransport::pair();
        assert_eq!(s.read(&mut st, 100).unwrap(), Received::Data(b"early".to_vec()));
    }
}
