use std::sync::Arc;
use std::time::Instant;
use std::{fmt, io};

use crate::certificate::{Certificate, ServerIdentity};
use crate::channel::{Received, SecureChannel};
use crate::config::Config;
use crate::handshake::{HandshakeState, Phase, Role, Step};
use crate::session::KeyingMaterial;
use crate::transport::{Direction, Transport};
use crate::Error;

enum State {
    Handshaking(Box<HandshakeState>),
    Established(SecureChannel),
    Closed,
}

/// One secured connection over a transport.
///
/// Owns the transport, the handshake state and, once established, the
/// record channel. Nothing is shared with other connections except the
/// read-only config and server identity.
pub struct Connection<T: Transport> {
    transport: T,
    config: Arc<Config>,
    role: Role,
    state: State,
}

impl<T: Transport> Connection<T> {
    pub fn client(transport: T, config: Arc<Config>) -> Connection<T> {
        let handshake = HandshakeState::client(config.clone());
        Self::new(transport, config, Role::Client, handshake)
    }

    pub fn server(
        transport: T,
        config: Arc<Config>,
        identity: Option<Arc<ServerIdentity>>,
    ) -> Connection<T> {
        let handshake = HandshakeState::server(config.clone(), identity);
        Self::new(transport, config, Role::Server, handshake)
    }

    fn new(transport: T, config: Arc<Config>, role: Role, handshake: HandshakeState) -> Self {
        Connection {
            transport,
            config,
            role,
            state: State::Handshaking(Box::new(handshake)),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn phase(&self) -> Phase {
        match &self.state {
            State::Handshaking(hs) => hs.phase(),
            State::Established(_) => Phase::Established,
            State::Closed => Phase::Aborted,
        }
    }

    pub fn is_established(&self) -> bool {
        matches!(self.state, State::Established(_))
    }

    /// Certificate presented by the server, client side only.
    pub fn peer_certificate(&self) -> Option<&Certificate> {
        match &self.state {
            State::Handshaking(hs) => hs.peer_certificate(),
            State::Established(ch) => ch.session().peer_certificate(),
            State::Closed => None,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Run one handshake step.
    ///
    /// On failure the queued alert gets one send attempt and the transport is
    /// closed.
    pub fn poll_handshake(&mut self) -> Result<Step, Error> {
        let hs = match &mut self.state {
            State::Handshaking(hs) => hs,
            State::Established(_) => return Ok(Step::Done),
            State::Closed => return Err(Error::HandshakeFailed("Connection closed".into())),
        };

        match hs.step(&mut self.transport) {
            Ok(Step::Done) => {
                self.establish()?;
                Ok(Step::Done)
            }
            Ok(step) => Ok(step),
            Err(e) => {
                hs.flush_alert(&mut self.transport);
                self.close();
                Err(e)
            }
        }
    }

    fn establish(&mut self) -> Result<(), Error> {
        let State::Handshaking(hs) = std::mem::replace(&mut self.state, State::Closed) else {
            return Ok(());
        };

        let (session, leftover) = hs.into_session()?;
        debug!(
            "{} established with {}, {} bytes carried over",
            self.role,
            session.cipher_suite().name(),
            leftover.len()
        );
        self.state = State::Established(SecureChannel::new(self.config.clone(), session, leftover));
        Ok(())
    }

    /// Drive the handshake to completion, waiting on the transport whenever
    /// it cannot make progress.
    ///
    /// Gives up with a timeout once no progress has been made for the
    /// configured i/o timeout.
    pub fn complete_handshake(&mut self) -> Result<(), Error> {
        let mut last_progress = Instant::now();

        loop {
            match self.poll_handshake()? {
                Step::Done => return Ok(()),
                Step::Progress => last_progress = Instant::now(),
                Step::WouldBlock(direction) => {
                    self.check_stall(last_progress)?;
                    self.transport.wait(direction);
                }
            }
        }
    }

    fn check_stall(&mut self, last_progress: Instant) -> Result<(), Error> {
        if last_progress.elapsed() < self.config.io_timeout() {
            return Ok(());
        }
        warn!(
            "{} stalled for {:?} in {}",
            self.role,
            self.config.io_timeout(),
            self.phase().name()
        );
        self.close();
        Err(Error::Transport(io::Error::new(
            io::ErrorKind::TimedOut,
            "No progress within i/o timeout",
        )))
    }

    /// Encrypt and send all of `data`, completing the handshake first if
    /// needed.
    pub fn write_all(&mut self, data: &[u8]) -> Result<(), Error> {
        self.complete_handshake()?;

        let ch = match &mut self.state {
            State::Established(ch) => ch,
            _ => return Err(Error::TransportClosed),
        };
        ch.write(&mut self.transport, data)?;
        self.flush()
    }

    /// Block until every queued record is sent.
    pub fn flush(&mut self) -> Result<(), Error> {
        let mut last_progress = Instant::now();
        loop {
            let ch = match &mut self.state {
                State::Established(ch) => ch,
                _ => return Err(Error::TransportClosed),
            };
            match ch.flush(&mut self.transport)? {
                Step::WouldBlock(direction) => {
                    self.check_stall(last_progress)?;
                    self.transport.wait(direction);
                }
                Step::Progress => last_progress = Instant::now(),
                Step::Done => return Ok(()),
            }
        }
    }

    /// One non-blocking read attempt of up to `max_len` bytes.
    pub fn poll_read(&mut self, max_len: usize) -> Result<Received, Error> {
        match &mut self.state {
            State::Established(ch) => ch.read(&mut self.transport, max_len),
            State::Handshaking(_) => Err(Error::HandshakeFailed("Handshake not complete".into())),
            State::Closed => Err(Error::TransportClosed),
        }
    }

    /// Block until data arrives. `None` at end of stream.
    ///
    /// A `max_len` of zero returns an empty buffer straight away.
    pub fn read(&mut self, max_len: usize) -> Result<Option<Vec<u8>>, Error> {
        self.complete_handshake()?;

        if max_len == 0 {
            return match self.poll_read(0)? {
                Received::EndOfStream => Ok(None),
                _ => Ok(Some(Vec::new())),
            };
        }

        let since = Instant::now();
        loop {
            match self.poll_read(max_len)? {
                Received::Data(data) => return Ok(Some(data)),
                Received::EndOfStream => return Ok(None),
                Received::WouldBlock => {
                    self.check_stall(since)?;
                    self.transport.wait(Direction::Read);
                }
            }
        }
    }

    /// Read until end of stream. More than `limit` bytes is an error.
    pub fn read_to_end(&mut self, limit: usize) -> Result<Vec<u8>, Error> {
        let mut out = Vec::new();
        while let Some(data) = self.read(self.config.record_size())? {
            if out.len() + data.len() > limit {
                self.close();
                return Err(Error::RecordReadFailed(format!(
                    "Peer sent more than {} bytes",
                    limit
                )));
            }
            out.extend_from_slice(&data);
        }
        Ok(out)
    }

    /// Send close_notify and wait until it has left.
    pub fn shutdown(&mut self) -> Result<(), Error> {
        let mut last_progress = Instant::now();
        loop {
            let ch = match &mut self.state {
                State::Established(ch) => ch,
                _ => return Err(Error::TransportClosed),
            };
            match ch.close(&mut self.transport)? {
                Step::Done => return Ok(()),
                Step::Progress => last_progress = Instant::now(),
                Step::WouldBlock(direction) => {
                    self.check_stall(last_progress)?;
                    self.transport.wait(direction);
                }
            }
        }
    }

    /// Export keying material from the established session.
    pub fn export_keying_material(&self, label: &str, len: usize) -> Result<KeyingMaterial, Error> {
        match &self.state {
            State::Established(ch) => ch.session().export_keying_material(label, len),
            _ => Err(Error::HandshakeFailed("Handshake not complete".into())),
        }
    }

    /// Close the transport and drop all session state. Idempotent.
    pub fn close(&mut self) {
        if !matches!(self.state, State::Closed) {
            trace!("{} closing connection", self.role);
        }
        self.state = State::Closed;
        self.transport.close();
    }
}

impl<T: Transport> Drop for Connection<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T: Transport> fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("role", &self.role)
            .field("phase", &self.phase())
            .finish()
    }
}
