// Handshake flow. Both peers walk the same phases and send their Hello
// without waiting for the peer:
//
// 1. Client sends Hello.                 Server sends Hello, Certificate.
// 2. Client reads Hello, Certificate.    Server reads Hello.
// 3. Both compute master = PRF(x25519, "master secret", H(CH || SH || Cert)).
//    Client sends Finished.              Server sends CertificateVerify, Finished.
// 4. Client reads CertificateVerify and Finished.
//                                        Server reads Finished.
//
// All handshake records are plaintext. The transcript is assembled in
// ClientHello, ServerHello, Certificate order regardless of arrival order.

use std::fmt;
use std::sync::Arc;

use zeroize::{Zeroize, Zeroizing};

use crate::buffer::{Inbound, Outbound};
use crate::certificate::{Certificate, ServerIdentity};
use crate::config::{Config, MAX_RECORD_SIZE};
use crate::crypto::{prf, KeyExchange, HASH_LEN, KEY_SHARE_LEN};
use crate::message::{
    self, Alert, AlertDescription, ContentType, Hello, ProtocolVersion, Random, Record,
    RecordHeader, HANDSHAKE_HEADER_LEN,
};
use crate::session::Session;
use crate::transport::{Direction, Transport, TransportError};
use crate::Error;

mod client;
mod server;
mod transcript;

use transcript::Transcript;

/// Prefix of the data signed in CertificateVerify.
const CERTIFICATE_VERIFY_CONTEXT: &[u8] = b"seclink certificate verify\0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Client => write!(f, "client"),
            Role::Server => write!(f, "server"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    SendingHello,
    AwaitingPeerHello,
    KeyExchange,
    AwaitingFinished,
    Established,
    Aborted,
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Idle => "Idle",
            Phase::SendingHello => "SendingHello",
            Phase::AwaitingPeerHello => "AwaitingPeerHello",
            Phase::KeyExchange => "KeyExchange",
            Phase::AwaitingFinished => "AwaitingFinished",
            Phase::Established => "Established",
            Phase::Aborted => "Aborted",
        }
    }
}

/// Outcome of one resumable step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Something happened. Call again.
    Progress,
    /// Nothing can happen until the transport is ready in this direction.
    WouldBlock(Direction),
    /// Finished.
    Done,
}

/// Per-connection handshake state machine.
///
/// Created fresh for every connection. Messages are generated exactly once
/// and buffered, so a step interrupted by a would-block resumes where it
/// stopped when called again.
pub struct HandshakeState {
    role: Role,
    phase: Phase,
    config: Arc<Config>,
    identity: Option<Arc<ServerIdentity>>,

    /// Serialized records not yet taken by the transport.
    out: Outbound,

    /// Received bytes not yet parsed into records.
    inbound: Inbound,

    /// Payload of handshake records not yet parsed into messages.
    handshake_bytes: Vec<u8>,

    /// Sequence numbers of plaintext handshake records.
    write_seq: u64,
    read_seq: u64,

    key_exchange: Option<KeyExchange>,
    local_random: Option<Random>,
    peer_random: Option<Random>,
    peer_key_share: Option<[u8; KEY_SHARE_LEN]>,
    peer_certificate: Option<Certificate>,
    transcript: Transcript,
    master: Option<Zeroizing<Vec<u8>>>,
    session: Option<Session>,

    /// Alert sent if the current error aborts the handshake.
    alert: Option<AlertDescription>,
    failure: Option<String>,
}

impl HandshakeState {
    pub fn client(config: Arc<Config>) -> HandshakeState {
        Self::new(Role::Client, config, None)
    }

    pub fn server(config: Arc<Config>, identity: Option<Arc<ServerIdentity>>) -> HandshakeState {
        Self::new(Role::Server, config, identity)
    }

    fn new(role: Role, config: Arc<Config>, identity: Option<Arc<ServerIdentity>>) -> Self {
        HandshakeState {
            role,
            phase: Phase::Idle,
            config,
            identity,
            out: Outbound::default(),
            inbound: Inbound::default(),
            handshake_bytes: Vec::new(),
            write_seq: 0,
            read_seq: 0,
            key_exchange: None,
            local_random: None,
            peer_random: None,
            peer_key_share: None,
            peer_certificate: None,
            transcript: Transcript::default(),
            master: None,
            session: None,
            alert: None,
            failure: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Certificate received from the server (client only).
    pub fn peer_certificate(&self) -> Option<&Certificate> {
        self.peer_certificate.as_ref()
    }

    /// Advance the handshake as far as one phase.
    ///
    /// Any error leaves the state machine in [`Phase::Aborted`] with a fatal
    /// alert queued for [`HandshakeState::flush_alert`].
    pub fn step<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<Step, Error> {
        match self.phase {
            Phase::Established => return Ok(Step::Done),
            Phase::Aborted => {
                let reason = self.failure.clone().unwrap_or_default();
                return Err(Error::HandshakeFailed(reason));
            }
            _ => {}
        }

        match self.advance(transport) {
            Ok(step) => Ok(step),
            Err(e) => {
                self.abort(&e);
                Err(e)
            }
        }
    }

    fn advance<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<Step, Error> {
        if !self.flush(transport)? {
            return Ok(Step::WouldBlock(Direction::Write));
        }

        let prev = self.phase;
        let next = match prev {
            Phase::Idle => self.start()?,
            Phase::SendingHello => match self.role {
                Role::Client => self.client_send_hello()?,
                Role::Server => self.server_send_hello()?,
            },
            Phase::AwaitingPeerHello => {
                let Some(bytes) = self.next_message(transport)? else {
                    return Ok(Step::WouldBlock(Direction::Read));
                };
                match self.role {
                    Role::Client => self.client_await_peer_hello(bytes)?,
                    Role::Server => self.server_await_peer_hello(bytes)?,
                }
            }
            Phase::KeyExchange => match self.role {
                Role::Client => self.client_key_exchange()?,
                Role::Server => self.server_key_exchange()?,
            },
            Phase::AwaitingFinished => {
                let Some(bytes) = self.next_message(transport)? else {
                    return Ok(Step::WouldBlock(Direction::Read));
                };
                match self.role {
                    Role::Client => self.client_await_finished(bytes)?,
                    Role::Server => self.server_await_finished(bytes)?,
                }
            }
            Phase::Established | Phase::Aborted => return Ok(Step::Done),
        };

        if next != prev {
            trace!("{} {} -> {}", self.role, prev.name(), next.name());
            self.phase = next;
        }

        if next == Phase::Established {
            self.established()?;
            return Ok(Step::Done);
        }

        Ok(Step::Progress)
    }

    fn start(&mut self) -> Result<Phase, Error> {
        if self.role == Role::Server && self.identity.is_none() {
            return Err(Error::NoServerIdentity);
        }

        self.key_exchange = Some(KeyExchange::new()?);
        self.local_random = Some(Random::new()?);

        debug!("Starting {} handshake", self.role);
        Ok(Phase::SendingHello)
    }

    fn established(&mut self) -> Result<(), Error> {
        if !self.handshake_bytes.is_empty() {
            return Err(Error::HandshakeFailed(
                "Trailing handshake data after Finished".into(),
            ));
        }

        self.key_exchange = None;
        self.master = None;
        self.transcript.zeroize();

        debug!("{} handshake complete", self.role);
        Ok(())
    }

    fn abort(&mut self, error: &Error) {
        let description = match error {
            Error::NoServerIdentity => AlertDescription::InternalError,
            _ => self.alert.take().unwrap_or(AlertDescription::HandshakeFailure),
        };

        warn!(
            "{} handshake aborted in {}: {}",
            self.role,
            self.phase.name(),
            error
        );

        self.phase = Phase::Aborted;
        self.failure = Some(error.to_string());

        self.key_exchange = None;
        self.master = None;
        self.session = None;
        self.transcript.zeroize();
        self.handshake_bytes.zeroize();

        let mut body = Vec::with_capacity(2);
        Alert::fatal(description).serialize(&mut body);
        self.queue_plaintext(ContentType::Alert, &body);
    }

    /// Tag `error` with the alert to send when it aborts the handshake.
    fn fail(&mut self, description: AlertDescription, error: Error) -> Error {
        self.alert = Some(description);
        error
    }

    /// Single attempt to push out whatever is pending, usually the alert
    /// queued when the handshake aborted.
    pub fn flush_alert<T: Transport + ?Sized>(&mut self, transport: &mut T) {
        if let Err(e) = self.out.flush(transport) {
            trace!("Alert not delivered: {}", e);
        }
    }

    /// Hand over the negotiated session and any bytes received past the
    /// final handshake message.
    pub fn into_session(mut self) -> Result<(Session, Vec<u8>), Error> {
        if self.phase != Phase::Established {
            return Err(Error::HandshakeFailed(format!(
                "Handshake not established ({})",
                self.phase.name()
            )));
        }

        let session = self
            .session
            .take()
            .ok_or_else(|| Error::HandshakeFailed("No session negotiated".into()))?;

        Ok((session, self.inbound.take_remaining()))
    }

    fn flush<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<bool, Error> {
        match self.out.flush(transport) {
            Ok(done) => Ok(done),
            Err(TransportError::Closed) => Err(Error::HandshakeFailed(
                "Transport closed during handshake".into(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Serialize a handshake message into one or more records.
    ///
    /// Returns the message bytes for the transcript.
    fn queue_message(&mut self, body: message::Body) -> Vec<u8> {
        let msg = message::Handshake::new(body);
        debug!("{} send {:?}", self.role, msg.msg_type());

        let mut bytes = Vec::new();
        msg.serialize(&mut bytes);

        for chunk in bytes.chunks(self.config.record_size()) {
            self.queue_plaintext(ContentType::Handshake, chunk);
        }

        bytes
    }

    fn queue_plaintext(&mut self, content_type: ContentType, payload: &[u8]) {
        let header = RecordHeader {
            content_type,
            version: ProtocolVersion::V1_0,
            sequence: self.write_seq,
            length: payload.len() as u16,
        };
        self.write_seq += 1;

        Record {
            header,
            fragment: payload,
        }
        .serialize(self.out.queue());
    }

    /// Next complete handshake message, `None` if more input is needed.
    fn next_message<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
    ) -> Result<Option<Vec<u8>>, Error> {
        loop {
            if let Some(len) = message::Handshake::frame_len(&self.handshake_bytes) {
                let body_len = len - HANDSHAKE_HEADER_LEN;
                if body_len > self.config.max_handshake_message() {
                    return Err(Error::HandshakeFailed(format!(
                        "Handshake message of {} bytes exceeds limit of {}",
                        body_len,
                        self.config.max_handshake_message()
                    )));
                }

                if self.handshake_bytes.len() >= len {
                    let rest = self.handshake_bytes.split_off(len);
                    let bytes = std::mem::replace(&mut self.handshake_bytes, rest);
                    return Ok(Some(bytes));
                }
            }

            if !self.next_record(transport)? {
                return Ok(None);
            }
        }
    }

    /// Read one record and append its payload to the handshake bytes.
    fn next_record<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<bool, Error> {
        loop {
            if let Some(len) = Record::frame_len(self.inbound.data()) {
                if len - message::RECORD_HEADER_LEN > MAX_RECORD_SIZE {
                    return Err(Error::HandshakeFailed(format!(
                        "Record of {} bytes exceeds limit",
                        len
                    )));
                }

                if self.inbound.data().len() >= len {
                    let (header, payload) = {
                        match Record::parse(&self.inbound.data()[..len]) {
                            Ok((_, record)) => (record.header, record.fragment.to_vec()),
                            Err(e) => {
                                let e = Error::HandshakeFailed(format!("Bad record: {}", e));
                                return Err(self.fail(AlertDescription::DecodeError, e));
                            }
                        }
                    };
                    self.inbound.consume(len);
                    self.accept_record(header, payload)?;
                    return Ok(true);
                }
            }

            match self.inbound.fill(transport) {
                Ok(_) => {}
                Err(TransportError::WouldBlock) => return Ok(false),
                Err(TransportError::Closed) => {
                    return Err(Error::HandshakeFailed(
                        "Transport closed during handshake".into(),
                    ))
                }
                Err(TransportError::Io(e)) => return Err(Error::Transport(e)),
            }
        }
    }

    fn accept_record(&mut self, header: RecordHeader, payload: Vec<u8>) -> Result<(), Error> {
        if header.version != ProtocolVersion::V1_0 {
            let e = Error::HandshakeFailed(format!(
                "Unsupported record version {:?}",
                header.version
            ));
            return Err(self.fail(AlertDescription::ProtocolVersion, e));
        }

        if header.sequence != self.read_seq {
            let e = Error::HandshakeFailed(format!(
                "Unexpected record sequence {} (expected {})",
                header.sequence, self.read_seq
            ));
            return Err(self.fail(AlertDescription::UnexpectedMessage, e));
        }
        self.read_seq += 1;

        match header.content_type {
            ContentType::Handshake => {
                self.handshake_bytes.extend_from_slice(&payload);
                Ok(())
            }
            ContentType::Alert => match Alert::parse(&payload) {
                Ok((_, alert)) => Err(Error::HandshakeFailed(format!(
                    "Peer sent alert {:?}",
                    alert.description
                ))),
                Err(_) => {
                    let e = Error::HandshakeFailed("Malformed alert".into());
                    Err(self.fail(AlertDescription::DecodeError, e))
                }
            },
            other => {
                let e = Error::HandshakeFailed(format!(
                    "Unexpected {:?} record during handshake",
                    other
                ));
                Err(self.fail(AlertDescription::UnexpectedMessage, e))
            }
        }
    }

    fn local_random(&self) -> Result<Random, Error> {
        self.local_random
            .ok_or_else(|| Error::HandshakeFailed("Local random not generated".into()))
    }

    fn hello_body(&self) -> Result<(Random, [u8; KEY_SHARE_LEN]), Error> {
        let random = self.local_random()?;
        let kx = self
            .key_exchange
            .as_ref()
            .ok_or_else(|| Error::HandshakeFailed("Key exchange not started".into()))?;

        let mut share = [0u8; KEY_SHARE_LEN];
        share.copy_from_slice(kx.public_key());
        Ok((random, share))
    }

    /// Queue our Hello and return its bytes.
    fn queue_hello(&mut self) -> Result<Vec<u8>, Error> {
        let (random, share) = self.hello_body()?;
        let suite = self.config.cipher_suite().id();
        let hello = Hello::new(ProtocolVersion::V1_0, random, suite, &share);
        Ok(self.queue_message(message::Body::Hello(hello)))
    }

    /// Validate the peer Hello and keep its random and key share.
    fn accept_hello(&mut self, hello: &Hello) -> Result<(), Error> {
        if hello.version != ProtocolVersion::V1_0 {
            let e = Error::HandshakeFailed(format!(
                "Unsupported protocol version {:?}",
                hello.version
            ));
            return Err(self.fail(AlertDescription::ProtocolVersion, e));
        }

        let suite = self.config.cipher_suite();
        if hello.cipher_suite != suite.id() {
            return Err(Error::HandshakeFailed(format!(
                "Peer cipher suite {:#06x} does not match {}",
                hello.cipher_suite,
                suite.name()
            )));
        }

        let Ok(share) = <[u8; KEY_SHARE_LEN]>::try_from(hello.key_share) else {
            let e = Error::HandshakeFailed(format!(
                "Bad key share length {}",
                hello.key_share.len()
            ));
            return Err(self.fail(AlertDescription::DecodeError, e));
        };

        self.peer_random = Some(hello.random);
        self.peer_key_share = Some(share);
        Ok(())
    }

    /// Compute the shared secret, the master secret and the session.
    ///
    /// Returns the key exchange transcript hash.
    fn derive_session(&mut self) -> Result<[u8; HASH_LEN], Error> {
        let transcript_hash = self.transcript.hash_key_exchange()?;

        let peer_share = self
            .peer_key_share
            .ok_or_else(|| Error::HandshakeFailed("No peer key share".into()))?;
        let kx = self
            .key_exchange
            .as_mut()
            .ok_or_else(|| Error::HandshakeFailed("Key exchange not started".into()))?;
        let shared = kx
            .compute_shared_secret(&peer_share)
            .map_err(Error::HandshakeFailed)?;

        let master =
            prf::master_secret(&*shared, &transcript_hash).map_err(Error::HandshakeFailed)?;

        let local = self.local_random()?;
        let peer = self
            .peer_random
            .ok_or_else(|| Error::HandshakeFailed("No peer random".into()))?;
        let (client_random, server_random) = match self.role {
            Role::Client => (local, peer),
            Role::Server => (peer, local),
        };

        let session = Session::derive(
            self.role,
            self.config.cipher_suite(),
            master.clone(),
            client_random,
            server_random,
            self.peer_certificate.clone(),
        )
        .map_err(Error::HandshakeFailed)?;

        self.master = Some(master);
        self.session = Some(session);
        // The ephemeral secret was consumed, drop the shell.
        self.key_exchange = None;

        Ok(transcript_hash)
    }

    fn unexpected(&mut self, msg: &message::Handshake) -> Error {
        let e = Error::HandshakeFailed(format!(
            "{} got unexpected {:?} in {}",
            self.role,
            msg.msg_type(),
            self.phase.name()
        ));
        self.fail(AlertDescription::UnexpectedMessage, e)
    }

    fn parse_message<'b>(&mut self, bytes: &'b [u8]) -> Result<message::Handshake<'b>, Error> {
        match message::Handshake::parse(bytes) {
            Ok((rest, msg)) => {
                debug_assert!(rest.is_empty());
                Ok(msg)
            }
            Err(e) => {
                let e = Error::HandshakeFailed(format!("Malformed handshake message: {}", e));
                Err(self.fail(AlertDescription::DecodeError, e))
            }
        }
    }

    fn master(&self) -> Result<&[u8], Error> {
        self.master
            .as_deref()
            .map(|m| m.as_slice())
            .ok_or_else(|| Error::HandshakeFailed("No master secret".into()))
    }
}

impl fmt::Debug for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeState")
            .field("role", &self.role)
            .field("phase", &self.phase)
            .field("out", &self.out)
            .field("inbound", &self.inbound)
            .finish()
    }
}

/// The data a CertificateVerify signature covers.
fn certificate_verify_input(transcript_hash: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(CERTIFICATE_VERIFY_CONTEXT.len() + transcript_hash.len());
    data.extend_from_slice(CERTIFICATE_VERIFY_CONTEXT);
    data.extend_from_slice(transcript_hash);
    data
}
