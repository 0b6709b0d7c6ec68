use crate::crypto::prf;
use crate::message::{AlertDescription, Body, CertificateMsg, CertificateVerify, Finished};
use crate::Error;

use super::{certificate_verify_input, HandshakeState, Phase};

impl HandshakeState {
    pub(super) fn server_send_hello(&mut self) -> Result<Phase, Error> {
        let identity = self.identity.clone().ok_or(Error::NoServerIdentity)?;

        let hello = self.queue_hello()?;
        self.transcript.set_server_hello(hello);

        let der = identity.certificate().der();
        let certificate = self.queue_message(Body::Certificate(CertificateMsg::new(der)));
        self.transcript.set_certificate(certificate);

        Ok(Phase::AwaitingPeerHello)
    }

    pub(super) fn server_await_peer_hello(&mut self, bytes: Vec<u8>) -> Result<Phase, Error> {
        let msg = self.parse_message(&bytes)?;
        debug!("{} recv {:?}", self.role, msg.msg_type());

        match &msg.body {
            Body::Hello(hello) => {
                self.accept_hello(hello)?;
                self.transcript.set_client_hello(bytes.clone());
                Ok(Phase::KeyExchange)
            }
            _ => Err(self.unexpected(&msg)),
        }
    }

    pub(super) fn server_key_exchange(&mut self) -> Result<Phase, Error> {
        let identity = self.identity.clone().ok_or(Error::NoServerIdentity)?;
        let transcript_hash = self.derive_session()?;

        let key_pair = identity.key_pair();
        let signature = key_pair
            .sign(&certificate_verify_input(&transcript_hash))
            .map_err(Error::HandshakeFailed)?;
        let scheme = key_pair.signature_scheme().as_u16();
        let cv = self.queue_message(Body::CertificateVerify(CertificateVerify::new(
            scheme, &signature,
        )));
        self.transcript.set_certificate_verify(cv);

        let transcript_hash = self.transcript.hash_with_verify()?;
        let verify_data = prf::finished(self.master()?, "server finished", &transcript_hash)
            .map_err(Error::HandshakeFailed)?;
        self.queue_message(Body::Finished(Finished::new(&verify_data)));

        Ok(Phase::AwaitingFinished)
    }

    pub(super) fn server_await_finished(&mut self, bytes: Vec<u8>) -> Result<Phase, Error> {
        let msg = self.parse_message(&bytes)?;
        debug!("{} recv {:?}", self.role, msg.msg_type());

        match &msg.body {
            Body::Finished(finished) => {
                let transcript_hash = self.transcript.hash_key_exchange()?;
                let verified = prf::verify_finished(
                    self.master()?,
                    "client finished",
                    &transcript_hash,
                    finished.verify_data,
                );
                if let Err(e) = verified {
                    return Err(self.fail(AlertDescription::DecryptError, Error::HandshakeFailed(e)));
                }
                Ok(Phase::Established)
            }
            _ => Err(self.unexpected(&msg)),
        }
    }
}
