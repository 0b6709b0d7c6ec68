use std::time::SystemTime;

use crate::certificate::Certificate;
use crate::config::PeerVerification;
use crate::crypto::{prf, SignatureScheme};
use crate::message::{self, AlertDescription, Body, Finished};
use crate::Error;

use super::{certificate_verify_input, HandshakeState, Phase};

impl HandshakeState {
    pub(super) fn client_send_hello(&mut self) -> Result<Phase, Error> {
        let hello = self.queue_hello()?;
        self.transcript.set_client_hello(hello);
        Ok(Phase::AwaitingPeerHello)
    }

    /// Server Hello followed by the server Certificate.
    pub(super) fn client_await_peer_hello(&mut self, bytes: Vec<u8>) -> Result<Phase, Error> {
        let msg = self.parse_message(&bytes)?;
        debug!("{} recv {:?}", self.role, msg.msg_type());

        match &msg.body {
            Body::Hello(hello) if self.peer_random.is_none() => {
                self.accept_hello(hello)?;
                self.transcript.set_server_hello(bytes.clone());
                Ok(Phase::AwaitingPeerHello)
            }
            Body::Certificate(cert) if self.peer_random.is_some() => {
                let certificate = match Certificate::from_der(cert.cert_der) {
                    Ok(c) => c,
                    Err(e) => {
                        let e = Error::HandshakeFailed(format!("Bad server certificate: {}", e));
                        return Err(self.fail(AlertDescription::BadCertificate, e));
                    }
                };
                if let Err(e) = self.verify_peer(&certificate) {
                    return Err(self.fail(AlertDescription::BadCertificate, e));
                }

                self.peer_certificate = Some(certificate);
                self.transcript.set_certificate(bytes.clone());
                Ok(Phase::KeyExchange)
            }
            _ => Err(self.unexpected(&msg)),
        }
    }

    fn verify_peer(&self, certificate: &Certificate) -> Result<(), Error> {
        match self.config.peer_verification() {
            PeerVerification::Disabled => {
                trace!(
                    "Peer verification disabled, accepting {}",
                    certificate.fingerprint_str()
                );
                Ok(())
            }
            PeerVerification::SubjectName(name) => {
                if certificate.subject() != name.as_str() {
                    return Err(Error::HandshakeFailed(format!(
                        "Certificate subject {:?} does not match {:?}",
                        certificate.subject(),
                        name
                    )));
                }
                certificate
                    .verify_self_signature()
                    .map_err(Error::HandshakeFailed)?;
                if !certificate.is_valid_at(SystemTime::now()) {
                    return Err(Error::HandshakeFailed(
                        "Certificate outside its validity period".into(),
                    ));
                }
                debug!("Verified server certificate for {:?}", name);
                Ok(())
            }
        }
    }

    pub(super) fn client_key_exchange(&mut self) -> Result<Phase, Error> {
        let transcript_hash = self.derive_session()?;

        let verify_data = prf::finished(self.master()?, "client finished", &transcript_hash)
            .map_err(Error::HandshakeFailed)?;
        self.queue_message(Body::Finished(Finished::new(&verify_data)));

        Ok(Phase::AwaitingFinished)
    }

    /// Server CertificateVerify followed by the server Finished.
    pub(super) fn client_await_finished(&mut self, bytes: Vec<u8>) -> Result<Phase, Error> {
        let msg = self.parse_message(&bytes)?;
        debug!("{} recv {:?}", self.role, msg.msg_type());

        match &msg.body {
            Body::CertificateVerify(cv) if !self.transcript.has_certificate_verify() => {
                if let Err(e) = self.check_certificate_verify(cv) {
                    return Err(self.fail(AlertDescription::DecryptError, e));
                }
                self.transcript.set_certificate_verify(bytes.clone());
                Ok(Phase::AwaitingFinished)
            }
            Body::Finished(finished) if self.transcript.has_certificate_verify() => {
                let transcript_hash = self.transcript.hash_with_verify()?;
                let verified = prf::verify_finished(
                    self.master()?,
                    "server finished",
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

    fn check_certificate_verify(&self, cv: &message::CertificateVerify) -> Result<(), Error> {
        let certificate = self
            .peer_certificate
            .as_ref()
            .ok_or_else(|| Error::HandshakeFailed("No server certificate".into()))?;

        let scheme = SignatureScheme::from_u16(cv.scheme).ok_or_else(|| {
            Error::HandshakeFailed(format!("Unknown signature scheme {:#06x}", cv.scheme))
        })?;

        let transcript_hash = self.transcript.hash_key_exchange()?;
        let signed = certificate_verify_input(&transcript_hash);

        certificate
            .public_key()
            .verify(scheme, &signed, cv.signature)
            .map_err(|e| Error::HandshakeFailed(format!("CertificateVerify: {}", e)))
    }
}
