use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{sha256, HASH_LEN};
use crate::Error;

/// Handshake messages in canonical order, independent of arrival order.
///
/// ClientHello || ServerHello || Certificate [|| CertificateVerify]
#[derive(Default, Zeroize, ZeroizeOnDrop)]
pub(crate) struct Transcript {
    client_hello: Vec<u8>,
    server_hello: Vec<u8>,
    certificate: Vec<u8>,
    certificate_verify: Vec<u8>,
}

impl Transcript {
    pub fn set_client_hello(&mut self, bytes: Vec<u8>) {
        self.client_hello = bytes;
    }

    pub fn set_server_hello(&mut self, bytes: Vec<u8>) {
        self.server_hello = bytes;
    }

    pub fn set_certificate(&mut self, bytes: Vec<u8>) {
        self.certificate = bytes;
    }

    pub fn set_certificate_verify(&mut self, bytes: Vec<u8>) {
        self.certificate_verify = bytes;
    }

    pub fn has_certificate_verify(&self) -> bool {
        !self.certificate_verify.is_empty()
    }

    /// Hash over ClientHello || ServerHello || Certificate.
    ///
    /// Input to the key schedule, the CertificateVerify signature and the
    /// client Finished.
    pub fn hash_key_exchange(&self) -> Result<[u8; HASH_LEN], Error> {
        if self.client_hello.is_empty() || self.server_hello.is_empty() || self.certificate.is_empty()
        {
            return Err(Error::HandshakeFailed(
                "Transcript incomplete before key exchange".into(),
            ));
        }

        Ok(sha256(&self.concat(false)))
    }

    /// Hash over the key exchange messages followed by CertificateVerify.
    ///
    /// Input to the server Finished.
    pub fn hash_with_verify(&self) -> Result<[u8; HASH_LEN], Error> {
        self.hash_key_exchange()?;
        if self.certificate_verify.is_empty() {
            return Err(Error::HandshakeFailed(
                "Transcript lacks CertificateVerify".into(),
            ));
        }

        Ok(sha256(&self.concat(true)))
    }

    fn concat(&self, with_verify: bool) -> Vec<u8> {
        let mut all = Vec::with_capacity(
            self.client_hello.len()
                + self.server_hello.len()
                + self.certificate.len()
                + self.certificate_verify.len(),
        );
        all.extend_from_slice(&self.client_hello);
        all.extend_from_slice(&self.server_hello);
        all.extend_from_slice(&self.certificate);
        if with_verify {
            all.extend_from_slice(&self.certificate_verify);
        }
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_is_canonical() {
        let mut a = Transcript::default();
        a.set_client_hello(vec![1]);
        a.set_server_hello(vec![2]);
        a.set_certificate(vec![3]);

        // Same messages recorded in arrival order of the other peer.
        let mut b = Transcript::default();
        b.set_certificate(vec![3]);
        b.set_server_hello(vec![2]);
        b.set_client_hello(vec![1]);

        assert_eq!(a.hash_key_exchange().unwrap(), b.hash_key_exchange().unwrap());
        assert_eq!(a.hash_key_exchange().unwrap(), sha256(&[1, 2, 3]));
    }

    #[test]
    fn incomplete_transcript_is_an_error() {
        let mut t = Transcript::default();
        t.set_client_hello(vec![1]);
        assert!(t.hash_key_exchange().is_err());

        t.set_server_hello(vec![2]);
        t.set_certificate(vec![3]);
        assert!(t.hash_with_verify().is_err());

        t.set_certificate_verify(vec![4]);
        assert_eq!(t.hash_with_verify().unwrap(), sha256(&[1, 2, 3, 4]));
    }

    #[test]
    fn zeroize_clears_messages() {
        let mut t = Transcript::default();
        t.set_client_hello(vec![1]);
        t.set_server_hello(vec![2]);
        t.set_certificate(vec![3]);
        t.zeroize();
        assert!(t.hash_key_exchange().is_err());
    }
}
