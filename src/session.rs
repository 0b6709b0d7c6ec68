use std::fmt;
use std::ops::Deref;

use zeroize::Zeroizing;

use crate::certificate::Certificate;
use crate::crypto::prf;
use crate::crypto::{Aad, Cipher, CipherSuite, Nonce, IV_LEN};
use crate::handshake::Role;
use crate::message::{ContentType, ProtocolVersion, Random, Record, RecordHeader};
use crate::Error;

/// Keying material exported from an established session.
pub struct KeyingMaterial(Zeroizing<Vec<u8>>);

impl Deref for KeyingMaterial {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Debug for KeyingMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyingMaterial({} bytes)", self.0.len())
    }
}

/// Keys and sequence numbers negotiated by one handshake.
///
/// Owned by exactly one connection. Ciphers, IVs and the master secret are
/// zeroized when the session is dropped.
pub struct Session {
    role: Role,
    suite: &'static dyn CipherSuite,
    write_cipher: Box<dyn Cipher>,
    read_cipher: Box<dyn Cipher>,
    write_iv: Zeroizing<[u8; IV_LEN]>,
    read_iv: Zeroizing<[u8; IV_LEN]>,
    write_seq: u64,
    read_seq: u64,
    master: Zeroizing<Vec<u8>>,
    client_random: Random,
    server_random: Random,
    peer_certificate: Option<Certificate>,
}

impl Session {
    /// Expand the master secret into per-direction keys.
    pub(crate) fn derive(
        role: Role,
        suite: &'static dyn CipherSuite,
        master: Zeroizing<Vec<u8>>,
        client_random: Random,
        server_random: Random,
        peer_certificate: Option<Certificate>,
    ) -> Result<Session, String> {
        let key_len = suite.key_len();
        let iv_len = suite.iv_len();
        if iv_len != IV_LEN {
            return Err(format!("Unsupported IV length {}", iv_len));
        }

        let key_block =
            prf::key_expansion(&master, &client_random, &server_random, 2 * key_len + 2 * iv_len)?;

        // client_write_key | server_write_key | client_write_iv | server_write_iv
        let (client_key, rest) = key_block.split_at(key_len);
        let (server_key, rest) = rest.split_at(key_len);
        let (client_iv, server_iv) = rest.split_at(iv_len);

        let mut civ = Zeroizing::new([0u8; IV_LEN]);
        civ.copy_from_slice(client_iv);
        let mut siv = Zeroizing::new([0u8; IV_LEN]);
        siv.copy_from_slice(server_iv);

        let (write_key, read_key, write_iv, read_iv) = match role {
            Role::Client => (client_key, server_key, civ, siv),
            Role::Server => (server_key, client_key, siv, civ),
        };

        Ok(Session {
            role,
            suite,
            write_cipher: suite.create_cipher(write_key)?,
            read_cipher: suite.create_cipher(read_key)?,
            write_iv,
            read_iv,
            write_seq: 0,
            read_seq: 0,
            master,
            client_random,
            server_random,
            peer_certificate,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn cipher_suite(&self) -> &'static dyn CipherSuite {
        self.suite
    }

    /// Sequence number of the next record sent.
    pub fn write_sequence(&self) -> u64 {
        self.write_seq
    }

    /// Sequence number expected on the next record received.
    pub fn read_sequence(&self) -> u64 {
        self.read_seq
    }

    /// Certificate presented by the server. Only set on the client side.
    pub fn peer_certificate(&self) -> Option<&Certificate> {
        self.peer_certificate.as_ref()
    }

    /// Derive `len` bytes bound to this session and `label`.
    ///
    /// Both peers of a session derive identical output.
    pub fn export_keying_material(&self, label: &str, len: usize) -> Result<KeyingMaterial, Error> {
        let mut seed = Vec::with_capacity(64);
        seed.extend_from_slice(&self.client_random);
        seed.extend_from_slice(&self.server_random);

        let out = prf::prf(&self.master, label, &seed, len).map_err(Error::Configuration)?;
        Ok(KeyingMaterial(out))
    }

    /// Encrypt `plaintext` into one record appended to `out`.
    pub(crate) fn seal(
        &mut self,
        content_type: ContentType,
        plaintext: &[u8],
        out: &mut Vec<u8>,
    ) -> Result<(), String> {
        if self.write_seq == u64::MAX {
            return Err("Write sequence number exhausted".to_string());
        }
        let seq = self.write_seq;
        let version = ProtocolVersion::V1_0;

        let aad = Aad::new(content_type, version, seq, plaintext.len() as u16);
        let nonce = Nonce::xor(&self.write_iv, seq);

        let mut fragment = plaintext.to_vec();
        self.write_cipher.encrypt(&mut fragment, &aad, nonce)?;

        let header = RecordHeader {
            content_type,
            version,
            sequence: seq,
            length: fragment.len() as u16,
        };
        Record {
            header,
            fragment: &fragment,
        }
        .serialize(out);

        self.write_seq += 1;
        Ok(())
    }

    /// Authenticate and decrypt one record.
    ///
    /// Nothing is returned unless the tag verifies.
    pub(crate) fn open(&mut self, header: &RecordHeader, fragment: &[u8]) -> Result<Vec<u8>, String> {
        if self.read_seq == u64::MAX {
            return Err("Read sequence number exhausted".to_string());
        }
        if header.version != ProtocolVersion::V1_0 {
            return Err(format!("Unexpected record version {:?}", header.version));
        }
        if header.sequence != self.read_seq {
            return Err(format!(
                "Unexpected sequence number {} (expected {})",
                header.sequence, self.read_seq
            ));
        }

        let tag_len = self.suite.tag_len();
        if fragment.len() < tag_len {
            return Err(format!("Record too short: {}", fragment.len()));
        }
        let plaintext_len = fragment.len() - tag_len;

        let aad = Aad::new(header.content_type, header.version, header.sequence, plaintext_len as u16);
        let nonce = Nonce::xor(&self.read_iv, header.sequence);

        let mut data = fragment.to_vec();
        self.read_cipher.decrypt(&mut data, &aad, nonce)?;

        self.read_seq += 1;
        Ok(data)
    }

    #[cfg(test)]
    pub(crate) fn set_sequences(&mut self, write: u64, read: u64) {
        self.write_seq = write;
        self.read_seq = read;
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("role", &self.role)
            .field("suite", &self.suite.name())
            .field("write_seq", &self.write_seq)
            .field("read_seq", &self.read_seq)
            .finish()
    }
}
