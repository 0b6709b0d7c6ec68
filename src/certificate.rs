//! Self-signed identity certificates.
//!
//! A server generates one [`ServerIdentity`] at startup. Certificates are
//! issued with `rcgen` and parsed back with `x509-cert`, which is also how the
//! client reads the certificate the server presents.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use der::asn1::ObjectIdentifier;
use der::{Decode, Encode};
use rcgen::{
    Certificate as RcgenCertificate, CertificateParams, DistinguishedName, DnType, IsCa,
    KeyPair as RcgenKeyPair, SanType, PKCS_ECDSA_P256_SHA256, PKCS_ECDSA_P384_SHA384,
    PKCS_RSA_SHA256,
};
use sha2::{Digest, Sha256};
use x509_cert::name::Name;

use crate::config::{IdentityConfig, SerialPolicy};
use crate::crypto::{KeyAlgorithm, KeyPair, PublicKey, SignatureScheme};
use crate::rng::Entropy;
use crate::Error;

const OID_COMMON_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.3");
const OID_SHA256_WITH_RSA: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.11");
const OID_ECDSA_WITH_SHA256: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.2");
const OID_ECDSA_WITH_SHA384: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.3");

/// A parsed X.509 certificate together with its DER encoding.
#[derive(Clone)]
pub struct Certificate {
    der: Vec<u8>,
    subject: String,
    issuer: String,
    serial: Vec<u8>,
    not_before: SystemTime,
    not_after: SystemTime,
    public_key: PublicKey,
    signature_scheme: Option<SignatureScheme>,
    tbs: Vec<u8>,
    signature: Vec<u8>,
}

impl Certificate {
    /// Parse a DER encoded certificate.
    pub fn from_der(der: &[u8]) -> Result<Certificate, String> {
        let cert = x509_cert::Certificate::from_der(der)
            .map_err(|e| format!("Malformed certificate: {}", e))?;
        let tbs = &cert.tbs_certificate;

        let spki = tbs
            .subject_public_key_info
            .to_der()
            .map_err(|e| format!("Malformed public key info: {}", e))?;
        let public_key = PublicKey::from_spki_der(&spki)?;

        let oid = cert.signature_algorithm.oid;
        let signature_scheme = if oid == OID_SHA256_WITH_RSA {
            Some(SignatureScheme::RsaPkcs1Sha256)
        } else if oid == OID_ECDSA_WITH_SHA256 {
            Some(SignatureScheme::EcdsaP256Sha256)
        } else if oid == OID_ECDSA_WITH_SHA384 {
            Some(SignatureScheme::EcdsaP384Sha384)
        } else {
            None
        };

        let signature = cert
            .signature
            .as_bytes()
            .ok_or_else(|| "Certificate signature has unused bits".to_string())?
            .to_vec();

        Ok(Certificate {
            der: der.to_vec(),
            subject: common_name(&tbs.subject).unwrap_or_default(),
            issuer: common_name(&tbs.issuer).unwrap_or_default(),
            serial: tbs.serial_number.as_bytes().to_vec(),
            not_before: tbs.validity.not_before.to_system_time(),
            not_after: tbs.validity.not_after.to_system_time(),
            public_key,
            signature_scheme,
            tbs: tbs
                .to_der()
                .map_err(|e| format!("Failed to encode TBS certificate: {}", e))?,
            signature,
        })
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Subject common name, empty if there is none.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Issuer common name, empty if there is none.
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Serial number as big-endian bytes.
    pub fn serial(&self) -> &[u8] {
        &self.serial
    }

    pub fn not_before(&self) -> SystemTime {
        self.not_before
    }

    pub fn not_after(&self) -> SystemTime {
        self.not_after
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Check that the certificate is signed by its own public key.
    pub fn verify_self_signature(&self) -> Result<(), String> {
        let scheme = self
            .signature_scheme
            .ok_or_else(|| "Unsupported certificate signature algorithm".to_string())?;

        if self.issuer != self.subject {
            return Err(format!(
                "Issuer {:?} differs from subject {:?}",
                self.issuer, self.subject
            ));
        }

        self.public_key.verify(scheme, &self.tbs, &self.signature)
    }

    /// Whether `time` lies within notBefore..=notAfter.
    pub fn is_valid_at(&self, time: SystemTime) -> bool {
        self.not_before <= time && time <= self.not_after
    }

    /// SHA-256 over the DER encoding.
    pub fn fingerprint(&self) -> Vec<u8> {
        Sha256::digest(&self.der).to_vec()
    }

    /// Fingerprint as colon-separated hex, for example "AF:12:F6:...".
    pub fn fingerprint_str(&self) -> String {
        format_fingerprint(&self.fingerprint())
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.subject)
            .field("issuer", &self.issuer)
            .field("der", &self.der.len())
            .field("public_key", &self.public_key)
            .finish()
    }
}

fn common_name(name: &Name) -> Option<String> {
    for rdn in name.0.iter() {
        for atv in rdn.0.iter() {
            if atv.oid == OID_COMMON_NAME {
                // Utf8String, PrintableString and IA5String all carry the
                // text as-is in the value octets.
                return std::str::from_utf8(atv.value.value())
                    .ok()
                    .map(|s| s.to_string());
            }
        }
    }
    None
}

/// Format a fingerprint as a colon-separated hex string
/// Example: "AF:12:F6:..."
pub fn format_fingerprint(fingerprint: &[u8]) -> String {
    fingerprint
        .iter()
        .map(|byte| format!("{:02X}", byte))
        .collect::<Vec<String>>()
        .join(":")
}

/// Issue a version 3 certificate where issuer equals subject, signed by `key_pair`.
///
/// notBefore is the current time and notAfter is `validity` later.
pub fn issue_self_signed(
    subject: &str,
    key_pair: &KeyPair,
    validity: Duration,
    serial: SerialPolicy,
) -> Result<Certificate, Error> {
    let fail = |e: String| Error::CertificateIssuanceFailed(e);

    if subject.is_empty() {
        return Err(fail("Subject is empty".into()));
    }

    let alg = match (key_pair.algorithm(), key_pair.bits()) {
        (KeyAlgorithm::Rsa, _) => &PKCS_RSA_SHA256,
        (KeyAlgorithm::Ecdsa, 256) => &PKCS_ECDSA_P256_SHA256,
        (KeyAlgorithm::Ecdsa, 384) => &PKCS_ECDSA_P384_SHA384,
        (alg, bits) => return Err(fail(format!("No signature algorithm for {} {}", alg, bits))),
    };

    let pkcs8 = key_pair.to_pkcs8_der().map_err(fail)?;
    let rcgen_key =
        RcgenKeyPair::from_der(&pkcs8).map_err(|e| fail(format!("Key import: {}", e)))?;

    let serial_number = match serial {
        SerialPolicy::Fixed(n) => n,
        SerialPolicy::Random => random_serial()?,
    };

    let validity = time::Duration::try_from(validity)
        .map_err(|e| fail(format!("Validity out of range: {}", e)))?;
    let not_before = time::OffsetDateTime::now_utc();
    let not_after = not_before
        .checked_add(validity)
        .ok_or_else(|| fail("Validity out of range".into()))?;

    let mut params = CertificateParams::default();
    params.alg = alg;
    params.serial_number = Some(serial_number);
    params.not_before = not_before;
    params.not_after = not_after;
    params.is_ca = IsCa::NoCa;

    let mut distinguished_name = DistinguishedName::new();
    distinguished_name.push(DnType::CommonName, subject.to_string());
    params.distinguished_name = distinguished_name;

    if subject.is_ascii() && !subject.contains(' ') {
        params.subject_alt_names = vec![SanType::DnsName(subject.to_string())];
    }

    params.key_pair = Some(rcgen_key);

    let cert = RcgenCertificate::from_params(params)
        .map_err(|e| fail(format!("Certificate params: {}", e)))?;
    let der = cert
        .serialize_der()
        .map_err(|e| fail(format!("Certificate signing: {}", e)))?;

    let certificate = Certificate::from_der(&der).map_err(fail)?;

    debug!(
        "Issued self-signed certificate CN={} serial={} key={} {}",
        subject,
        serial_number,
        key_pair.algorithm(),
        key_pair.bits()
    );

    Ok(certificate)
}

fn random_serial() -> Result<u64, Error> {
    let mut buf = [0u8; 8];
    loop {
        Entropy::fill(&mut buf)
            .map_err(|e| Error::CertificateIssuanceFailed(e.to_string()))?;
        // Keep it positive when DER encoded as a signed INTEGER.
        let serial = u64::from_be_bytes(buf) & 0x7fff_ffff_ffff_ffff;
        if serial != 0 {
            return Ok(serial);
        }
    }
}

/// Certificate and matching key pair presented by a server.
///
/// Generated once and shared read-only between connections.
pub struct ServerIdentity {
    certificate: Certificate,
    key_pair: KeyPair,
}

impl ServerIdentity {
    /// Generate a key pair and issue a self-signed certificate for it.
    pub fn generate(config: &IdentityConfig) -> Result<Arc<ServerIdentity>, Error> {
        config.validate()?;

        let key_pair = KeyPair::generate(config.key_algorithm(), config.key_bits())?;
        let certificate =
            issue_self_signed(config.subject(), &key_pair, config.validity(), config.serial())?;

        info!(
            "Server identity CN={} fingerprint {}",
            certificate.subject(),
            certificate.fingerprint_str()
        );

        Ok(Arc::new(ServerIdentity {
            certificate,
            key_pair,
        }))
    }

    /// Pair an existing certificate with its key.
    pub fn new(certificate: Certificate, key_pair: KeyPair) -> Result<ServerIdentity, Error> {
        if certificate.public_key() != key_pair.public_key() {
            return Err(Error::Configuration(
                "Certificate does not match key pair".into(),
            ));
        }
        Ok(ServerIdentity {
            certificate,
            key_pair,
        })
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    pub(crate) fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }
}

impl fmt::Debug for ServerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerIdentity")
            .field("certificate", &self.certificate)
            .field("key_pair", &self.key_pair)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YEAR: Duration = Duration::from_secs(31_536_000);

    fn issue(alg: KeyAlgorithm, bits: usize) -> (KeyPair, Certificate) {
        let kp = KeyPair::generate(alg, bits).unwrap();
        let cert = issue_self_signed("localhost", &kp, YEAR, SerialPolicy::Fixed(1)).unwrap();
        (kp, cert)
    }

    #[test]
    fn rsa_self_signature_verifies() {
        let (kp, cert) = issue(KeyAlgorithm::Rsa, 2048);
        cert.verify_self_signature().unwrap();
        assert_eq!(cert.public_key(), kp.public_key());
    }

    #[test]
    fn ecdsa_self_signature_verifies() {
        for bits in [256, 384] {
            let (kp, cert) = issue(KeyAlgorithm::Ecdsa, bits);
            cert.verify_self_signature().unwrap();
            assert_eq!(cert.public_key(), kp.public_key());
        }
    }

    #[test]
    fn fields_are_populated() {
        let before = SystemTime::now() - Duration::from_secs(1);
        let (_, cert) = issue(KeyAlgorithm::Ecdsa, 256);
        let after = SystemTime::now();

        assert_eq!(cert.subject(), "localhost");
        assert_eq!(cert.issuer(), "localhost");
        assert_eq!(cert.serial(), &[1]);

        assert!(cert.not_before() >= before && cert.not_before() <= after);
        let window = cert.not_after().duration_since(cert.not_before()).unwrap();
        assert!(window >= YEAR - Duration::from_secs(1) && window <= YEAR);

        assert!(cert.is_valid_at(SystemTime::now()));
        assert!(!cert.is_valid_at(SystemTime::now() + YEAR + Duration::from_secs(60)));
    }

    #[test]
    fn random_serials_differ() {
        let kp = KeyPair::generate(KeyAlgorithm::Ecdsa, 256).unwrap();
        let a = issue_self_signed("a", &kp, YEAR, SerialPolicy::Random).unwrap();
        let b = issue_self_signed("a", &kp, YEAR, SerialPolicy::Random).unwrap();
        assert_ne!(a.serial(), b.serial());
    }

    #[test]
    fn tampered_certificate_fails_verification() {
        let (_, cert) = issue(KeyAlgorithm::Ecdsa, 256);
        let mut other = cert.clone();
        let last = other.tbs.len() - 1;
        other.tbs[last] ^= 0x01;
        assert!(other.verify_self_signature().is_err());
    }

    #[test]
    fn garbage_is_not_a_certificate() {
        assert!(Certificate::from_der(&[0x30, 0x03, 0x01, 0x02]).is_err());
    }

    #[test]
    fn empty_subject_is_rejected() {
        let kp = KeyPair::generate(KeyAlgorithm::Ecdsa, 256).unwrap();
        let err = issue_self_signed("", &kp, YEAR, SerialPolicy::Fixed(1)).unwrap_err();
        assert!(matches!(err, Error::CertificateIssuanceFailed(_)));
    }

    #[test]
    fn identity_generation() {
        let config = IdentityConfig::default().with_key(KeyAlgorithm::Ecdsa, 384);
        let identity = ServerIdentity::generate(&config).unwrap();
        assert_eq!(identity.certificate().subject(), "localhost");
        assert_eq!(
            identity.certificate().public_key(),
            identity.key_pair().public_key()
        );
    }

    #[test]
    fn test_fingerprint_formatting() {
        let test_fingerprint = vec![0xAF, 0x12, 0xF6, 0x38, 0x2A];
        assert_eq!(format_fingerprint(&test_fingerprint), "AF:12:F6:38:2A");

        let (_, cert) = issue(KeyAlgorithm::Ecdsa, 256);
        let formatted = cert.fingerprint_str();
        assert_eq!(formatted.len(), 95);
        for segment in formatted.split(':') {
            assert!(u8::from_str_radix(segment, 16).is_ok());
        }
    }
}
