//! Asymmetric key pairs used for the server identity.

use std::fmt;

use p256::ecdsa::{Signature as P256Signature, SigningKey as P256SigningKey};
use p256::ecdsa::VerifyingKey as P256VerifyingKey;
use p384::ecdsa::{Signature as P384Signature, SigningKey as P384SigningKey};
use p384::ecdsa::VerifyingKey as P384VerifyingKey;
use pkcs8::{DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use signature::{SignatureEncoding, Signer, Verifier};
use zeroize::Zeroizing;

use crate::rng::Entropy;
use crate::Error;

/// Family of asymmetric key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    /// RSA with PKCS#1 v1.5 signatures. 2048, 3072 or 4096 bits.
    Rsa,
    /// ECDSA over NIST P-256 (256 bits) or P-384 (384 bits).
    Ecdsa,
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyAlgorithm::Rsa => write!(f, "RSA"),
            KeyAlgorithm::Ecdsa => write!(f, "ECDSA"),
        }
    }
}

/// Signature algorithm with its fixed digest. Values are the TLS code points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureScheme {
    RsaPkcs1Sha256,
    EcdsaP256Sha256,
    EcdsaP384Sha384,
}

impl SignatureScheme {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0401 => Some(SignatureScheme::RsaPkcs1Sha256),
            0x0403 => Some(SignatureScheme::EcdsaP256Sha256),
            0x0503 => Some(SignatureScheme::EcdsaP384Sha384),
            _ => None,
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            SignatureScheme::RsaPkcs1Sha256 => 0x0401,
            SignatureScheme::EcdsaP256Sha256 => 0x0403,
            SignatureScheme::EcdsaP384Sha384 => 0x0503,
        }
    }
}

enum PrivateKey {
    Rsa(RsaPrivateKey),
    P256(P256SigningKey),
    P384(P384SigningKey),
}

/// A public key able to verify signatures made by its private half.
#[derive(Clone, PartialEq)]
pub enum PublicKey {
    Rsa(RsaPublicKey),
    P256(P256VerifyingKey),
    P384(P384VerifyingKey),
}

/// Generated asymmetric key pair.
///
/// The private half never leaves the crate. Both the `rsa` and the `ecdsa`
/// key types zeroize their secret material on drop.
pub struct KeyPair {
    algorithm: KeyAlgorithm,
    bits: usize,
    private: PrivateKey,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a fresh key pair.
    ///
    /// Every call draws new randomness from the process [`Entropy`] source.
    pub fn generate(algorithm: KeyAlgorithm, bits: usize) -> Result<KeyPair, Error> {
        let mut rng = Entropy::rng().map_err(|e| Error::KeyGenFailed(e.to_string()))?;

        let (private, public) = match (algorithm, bits) {
            (KeyAlgorithm::Rsa, 2048 | 3072 | 4096) => {
                let key = RsaPrivateKey::new(&mut rng, bits)
                    .map_err(|e| Error::KeyGenFailed(format!("RSA-{}: {}", bits, e)))?;
                let public = RsaPublicKey::from(&key);
                (PrivateKey::Rsa(key), PublicKey::Rsa(public))
            }
            (KeyAlgorithm::Ecdsa, 256) => {
                let key = P256SigningKey::random(&mut rng);
                let public = P256VerifyingKey::from(&key);
                (PrivateKey::P256(key), PublicKey::P256(public))
            }
            (KeyAlgorithm::Ecdsa, 384) => {
                let key = P384SigningKey::random(&mut rng);
                let public = P384VerifyingKey::from(&key);
                (PrivateKey::P384(key), PublicKey::P384(public))
            }
            _ => {
                return Err(Error::KeyGenFailed(format!(
                    "Unsupported key size {} for {}",
                    bits, algorithm
                )))
            }
        };

        debug!("Generated {}-{} key pair", algorithm, bits);

        Ok(KeyPair {
            algorithm,
            bits,
            private,
            public,
        })
    }

    #[inline(always)]
    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    #[inline(always)]
    pub fn bits(&self) -> usize {
        self.bits
    }

    #[inline(always)]
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub(crate) fn signature_scheme(&self) -> SignatureScheme {
        self.public.signature_scheme()
    }

    /// Sign `data` with the scheme implied by the key.
    pub(crate) fn sign(&self, data: &[u8]) -> Result<Vec<u8>, String> {
        match &self.private {
            PrivateKey::Rsa(key) => {
                let signing_key = rsa::pkcs1v15::SigningKey::<Sha256>::new(key.clone());
                let signature = signing_key
                    .try_sign(data)
                    .map_err(|e| format!("RSA signing failed: {}", e))?;
                Ok(signature.to_vec())
            }
            PrivateKey::P256(key) => {
                let signature: P256Signature = key
                    .try_sign(data)
                    .map_err(|e| format!("P-256 signing failed: {}", e))?;
                Ok(signature.to_der().as_bytes().to_vec())
            }
            PrivateKey::P384(key) => {
                let signature: P384Signature = key
                    .try_sign(data)
                    .map_err(|e| format!("P-384 signing failed: {}", e))?;
                Ok(signature.to_der().as_bytes().to_vec())
            }
        }
    }

    /// PKCS#8 DER of the private key, for handing to the certificate builder.
    pub(crate) fn to_pkcs8_der(&self) -> Result<Zeroizing<Vec<u8>>, String> {
        let doc = match &self.private {
            PrivateKey::Rsa(key) => key.to_pkcs8_der(),
            PrivateKey::P256(key) => key.to_pkcs8_der(),
            PrivateKey::P384(key) => key.to_pkcs8_der(),
        }
        .map_err(|e| format!("Failed to encode private key: {}", e))?;

        Ok(Zeroizing::new(doc.as_bytes().to_vec()))
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("algorithm", &self.algorithm)
            .field("bits", &self.bits)
            .finish()
    }
}

impl PublicKey {
    /// Parse a DER encoded SubjectPublicKeyInfo.
    pub fn from_spki_der(der: &[u8]) -> Result<PublicKey, String> {
        if let Ok(key) = RsaPublicKey::from_public_key_der(der) {
            return Ok(PublicKey::Rsa(key));
        }
        if let Ok(key) = P256VerifyingKey::from_public_key_der(der) {
            return Ok(PublicKey::P256(key));
        }
        if let Ok(key) = P384VerifyingKey::from_public_key_der(der) {
            return Ok(PublicKey::P384(key));
        }

        Err("Unsupported or malformed public key".to_string())
    }

    /// DER encoded SubjectPublicKeyInfo.
    pub fn to_spki_der(&self) -> Result<Vec<u8>, String> {
        let doc = match self {
            PublicKey::Rsa(key) => key.to_public_key_der(),
            PublicKey::P256(key) => key.to_public_key_der(),
            PublicKey::P384(key) => key.to_public_key_der(),
        }
        .map_err(|e| format!("Failed to encode public key: {}", e))?;

        Ok(doc.as_bytes().to_vec())
    }

    pub fn signature_scheme(&self) -> SignatureScheme {
        match self {
            PublicKey::Rsa(_) => SignatureScheme::RsaPkcs1Sha256,
            PublicKey::P256(_) => SignatureScheme::EcdsaP256Sha256,
            PublicKey::P384(_) => SignatureScheme::EcdsaP384Sha384,
        }
    }

    /// Verify `signature` over `data`.
    ///
    /// The scheme must be the one implied by the key type.
    pub fn verify(
        &self,
        scheme: SignatureScheme,
        data: &[u8],
        signature: &[u8],
    ) -> Result<(), String> {
        if scheme != self.signature_scheme() {
            return Err(format!(
                "Signature scheme {:?} does not match key ({:?})",
                scheme,
                self.signature_scheme()
            ));
        }

        match self {
            PublicKey::Rsa(key) => {
                let verifying_key = rsa::pkcs1v15::VerifyingKey::<Sha256>::new(key.clone());
                let sig = rsa::pkcs1v15::Signature::try_from(signature)
                    .map_err(|_| "Invalid RSA signature format".to_string())?;
                verifying_key
                    .verify(data, &sig)
                    .map_err(|_| "RSA signature verification failed".to_string())
            }
            PublicKey::P256(key) => {
                let sig = P256Signature::from_der(signature)
                    .map_err(|_| "Invalid signature format".to_string())?;
                key.verify(data, &sig)
                    .map_err(|_| "ECDSA P-256 signature verification failed".to_string())
            }
            PublicKey::P384(key) => {
                let sig = P384Signature::from_der(signature)
                    .map_err(|_| "Invalid signature format".to_string())?;
                key.verify(data, &sig)
                    .map_err(|_| "ECDSA P-384 signature verification failed".to_string())
            }
        }
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublicKey::Rsa(_) => f.debug_tuple("PublicKey::Rsa").finish(),
            PublicKey::P256(_) => f.debug_tuple("PublicKey::P256").finish(),
            PublicKey::P384(_) => f.debug_tuple("PublicKey::P384").finish(),
        }
    }
}
