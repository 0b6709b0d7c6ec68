use std::fmt;
use std::time::Duration;

use crate::crypto::{CipherSuite, KeyAlgorithm, AES_128_GCM_SHA256};
use crate::Error;

/// Largest handshake message the engine will ever buffer.
pub const MAX_HANDSHAKE_MESSAGE_CAP: usize = 64 * 1024;

/// Largest plaintext that fits in one record.
pub const MAX_RECORD_SIZE: usize = 16 * 1024;

/// Connection configuration
#[derive(Clone)]
pub struct Config {
    record_size: usize,
    max_handshake_message: usize,
    max_request_size: usize,
    io_timeout: Duration,
    accept_poll_interval: Duration,
    peer_verification: PeerVerification,
    cipher_suite: &'static dyn CipherSuite,
    identity: IdentityConfig,
}

/// How the client treats the certificate presented by the server.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PeerVerification {
    /// Any parseable certificate is accepted.
    ///
    /// The key exchange is still bound to the certificate key through
    /// CertificateVerify, but nothing ties that key to an identity. An active
    /// attacker can impersonate the server.
    #[default]
    Disabled,

    /// The certificate subject CN must equal the given name, the certificate
    /// must be correctly self-signed and currently valid.
    SubjectName(String),
}

/// Serial number assigned to issued certificates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialPolicy {
    Fixed(u64),
    /// A fresh random (positive, non-zero) serial per certificate.
    Random,
}

impl Default for SerialPolicy {
    fn default() -> Self {
        SerialPolicy::Fixed(1)
    }
}

impl Config {
    /// Create a new configuration builder.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder {
            record_size: 2048,
            max_handshake_message: MAX_HANDSHAKE_MESSAGE_CAP,
            max_request_size: 1024 * 1024,
            io_timeout: Duration::from_secs(30),
            accept_poll_interval: Duration::from_millis(50),
            peer_verification: PeerVerification::Disabled,
            cipher_suite: AES_128_GCM_SHA256,
            identity: IdentityConfig::default(),
        }
    }

    /// Largest plaintext carried by a single record.
    #[inline(always)]
    pub fn record_size(&self) -> usize {
        self.record_size
    }

    /// Largest handshake message accepted from the peer.
    #[inline(always)]
    pub fn max_handshake_message(&self) -> usize {
        self.max_handshake_message
    }

    /// Largest request the server reads before answering.
    #[inline(always)]
    pub fn max_request_size(&self) -> usize {
        self.max_request_size
    }

    /// Read/write timeout applied to TCP streams.
    ///
    /// A peer that stalls longer than this is disconnected.
    #[inline(always)]
    pub fn io_timeout(&self) -> Duration {
        self.io_timeout
    }

    /// How often a server checks for shutdown while no connection is pending.
    #[inline(always)]
    pub fn accept_poll_interval(&self) -> Duration {
        self.accept_poll_interval
    }

    #[inline(always)]
    pub fn peer_verification(&self) -> &PeerVerification {
        &self.peer_verification
    }

    /// Cipher suite protecting records. Both peers must agree.
    #[inline(always)]
    pub fn cipher_suite(&self) -> &'static dyn CipherSuite {
        self.cipher_suite
    }

    /// Parameters for the identity a server generates at startup.
    #[inline(always)]
    pub fn identity(&self) -> &IdentityConfig {
        &self.identity
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("record_size", &self.record_size)
            .field("max_handshake_message", &self.max_handshake_message)
            .field("max_request_size", &self.max_request_size)
            .field("io_timeout", &self.io_timeout)
            .field("accept_poll_interval", &self.accept_poll_interval)
            .field("peer_verification", &self.peer_verification)
            .field("cipher_suite", &self.cipher_suite.name())
            .field("identity", &self.identity)
            .finish()
    }
}

/// Builder for connection configuration.
pub struct ConfigBuilder {
    record_size: usize,
    max_handshake_message: usize,
    max_request_size: usize,
    io_timeout: Duration,
    accept_poll_interval: Duration,
    peer_verification: PeerVerification,
    cipher_suite: &'static dyn CipherSuite,
    identity: IdentityConfig,
}

impl ConfigBuilder {
    /// Set the largest plaintext carried by one record.
    ///
    /// Longer writes are split over several records.
    /// Defaults to 2048. Must be between 1 and 16384.
    pub fn record_size(mut self, record_size: usize) -> Self {
        self.record_size = record_size;
        self
    }

    /// Set the largest handshake message accepted from the peer.
    ///
    /// Defaults to 64KiB, which is also the maximum.
    pub fn max_handshake_message(mut self, max: usize) -> Self {
        self.max_handshake_message = max;
        self
    }

    /// Set the largest request a server reads before echoing.
    ///
    /// Defaults to 1MiB.
    pub fn max_request_size(mut self, max: usize) -> Self {
        self.max_request_size = max;
        self
    }

    /// Set the TCP read/write timeout.
    ///
    /// Defaults to 30 seconds.
    pub fn io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// Set the accept poll interval.
    ///
    /// Defaults to 50ms.
    pub fn accept_poll_interval(mut self, interval: Duration) -> Self {
        self.accept_poll_interval = interval;
        self
    }

    /// Set how the client verifies the server certificate.
    ///
    /// Defaults to [`PeerVerification::Disabled`].
    pub fn peer_verification(mut self, verification: PeerVerification) -> Self {
        self.peer_verification = verification;
        self
    }

    /// Set the record cipher suite.
    ///
    /// Defaults to AES-128-GCM.
    pub fn cipher_suite(mut self, suite: &'static dyn CipherSuite) -> Self {
        self.cipher_suite = suite;
        self
    }

    /// Set the server identity parameters.
    pub fn identity(mut self, identity: IdentityConfig) -> Self {
        self.identity = identity;
        self
    }

    /// Build the configuration.
    ///
    /// Returns `Error::Configuration` if any value is out of range.
    pub fn build(self) -> Result<Config, Error> {
        if self.record_size == 0 || self.record_size > MAX_RECORD_SIZE {
            return Err(Error::Configuration(format!(
                "record_size must be 1..={}, got {}",
                MAX_RECORD_SIZE, self.record_size
            )));
        }

        if self.max_handshake_message < 1024
            || self.max_handshake_message > MAX_HANDSHAKE_MESSAGE_CAP
        {
            return Err(Error::Configuration(format!(
                "max_handshake_message must be 1024..={}, got {}",
                MAX_HANDSHAKE_MESSAGE_CAP, self.max_handshake_message
            )));
        }

        if self.io_timeout.is_zero() {
            return Err(Error::Configuration("io_timeout must be non-zero".into()));
        }

        if self.accept_poll_interval.is_zero() {
            return Err(Error::Configuration(
                "accept_poll_interval must be non-zero".into(),
            ));
        }

        if let PeerVerification::SubjectName(name) = &self.peer_verification {
            if name.is_empty() {
                return Err(Error::Configuration(
                    "Subject name to verify is empty".into(),
                ));
            }
        }

        self.identity.validate()?;

        Ok(self.into_config())
    }

    fn into_config(self) -> Config {
        Config {
            record_size: self.record_size,
            max_handshake_message: self.max_handshake_message,
            max_request_size: self.max_request_size,
            io_timeout: self.io_timeout,
            accept_poll_interval: self.accept_poll_interval,
            peer_verification: self.peer_verification,
            cipher_suite: self.cipher_suite,
            identity: self.identity,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        // Builder defaults always pass build().
        Config::builder().into_config()
    }
}

/// Parameters for a self-signed identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityConfig {
    subject: String,
    validity: Duration,
    key_algorithm: KeyAlgorithm,
    key_bits: usize,
    serial: SerialPolicy,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        IdentityConfig {
            subject: "localhost".to_string(),
            validity: Duration::from_secs(31_536_000),
            key_algorithm: KeyAlgorithm::Rsa,
            key_bits: 2048,
            serial: SerialPolicy::default(),
        }
    }
}

impl IdentityConfig {
    /// Subject (and issuer) common name.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn validity(&self) -> Duration {
        self.validity
    }

    pub fn key_algorithm(&self) -> KeyAlgorithm {
        self.key_algorithm
    }

    pub fn key_bits(&self) -> usize {
        self.key_bits
    }

    pub fn serial(&self) -> SerialPolicy {
        self.serial
    }

    /// Set the subject common name. Defaults to `localhost`.
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    /// Set the validity window. Defaults to 365 days.
    pub fn with_validity(mut self, validity: Duration) -> Self {
        self.validity = validity;
        self
    }

    /// Set key algorithm and size. Defaults to RSA 2048.
    pub fn with_key(mut self, algorithm: KeyAlgorithm, bits: usize) -> Self {
        self.key_algorithm = algorithm;
        self.key_bits = bits;
        self
    }

    /// Set the serial number policy. Defaults to the fixed serial 1.
    pub fn with_serial(mut self, serial: SerialPolicy) -> Self {
        self.serial = serial;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.subject.is_empty() {
            return Err(Error::Configuration("Identity subject is empty".into()));
        }
        if self.validity.as_secs() == 0 {
            return Err(Error::Configuration(
                "Identity validity must be at least one second".into(),
            ));
        }
        if let SerialPolicy::Fixed(0) = self.serial {
            return Err(Error::Configuration("Serial number must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::builder().build().unwrap();
        assert_eq!(config.record_size(), 2048);
        assert_eq!(config.max_handshake_message(), 64 * 1024);
        assert_eq!(config.peer_verification(), &PeerVerification::Disabled);
        assert_eq!(config.cipher_suite().name(), "AES_128_GCM_SHA256");

        let identity = config.identity();
        assert_eq!(identity.subject(), "localhost");
        assert_eq!(identity.validity(), Duration::from_secs(31_536_000));
        assert_eq!(identity.key_algorithm(), KeyAlgorithm::Rsa);
        assert_eq!(identity.key_bits(), 2048);
        assert_eq!(identity.serial(), SerialPolicy::Fixed(1));
    }

    #[test]
    fn default_matches_builder() {
        let a = Config::default();
        let b = Config::builder().build().unwrap();
        assert_eq!(format!("{:?}", a), format!("{:?}", b));

        assert_eq!(a.record_size(), b.record_size());
        assert_eq!(a.max_handshake_message(), b.max_handshake_message());
        assert_eq!(a.max_request_size(), b.max_request_size());
        assert_eq!(a.io_timeout(), b.io_timeout());
        assert_eq!(a.accept_poll_interval(), b.accept_poll_interval());
        assert_eq!(a.peer_verification(), b.peer_verification());
        assert_eq!(a.cipher_suite().id(), b.cipher_suite().id());
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn rejects_out_of_range() {
        assert!(Config::builder().record_size(0).build().is_err());
        assert!(Config::builder().record_size(20_000).build().is_err());
        assert!(Config::builder()
            .max_handshake_message(128 * 1024)
            .build()
            .is_err());
        assert!(Config::builder().io_timeout(Duration::ZERO).build().is_err());
        assert!(Config::builder()
            .peer_verification(PeerVerification::SubjectName(String::new()))
            .build()
            .is_err());

        let err = Config::builder()
            .identity(IdentityConfig::default().with_validity(Duration::ZERO))
            .build()
            .unwrap_err();
        assert!(err.is_startup_fatal());
    }
}
