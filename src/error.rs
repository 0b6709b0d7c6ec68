use std::io;

use thiserror::Error;

/// Errors surfaced by seclink.
///
/// The variants split into two groups. Startup errors ([`Error::is_startup_fatal`])
/// terminate a server before it accepts anything. Connection errors
/// ([`Error::is_connection_scoped`]) close the one connection they happened on.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A server handshake was started without certificate and key.
    #[error("No server identity installed")]
    NoServerIdentity,

    /// The OS random source could not seed the process generator.
    #[error("Entropy unavailable: {0}")]
    EntropyUnavailable(String),

    #[error("Key generation failed: {0}")]
    KeyGenFailed(String),

    #[error("Certificate issuance failed: {0}")]
    CertificateIssuanceFailed(String),

    /// The handshake was aborted. The connection must be closed.
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// Decrypting or verifying an incoming record failed.
    #[error("Record read failed: {0}")]
    RecordReadFailed(String),

    /// Sealing or sending an outgoing record failed.
    #[error("Record write failed: {0}")]
    RecordWriteFailed(String),

    /// The peer closed the transport.
    #[error("Transport closed")]
    TransportClosed,

    #[error("Transport error: {0}")]
    Transport(#[from] io::Error),
}

impl Error {
    /// Errors that abort server startup.
    pub fn is_startup_fatal(&self) -> bool {
        matches!(
            self,
            Error::Configuration(_)
                | Error::NoServerIdentity
                | Error::EntropyUnavailable(_)
                | Error::KeyGenFailed(_)
                | Error::CertificateIssuanceFailed(_)
        )
    }

    /// Errors isolated to a single connection. The accept loop carries on.
    pub fn is_connection_scoped(&self) -> bool {
        matches!(
            self,
            Error::HandshakeFailed(_)
                | Error::RecordReadFailed(_)
                | Error::RecordWriteFailed(_)
                | Error::TransportClosed
                | Error::Transport(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_is_disjoint() {
        let all = [
            Error::Configuration("x".into()),
            Error::NoServerIdentity,
            Error::EntropyUnavailable("x".into()),
            Error::KeyGenFailed("x".into()),
            Error::CertificateIssuanceFailed("x".into()),
            Error::HandshakeFailed("x".into()),
            Error::RecordReadFailed("x".into()),
            Error::RecordWriteFailed("x".into()),
            Error::TransportClosed,
            Error::Transport(io::Error::new(io::ErrorKind::Other, "x")),
        ];

        for e in &all {
            assert!(
                e.is_startup_fatal() != e.is_connection_scoped(),
                "{e} must be exactly one of startup or connection scoped"
            );
        }
    }
}
