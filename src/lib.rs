//! seclink: a secure echo link over any reliable byte stream.
//!
//! A server bootstraps its own identity at startup (a fresh RSA or ECDSA key
//! pair and a self-signed X.509 certificate), then accepts connections one at
//! a time. Each connection runs a small handshake:
//!
//! * both peers send a `Hello` with a random and an X25519 key share,
//! * the server sends its certificate and signs the transcript,
//! * both sides derive a master secret with an HMAC-SHA256 PRF and confirm it
//!   with `Finished` messages.
//!
//! Application data then flows as AEAD protected records (AES-GCM) with
//! strict per-direction sequence numbers.
//!
//! Everything is written against the [`transport::Transport`] trait. A step
//! that cannot make progress returns [`Step::WouldBlock`] and is resumed by
//! calling it again, so the same code runs over blocking TCP streams and over
//! the non-blocking in-memory [`transport::MemoryTransport`].
//!
//! # Example
//!
//! ```no_run
//! use std::net::TcpListener;
//! use std::sync::Arc;
//!
//! use seclink::{Config, Server};
//!
//! # fn main() -> Result<(), seclink::Error> {
//! let config = Arc::new(Config::default());
//! let server = Server::new(config.clone())?;
//!
//! let listener = TcpListener::bind(("0.0.0.0", 4433))?;
//! std::thread::spawn(move || server.serve_tcp(listener));
//!
//! let response = seclink::exchange("localhost", 4433, b"hello", config)?;
//! assert_eq!(response, b"hello");
//! # Ok(())
//! # }
//! ```
//!
//! # Peer verification
//!
//! Certificates are self-signed, so there is no trust store. By default the
//! client accepts any well formed certificate ([`PeerVerification::Disabled`]).
//! With [`PeerVerification::SubjectName`] the client also requires a matching
//! subject, a valid self-signature and a current validity window. In both
//! modes the server must prove possession of the certificate key by signing
//! the handshake transcript.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

#[macro_use]
extern crate log;

mod buffer;
mod rng;

mod error;
pub use error::Error;

mod config;
pub use config::{Config, ConfigBuilder, IdentityConfig, PeerVerification, SerialPolicy};
pub use config::{MAX_HANDSHAKE_MESSAGE_CAP, MAX_RECORD_SIZE};

pub mod crypto;
pub use crypto::{KeyAlgorithm, KeyPair};

pub mod certificate;
pub use certificate::{Certificate, ServerIdentity};

pub(crate) mod message;

pub mod transport;

mod handshake;
pub use handshake::{HandshakeState, Phase, Role, Step};

mod session;
pub use session::{KeyingMaterial, Session};

mod channel;
pub use channel::{Received, SecureChannel};

mod connection;
pub use connection::Connection;

mod server;
pub use server::{Server, Shutdown};

mod client;
pub use client::{exchange, exchange_over};
