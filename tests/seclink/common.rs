//! Shared helpers for seclink integration tests.

#![allow(unused)]

use std::sync::Arc;

use once_cell::sync::Lazy;
use seclink::transport::{MemoryTransport, Transport};
use seclink::{Config, Connection, Error, IdentityConfig, KeyAlgorithm, ServerIdentity, Step};

/// ECDSA P-256 identity, generated once. RSA generation is too slow to repeat
/// in every test.
pub static IDENTITY: Lazy<Arc<ServerIdentity>> = Lazy::new(|| {
    let config = IdentityConfig::default().with_key(KeyAlgorithm::Ecdsa, 256);
    ServerIdentity::generate(&config).expect("generate identity")
});

/// The default identity, RSA-2048.
pub static RSA_IDENTITY: Lazy<Arc<ServerIdentity>> = Lazy::new(|| {
    ServerIdentity::generate(&IdentityConfig::default()).expect("generate RSA identity")
});

pub fn config() -> Arc<Config> {
    Arc::new(Config::default())
}

pub fn connection_pair(
    config: Arc<Config>,
) -> (Connection<MemoryTransport>, Connection<MemoryTransport>) {
    connection_pair_with(config, IDENTITY.clone())
}

pub fn connection_pair_with(
    config: Arc<Config>,
    identity: Arc<ServerIdentity>,
) -> (Connection<MemoryTransport>, Connection<MemoryTransport>) {
    let (ct, st) = MemoryTransport::pair();
    (
        Connection::client(ct, config.clone()),
        Connection::server(st, config, Some(identity)),
    )
}

/// Outcome of driving one side of a handshake.
#[derive(Debug)]
pub enum Outcome {
    Established,
    Failed(Error),
    Pending,
}

impl Outcome {
    pub fn is_established(&self) -> bool {
        matches!(self, Outcome::Established)
    }
}

/// Step both sides in lockstep until each is established or failed.
///
/// When neither side can make progress for a few rounds both transports are
/// closed, which fails whatever is still pending.
pub fn drive(
    client: &mut Connection<MemoryTransport>,
    server: &mut Connection<MemoryTransport>,
) -> (Outcome, Outcome) {
    let mut c = Outcome::Pending;
    let mut s = Outcome::Pending;
    let mut stuck = 0;

    for _ in 0..10_000 {
        let mut progressed = false;

        for (conn, outcome) in [(&mut *client, &mut c), (&mut *server, &mut s)] {
            if !matches!(outcome, Outcome::Pending) {
                continue;
            }
            match conn.poll_handshake() {
                Ok(Step::Done) => {
                    *outcome = Outcome::Established;
                    progressed = true;
                }
                Ok(Step::Progress) => progressed = true,
                Ok(Step::WouldBlock(_)) => {}
                Err(e) => {
                    *outcome = Outcome::Failed(e);
                    progressed = true;
                }
            }
        }

        if !matches!(c, Outcome::Pending) && !matches!(s, Outcome::Pending) {
            break;
        }

        if progressed {
            stuck = 0;
        } else {
            stuck += 1;
            if stuck == 3 {
                client.transport_mut().close();
                server.transport_mut().close();
            }
        }
    }

    (c, s)
}

/// Handshake a fresh pair and assert both ends are established.
pub fn established_pair(
    config: Arc<Config>,
) -> (Connection<MemoryTransport>, Connection<MemoryTransport>) {
    let (mut client, mut server) = connection_pair(config);
    let (c, s) = drive(&mut client, &mut server);
    assert!(c.is_established(), "client: {:?}", c);
    assert!(s.is_established(), "server: {:?}", s);
    (client, server)
}

pub fn exported(conn: &Connection<MemoryTransport>) -> Vec<u8> {
    conn.export_keying_material("EXPORTER-seclink-test", 32)
        .expect("export keying material")
        .to_vec()
}
