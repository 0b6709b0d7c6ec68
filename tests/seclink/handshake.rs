//! Handshake tests over the in-memory transport.

use std::sync::Arc;

use seclink::transport::{MemoryTransport, Transport};
use seclink::{Config, Connection, Error, PeerVerification, Phase, Step};

use crate::common::*;

#[test]
fn loopback_handshake_agrees_on_keys() {
    let _ = env_logger::try_init();

    let (client, server) = established_pair(config());

    assert_eq!(client.phase(), Phase::Established);
    assert_eq!(server.phase(), Phase::Established);
    assert_eq!(exported(&client), exported(&server));

    let cert = client.peer_certificate().expect("server certificate");
    assert_eq!(cert.subject(), "localhost");
    assert_eq!(cert.der(), IDENTITY.certificate().der());
    assert!(server.peer_certificate().is_none());
}

#[test]
fn every_handshake_gets_fresh_keys() {
    let _ = env_logger::try_init();

    let (a, _) = established_pair(config());
    let (b, _) = established_pair(config());
    assert_ne!(exported(&a), exported(&b));
}

/// Bytes each side sends during a clean handshake.
fn handshake_lengths() -> (u64, u64) {
    let (client, server) = established_pair(config());
    (
        client.transport().sent_bytes(),
        server.transport().sent_bytes(),
    )
}

#[test]
fn corrupted_server_flight_never_establishes_client() {
    let _ = env_logger::try_init();

    let (_, server_len) = handshake_lengths();
    assert!(server_len > 0);

    for offset in 0..server_len {
        let (mut client, mut server) = connection_pair(config());
        server.transport_mut().corrupt_outgoing(offset, 0x01);

        let (c, _) = drive(&mut client, &mut server);
        assert!(
            matches!(c, Outcome::Failed(_)),
            "offset {}: client {:?}",
            offset,
            c
        );
    }
}

#[test]
fn corrupted_client_flight_never_establishes_server() {
    let _ = env_logger::try_init();

    let (client_len, _) = handshake_lengths();
    assert!(client_len > 0);

    for offset in 0..client_len {
        let (mut client, mut server) = connection_pair(config());
        client.transport_mut().corrupt_outgoing(offset, 0x80);

        let (_, s) = drive(&mut client, &mut server);
        assert!(
            matches!(s, Outcome::Failed(_)),
            "offset {}: server {:?}",
            offset,
            s
        );
    }
}

#[test]
fn survives_would_block_and_single_byte_io() {
    let _ = env_logger::try_init();

    let (mut client, mut server) = connection_pair(config());
    client.transport_mut().set_chunk_limit(Some(1));
    server.transport_mut().set_chunk_limit(Some(1));

    let mut c_done = false;
    let mut s_done = false;
    for round in 0..1_000_000 {
        if round % 7 == 0 {
            client.transport_mut().inject_would_block(3);
            server.transport_mut().inject_would_block(2);
        }
        if !c_done {
            c_done = client.poll_handshake().expect("client step") == Step::Done;
        }
        if !s_done {
            s_done = server.poll_handshake().expect("server step") == Step::Done;
        }
        if c_done && s_done {
            break;
        }
    }

    assert!(c_done && s_done);
    assert_eq!(exported(&client), exported(&server));
}

#[test]
fn server_without_identity() {
    let _ = env_logger::try_init();

    let (ct, st) = MemoryTransport::pair();
    let mut client = Connection::client(ct, config());
    let mut server = Connection::server(st, config(), None);

    let err = server.poll_handshake().unwrap_err();
    assert!(matches!(err, Error::NoServerIdentity), "{}", err);
    assert!(err.is_startup_fatal());

    let err = client.complete_handshake().unwrap_err();
    assert!(matches!(err, Error::HandshakeFailed(_)), "{}", err);
    assert!(!client.is_established());
}

#[test]
fn subject_name_verification() {
    let _ = env_logger::try_init();

    let verify = |name: &str| {
        let config = Config::builder()
            .peer_verification(PeerVerification::SubjectName(name.to_string()))
            .build()
            .unwrap();
        let (mut client, mut server) = connection_pair(Arc::new(config));
        drive(&mut client, &mut server)
    };

    let (c, s) = verify("localhost");
    assert!(c.is_established(), "{:?}", c);
    assert!(s.is_established(), "{:?}", s);

    let (c, s) = verify("example.com");
    match c {
        Outcome::Failed(Error::HandshakeFailed(reason)) => {
            assert!(reason.contains("does not match"), "{}", reason)
        }
        other => panic!("client should fail, got {:?}", other),
    }
    match s {
        Outcome::Failed(Error::HandshakeFailed(reason)) => {
            assert!(reason.contains("BadCertificate"), "{}", reason)
        }
        other => panic!("server should get the client's alert, got {:?}", other),
    }
}

#[test]
fn mismatched_cipher_suite_aborts() {
    let _ = env_logger::try_init();

    let (ct, st) = MemoryTransport::pair();
    let aes256 = Config::builder()
        .cipher_suite(seclink::crypto::AES_256_GCM_SHA256)
        .build()
        .unwrap();
    let mut client = Connection::client(ct, Arc::new(aes256));
    let mut server = Connection::server(st, config(), Some(IDENTITY.clone()));

    let (c, s) = drive(&mut client, &mut server);
    assert!(matches!(c, Outcome::Failed(_)), "{:?}", c);
    assert!(matches!(s, Outcome::Failed(_)), "{:?}", s);
}

#[test]
fn aes256_handshake() {
    let _ = env_logger::try_init();

    let config = Config::builder()
        .cipher_suite(seclink::crypto::AES_256_GCM_SHA256)
        .build()
        .unwrap();
    let (client, server) = established_pair(Arc::new(config));
    assert_eq!(exported(&client), exported(&server));
}

#[test]
fn rsa_identity_handshake() {
    let _ = env_logger::try_init();

    let (mut client, mut server) = connection_pair_with(config(), RSA_IDENTITY.clone());
    let (c, s) = drive(&mut client, &mut server);
    assert!(c.is_established(), "client: {:?}", c);
    assert!(s.is_established(), "server: {:?}", s);

    let cert = client.peer_certificate().expect("server certificate");
    assert_eq!(
        cert.public_key().signature_scheme(),
        seclink::crypto::SignatureScheme::RsaPkcs1Sha256
    );
    assert_eq!(cert.der(), RSA_IDENTITY.certificate().der());
    assert_eq!(exported(&client), exported(&server));

    client.write_all(b"over rsa").unwrap();
    assert_eq!(server.read(100).unwrap(), Some(b"over rsa".to_vec()));
}
