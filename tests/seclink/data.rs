//! Application data over established connections.

use std::sync::Arc;

use seclink::transport::Transport;
use seclink::{Config, Error, Received};

use crate::common::*;

fn small_records() -> Arc<Config> {
    Arc::new(Config::builder().record_size(64).build().unwrap())
}

#[test]
fn round_trip_across_record_boundaries() {
    let _ = env_logger::try_init();

    for len in [0, 1, 63, 64, 65, 127, 128, 129, 1000, 5000] {
        let (mut client, mut server) = established_pair(small_records());
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();

        client.write_all(&data).unwrap();
        client.shutdown().unwrap();

        let received = server.read_to_end(usize::MAX).unwrap();
        assert_eq!(received, data, "length {}", len);
    }
}

#[test]
fn echo_both_directions() {
    let _ = env_logger::try_init();

    let (mut client, mut server) = established_pair(config());

    client.write_all(b"ping").unwrap();
    assert_eq!(server.read(100).unwrap(), Some(b"ping".to_vec()));

    server.write_all(b"pong").unwrap();
    assert_eq!(client.read(100).unwrap(), Some(b"pong".to_vec()));

    server.shutdown().unwrap();
    assert_eq!(client.read(100).unwrap(), None);
}

#[test]
fn tampered_record_yields_no_plaintext() {
    let _ = env_logger::try_init();

    let (mut client, mut server) = established_pair(config());

    // Inside the ciphertext of the first application record.
    let offset = client.transport().sent_bytes() + 13 + 2;
    client.transport_mut().corrupt_outgoing(offset, 0x40);
    client.write_all(b"attack at dawn").unwrap();

    let err = server.poll_read(100).unwrap_err();
    assert!(matches!(err, Error::RecordReadFailed(_)), "{}", err);

    // The channel stays failed.
    assert!(server.poll_read(100).is_err());
}

#[test]
fn tampered_tag_is_rejected() {
    let _ = env_logger::try_init();

    let (mut client, mut server) = established_pair(config());

    // Last byte of the 16 byte tag.
    let offset = client.transport().sent_bytes() + 13 + 5 + 15;
    client.transport_mut().corrupt_outgoing(offset, 0x01);
    client.write_all(b"hello").unwrap();

    assert!(matches!(
        server.poll_read(100),
        Err(Error::RecordReadFailed(_))
    ));
}

#[test]
fn replayed_record_is_rejected() {
    let _ = env_logger::try_init();

    let (mut client, mut server) = established_pair(config());

    client.write_all(b"transfer 100").unwrap();
    let wire = server.transport().peek_inbound();
    assert_eq!(
        server.poll_read(100).unwrap(),
        Received::Data(b"transfer 100".to_vec())
    );

    client.transport_mut().send(&wire).unwrap();
    assert!(matches!(
        server.poll_read(100),
        Err(Error::RecordReadFailed(_))
    ));
}

#[test]
fn request_limit_is_enforced() {
    let _ = env_logger::try_init();

    let (mut client, mut server) = established_pair(config());
    client.write_all(&[7u8; 3000]).unwrap();
    client.shutdown().unwrap();

    assert!(matches!(
        server.read_to_end(1000),
        Err(Error::RecordReadFailed(_))
    ));
}

#[test]
fn zero_length_read_leaves_data_queued() {
    let _ = env_logger::try_init();

    let (mut client, mut server) = established_pair(config());
    client.write_all(b"abc").unwrap();

    assert_eq!(server.poll_read(0).unwrap(), Received::WouldBlock);
    assert_eq!(server.read(0).unwrap(), Some(Vec::new()));
    assert_eq!(server.read(100).unwrap(), Some(b"abc".to_vec()));

    client.shutdown().unwrap();
    assert_eq!(server.read(100).unwrap(), None);
    assert_eq!(server.read(0).unwrap(), None);
}
