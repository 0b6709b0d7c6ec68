//! End to end over TCP loopback.

use std::net::TcpListener;
use std::sync::Arc;
use std::thread;

use seclink::{Config, PeerVerification, Server};

use crate::common::*;

fn start_server(config: Arc<Config>) -> (u16, seclink::Shutdown, thread::JoinHandle<()>) {
    let server = Server::with_identity(config, IDENTITY.clone());
    let shutdown = server.shutdown_handle();

    let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = thread::spawn(move || {
        server.serve_tcp(listener).expect("serve");
    });

    (port, shutdown, handle)
}

#[test]
fn tcp_echo() {
    let _ = env_logger::try_init();

    let (port, shutdown, handle) = start_server(config());

    let response = seclink::exchange("127.0.0.1", port, b"hello", config()).unwrap();
    assert_eq!(response, b"hello");

    let big: Vec<u8> = (0..5000).map(|i| (i * 7 % 256) as u8).collect();
    let response = seclink::exchange("127.0.0.1", port, &big, config()).unwrap();
    assert_eq!(response, big);

    shutdown.trigger();
    handle.join().unwrap();
}

#[test]
fn tcp_server_survives_failed_client() {
    let _ = env_logger::try_init();

    let (port, shutdown, handle) = start_server(config());

    let strict = Config::builder()
        .peer_verification(PeerVerification::SubjectName("not-the-server".into()))
        .build()
        .unwrap();
    assert!(seclink::exchange("127.0.0.1", port, b"x", Arc::new(strict)).is_err());

    let response = seclink::exchange("127.0.0.1", port, b"still here", config()).unwrap();
    assert_eq!(response, b"still here");

    shutdown.trigger();
    handle.join().unwrap();
}
