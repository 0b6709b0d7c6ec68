use std::sync::Arc;

use crate::config::Config;
use crate::connection::Connection;
use crate::transport::{self, Transport};
use crate::Error;

/// Send `message` to the echo server at `host:port` and return its response.
pub fn exchange(host: &str, port: u16, message: &[u8], config: Arc<Config>) -> Result<Vec<u8>, Error> {
    let mut stream = transport::connect(host, port)?;
    stream.set_io_timeout(Some(config.io_timeout()))?;
    exchange_over(stream, message, config)
}

/// [`exchange`] over an already connected transport.
///
/// Handshake, write the message, close_notify, then read the response until
/// the server's close_notify.
pub fn exchange_over<T: Transport>(
    transport: T,
    message: &[u8],
    config: Arc<Config>,
) -> Result<Vec<u8>, Error> {
    let mut conn = Connection::client(transport, config.clone());
    conn.complete_handshake()?;

    if let Some(cert) = conn.peer_certificate() {
        debug!(
            "Server certificate CN={} fingerprint {}",
            cert.subject(),
            cert.fingerprint_str()
        );
    }

    conn.write_all(message)?;
    conn.shutdown()?;

    let response = conn.read_to_end(config.max_request_size())?;
    conn.close();

    Ok(response)
}
