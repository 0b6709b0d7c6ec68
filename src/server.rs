// Echo server flow, one connection at a time:
//
// 1. Accept a transport from the listener, or sleep for the poll interval.
// 2. Build a fresh Connection with the shared identity and run the handshake.
// 3. Read the request until close_notify, bounded by max_request_size.
// 4. Write the same bytes back, send close_notify and close.
//
// Failures in 2-4 are logged and only close that connection.

use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crate::certificate::ServerIdentity;
use crate::config::Config;
use crate::connection::Connection;
use crate::rng::Entropy;
use crate::transport::{Listener, Transport, TransportError};
use crate::Error;

/// Stops a running [`Server::serve`] loop between accepts.
#[derive(Debug, Clone, Default)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Server {
    config: Arc<Config>,
    identity: Arc<ServerIdentity>,
    shutdown: Shutdown,
}

impl Server {
    /// Seed the entropy source and generate the server identity.
    ///
    /// Every error here is fatal for startup.
    pub fn new(config: Arc<Config>) -> Result<Server, Error> {
        Entropy::init()?;
        let identity = ServerIdentity::generate(config.identity())?;
        Ok(Self::with_identity(config, identity))
    }

    pub fn with_identity(config: Arc<Config>, identity: Arc<ServerIdentity>) -> Server {
        Server {
            config,
            identity,
            shutdown: Shutdown::default(),
        }
    }

    pub fn identity(&self) -> &Arc<ServerIdentity> {
        &self.identity
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Accept and serve connections until shut down.
    ///
    /// Only listener errors end the loop.
    pub fn serve<L: Listener>(&self, listener: &mut L) -> Result<(), Error> {
        while !self.shutdown.is_triggered() {
            match listener.accept() {
                Ok(Some(transport)) => match self.handle(transport) {
                    Ok(n) => debug!("Echoed {} bytes", n),
                    Err(e) if e.is_connection_scoped() => warn!("Connection failed: {}", e),
                    Err(e) => return Err(e),
                },
                Ok(None) | Err(TransportError::WouldBlock) => {
                    thread::sleep(self.config.accept_poll_interval());
                }
                Err(e) => return Err(e.into()),
            }
        }

        info!("Server shut down");
        Ok(())
    }

    /// Serve on a bound TCP listener.
    pub fn serve_tcp(&self, mut listener: TcpListener) -> Result<(), Error> {
        listener.set_nonblocking(true)?;
        info!("Server listening on port {}", listener.local_addr()?.port());
        self.serve(&mut listener)
    }

    /// Run one connection to completion. Returns the number of bytes echoed.
    pub fn handle<T: Transport>(&self, mut transport: T) -> Result<usize, Error> {
        transport.set_io_timeout(Some(self.config.io_timeout()))?;

        let mut conn = Connection::server(
            transport,
            self.config.clone(),
            Some(self.identity.clone()),
        );

        conn.complete_handshake()?;
        let request = conn.read_to_end(self.config.max_request_size())?;
        trace!("Request of {} bytes", request.len());

        conn.write_all(&request)?;
        conn.shutdown()?;
        conn.close();

        Ok(request.len())
    }
}
