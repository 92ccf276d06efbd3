//! Server: the multi-listener front door applications construct.
//!
//! The worker-pool scheduling runs one thread per listener, each driving
//! its own accept-side [`crate::reactor::Reactor`].

use std::sync::{Arc, Mutex};
use std::thread;

use log::{info, warn};

use crate::endpoint::{Endpoint, Transport};
use crate::handler::EventHandler;
use crate::lockable::Lockable;
use crate::listener::{KeepaliveParams, Listener};

/// Multi-listener server: owns a handler and the set of listeners created
/// by [`Server::listen`].
pub struct Server<H: EventHandler + 'static> {
    handler: Arc<H>,
    keepalive: Mutex<KeepaliveParams>,
    listeners: Lockable<Vec<Arc<Listener<H>>>>,
}

impl<H: EventHandler + 'static> Server<H> {
    pub fn new(handler: H) -> Server<H> {
        Server {
            handler: Arc::new(handler),
            keepalive: Mutex::new(KeepaliveParams::default()),
            listeners: Lockable::new(Vec::new()),
        }
    }

    /// The handler this server was constructed with.
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Sets the keepalive parameters applied to peers accepted by
    /// listeners created by subsequent `listen` calls. Listeners already
    /// created keep whatever was in effect when they were set up.
    pub fn configure_keepalive(&self, enabled: bool, idle_secs: i32, interval_secs: i32, retries: i32) {
        let mut guard = self.keepalive.lock().unwrap();
        *guard = KeepaliveParams {
            enabled,
            idle_secs,
            interval_secs,
            retries,
        };
    }

    /// Binds and listens on every endpoint in `endpoints` using `transport`.
    /// Endpoints that fail to set up are logged and skipped; already-bound
    /// listeners stay in the listener set regardless. Returns `true` iff
    /// every endpoint succeeded.
    pub fn listen(&self, endpoints: &[Endpoint], transport: Transport) -> bool {
        let keepalive = *self.keepalive.lock().unwrap();
        let mut all_ok = true;
        for endpoint in endpoints {
            let endpoint = retarget_transport(*endpoint, transport);
            match Listener::bind_and_listen(endpoint, keepalive, Arc::clone(&self.handler)) {
                Ok(listener) => {
                    self.listeners.scoped(|listeners| listeners.push(listener));
                }
                Err(e) => {
                    warn!("could not start listening on {endpoint}: {e}");
                    all_ok = false;
                }
            }
        }
        all_ok
    }

    /// Total number of peers currently tracked across every listener.
    pub fn num_clients(&self) -> usize {
        self.listeners
            .scoped(|listeners| listeners.iter().map(|l| l.peer_count()).sum())
    }

    /// The endpoints this server is actually bound to, in the order they
    /// were added by successful `listen` calls. Chiefly useful for
    /// discovering the real port after listening on port 0.
    pub fn local_endpoints(&self) -> Vec<Endpoint> {
        self.listeners
            .scoped(|listeners| listeners.iter().map(|l| l.local_endpoint()).collect())
    }

    /// Spawns one worker thread per listener and blocks until all of them
    /// return (which, for the accept side, only happens on a fatal error).
    /// Returns `true` iff every listener's accept loop exited without a
    /// fatal error.
    pub fn poll(&self) -> bool {
        let listeners = self.listeners.scoped(|listeners| listeners.clone());
        if listeners.is_empty() {
            warn!("poll() called with no listeners configured");
            return true;
        }
        info!("starting {} listener worker(s)", listeners.len());
        let handles: Vec<_> = listeners
            .into_iter()
            .map(|listener| thread::spawn(move || listener.run()))
            .collect();

        let mut all_ok = true;
        for handle in handles {
            match handle.join() {
                Ok(ok) => all_ok &= ok,
                Err(_) => all_ok = false,
            }
        }
        all_ok
    }
}

fn retarget_transport(endpoint: Endpoint, transport: Transport) -> Endpoint {
    if endpoint.transport() == transport {
        return endpoint;
    }
    match endpoint.ip() {
        std::net::IpAddr::V4(v4) => {
            let o = v4.octets();
            Endpoint::from_octets(o[0], o[1], o[2], o[3], endpoint.port(), transport)
        }
        std::net::IpAddr::V6(v6) => Endpoint::from_v6(v6.segments(), endpoint.port(), transport),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpStream;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct EchoHandler {
        connects: AtomicUsize,
    }

    impl EventHandler for EchoHandler {
        fn on_connect(&self, _peer: &crate::peer::Peer) {
            self.connects.fetch_add(1, Ordering::SeqCst);
        }
        fn on_receive(&self, peer: &crate::peer::Peer) {
            let data = peer.read_all();
            if !data.is_empty() {
                peer.write_string(&data);
            }
        }
    }

    #[test]
    fn listen_on_ephemeral_port_succeeds_and_counts_clients() {
        let server = Server::new(EchoHandler::default());
        let endpoint = Endpoint::from_octets(127, 0, 0, 1, 0, Transport::Tcp);
        assert!(server.listen(&[endpoint], Transport::Tcp));
        assert_eq!(server.num_clients(), 0);
    }

    #[test]
    fn listen_rejects_ipv6_and_returns_false() {
        let server = Server::new(EchoHandler::default());
        let endpoint = Endpoint::from_v6([0, 0, 0, 0, 0, 0, 0, 1], 0, Transport::Tcp);
        assert!(!server.listen(&[endpoint], Transport::Tcp));
    }

    #[test]
    fn poll_accepts_and_echoes() {
        let server = Arc::new(Server::new(EchoHandler::default()));
        let endpoint = Endpoint::from_octets(127, 0, 0, 1, 0, Transport::Tcp);
        assert!(server.listen(&[endpoint], Transport::Tcp));

        let bound = server.local_endpoints()[0];

        let poll_server = Arc::clone(&server);
        thread::spawn(move || {
            poll_server.poll();
        });

        let mut client = TcpStream::connect(bound.to_socket_addr()).unwrap();
        use std::io::{Read, Write};
        client.write_all(b"ping").unwrap();
        client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
    }
}
