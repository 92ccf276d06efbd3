use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread;

use epoll_reactor::{Endpoint, EventHandler, Server, Transport};

/// Starts `server` listening on an ephemeral loopback port and drives
/// `poll()` on a background thread. The thread is intentionally never
/// joined: there is no graceful whole-server shutdown in this crate, so
/// tests rely on the test process exiting to reap the worker thread.
pub fn start_test_server<H: EventHandler + 'static>(handler: H) -> (SocketAddr, Arc<Server<H>>) {
    start_test_server_on(handler, &[Endpoint::from_octets(127, 0, 0, 1, 0, Transport::Tcp)])
}

/// Same as [`start_test_server`] but with caller-chosen endpoints, for
/// tests that need more than one listener.
pub fn start_test_server_on<H: EventHandler + 'static>(
    handler: H,
    endpoints: &[Endpoint],
) -> (SocketAddr, Arc<Server<H>>) {
    let server = Arc::new(Server::new(handler));
    assert!(server.listen(endpoints, Transport::Tcp));

    let addr = server.local_endpoints()[0].to_socket_addr();

    let poll_server = Arc::clone(&server);
    thread::spawn(move || {
        poll_server.poll();
    });

    (addr, server)
}

pub fn create_clients(addr: SocketAddr, count: usize) -> Vec<TcpStream> {
    (0..count)
        .map(|_| TcpStream::connect(addr).unwrap())
        .collect()
}
