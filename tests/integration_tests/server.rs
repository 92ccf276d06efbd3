use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use epoll_reactor::{Endpoint, EventHandler, Peer, Transport};

use crate::common::{create_clients, start_test_server, start_test_server_on};

#[derive(Default)]
struct PingPongHandler {
    disconnects: AtomicUsize,
}

impl EventHandler for PingPongHandler {
    fn on_receive(&self, peer: &Peer) {
        let line = peer.read_line();
        if line == b"PING" {
            peer.write_string(b"PONG\n");
            peer.disconnect();
        }
    }

    fn on_disconnect(&self, _peer: &Peer) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

/// Scenario 1: single-listener accept-and-echo.
#[test]
fn accept_and_echo_closes_after_one_exchange() {
    let (addr, server) = start_test_server(PingPongHandler::default());
    thread::sleep(Duration::from_millis(50));

    let mut client = TcpStream::connect(addr).unwrap();
    client.write_all(b"PING\n").unwrap();
    client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    let mut response = Vec::new();
    client.read_to_end(&mut response).unwrap();
    assert_eq!(response, b"PONG\n");

    thread::sleep(Duration::from_millis(100));
    assert_eq!(server.handler().disconnects.load(Ordering::SeqCst), 1);
}

#[derive(Default)]
struct CountingHandler {
    connects: AtomicUsize,
}

impl EventHandler for CountingHandler {
    fn on_connect(&self, _peer: &Peer) {
        self.connects.fetch_add(1, Ordering::SeqCst);
    }
}

/// Scenario 3: two listeners, one connection each, independent fan-out.
#[test]
fn two_listeners_each_see_their_own_connection() {
    let endpoints = [
        Endpoint::from_octets(127, 0, 0, 1, 0, Transport::Tcp),
        Endpoint::from_octets(127, 0, 0, 1, 0, Transport::Tcp),
    ];
    let (_first_addr, server) = start_test_server_on(CountingHandler::default(), &endpoints);
    let bound = server.local_endpoints();
    assert_eq!(bound.len(), 2);

    let _c1 = TcpStream::connect(bound[0].to_socket_addr()).unwrap();
    let _c2 = TcpStream::connect(bound[1].to_socket_addr()).unwrap();

    for _ in 0..200 {
        if server.num_clients() == 2 {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(server.num_clients(), 2);
    assert_eq!(server.handler().connects.load(Ordering::SeqCst), 2);
}

/// Scenario 4: remote-initiated close is observed as a disconnect.
#[test]
fn remote_half_close_drops_the_client_count() {
    let (addr, server) = start_test_server(CountingHandler::default());
    let client = TcpStream::connect(addr).unwrap();

    for _ in 0..200 {
        if server.num_clients() == 1 {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(server.num_clients(), 1);

    drop(client);

    for _ in 0..200 {
        if server.num_clients() == 0 {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(server.num_clients(), 0);
}

#[derive(Default)]
struct NeverReceivingHandler {
    receives: AtomicUsize,
}

impl EventHandler for NeverReceivingHandler {
    fn on_receive(&self, _peer: &Peer) {
        self.receives.fetch_add(1, Ordering::SeqCst);
    }
}

/// Scenario 6: a silent client must never trigger `on_receive`.
#[test]
fn silent_client_never_triggers_on_receive() {
    let (addr, server) = start_test_server(NeverReceivingHandler::default());
    let _client = TcpStream::connect(addr).unwrap();
    thread::sleep(Duration::from_millis(200));
    assert_eq!(server.handler().receives.load(Ordering::SeqCst), 0);
}

/// Several clients can connect at once and are all tracked.
#[test]
fn many_clients_can_connect_concurrently() {
    let (addr, server) = start_test_server(CountingHandler::default());
    let _clients = create_clients(addr, 6);

    for _ in 0..200 {
        if server.num_clients() == 6 {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(server.num_clients(), 6);
}
