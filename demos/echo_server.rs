//! Echo server that sends back whatever you type.
//!
//! Usage: RUST_LOG=info cargo run --example echo_server

use epoll_reactor::{Endpoint, EventHandler, Peer, Server, Transport};
use log::info;

struct EchoHandler;

impl EventHandler for EchoHandler {
    fn on_connect(&self, peer: &Peer) {
        info!("{} connected", peer.remote_endpoint());
    }

    fn on_disconnect(&self, peer: &Peer) {
        info!("{} disconnected", peer.remote_endpoint());
    }

    fn on_receive(&self, peer: &Peer) {
        let data = peer.read_all();
        if !data.is_empty() {
            peer.write_string(&data);
        }
    }
}

fn main() {
    env_logger::init();

    let server = Server::new(EchoHandler);
    let endpoint = Endpoint::from_octets(127, 0, 0, 1, 8080, Transport::Tcp);
    if !server.listen(&[endpoint], Transport::Tcp) {
        eprintln!("failed to start listening on {endpoint}");
        std::process::exit(1);
    }
    server.poll();
}
