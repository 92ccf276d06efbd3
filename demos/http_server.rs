//! Minimal HTTP server serving a single fixed response.
//!
//! Usage: RUST_LOG=info cargo run --example http_server
//! Test with: curl http://localhost:8080/

use epoll_reactor::{Endpoint, EventHandler, Peer, Server, Transport};
use log::info;

struct HttpHandler;

impl EventHandler for HttpHandler {
    fn on_connect(&self, peer: &Peer) {
        info!("{} connected", peer.remote_endpoint());
    }

    fn on_disconnect(&self, peer: &Peer) {
        info!("{} disconnected", peer.remote_endpoint());
    }

    fn on_receive(&self, peer: &Peer) {
        let request_line = peer.read_line();
        if request_line.is_empty() {
            return;
        }
        info!(
            "{} -> {}",
            peer.remote_endpoint(),
            String::from_utf8_lossy(&request_line)
        );

        let body = "hello!";
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        peer.write_string(response.as_bytes());
        peer.disconnect();
    }
}

fn main() {
    env_logger::init();

    let server = Server::new(HttpHandler);
    let endpoint = Endpoint::from_octets(127, 0, 0, 1, 8080, Transport::Tcp);
    if !server.listen(&[endpoint], Transport::Tcp) {
        eprintln!("failed to start listening on {endpoint}");
        std::process::exit(1);
    }
    server.poll();
}
