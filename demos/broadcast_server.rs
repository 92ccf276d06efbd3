//! Real-time chat server that broadcasts every line to all connected peers
//! except the sender.
//!
//! Usage: RUST_LOG=info cargo run --example broadcast_server
//! Connect with `telnet localhost 8080` or `cargo run --example client`.

use std::collections::HashMap;
use std::io::Write;
use std::net::TcpStream;
use std::os::fd::RawFd;
use std::sync::Mutex;

use epoll_reactor::{Endpoint, EventHandler, Peer, Server, Transport};
use log::{error, info};

/// Writable clones of every connected peer's stream, keyed by fd, kept
/// outside the crate's own peer registry so `on_receive` can fan a message
/// out to everyone else.
struct BroadcastHandler {
    clients: Mutex<HashMap<RawFd, TcpStream>>,
}

impl BroadcastHandler {
    fn new() -> Self {
        BroadcastHandler {
            clients: Mutex::new(HashMap::new()),
        }
    }
}

impl EventHandler for BroadcastHandler {
    fn on_connect(&self, peer: &Peer) {
        info!("{} connected", peer.remote_endpoint());
        match peer.try_clone_stream() {
            Ok(stream) => {
                self.clients.lock().unwrap().insert(peer.raw_fd(), stream);
            }
            Err(e) => error!("could not clone stream for {}: {e}", peer.remote_endpoint()),
        }
    }

    fn on_disconnect(&self, peer: &Peer) {
        info!("{} disconnected", peer.remote_endpoint());
        self.clients.lock().unwrap().remove(&peer.raw_fd());
    }

    fn on_receive(&self, peer: &Peer) {
        let line = peer.read_line();
        if line.is_empty() {
            return;
        }
        let message = format!(
            "[{}] {}\n",
            peer.remote_endpoint(),
            String::from_utf8_lossy(&line)
        );
        info!("{}", message.trim_end());

        let mut clients = self.clients.lock().unwrap();
        let sender = peer.raw_fd();
        clients.retain(|&fd, stream| {
            if fd == sender {
                return true;
            }
            stream.write_all(message.as_bytes()).is_ok()
        });
    }
}

fn main() {
    env_logger::init();

    let server = Server::new(BroadcastHandler::new());
    let endpoint = Endpoint::from_octets(127, 0, 0, 1, 8080, Transport::Tcp);
    if !server.listen(&[endpoint], Transport::Tcp) {
        eprintln!("failed to start listening on {endpoint}");
        std::process::exit(1);
    }
    server.poll();
}
