//! Peer: one accepted bidirectional stream and the state machine around
//! it.
//!
//! A peer holds a `Weak<dyn ListenerHandle>` back-reference to its owning
//! listener: strong downward ownership, weak upward reference — the
//! listener owns its peers in a registry, a peer only ever borrows its
//! listener back to ask for its own removal.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Weak;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread;

use log::error;

use crate::endpoint::Endpoint;
use crate::ffi;

/// Peer connection state. Transitions are monotonic:
/// `Uninitialized -> Connected -> Closing -> Closed`, no back-edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Uninitialized,
    Connected,
    Closing,
    Closed,
}

const UNINITIALIZED: u8 = 0;
const CONNECTED: u8 = 1;
const CLOSING: u8 = 2;
const CLOSED: u8 = 3;

fn decode(bits: u8) -> PeerState {
    match bits {
        CONNECTED => PeerState::Connected,
        CLOSING => PeerState::Closing,
        CLOSED => PeerState::Closed,
        _ => PeerState::Uninitialized,
    }
}

/// The narrow interface a [`Peer`] needs from its owning listener: ask to
/// be removed from its registry. Implemented by `Listener<H>` for every
/// handler `H`, so `Peer` itself stays non-generic.
pub trait ListenerHandle: Send + Sync {
    fn remove_peer(&self, fd: RawFd);
}

/// An accepted connection and the read/write helpers around it.
pub struct Peer {
    stream: TcpStream,
    fd: RawFd,
    remote: Endpoint,
    state: AtomicU8,
    owner: Weak<dyn ListenerHandle>,
}

impl Peer {
    /// Constructs a peer in the `Uninitialized` state. The caller
    /// (listener accept loop) must call [`Peer::initialize`] before any
    /// I/O is permitted.
    pub fn new(stream: TcpStream, remote: Endpoint, owner: Weak<dyn ListenerHandle>) -> Peer {
        let fd = stream.as_raw_fd();
        Peer {
            stream,
            fd,
            remote,
            state: AtomicU8::new(UNINITIALIZED),
            owner,
        }
    }

    pub fn raw_fd(&self) -> RawFd {
        self.fd
    }

    pub fn remote_endpoint(&self) -> Endpoint {
        self.remote
    }

    /// Clones the underlying stream so an application can retain a
    /// writable handle beyond the lifetime of one callback invocation
    /// (e.g. a chat server fanning a message out to every other peer).
    /// Bypasses the connected-state guard the `read_*`/`write_string`
    /// helpers enforce, so callers should check [`Peer::state`] themselves
    /// before writing through a cloned handle.
    pub fn try_clone_stream(&self) -> io::Result<TcpStream> {
        self.stream.try_clone()
    }

    pub fn state(&self) -> PeerState {
        decode(self.state.load(Ordering::Acquire))
    }

    /// Transitions `Uninitialized -> Connected`, then arms this peer's fd
    /// on the listener's peer-side reactor. In the per-listener-two-handle
    /// topology this crate uses, no dedicated worker thread is spawned per
    /// peer — the listener's existing peer-side worker already drains this
    /// fd's readiness.
    ///
    /// The state transition happens strictly before the fd is armed so
    /// that once a peer-dispatch thread can observe this fd as readable,
    /// it can also already observe the `Connected` state (the `Release`
    /// store here synchronizes with the `Acquire` load in
    /// [`Peer::is_connected`]). Callers must only arm a peer after any
    /// connect-time callback has already returned, so that a concurrent
    /// dispatch thread can never invoke a data callback before that
    /// callback: arming is what first makes this fd's readiness — and
    /// therefore any data callback — observable at all.
    pub fn initialize(&self, reactor: &crate::reactor::Reactor) -> io::Result<()> {
        self.state.store(CONNECTED, Ordering::Release);
        reactor.arm(self.fd, crate::reactor::Interest::peer())?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn mark_connected(&self) {
        self.state.store(CONNECTED, Ordering::Release);
    }

    fn is_connected(&self) -> bool {
        self.state.load(Ordering::Acquire) == CONNECTED
    }

    /// Returns up to `n` bytes. Loops while fewer than `n` bytes have
    /// been read; `WouldBlock` yields the thread and retries; any other
    /// error disconnects and returns whatever was collected so far.
    pub fn read_string(&self, n: usize) -> Vec<u8> {
        if !self.is_connected() {
            return Vec::new();
        }
        let mut result = Vec::with_capacity(n);
        while result.len() < n {
            if !self.is_connected() {
                return result;
            }
            let mut buf = vec![0u8; n - result.len()];
            match (&self.stream).read(&mut buf) {
                Ok(0) => {
                    self.disconnect();
                    return result;
                }
                Ok(count) => result.extend_from_slice(&buf[..count]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::yield_now();
                    continue;
                }
                Err(_) => {
                    self.disconnect();
                    return result;
                }
            }
        }
        result
    }

    /// Reads one byte at a time until the accumulator contains `token` as
    /// a subsequence. The returned value includes the token: the byte is
    /// appended before the check, so the match is only ever noticed once
    /// the token is already part of the accumulator.
    pub fn read_string_until(&self, token: &[u8]) -> Vec<u8> {
        if !self.is_connected() {
            return Vec::new();
        }
        let mut result = Vec::new();
        loop {
            if !self.is_connected() {
                return result;
            }
            let mut byte = [0u8; 1];
            match (&self.stream).read(&mut byte) {
                Ok(0) => {
                    self.disconnect();
                    return result;
                }
                Ok(_) => {
                    result.push(byte[0]);
                    if !token.is_empty() && contains_subsequence(&result, token) {
                        return result;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::yield_now();
                    continue;
                }
                Err(_) => {
                    self.disconnect();
                    return result;
                }
            }
        }
    }

    /// Reads a line of text. `\n` or `\r` terminate the line but only once
    /// the accumulator is non-empty, so leading CR/LF bytes are skipped.
    pub fn read_line(&self) -> Vec<u8> {
        if !self.is_connected() {
            return Vec::new();
        }
        let mut result = Vec::new();
        loop {
            if !self.is_connected() {
                return result;
            }
            let mut byte = [0u8; 1];
            match (&self.stream).read(&mut byte) {
                Ok(0) => {
                    self.disconnect();
                    return result;
                }
                Ok(_) => {
                    if byte[0] == b'\n' || byte[0] == b'\r' {
                        if !result.is_empty() {
                            return result;
                        }
                    } else {
                        result.push(byte[0]);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::yield_now();
                    continue;
                }
                Err(_) => {
                    self.disconnect();
                    return result;
                }
            }
        }
    }

    /// Reads everything currently available: stops on `WouldBlock`
    /// (returns what was read so far) or on reading a NUL byte (also
    /// returns what was read so far, NUL included neither way since the
    /// loop breaks before pushing it) — a literal zero byte is treated as
    /// an end-of-data marker distinct from a closed connection.
    pub fn read_all(&self) -> Vec<u8> {
        if !self.is_connected() {
            return Vec::new();
        }
        let mut result = Vec::new();
        loop {
            if !self.is_connected() {
                return result;
            }
            let mut byte = [0u8; 1];
            match (&self.stream).read(&mut byte) {
                Ok(0) => {
                    self.disconnect();
                    return result;
                }
                Ok(_) => {
                    if byte[0] == 0 {
                        return result;
                    }
                    result.push(byte[0]);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return result,
                Err(_) => {
                    self.disconnect();
                    return result;
                }
            }
        }
    }

    /// Writes `data` fully. Policy: on a non-blocking socket, loop on
    /// `WouldBlock` (yielding between attempts) until every byte is
    /// queued or a real error occurs, rather than a single best-effort
    /// `send` that could silently drop a partial write. A broken pipe
    /// disconnects silently; any other write error is logged before
    /// disconnecting.
    pub fn write_string(&self, data: &[u8]) {
        if !self.is_connected() {
            return;
        }
        let mut offset = 0;
        while offset < data.len() {
            if !self.is_connected() {
                return;
            }
            match (&self.stream).write(&data[offset..]) {
                Ok(0) => {
                    self.disconnect();
                    return;
                }
                Ok(count) => offset += count,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::yield_now();
                    continue;
                }
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                    self.disconnect();
                    return;
                }
                Err(e) => {
                    error!("could not write to peer {}: {e}", self.remote);
                    self.disconnect();
                    return;
                }
            }
        }
    }

    /// Idempotent. Transitions `Connected -> Closing` and asks the owning
    /// listener to remove this peer, which drives `on_disconnect` exactly
    /// once before the peer is destroyed. No-op if already Closing/Closed.
    pub fn disconnect(&self) {
        let prev = self
            .state
            .compare_exchange(CONNECTED, CLOSING, Ordering::AcqRel, Ordering::Acquire);
        if prev.is_err() {
            return;
        }
        if let Some(owner) = self.owner.upgrade() {
            owner.remove_peer(self.fd);
        }
    }

    /// Called by the listener once `on_disconnect` has fired, right before
    /// the peer is dropped.
    pub(crate) fn mark_closed(&self) {
        self.state.store(CLOSED, Ordering::Release);
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        let res = unsafe { ffi::shutdown(self.fd, ffi::SHUT_RDWR) };
        if res < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::NotConnected {
                error!("shutdown on peer fd {} failed: {err}", self.fd);
            }
        }
    }
}

fn contains_subsequence(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.len() > haystack.len() {
        return false;
    }
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream};

    fn loopback_pair() -> (Peer, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server_side, remote) = listener.accept().unwrap();
        server_side.set_nonblocking(true).unwrap();
        let endpoint = Endpoint::from_socket_addr(remote, crate::endpoint::Transport::Tcp);
        let peer = Peer::new(server_side, endpoint, Weak::<NoopOwner>::new());
        peer.mark_connected();
        (peer, client)
    }

    struct NoopOwner;
    impl ListenerHandle for NoopOwner {
        fn remove_peer(&self, _fd: RawFd) {}
    }

    #[test]
    fn reads_are_empty_before_initialize() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let _client = TcpStream::connect(addr).unwrap();
        let (server_side, remote) = listener.accept().unwrap();
        server_side.set_nonblocking(true).unwrap();
        let endpoint = Endpoint::from_socket_addr(remote, crate::endpoint::Transport::Tcp);
        let peer = Peer::new(server_side, endpoint, Weak::<NoopOwner>::new());
        assert_eq!(peer.state(), PeerState::Uninitialized);
        assert!(peer.read_string(4).is_empty());
        assert!(peer.read_line().is_empty());
    }

    #[test]
    fn read_line_skips_leading_cr_lf_and_stops_at_newline() {
        let (peer, mut client) = loopback_pair();
        client.write_all(b"\r\nPING\n").unwrap();
        thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(peer.read_line(), b"PING");
    }

    #[test]
    fn read_string_until_includes_the_token() {
        let (peer, mut client) = loopback_pair();
        client.write_all(b"hello WORLD").unwrap();
        thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(peer.read_string_until(b"WORLD"), b"hello WORLD");
    }

    #[test]
    fn disconnect_is_idempotent_and_blocks_further_io() {
        let (peer, _client) = loopback_pair();
        peer.disconnect();
        peer.disconnect();
        assert_eq!(peer.state(), PeerState::Closing);
        assert!(peer.read_string(1).is_empty());
        assert!(peer.read_line().is_empty());
    }
}
