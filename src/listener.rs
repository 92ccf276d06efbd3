//! Listener: owns one bound/listening socket, its accept-side and
//! peer-side reactors, and the registry of peers it has accepted.
//!
//! Topology is "per-listener-two-handle": each listener owns two
//! [`crate::reactor::Reactor`]s and spawns one dedicated peer-dispatch
//! thread; [`crate::server::Server::poll`] spawns the matching accept-side
//! thread per listener.

use std::collections::HashMap;
use std::io;
use std::net::TcpListener as StdTcpListener;
use std::os::fd::{AsRawFd, FromRawFd, RawFd};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info};

use crate::config::Config;
use crate::endpoint::{AddressFamily, Endpoint, Transport};
use crate::error::{Error, Result};
use crate::ffi;
use crate::handler::EventHandler;
use crate::peer::{ListenerHandle, Peer};
use crate::reactor::{Interest, Reactor};

const LISTENING: u8 = 0;
const CLOSING: u8 = 1;
const CLOSED: u8 = 2;

/// TCP keepalive tuning applied to every peer a listener accepts.
#[derive(Debug, Clone, Copy)]
pub struct KeepaliveParams {
    pub enabled: bool,
    pub idle_secs: i32,
    pub interval_secs: i32,
    pub retries: i32,
}

impl Default for KeepaliveParams {
    fn default() -> Self {
        KeepaliveParams {
            enabled: true,
            idle_secs: 10,
            interval_secs: 5,
            retries: 3,
        }
    }
}

/// A bound, listening socket plus the peers accepted through it.
pub struct Listener<H: EventHandler> {
    endpoint: Endpoint,
    std_listener: StdTcpListener,
    accept_reactor: Reactor,
    peer_reactor: Reactor,
    state: AtomicU8,
    registry: crate::lockable::Lockable<HashMap<RawFd, Arc<Peer>>>,
    keepalive: KeepaliveParams,
    handler: Arc<H>,
    peer_worker: Mutex<Option<JoinHandle<()>>>,
    self_weak: Weak<Listener<H>>,
}

impl<H: EventHandler + 'static> Listener<H> {
    /// Binds and starts listening on `endpoint`. Fails fast on anything but
    /// IPv4/TCP (spec §8-P9: IPv6 is modeled but never functional).
    pub fn bind_and_listen(
        endpoint: Endpoint,
        keepalive: KeepaliveParams,
        handler: Arc<H>,
    ) -> Result<Arc<Listener<H>>> {
        if endpoint.family() != AddressFamily::V4 {
            return Err(Error::Addressing(format!(
                "unsupported address family for {endpoint}: only IPv4 is implemented"
            )));
        }
        if endpoint.transport() != Transport::Tcp {
            return Err(Error::Setup(io::Error::new(
                io::ErrorKind::Unsupported,
                "UDP transport is not implemented in this revision",
            )));
        }

        let fd = raw_bind_and_listen(&endpoint, Config::get().accept_backlog)?;
        let std_listener = unsafe { StdTcpListener::from_raw_fd(fd) };
        std_listener.set_nonblocking(true).map_err(Error::Setup)?;

        let accept_reactor = Reactor::create().map_err(Error::Setup)?;
        accept_reactor
            .arm(std_listener.as_raw_fd(), Interest::listener())
            .map_err(Error::Setup)?;
        let peer_reactor = Reactor::create().map_err(Error::Setup)?;

        let listener = Arc::new_cyclic(|self_weak| Listener {
            endpoint,
            std_listener,
            accept_reactor,
            peer_reactor,
            state: AtomicU8::new(LISTENING),
            registry: crate::lockable::Lockable::new(HashMap::new()),
            keepalive,
            handler,
            peer_worker: Mutex::new(None),
            self_weak: self_weak.clone(),
        });

        let worker_listener = Arc::clone(&listener);
        let handle = thread::spawn(move || worker_listener.run_peer_loop());
        *listener.peer_worker.lock().unwrap() = Some(handle);

        info!("listening on {}", listener.endpoint);
        Ok(listener)
    }

    /// The endpoint actually bound, with the OS-assigned port when
    /// `endpoint.port() == 0` was requested.
    pub fn local_endpoint(&self) -> Endpoint {
        match self.std_listener.local_addr() {
            Ok(addr) => Endpoint::from_socket_addr(addr, self.endpoint.transport()),
            Err(_) => self.endpoint,
        }
    }

    pub fn peer_count(&self) -> usize {
        self.registry.scoped(|reg| reg.len())
    }

    /// Drives the accept loop until a fatal event on the listening fd (or
    /// an `epoll_wait` failure) tears the whole listener down. Returns
    /// `true` if it exited only because the listener was already closing,
    /// `false` on a fatal error.
    pub fn run(&self) -> bool {
        let mut events = Vec::new();
        let capacity = Config::get().listen_socket_events_capacity;
        let ok = loop {
            if self.state.load(Ordering::Acquire) != LISTENING {
                break true;
            }
            if let Err(e) = self.accept_reactor.wait(&mut events, capacity, None) {
                error!("accept reactor wait failed on {}: {e}", self.endpoint);
                break false;
            }
            let mut fatal = false;
            for ev in &events {
                if ev.is_error() {
                    error!("listening socket for {} reported an error event", self.endpoint);
                    fatal = true;
                    break;
                }
                self.drain_accept();
            }
            if fatal {
                break false;
            }
        };
        self.close();
        if let Some(handle) = self.peer_worker.lock().unwrap().take() {
            let _ = handle.join();
        }
        ok
    }

    fn drain_accept(&self) {
        loop {
            match self.std_listener.accept() {
                Ok((stream, addr)) => self.handle_accepted(stream, addr),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    error!("accept() failed on {}: {e}", self.endpoint);
                    break;
                }
            }
        }
    }

    fn handle_accepted(&self, stream: std::net::TcpStream, addr: std::net::SocketAddr) {
        if let Err(e) = stream.set_nonblocking(true) {
            error!("could not set peer socket non-blocking: {e}");
            return;
        }
        let fd = stream.as_raw_fd();
        if self.keepalive.enabled {
            if let Err(e) = apply_keepalive(fd, &self.keepalive) {
                error!("could not configure keepalive for {addr}: {e}");
                unsafe { ffi::shutdown(fd, ffi::SHUT_RDWR) };
                return;
            }
        }

        let remote = Endpoint::from_socket_addr(addr, Transport::Tcp);
        let owner: Weak<dyn ListenerHandle> = self.self_weak.clone();
        let peer = Arc::new(Peer::new(stream, remote, owner));

        // Insert into the registry and run on_connect before this fd is
        // armed on the peer-side reactor: arming is what first makes the
        // fd's readiness observable to run_peer_loop, so doing it last
        // guarantees on_connect has already returned (and the registry
        // lookup will already succeed) before any on_receive can fire for
        // this peer.
        self.registry.scoped(|reg| reg.insert(fd, Arc::clone(&peer)));
        debug!("accepted {remote} on {}", self.endpoint);
        self.handler.on_connect(&peer);

        if let Err(e) = peer.initialize(&self.peer_reactor) {
            error!("could not arm peer {remote} on the peer reactor: {e}");
            self.registry.scoped(|reg| reg.remove(&fd));
            self.handler.on_disconnect(&peer);
            peer.mark_closed();
        }
    }

    fn run_peer_loop(&self) {
        let mut events = Vec::new();
        loop {
            if self.state.load(Ordering::Acquire) == CLOSED {
                break;
            }
            let capacity = Config::get().peer_socket_events_capacity;
            match self
                .peer_reactor
                .wait(&mut events, capacity, Some(Duration::from_millis(200)))
            {
                Ok(()) => {}
                Err(e) => {
                    error!("peer reactor wait failed on {}: {e}", self.endpoint);
                    continue;
                }
            }
            for ev in &events {
                let Some(peer) = self.registry.scoped(|reg| reg.get(&ev.fd).cloned()) else {
                    continue;
                };
                if ev.is_error() {
                    peer.disconnect();
                } else {
                    self.handler.on_receive(&peer);
                }
            }
        }
    }

    /// Tears the listener down: stops accepting, disconnects every peer
    /// (firing `on_disconnect` for each), and releases both reactors.
    /// Idempotent.
    fn close(&self) {
        if self.state.swap(CLOSING, Ordering::AcqRel) == CLOSED {
            return;
        }
        let _ = self.accept_reactor.disarm(self.std_listener.as_raw_fd());
        unsafe { ffi::shutdown(self.std_listener.as_raw_fd(), ffi::SHUT_RDWR) };

        let peers: Vec<Arc<Peer>> = self.registry.scoped(|reg| {
            let peers = reg.values().cloned().collect();
            reg.clear();
            peers
        });
        for peer in peers {
            let _ = self.peer_reactor.disarm(peer.raw_fd());
            unsafe { ffi::shutdown(peer.raw_fd(), ffi::SHUT_RDWR) };
            self.handler.on_disconnect(&peer);
            peer.mark_closed();
        }

        self.state.store(CLOSED, Ordering::Release);
        info!("listener on {} closed", self.endpoint);
    }
}

impl<H: EventHandler + 'static> ListenerHandle for Listener<H> {
    fn remove_peer(&self, fd: RawFd) {
        let peer = self.registry.scoped(|reg| reg.remove(&fd));
        if let Some(peer) = peer {
            let _ = self.peer_reactor.disarm(fd);
            self.handler.on_disconnect(&peer);
            peer.mark_closed();
        }
    }
}

fn apply_keepalive(fd: RawFd, params: &KeepaliveParams) -> io::Result<()> {
    set_sockopt(fd, ffi::SOL_SOCKET, ffi::SO_KEEPALIVE, 1)?;
    set_sockopt(fd, ffi::IPPROTO_TCP, ffi::TCP_KEEPIDLE, params.idle_secs)?;
    set_sockopt(fd, ffi::IPPROTO_TCP, ffi::TCP_KEEPINTVL, params.interval_secs)?;
    set_sockopt(fd, ffi::IPPROTO_TCP, ffi::TCP_KEEPCNT, params.retries)
}

fn set_sockopt(fd: RawFd, level: i32, name: i32, value: i32) -> io::Result<()> {
    let res = unsafe {
        ffi::setsockopt(
            fd,
            level,
            name,
            &value as *const i32 as *const core::ffi::c_void,
            std::mem::size_of::<i32>() as u32,
        )
    };
    if res < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Raw `socket`/`bind`/`listen` so the configured backlog (not
/// `std::net::TcpListener::bind`'s fixed internal choice) reaches the
/// kernel.
fn raw_bind_and_listen(endpoint: &Endpoint, backlog: i32) -> Result<RawFd> {
    let octets = match endpoint.ip() {
        std::net::IpAddr::V4(v4) => v4.octets(),
        std::net::IpAddr::V6(_) => unreachable!("IPv6 rejected before this point"),
    };

    let fd = unsafe { ffi::socket(ffi::AF_INET, ffi::SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(Error::Setup(io::Error::last_os_error()));
    }

    let addr = ffi::SockaddrIn {
        sin_family: ffi::AF_INET as u16,
        sin_port: endpoint.port().to_be_bytes(),
        sin_addr: octets,
        sin_zero: [0u8; 8],
    };
    let bind_res = unsafe {
        ffi::bind(
            fd,
            &addr as *const ffi::SockaddrIn,
            std::mem::size_of::<ffi::SockaddrIn>() as u32,
        )
    };
    if bind_res < 0 {
        let err = io::Error::last_os_error();
        unsafe { ffi::close(fd) };
        return Err(Error::Setup(err));
    }

    let listen_res = unsafe { ffi::listen(fd, backlog) };
    if listen_res < 0 {
        let err = io::Error::last_os_error();
        unsafe { ffi::close(fd) };
        return Err(Error::Setup(err));
    }

    Ok(fd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpStream;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingHandler {
        connects: AtomicUsize,
        disconnects: AtomicUsize,
    }

    impl EventHandler for CountingHandler {
        fn on_connect(&self, _peer: &Peer) {
            self.connects.fetch_add(1, Ordering::SeqCst);
        }
        fn on_disconnect(&self, _peer: &Peer) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn accepts_a_connection_and_fires_on_connect() {
        let handler = Arc::new(CountingHandler::default());
        let endpoint = Endpoint::from_octets(127, 0, 0, 1, 0, Transport::Tcp);
        let listener =
            Listener::bind_and_listen(endpoint, KeepaliveParams::default(), Arc::clone(&handler))
                .unwrap();
        let bound = listener.std_listener.local_addr().unwrap();

        let listener_clone = Arc::clone(&listener);
        let accept_thread = thread::spawn(move || {
            let _ = listener_clone.run();
        });

        let _client = TcpStream::connect(bound).unwrap();
        for _ in 0..200 {
            if handler.connects.load(Ordering::SeqCst) == 1 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(handler.connects.load(Ordering::SeqCst), 1);
        assert_eq!(listener.peer_count(), 1);

        // Tear down: close() isn't publicly exposed, so we drop the
        // process-local references and let the test process exit reap
        // the threads (no graceful whole-server shutdown is wired up).
        drop(accept_thread);
    }

    #[test]
    fn ipv6_endpoint_is_rejected_before_binding() {
        let handler = Arc::new(CountingHandler::default());
        let endpoint = Endpoint::from_v6([0, 0, 0, 0, 0, 0, 0, 1], 0, Transport::Tcp);
        let err = Listener::bind_and_listen(endpoint, KeepaliveParams::default(), handler)
            .unwrap_err();
        match err {
            Error::Addressing(_) => {}
            other => panic!("expected Addressing error, got {other:?}"),
        }
    }
}
