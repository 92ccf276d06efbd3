//! Raw Linux syscalls the reactor and keepalive plumbing need.
//!
//! Kept dependency-free the same way the epoll bindings already in this
//! crate were: a small `extern "C"` block plus the handful of constants
//! actually used, instead of pulling in `libc`.

unsafe extern "C" {
    /// Creates a new epoll instance. `flags` may be `0` or `EPOLL_CLOEXEC`.
    pub fn epoll_create1(flags: i32) -> i32;

    /// Closes a file descriptor.
    pub fn close(fd: i32) -> i32;

    /// Add, modify or remove an entry in an epoll instance's interest list.
    pub fn epoll_ctl(epfd: i32, op: i32, fd: i32, event: *mut EpollEvent) -> i32;

    /// Waits for events on an epoll instance.
    pub fn epoll_wait(epfd: i32, events: *mut EpollEvent, max_events: i32, timeout: i32) -> i32;

    /// Sets a socket option.
    pub fn setsockopt(
        sockfd: i32,
        level: i32,
        optname: i32,
        optval: *const core::ffi::c_void,
        optlen: u32,
    ) -> i32;

    /// Shuts down part or all of a full-duplex connection.
    pub fn shutdown(fd: i32, how: i32) -> i32;

    /// Creates an endpoint for communication.
    pub fn socket(domain: i32, type_: i32, protocol: i32) -> i32;

    /// Binds a socket to a local address.
    pub fn bind(sockfd: i32, addr: *const SockaddrIn, addrlen: u32) -> i32;

    /// Marks a bound socket as willing to accept connections, with the
    /// given backlog.
    pub fn listen(sockfd: i32, backlog: i32) -> i32;
}

/// `sockaddr_in`, just enough of it to bind an IPv4 listening socket with a
/// controllable backlog (`std::net::TcpListener::bind` doesn't expose one).
/// `sin_port`/`sin_addr` are network byte order; `sin_family` is host order.
#[repr(C)]
pub struct SockaddrIn {
    pub sin_family: u16,
    pub sin_port: [u8; 2],
    pub sin_addr: [u8; 4],
    pub sin_zero: [u8; 8],
}

pub const AF_INET: i32 = 2;
pub const SOCK_STREAM: i32 = 1;

/// Matches the kernel's `struct epoll_event`, which is declared
/// `__attribute__((packed))` on x86_64: the 4-byte `events` field is
/// directly followed by the 8-byte `data` union with no padding.
#[repr(C, packed)]
#[derive(Copy, Clone)]
pub struct EpollEvent {
    pub events: u32,
    pub data: u64,
}

pub const EPOLL_CTL_ADD: i32 = 1;
pub const EPOLL_CTL_DEL: i32 = 2;

pub const EPOLLIN: u32 = 0x001;
pub const EPOLLERR: u32 = 0x008;
pub const EPOLLHUP: u32 = 0x010;
pub const EPOLLRDHUP: u32 = 0x2000;
pub const EPOLLET: u32 = 1 << 31;

pub const SOL_SOCKET: i32 = 1;
pub const SO_KEEPALIVE: i32 = 9;

pub const IPPROTO_TCP: i32 = 6;
pub const TCP_KEEPIDLE: i32 = 4;
pub const TCP_KEEPINTVL: i32 = 5;
pub const TCP_KEEPCNT: i32 = 6;

pub const SHUT_RDWR: i32 = 2;

/// `errno` values for "process/user fd table exhausted" — the one error
/// [`crate::reactor::Reactor::create`] retries indefinitely on.
pub const EMFILE: i32 = 24;
pub const ENFILE: i32 = 23;
