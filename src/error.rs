//! Crate-level error type for fallible *setup* paths (parsing an
//! [`crate::endpoint::Endpoint`], binding a [`crate::listener::Listener`],
//! [`crate::server::Server::listen`]).
//!
//! Per-connection hot paths (`Peer::read_*`, `Peer::write_string`) never
//! propagate this type: they log-and-disconnect or return empty/no-op
//! instead of bubbling every I/O error through the callback boundary.

use std::fmt;
use std::io;

#[derive(Debug)]
pub enum Error {
    /// Unparseable IP literal, or an unsupported address family (IPv6).
    Addressing(String),
    /// socket/bind/listen/non-blocking/reactor-create failure during
    /// listener setup.
    Setup(io::Error),
    /// Any other I/O failure surfaced from a fallible setup path.
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Addressing(msg) => write!(f, "addressing error: {msg}"),
            Error::Setup(e) => write!(f, "setup error: {e}"),
            Error::Io(e) => write!(f, "i/o error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Addressing(_) => None,
            Error::Setup(e) | Error::Io(e) => Some(e),
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
