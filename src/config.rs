//! Process-global, read-mostly tunables consulted by the reactor, peer,
//! listener and server.
//!
//! A lazily initialized singleton with no setters in v1:
//! `std::sync::OnceLock` gives an "initialize once, immutable after"
//! contract with no unsafe static mutable state.

use std::sync::OnceLock;

/// Global tunables. See field docs for the default baked into
/// [`Config::get`].
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Epoll event buffer capacity for a listener's accept-side reactor.
    pub listen_socket_events_capacity: usize,
    /// Epoll event buffer capacity for a listener's peer-side reactor.
    pub peer_socket_events_capacity: usize,
    /// Minimum worker threads dedicated to peer polling.
    pub client_min_threads: usize,
    /// Maximum worker threads dedicated to peer polling.
    pub client_max_threads: usize,
    /// Minimum worker threads dedicated to listener (accept) polling.
    pub server_min_threads: usize,
    /// Maximum worker threads dedicated to listener (accept) polling.
    pub server_max_threads: usize,
    /// `listen(2)` backlog, exposed as a config field with a default of 5.
    pub accept_backlog: i32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen_socket_events_capacity: 30,
            peer_socket_events_capacity: 30,
            client_min_threads: 10,
            client_max_threads: 10,
            server_min_threads: 10,
            server_max_threads: 10,
            accept_backlog: 5,
        }
    }
}

static INSTANCE: OnceLock<Config> = OnceLock::new();

impl Config {
    /// Returns the process-wide config instance, initializing it with
    /// defaults on first use. There is no setter in v1: callers that need
    /// different values must do so before any reactor/listener/server is
    /// created, by calling [`Config::set`] exactly once.
    pub fn get() -> &'static Config {
        INSTANCE.get_or_init(Config::default)
    }

    /// Installs a non-default config. Must be called before [`Config::get`]
    /// is first used anywhere in the process; returns `Err(())` with the
    /// rejected value if the instance was already initialized.
    pub fn set(config: Config) -> Result<(), Config> {
        INSTANCE.set(config)
    }
}
