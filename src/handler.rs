//! The callback surface applications implement to react to connection
//! lifecycle and data events.
//!
//! [`crate::server::Server`] is generic over `H: EventHandler`, so dispatch
//! to an application's handler costs a direct call, not a vtable lookup.

use crate::peer::Peer;

/// Connection lifecycle and data callbacks. All methods default to doing
/// nothing, so an implementor only overrides what it cares about.
pub trait EventHandler: Send + Sync {
    /// A new peer finished its handshake and was added to the registry.
    fn on_connect(&self, peer: &Peer) {
        let _ = peer;
    }

    /// The peer's fd became readable. The handler is responsible for
    /// calling `peer.read_*` itself; this crate never reads ahead of the
    /// callback.
    fn on_receive(&self, peer: &Peer) {
        let _ = peer;
    }

    /// The peer was removed from the registry, right before it is
    /// destroyed. Fires exactly once per peer, whether the disconnect was
    /// initiated by the peer, the remote end, or a listener-wide teardown.
    fn on_disconnect(&self, peer: &Peer) {
        let _ = peer;
    }
}
