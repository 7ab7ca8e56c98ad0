//! Peer identity interface
//!
//! Entries are owned by peers: external processes identified by an opaque
//! id string. A [`PeerManager`] resolves a peer id to a credential (the
//! peer's executable path or an equivalent stable identity), caches it for
//! synchronous lookup during rescheduling, and announces peers that
//! disappear.

use async_trait::async_trait;

use crate::error::SchedulerResult;
use crate::signal::HandlerId;

/// Resolver and cache for peer credentials
#[async_trait]
pub trait PeerManager: Send + Sync {
    /// Resolve and cache the credential for `peer_id`. Resolution may be
    /// slow (it can involve querying the host); failures surface as
    /// [`IdentifyingPeer`](crate::SchedulerError::IdentifyingPeer).
    async fn ensure_peer_credentials(&self, peer_id: &str) -> SchedulerResult<String>;

    /// Cached credential for `peer_id`, if resolution has completed
    fn peer_credentials(&self, peer_id: &str) -> Option<String>;

    /// Subscribe to peer disappearance; the payload is the vanished
    /// peer id
    fn connect_peer_vanished(&self, handler: Box<dyn Fn(&str) + Send + Sync>) -> HandlerId;

    /// Unsubscribe a peer-vanished handler
    fn disconnect_peer_vanished(&self, id: HandlerId);
}
