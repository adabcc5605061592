//! Collaborator contracts consumed by the node.
//!
//! The transport and the message router are external systems; this module
//! defines the traits and shared types through which the node talks to
//! them. Production adaptors implement these against the real stack;
//! [`crate::testing`] implements them in-process for tests.

mod identity;
mod router;
mod transport;

use std::path::Path;
use std::sync::Arc;

pub use identity::{
    destination_hash, DestinationHash, LinkId, LocalIdentity, RecalledIdentity, ADDRESS_LENGTH,
};
pub use router::{
    DeliveryCallback, DeliveryMethod, LxMessage, MessageRouter, RouterError, DELIVERY_APP,
    DELIVERY_ASPECT, DESTINATION_LENGTH,
};
pub use transport::{
    AnnounceObserver, ConcludedResource, InboundDestination, InboundRequest, InterfaceStatus,
    Link, RequestHandler, ResourceConcluded, Transport, TransportError,
};

/// Factory for the transport/router pair the node runs on.
///
/// The transport is a process-wide singleton; `open_transport` returns the
/// same instance on repeated calls. The router is rebuilt on node restart.
pub trait MeshStack: Send + Sync {
    /// Open (or return) the transport rooted at the given config directory.
    fn open_transport(
        &self,
        config_dir: &Path,
        log_level: u8,
    ) -> Result<Arc<dyn Transport>, TransportError>;

    /// Open a message router for the identity, rooted at the storage
    /// directory.
    fn open_router(
        &self,
        identity: &LocalIdentity,
        storage_dir: &Path,
    ) -> Result<Arc<dyn MessageRouter>, RouterError>;
}
