//! Transport collaborator contract.
//!
//! The mesh transport (identities, destinations, links, resources,
//! announces, interfaces) lives outside this crate. The node only consumes
//! the operations below; a production adaptor binds them to the real stack,
//! and [`crate::testing`] provides an in-process implementation.
//!
//! Request handlers and link/resource callbacks are invoked on transport
//! worker tasks. They must never block; the node bridges them into
//! 1-buffered channels with non-blocking sends.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rmpv::Value;
use serde::Serialize;

use super::identity::{DestinationHash, LinkId, LocalIdentity, RecalledIdentity};

/// Runtime status of one transport interface.
#[derive(Debug, Clone, Serialize)]
pub struct InterfaceStatus {
    /// Full interface name as reported by the driver.
    pub name: String,
    /// Short name matching the config section, when the driver exposes one.
    pub short_name: String,
    /// Driver type, e.g. `TCPClientInterface`.
    pub kind: String,
    /// Whether the interface is currently online.
    pub online: bool,
}

/// Errors surfaced by transport operations.
#[derive(Debug)]
pub enum TransportError {
    /// Named interface does not exist.
    UnknownInterface(String),
    /// No registered destination matches the hash.
    UnknownDestination(String),
    /// The link is torn down or was never established.
    LinkClosed,
    /// Underlying I/O failure.
    Io(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::UnknownInterface(name) => write!(f, "unknown interface: {}", name),
            TransportError::UnknownDestination(hash) => {
                write!(f, "unknown destination: {}", hash)
            }
            TransportError::LinkClosed => write!(f, "link closed"),
            TransportError::Io(e) => write!(f, "transport io error: {}", e),
        }
    }
}

impl std::error::Error for TransportError {}

/// An inbound request delivered to a registered request handler.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    /// Request path, e.g. `/avatar`.
    pub path: String,
    /// Decoded request payload.
    pub payload: Value,
    /// Identifier of the link the request arrived on.
    pub link_id: LinkId,
    /// Public key of the requester, when the peer has identified.
    pub remote_identity: Option<[u8; 32]>,
}

/// Handler for inbound requests. Runs on a transport worker task; must not
/// block. The returned value is sent back as the request response.
pub type RequestHandler = Arc<dyn Fn(InboundRequest) -> Value + Send + Sync>;

/// A concluded resource transfer, successful or not.
///
/// Received bytes are exposed through a backing file rather than in memory.
pub struct ConcludedResource {
    /// Whether the transfer completed successfully.
    pub complete: bool,
    /// Metadata map attached by the sender.
    pub metadata: Value,
    /// Backing file holding the received bytes.
    pub data_file: PathBuf,
}

/// Callback invoked when a resource transfer on a link concludes.
pub type ResourceConcluded = Box<dyn Fn(ConcludedResource) + Send + Sync>;

/// An inbound destination owned by this node.
pub trait InboundDestination: Send + Sync {
    /// The destination hash peers address.
    fn hash(&self) -> DestinationHash;

    /// Register a request handler under a path. Replaces any previous
    /// handler for the same path.
    fn register_request_handler(&self, path: &str, handler: RequestHandler);

    /// Broadcast an announce for this destination with attached app-data.
    /// Emission is best-effort once handed to the transport.
    fn announce(&self, app_data: Vec<u8>) -> Result<(), TransportError>;
}

/// A session-scoped bidirectional channel to a remote destination.
pub trait Link: Send + Sync {
    /// Session identifier.
    fn id(&self) -> LinkId;

    /// Identify this node to the remote end.
    fn identify(&self, identity: &LocalIdentity);

    /// Accept all inbound resource transfers on this link.
    fn accept_all_resources(&self);

    /// Install the resource-concluded callback. Replaces any previous one.
    fn set_resource_concluded(&self, callback: ResourceConcluded);

    /// Submit a request. `on_response` or `on_failure` fires exactly once
    /// unless the link dies first.
    fn request(
        &self,
        path: &str,
        payload: Value,
        on_response: Box<dyn Fn(Value) + Send + Sync>,
        on_failure: Box<dyn Fn() + Send + Sync>,
        timeout: Duration,
    ) -> Result<(), TransportError>;

    /// Start a resource transfer carrying `data` with attached metadata.
    fn send_resource(&self, data: &[u8], metadata: Value) -> Result<(), TransportError>;

    /// Tear the link down. Idempotent.
    fn teardown(&self);
}

/// Observer for announces seen anywhere on the mesh.
pub trait AnnounceObserver: Send + Sync {
    /// Called for every observed announce.
    fn received_announce(&self, destination: DestinationHash, app_data: &[u8]);
}

/// The transport stack contract consumed by the node.
pub trait Transport: Send + Sync {
    /// Path of the transport config file.
    fn config_path(&self) -> PathBuf;

    /// Snapshot of runtime interface status.
    fn interface_stats(&self) -> Vec<InterfaceStatus>;

    /// Halt an interface by config section name.
    fn halt_interface(&self, name: &str) -> Result<(), TransportError>;

    /// Resume a previously halted interface.
    fn resume_interface(&self, name: &str) -> Result<(), TransportError>;

    /// Re-create the interface driver, reconnecting where applicable.
    fn reload_interface(&self, name: &str) -> Result<(), TransportError>;

    /// Whether a route to the destination is currently known.
    fn has_path(&self, destination: &DestinationHash) -> bool;

    /// Ask the network for a route to the destination. Fire-and-forget;
    /// poll [`Transport::has_path`] for the outcome.
    fn request_path(&self, destination: &DestinationHash);

    /// Recall a peer identity (and its announce app-data) from the local
    /// cache. Never performs network I/O.
    fn recall_identity(&self, destination: &DestinationHash) -> Option<RecalledIdentity>;

    /// Register an inbound destination for this node's identity under an
    /// `(app, aspect)` name.
    fn register_inbound(
        &self,
        identity: &LocalIdentity,
        app: &str,
        aspect: &str,
    ) -> Result<Arc<dyn InboundDestination>, TransportError>;

    /// Register the process-wide announce observer. Replaces any previous
    /// observer.
    fn register_announce_observer(&self, observer: Arc<dyn AnnounceObserver>);

    /// Remove the announce observer.
    fn deregister_announce_observer(&self);

    /// Locate an active link by id.
    fn find_active_link(&self, link_id: &LinkId) -> Option<Arc<dyn Link>>;

    /// Open an outgoing link to a destination. `on_established` or
    /// `on_closed` fires from a transport worker task.
    fn open_link(
        &self,
        destination: &DestinationHash,
        on_established: Box<dyn Fn() + Send + Sync>,
        on_closed: Box<dyn Fn() + Send + Sync>,
    ) -> Result<Arc<dyn Link>, TransportError>;
}
