//! Lantern Core
//!
//! In-process control core of the Lantern mesh messaging daemon.
//!
//! One [`Node`] per process owns a long-lived identity, keeps inbound and
//! outbound destinations registered on the mesh, sends and receives
//! end-to-end messages, publishes a profile (display name + avatar),
//! serves avatar and attachment blobs on demand, and keeps per-interface
//! liveness under control on mobile hosts that freeze sockets across
//! suspend/resume.
//!
//! The mesh transport and the message router are external collaborators,
//! consumed through the contracts in [`runtime`]; production adaptors bind
//! them to the real stack, and [`testing`] runs everything in-process.
//!
//! # Module Structure
//!
//! - `node/`: Public interface (Node, options, send path, contact recall)
//! - `announce/`: Announce payload, observed-announce registry, emission
//!   engine with readiness gating and coalescing
//! - `interfaces/`: Interface watchdog and reset controller
//! - `profile/`: Avatar store, `/avatar` and `/attachment` responders and
//!   fetchers
//! - `attachments/`: Content-addressed attachment storage
//! - `config/`: State-directory layout and config templates
//! - `runtime/`: Collaborator contracts (transport, router, identity)
//! - `testing/`: In-process mesh for tests
//!
//! # Quick Start
//!
//! ```ignore
//! use lantern_core::{Node, NodeOptions, SendOptions};
//!
//! let options = NodeOptions::new()
//!     .with_dir("/var/lib/lantern")
//!     .with_display_name("Alice");
//! let node = Node::start(options, stack).await?;
//!
//! node.set_inbound_handler(|message| {
//!     println!("from {}: {}", hex::encode(message.source), message.content);
//! });
//!
//! node.send(&peer_hash_hex, SendOptions {
//!     content: "Hello!".into(),
//!     ..SendOptions::default()
//! })?;
//! ```

// Public interface
pub mod node;

// Component modules
pub mod announce;
pub mod attachments;
pub mod config;
pub mod interfaces;
pub mod profile;

// Collaborator contracts and test doubles
pub mod runtime;
pub mod testing;

// Re-export main API types for convenience
pub use announce::AnnounceEntry;
pub use attachments::{AttachmentInfo, CachedAttachment};
pub use interfaces::ConfiguredInterface;
pub use node::{
    ContactAvatarInfo,
    ContactInfo,
    FetchError,
    Node,
    NodeError,
    NodeOptions,
    SendOptions,
};
pub use profile::{AttachmentFetch, Avatar, AvatarFetch};
pub use runtime::{
    DeliveryMethod,
    DestinationHash,
    InterfaceStatus,
    LocalIdentity,
    LxMessage,
    MeshStack,
};
