//! The node supervisor and its public operations.

mod contact;
pub(crate) mod core;
pub(crate) mod error;
mod options;
mod send;

pub use contact::{ContactAvatarInfo, ContactInfo};
pub use error::{FetchError, NodeError};
pub use self::core::{InboundHandler, Node, PROFILE_APP, PROFILE_ASPECT};
pub use options::NodeOptions;
pub use send::SendOptions;
