//! Node and fetch errors.

use crate::runtime::{RouterError, TransportError};

/// Errors from node lifecycle and local operations.
///
/// Startup variants are fatal at [`crate::Node::start`]; the rest surface
/// per call.
#[derive(Debug)]
pub enum NodeError {
    /// Node state directory could not be prepared.
    StartFailed(String),
    /// Identity could not be loaded or created.
    Identity(String),
    /// Config file could not be read or written.
    Config(String),
    /// Caller input was malformed (bad hex, wrong hash length).
    InvalidInput(String),
    /// No identity is known for the destination; an announce from the
    /// peer is needed first.
    UnknownIdentity,
    /// The router rejected the self-addressed loopback delivery.
    LoopbackFailed,
    /// Transport operation failed.
    Transport(TransportError),
    /// Router operation failed.
    Router(RouterError),
    /// Filesystem failure.
    Io(String),
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeError::StartFailed(e) => write!(f, "failed to start node: {}", e),
            NodeError::Identity(e) => write!(f, "identity error: {}", e),
            NodeError::Config(e) => write!(f, "config error: {}", e),
            NodeError::InvalidInput(e) => write!(f, "invalid input: {}", e),
            NodeError::UnknownIdentity => write!(
                f,
                "unknown destination identity (need an announce from the peer before you can send)"
            ),
            NodeError::LoopbackFailed => write!(f, "local loopback delivery failed"),
            NodeError::Transport(e) => write!(f, "transport error: {}", e),
            NodeError::Router(e) => write!(f, "router error: {}", e),
            NodeError::Io(e) => write!(f, "io error: {}", e),
        }
    }
}

impl std::error::Error for NodeError {}

impl From<std::io::Error> for NodeError {
    fn from(e: std::io::Error) -> Self {
        NodeError::Io(e.to_string())
    }
}

impl From<TransportError> for NodeError {
    fn from(e: TransportError) -> Self {
        NodeError::Transport(e)
    }
}

impl From<RouterError> for NodeError {
    fn from(e: RouterError) -> Self {
        NodeError::Router(e)
    }
}

/// Errors from peer-facing fetch operations. All non-fatal per call; the
/// kinds stay distinguishable so callers can decide whether to retry.
#[derive(Debug)]
pub enum FetchError {
    /// Peer identity could not be resolved before the deadline.
    NoIdentity,
    /// The link closed before establishment.
    LinkClosed,
    /// The request was submitted but the peer reported failure.
    RequestFailed,
    /// The request could not be submitted at all.
    RequestSendFailed,
    /// Deadline elapsed.
    Timeout,
    /// Resource transfer concluded without completing.
    ResourceFailed,
    /// The peer answered with something outside the protocol.
    Protocol(String),
    /// Caller input was malformed.
    InvalidInput(String),
    /// The transport refused an operation (e.g. opening the link).
    Transport(String),
    /// Filesystem failure while persisting fetched bytes.
    Io(String),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::NoIdentity => write!(f, "unknown destination identity"),
            FetchError::LinkClosed => write!(f, "link closed before establishment"),
            FetchError::RequestFailed => write!(f, "request failed"),
            FetchError::RequestSendFailed => write!(f, "failed to send request"),
            FetchError::Timeout => write!(f, "request timeout"),
            FetchError::ResourceFailed => write!(f, "resource transfer failed"),
            FetchError::Protocol(e) => write!(f, "protocol mismatch: {}", e),
            FetchError::InvalidInput(e) => write!(f, "invalid input: {}", e),
            FetchError::Transport(e) => write!(f, "transport error: {}", e),
            FetchError::Io(e) => write!(f, "io error: {}", e),
        }
    }
}

impl std::error::Error for FetchError {}

impl From<std::io::Error> for FetchError {
    fn from(e: std::io::Error) -> Self {
        FetchError::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_error_display() {
        let err = NodeError::LoopbackFailed;
        assert_eq!(err.to_string(), "local loopback delivery failed");

        let err = NodeError::InvalidInput("bad hex".into());
        assert_eq!(err.to_string(), "invalid input: bad hex");

        let err = NodeError::StartFailed("no dir".into());
        assert_eq!(err.to_string(), "failed to start node: no dir");
    }

    #[test]
    fn test_fetch_error_kinds_are_distinct() {
        assert_ne!(FetchError::Timeout.to_string(), FetchError::LinkClosed.to_string());
        assert_ne!(
            FetchError::RequestFailed.to_string(),
            FetchError::RequestSendFailed.to_string()
        );
    }

    #[test]
    fn test_error_trait_objects() {
        let err: Box<dyn std::error::Error> = Box::new(NodeError::UnknownIdentity);
        assert!(!err.to_string().is_empty());
        let err: Box<dyn std::error::Error> = Box::new(FetchError::NoIdentity);
        assert!(!err.to_string().is_empty());
    }
}
