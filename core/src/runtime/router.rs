//! Message-router collaborator contract.
//!
//! The end-to-end message layer (framing, encryption, store-and-forward)
//! is an external collaborator. The node hands it outbound messages,
//! receives inbound ones through a delivery callback, and uses the local
//! delivery entry point for the self-addressed loopback.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rmpv::Value;
use sha2::{Digest, Sha256};

use super::identity::{DestinationHash, LocalIdentity, ADDRESS_LENGTH};
use super::transport::InboundDestination;

/// App name of the delivery destination.
pub const DELIVERY_APP: &str = "lxmf";

/// Aspect of the delivery destination.
pub const DELIVERY_ASPECT: &str = "delivery";

/// Required length of a destination hash in bytes.
pub const DESTINATION_LENGTH: usize = ADDRESS_LENGTH;

/// Delivery method for an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMethod {
    /// Single-packet best-effort delivery, no link required.
    Opportunistic,
    /// Delivery over an established link.
    Direct,
    /// Delivery via a propagation node.
    Propagated,
}

impl DeliveryMethod {
    /// Wire byte for this method.
    pub fn as_byte(self) -> u8 {
        match self {
            DeliveryMethod::Opportunistic => 1,
            DeliveryMethod::Direct => 2,
            DeliveryMethod::Propagated => 3,
        }
    }

    /// Parse a wire byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(DeliveryMethod::Opportunistic),
            2 => Some(DeliveryMethod::Direct),
            3 => Some(DeliveryMethod::Propagated),
            _ => None,
        }
    }
}

/// Errors surfaced by router operations.
#[derive(Debug)]
pub enum RouterError {
    /// Delivery identity registration was rejected.
    RegisterFailed(String),
    /// Message could not be encoded.
    Encode(String),
    /// Packed message could not be decoded.
    Decode(String),
}

impl std::fmt::Display for RouterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouterError::RegisterFailed(e) => write!(f, "register delivery identity: {}", e),
            RouterError::Encode(e) => write!(f, "encode message: {}", e),
            RouterError::Decode(e) => write!(f, "decode message: {}", e),
        }
    }
}

impl std::error::Error for RouterError {}

/// An end-to-end message, outbound or delivered.
#[derive(Debug, Clone)]
pub struct LxMessage {
    /// Destination delivery hash.
    pub destination: DestinationHash,
    /// Source delivery hash.
    pub source: DestinationHash,
    /// Unix seconds at composition time.
    pub timestamp: u64,
    /// Optional title; empty when absent.
    pub title: String,
    /// Message content.
    pub content: String,
    /// Application fields map, `Value::Nil` when absent.
    pub fields: Value,
    /// Delivery method.
    pub method: DeliveryMethod,
    /// Outbound stamp cost, when the sender attaches one.
    pub stamp_cost: Option<u8>,
    /// Whether to request a delivery ticket from the peer.
    pub include_ticket: bool,
}

impl LxMessage {
    /// Compose a new message stamped with the current time.
    pub fn new(
        destination: DestinationHash,
        source: DestinationHash,
        title: String,
        content: String,
    ) -> Self {
        Self {
            destination,
            source,
            timestamp: unix_now(),
            title,
            content,
            fields: Value::Nil,
            method: DeliveryMethod::Opportunistic,
            stamp_cost: None,
            include_ticket: false,
        }
    }

    /// Canonical packed form, as handed to the local delivery entry point.
    pub fn pack(&self) -> Result<Vec<u8>, RouterError> {
        let value = Value::Array(vec![
            Value::Binary(self.destination.to_vec()),
            Value::Binary(self.source.to_vec()),
            Value::from(self.timestamp),
            Value::String(self.title.clone().into()),
            Value::String(self.content.clone().into()),
            self.fields.clone(),
            Value::from(self.method.as_byte()),
        ]);
        let mut out = Vec::new();
        rmpv::encode::write_value(&mut out, &value)
            .map_err(|e| RouterError::Encode(e.to_string()))?;
        Ok(out)
    }

    /// Decode a packed message.
    pub fn unpack(bytes: &[u8]) -> Result<Self, RouterError> {
        let mut cursor = bytes;
        let value = rmpv::decode::read_value(&mut cursor)
            .map_err(|e| RouterError::Decode(e.to_string()))?;
        let items = match value {
            Value::Array(items) if items.len() >= 7 => items,
            _ => return Err(RouterError::Decode("not a packed message".into())),
        };

        let destination = decode_hash(&items[0])?;
        let source = decode_hash(&items[1])?;
        let timestamp = items[2].as_u64().unwrap_or(0);
        let title = items[3].as_str().unwrap_or_default().to_string();
        let content = items[4].as_str().unwrap_or_default().to_string();
        let fields = items[5].clone();
        let method = items[6]
            .as_u64()
            .and_then(|b| DeliveryMethod::from_byte(b as u8))
            .ok_or_else(|| RouterError::Decode("bad delivery method".into()))?;

        Ok(Self {
            destination,
            source,
            timestamp,
            title,
            content,
            fields,
            method,
            stamp_cost: None,
            include_ticket: false,
        })
    }

    /// Message identifier: SHA-256 over the packed form.
    pub fn message_id(&self) -> Result<[u8; 32], RouterError> {
        let packed = self.pack()?;
        Ok(Sha256::digest(&packed).into())
    }
}

fn decode_hash(value: &Value) -> Result<DestinationHash, RouterError> {
    let bytes = value
        .as_slice()
        .ok_or_else(|| RouterError::Decode("hash is not binary".into()))?;
    if bytes.len() != DESTINATION_LENGTH {
        return Err(RouterError::Decode(format!(
            "hash length {} != {}",
            bytes.len(),
            DESTINATION_LENGTH
        )));
    }
    let mut out = [0u8; DESTINATION_LENGTH];
    out.copy_from_slice(bytes);
    Ok(out)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Callback for delivered inbound messages. Runs on a router worker task.
pub type DeliveryCallback = Box<dyn Fn(LxMessage) + Send + Sync>;

/// The message-router contract consumed by the node.
pub trait MessageRouter: Send + Sync {
    /// Register the delivery identity, obtaining the delivery-inbound
    /// destination.
    fn register_delivery_identity(
        &self,
        identity: &LocalIdentity,
        display_name: &str,
        stamp_cost: Option<u8>,
    ) -> Result<Arc<dyn InboundDestination>, RouterError>;

    /// Install the delivery callback. Replaces any previous one.
    fn register_delivery_callback(&self, callback: DeliveryCallback);

    /// Queue an outbound message. Status transitions are reported through
    /// callbacks the router exposes on the message object.
    fn handle_outbound(&self, message: LxMessage);

    /// Local (loopback) delivery entry point. Returns false on rejection.
    fn local_delivery(&self, packed: Vec<u8>) -> bool;

    /// Persist state and stop. Idempotent.
    fn exit(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_message() -> LxMessage {
        LxMessage::new([1u8; 16], [2u8; 16], "t".into(), "hi".into())
    }

    #[test]
    fn test_pack_unpack_round_trip() {
        let msg = sample_message();
        let packed = msg.pack().unwrap();
        let decoded = LxMessage::unpack(&packed).unwrap();

        assert_eq!(decoded.destination, msg.destination);
        assert_eq!(decoded.source, msg.source);
        assert_eq!(decoded.title, "t");
        assert_eq!(decoded.content, "hi");
        assert_eq!(decoded.method, DeliveryMethod::Opportunistic);
    }

    #[test]
    fn test_unpack_rejects_garbage() {
        assert!(LxMessage::unpack(b"not msgpack").is_err());
    }

    #[test]
    fn test_message_id_is_stable() {
        let msg = sample_message();
        assert_eq!(msg.message_id().unwrap(), msg.message_id().unwrap());
    }

    #[test]
    fn test_message_id_differs_by_content() {
        let a = sample_message();
        let mut b = sample_message();
        b.timestamp = a.timestamp;
        b.content = "other".into();
        assert_ne!(a.message_id().unwrap(), b.message_id().unwrap());
    }

    #[test]
    fn test_delivery_method_round_trip() {
        for method in [
            DeliveryMethod::Opportunistic,
            DeliveryMethod::Direct,
            DeliveryMethod::Propagated,
        ] {
            assert_eq!(DeliveryMethod::from_byte(method.as_byte()), Some(method));
        }
        assert_eq!(DeliveryMethod::from_byte(0), None);
    }
}
