//! Outbound send path.

use rmpv::Value;
use tracing::debug;

use crate::runtime::{DeliveryMethod, LxMessage, DESTINATION_LENGTH};

use super::core::Node;
use super::error::NodeError;

/// Options for one outbound message.
#[derive(Debug, Clone)]
pub struct SendOptions {
    /// Optional title; empty when absent.
    pub title: String,
    /// Message content.
    pub content: String,
    /// Application fields map, `Value::Nil` when absent.
    pub fields: Value,
    /// Delivery method; defaults to opportunistic.
    pub method: Option<DeliveryMethod>,
    /// Outbound stamp cost.
    pub stamp_cost: Option<u8>,
    /// Request a delivery ticket from the peer.
    pub include_ticket: bool,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            title: String::new(),
            content: String::new(),
            fields: Value::Nil,
            method: None,
            stamp_cost: None,
            include_ticket: false,
        }
    }
}

impl Node {
    /// Compose and submit an outbound message.
    ///
    /// A self-addressed message is looped back through the router's local
    /// delivery entry point and never touches the network; everything else
    /// is queued with the router. Status transitions are delivered through
    /// the callbacks the router exposes on the message.
    pub fn send(
        &self,
        destination_hash_hex: &str,
        options: SendOptions,
    ) -> Result<LxMessage, NodeError> {
        let dest_bytes = hex::decode(destination_hash_hex.trim())
            .map_err(|e| NodeError::InvalidInput(format!("decode destination hash: {}", e)))?;
        if dest_bytes.len() != DESTINATION_LENGTH {
            return Err(NodeError::InvalidInput(format!(
                "invalid destination hash length: got {} want {}",
                dest_bytes.len(),
                DESTINATION_LENGTH
            )));
        }
        let mut destination = [0u8; DESTINATION_LENGTH];
        destination.copy_from_slice(&dest_bytes);

        let own_hash = self.inner.delivery_destination_hash();
        let is_self = destination == own_hash;

        // A send needs the peer identity; a self-send substitutes our own.
        if !is_self && self.inner.transport.recall_identity(&destination).is_none() {
            return Err(NodeError::UnknownIdentity);
        }

        let mut message = LxMessage::new(
            destination,
            own_hash,
            options.title,
            options.content,
        );
        message.fields = options.fields;
        message.method = options.method.unwrap_or(DeliveryMethod::Opportunistic);
        message.stamp_cost = options.stamp_cost;
        message.include_ticket = options.include_ticket;

        if is_self {
            let packed = message.pack()?;
            let router = self.inner.router.read().unwrap().clone();
            if !router.local_delivery(packed) {
                return Err(NodeError::LoopbackFailed);
            }
            debug!(dest = %destination_hash_hex, "message looped back locally");
            return Ok(message);
        }

        let router = self.inner.router.read().unwrap().clone();
        router.handle_outbound(message.clone());
        debug!(dest = %destination_hash_hex, "message queued outbound");
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeOptions;
    use crate::testing::TestMesh;

    #[tokio::test]
    async fn test_send_rejects_bad_hash() {
        let mesh = TestMesh::new();
        let dir = tempfile::tempdir().unwrap();
        let node = Node::start(NodeOptions::for_testing(dir.path()), mesh.stack())
            .await
            .unwrap();

        assert!(matches!(
            node.send("zz", SendOptions::default()),
            Err(NodeError::InvalidInput(_))
        ));
        assert!(matches!(
            node.send("aabb", SendOptions::default()),
            Err(NodeError::InvalidInput(_))
        ));

        node.close().await;
    }

    #[tokio::test]
    async fn test_send_to_unknown_peer_fails() {
        let mesh = TestMesh::new();
        let dir = tempfile::tempdir().unwrap();
        let node = Node::start(NodeOptions::for_testing(dir.path()), mesh.stack())
            .await
            .unwrap();

        let unknown = hex::encode([9u8; 16]);
        assert!(matches!(
            node.send(&unknown, SendOptions::default()),
            Err(NodeError::UnknownIdentity)
        ));

        node.close().await;
    }

    #[tokio::test]
    async fn test_send_to_announced_peer_queues_outbound() {
        let mesh = TestMesh::new();
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();

        let stack_a = mesh.stack();
        let node_a = Node::start(NodeOptions::for_testing(dir_a.path()), stack_a.clone())
            .await
            .unwrap();
        let node_b = Node::start(NodeOptions::for_testing(dir_b.path()), mesh.stack())
            .await
            .unwrap();

        // B announces so A can recall its identity.
        TestMesh::announce_now(&node_b);

        let sent = node_a
            .send(
                &node_b.destination_hash_hex(),
                SendOptions {
                    content: "hello".into(),
                    ..SendOptions::default()
                },
            )
            .unwrap();
        assert_eq!(sent.destination, node_b.destination_hash());
        assert_eq!(stack_a.outbox_len(), 1, "message queued with A's router");

        node_a.close().await;
        node_b.close().await;
    }
}
