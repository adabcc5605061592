//! Request responders for `/avatar` and `/attachment`.
//!
//! Both paths are registered on the profile destination and on the
//! delivery destination, so peers can ask over whichever link they already
//! have. Handlers run on transport worker tasks and never block: replies
//! carry metadata only, and the bytes go out as a resource on the
//! requesting link.

use std::sync::{Arc, Weak};

use rmpv::Value;
use tracing::info;

use crate::node::core::NodeInner;
use crate::profile::avatar::detect_mime;
use crate::runtime::{InboundDestination, InboundRequest};

use super::values::{bin_field, kv};

/// Request path for avatar fetches.
pub const AVATAR_REQUEST_PATH: &str = "/avatar";

/// Request path for attachment fetches.
pub const ATTACHMENT_REQUEST_PATH: &str = "/attachment";

/// Resource metadata kind for avatar transfers.
pub(crate) const AVATAR_RESOURCE_KIND: &str = "avatar";

/// Resource metadata kind for attachment transfers.
pub(crate) const ATTACHMENT_RESOURCE_KIND: &str = "attachment";

/// Register both profile request handlers on a destination.
pub(crate) fn install_profile_handlers(
    inner: &Arc<NodeInner>,
    destination: &Arc<dyn InboundDestination>,
) {
    let weak: Weak<NodeInner> = Arc::downgrade(inner);
    destination.register_request_handler(
        AVATAR_REQUEST_PATH,
        Arc::new(move |request| match weak.upgrade() {
            Some(inner) => inner.handle_avatar_request(request),
            None => not_ok(),
        }),
    );

    let weak: Weak<NodeInner> = Arc::downgrade(inner);
    destination.register_request_handler(
        ATTACHMENT_REQUEST_PATH,
        Arc::new(move |request| match weak.upgrade() {
            Some(inner) => inner.handle_attachment_request(request),
            None => not_ok(),
        }),
    );
}

impl NodeInner {
    /// Answer an avatar request.
    ///
    /// A known-fingerprint match short-circuits with `unchanged` and
    /// transfers nothing; otherwise the bytes are pushed as a resource on
    /// the requesting link and the reply carries metadata plus
    /// `resource: true`.
    pub(crate) fn handle_avatar_request(&self, request: InboundRequest) -> Value {
        let remote_hex = request
            .remote_identity
            .map(hex::encode)
            .unwrap_or_default();
        let known = bin_field(&request.payload, "h");

        let avatar = self.avatar.read().unwrap().clone();
        let Some(avatar) = avatar.filter(|a| !a.bytes.is_empty()) else {
            info!(remote = %remote_hex, "avatar req: none available");
            return not_ok();
        };
        let mime = if avatar.mime.is_empty() {
            detect_mime(&avatar.bytes).to_string()
        } else {
            avatar.mime.clone()
        };

        let meta = |extra: Vec<(Value, Value)>| -> Value {
            let mut pairs = vec![
                kv("ok", Value::Boolean(true)),
                kv("h", Value::Binary(avatar.fingerprint.to_vec())),
                kv("t", Value::String(mime.clone().into())),
                kv("s", Value::from(avatar.bytes.len() as u64)),
                kv("u", Value::from(avatar.updated)),
            ];
            pairs.extend(extra);
            Value::Map(pairs)
        };

        if known.as_deref() == Some(avatar.fingerprint.as_slice()) {
            info!(remote = %remote_hex, size = avatar.bytes.len(), "avatar req: unchanged");
            return meta(vec![kv("unchanged", Value::Boolean(true))]);
        }

        let Some(link) = self.transport.find_active_link(&request.link_id) else {
            info!(remote = %remote_hex, "avatar req: link not found");
            return error_reply("link not found");
        };

        let resource_meta = Value::Map(vec![
            kv("kind", Value::String(AVATAR_RESOURCE_KIND.into())),
            kv("h", Value::Binary(avatar.fingerprint.to_vec())),
            kv("t", Value::String(mime.clone().into())),
            kv("s", Value::from(avatar.bytes.len() as u64)),
            kv("u", Value::from(avatar.updated)),
        ]);
        if let Err(e) = link.send_resource(&avatar.bytes, resource_meta) {
            info!(remote = %remote_hex, error = %e, "avatar req: resource send failed");
            return error_reply("resource send failed");
        }

        info!(remote = %remote_hex, size = avatar.bytes.len(), "avatar req: resource queued");
        meta(vec![kv("resource", Value::Boolean(true))])
    }

    /// Answer an attachment request. The content hash is required; the
    /// bytes are pushed as a resource on the requesting link.
    pub(crate) fn handle_attachment_request(&self, request: InboundRequest) -> Value {
        let remote_hex = request
            .remote_identity
            .map(hex::encode)
            .unwrap_or_default();

        let Some(hash) = bin_field(&request.payload, "h") else {
            info!(remote = %remote_hex, "attachment req: missing hash");
            return error_reply("missing hash");
        };
        let hash_hex = hex::encode(&hash);

        let (info, bytes) = match self.attachments.load_outgoing(&hash_hex) {
            Ok((info, bytes)) if !bytes.is_empty() => (info, bytes),
            _ => {
                info!(remote = %remote_hex, hash = %hash_hex, "attachment req: not found");
                return not_ok();
            }
        };

        let Some(link) = self.transport.find_active_link(&request.link_id) else {
            info!(remote = %remote_hex, "attachment req: link not found");
            return error_reply("link not found");
        };

        let meta_pairs = |kind: bool| -> Vec<(Value, Value)> {
            let mut pairs = Vec::new();
            if kind {
                pairs.push(kv("kind", Value::String(ATTACHMENT_RESOURCE_KIND.into())));
            } else {
                pairs.push(kv("ok", Value::Boolean(true)));
            }
            pairs.extend([
                kv("h", Value::Binary(hash.clone())),
                kv("t", Value::String(info.mime.clone().into())),
                kv("n", Value::String(info.name.clone().into())),
                kv("s", Value::from(info.size)),
                kv("u", Value::from(info.updated)),
            ]);
            pairs
        };

        if let Err(e) = link.send_resource(&bytes, Value::Map(meta_pairs(true))) {
            info!(remote = %remote_hex, error = %e, "attachment req: resource send failed");
            return error_reply("resource send failed");
        }

        info!(
            remote = %remote_hex,
            hash = %hash_hex,
            size = info.size,
            "attachment req: resource queued"
        );
        let mut pairs = meta_pairs(false);
        pairs.push(kv("resource", Value::Boolean(true)));
        Value::Map(pairs)
    }
}

fn not_ok() -> Value {
    Value::Map(vec![kv("ok", Value::Boolean(false))])
}

fn error_reply(message: &str) -> Value {
    Value::Map(vec![
        kv("ok", Value::Boolean(false)),
        kv("error", Value::String(message.into())),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Node, NodeOptions};
    use crate::profile::values::{bool_field, str_field};
    use crate::testing::TestMesh;

    fn request(payload: Value) -> InboundRequest {
        InboundRequest {
            path: AVATAR_REQUEST_PATH.to_string(),
            payload,
            link_id: [0u8; 16],
            remote_identity: None,
        }
    }

    #[tokio::test]
    async fn test_avatar_request_without_avatar_is_not_ok() {
        let mesh = TestMesh::new();
        let dir = tempfile::tempdir().unwrap();
        let node = Node::start(NodeOptions::for_testing(dir.path()), mesh.stack())
            .await
            .unwrap();

        let reply = node.inner.handle_avatar_request(request(Value::Map(vec![])));
        assert!(!bool_field(&reply, "ok"));

        node.close().await;
    }

    #[tokio::test]
    async fn test_avatar_request_unchanged_short_circuit() {
        let mesh = TestMesh::new();
        let dir = tempfile::tempdir().unwrap();
        let node = Node::start(NodeOptions::for_testing(dir.path()), mesh.stack())
            .await
            .unwrap();

        let mut png = vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
        png.extend_from_slice(b"img");
        node.set_avatar(png.clone(), "").unwrap();
        let fingerprint = node.avatar().unwrap().fingerprint;

        let reply = node.inner.handle_avatar_request(request(Value::Map(vec![kv(
            "h",
            Value::Binary(fingerprint.to_vec()),
        )])));

        assert!(bool_field(&reply, "ok"));
        assert!(bool_field(&reply, "unchanged"));
        assert!(!bool_field(&reply, "resource"));
        assert_eq!(str_field(&reply, "t").as_deref(), Some("image/png"));

        node.close().await;
    }

    #[tokio::test]
    async fn test_avatar_request_with_stale_fingerprint_needs_link() {
        let mesh = TestMesh::new();
        let dir = tempfile::tempdir().unwrap();
        let node = Node::start(NodeOptions::for_testing(dir.path()), mesh.stack())
            .await
            .unwrap();

        let mut png = vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
        png.extend_from_slice(b"img");
        node.set_avatar(png, "").unwrap();

        // Stale fingerprint and a link id that matches no active link.
        let reply = node.inner.handle_avatar_request(request(Value::Map(vec![kv(
            "h",
            Value::Binary(vec![0u8; 16]),
        )])));
        assert!(!bool_field(&reply, "ok"));
        assert_eq!(str_field(&reply, "error").as_deref(), Some("link not found"));

        node.close().await;
    }

    #[tokio::test]
    async fn test_attachment_request_requires_hash() {
        let mesh = TestMesh::new();
        let dir = tempfile::tempdir().unwrap();
        let node = Node::start(NodeOptions::for_testing(dir.path()), mesh.stack())
            .await
            .unwrap();

        let reply = node
            .inner
            .handle_attachment_request(request(Value::Map(vec![])));
        assert!(!bool_field(&reply, "ok"));
        assert_eq!(str_field(&reply, "error").as_deref(), Some("missing hash"));

        node.close().await;
    }

    #[tokio::test]
    async fn test_attachment_request_unknown_hash_is_not_ok() {
        let mesh = TestMesh::new();
        let dir = tempfile::tempdir().unwrap();
        let node = Node::start(NodeOptions::for_testing(dir.path()), mesh.stack())
            .await
            .unwrap();

        let reply = node.inner.handle_attachment_request(request(Value::Map(vec![
            kv("h", Value::Binary(vec![5u8; 32])),
        ])));
        assert!(!bool_field(&reply, "ok"));
        assert!(str_field(&reply, "error").is_none());

        node.close().await;
    }
}
