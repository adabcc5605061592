//! Contact-info recall.
//!
//! Resolves peer identity and announce app-data by destination hash. A
//! zero timeout is a pure cache read; otherwise a path request is issued
//! first, because it prompts peers and routers to re-announce the identity
//! together with its app-data.

use std::time::Duration;

use serde::Serialize;
use tokio::time::{sleep, Instant};

use crate::announce::payload;
use crate::runtime::{RecalledIdentity, DESTINATION_LENGTH};

use super::core::Node;
use super::error::{FetchError, NodeError};

/// Identity-recall poll interval.
const IDENTITY_POLL: Duration = Duration::from_millis(100);

/// App-data recall poll interval.
const APP_DATA_POLL: Duration = Duration::from_millis(120);

/// Peer avatar metadata decoded from announce app-data.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContactAvatarInfo {
    /// Avatar fingerprint, hex-encoded.
    pub hash_hex: String,
    /// Mime type.
    pub mime: String,
    /// Avatar size in bytes.
    pub size: u64,
    /// Unix mtime of the peer's last avatar change.
    pub updated: u64,
}

/// Decoded peer contact info. All fields empty when nothing is cached.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContactInfo {
    /// Peer display name.
    pub display_name: String,
    /// Peer avatar metadata, when advertised.
    pub avatar: Option<ContactAvatarInfo>,
}

impl Node {
    /// Resolve peer contact info by destination hash.
    ///
    /// With a zero timeout this never performs network I/O and returns
    /// whatever is cached (possibly empty). Otherwise a path request is
    /// issued and the local cache is polled until app-data shows up or the
    /// deadline fires; an empty result on timeout is not an error.
    pub async fn contact_info(
        &self,
        destination_hash_hex: &str,
        timeout: Duration,
    ) -> Result<ContactInfo, NodeError> {
        let destination = decode_destination(destination_hash_hex)
            .map_err(|e| NodeError::InvalidInput(e))?;

        let recalled = if timeout.is_zero() {
            match self.inner.transport.recall_identity(&destination) {
                Some(id) if !id.app_data.is_empty() => id,
                _ => return Ok(ContactInfo::default()),
            }
        } else {
            self.inner.transport.request_path(&destination);
            let deadline = Instant::now() + timeout;
            loop {
                match self.inner.transport.recall_identity(&destination) {
                    Some(id) if !id.app_data.is_empty() => break id,
                    _ => {}
                }
                if Instant::now() >= deadline {
                    return Ok(ContactInfo::default());
                }
                sleep(APP_DATA_POLL).await;
            }
        };

        let Some(decoded) = payload::decode_app_data(&recalled.app_data) else {
            return Ok(ContactInfo::default());
        };

        let avatar = decoded.avatar.map(|meta| ContactAvatarInfo {
            hash_hex: hex::encode(&meta.fingerprint),
            mime: meta.mime,
            size: meta.size,
            updated: meta.updated,
        });

        Ok(ContactInfo {
            display_name: decoded.display_name,
            avatar,
        })
    }

    /// Resolve a peer identity, requesting a path when the local cache
    /// misses. A non-positive timeout means no deadline; an exhausted
    /// deadline reports [`FetchError::NoIdentity`]. The own delivery
    /// destination short-circuits to the local identity.
    pub async fn wait_for_identity(
        &self,
        destination_hash_hex: &str,
        timeout: Duration,
    ) -> Result<RecalledIdentity, FetchError> {
        let destination = decode_destination(destination_hash_hex)
            .map_err(FetchError::InvalidInput)?;

        if destination == self.inner.delivery_destination_hash() {
            return Ok(RecalledIdentity {
                public_key: self.inner.identity.public_key(),
                app_data: Vec::new(),
            });
        }

        if self.inner.transport.recall_identity(&destination).is_none() {
            self.inner.transport.request_path(&destination);
        }

        let deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);
        loop {
            if let Some(identity) = self.inner.transport.recall_identity(&destination) {
                return Ok(identity);
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(FetchError::NoIdentity);
                }
            }
            sleep(IDENTITY_POLL).await;
        }
    }
}

fn decode_destination(hash_hex: &str) -> Result<[u8; DESTINATION_LENGTH], String> {
    let bytes = hex::decode(hash_hex.trim())
        .map_err(|e| format!("decode destination hash: {}", e))?;
    if bytes.len() != DESTINATION_LENGTH {
        return Err(format!(
            "invalid destination hash length: got {} want {}",
            bytes.len(),
            DESTINATION_LENGTH
        ));
    }
    let mut out = [0u8; DESTINATION_LENGTH];
    out.copy_from_slice(&bytes);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeOptions;
    use crate::testing::TestMesh;

    #[tokio::test]
    async fn test_contact_info_zero_timeout_reads_cache_only() {
        let mesh = TestMesh::new();
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();

        let node_a = Node::start(
            NodeOptions::for_testing(dir_a.path()),
            mesh.stack(),
        )
        .await
        .unwrap();
        let node_b = Node::start(
            NodeOptions::for_testing(dir_b.path()).with_display_name("Bob"),
            mesh.stack(),
        )
        .await
        .unwrap();

        // Nothing cached yet: empty result, no error, no network traffic.
        let info = node_a
            .contact_info(&node_b.destination_hash_hex(), Duration::ZERO)
            .await
            .unwrap();
        assert!(info.display_name.is_empty());
        assert!(info.avatar.is_none());

        TestMesh::announce_now(&node_b);
        let info = node_a
            .contact_info(&node_b.destination_hash_hex(), Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(info.display_name, "Bob");

        node_a.close().await;
        node_b.close().await;
    }

    #[tokio::test]
    async fn test_contact_info_decodes_avatar_metadata() {
        let mesh = TestMesh::new();
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();

        let node_a = Node::start(NodeOptions::for_testing(dir_a.path()), mesh.stack())
            .await
            .unwrap();
        let node_b = Node::start(
            NodeOptions::for_testing(dir_b.path()).with_display_name("Bob"),
            mesh.stack(),
        )
        .await
        .unwrap();

        let mut png = vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
        png.extend_from_slice(b"avatar");
        node_b.set_avatar(png.clone(), "").unwrap();
        TestMesh::announce_now(&node_b);

        let info = node_a
            .contact_info(&node_b.destination_hash_hex(), Duration::ZERO)
            .await
            .unwrap();
        let avatar = info.avatar.expect("avatar metadata");
        assert_eq!(avatar.mime, "image/png");
        assert_eq!(
            avatar.hash_hex,
            hex::encode(crate::profile::avatar::fingerprint(&png))
        );
        assert_eq!(avatar.size, png.len() as u64);

        node_a.close().await;
        node_b.close().await;
    }

    #[tokio::test]
    async fn test_contact_info_rejects_bad_hash() {
        let mesh = TestMesh::new();
        let dir = tempfile::tempdir().unwrap();
        let node = Node::start(NodeOptions::for_testing(dir.path()), mesh.stack())
            .await
            .unwrap();

        assert!(node.contact_info("xy", Duration::ZERO).await.is_err());
        node.close().await;
    }

    #[tokio::test]
    async fn test_wait_for_identity_self_short_circuit() {
        let mesh = TestMesh::new();
        let dir = tempfile::tempdir().unwrap();
        let node = Node::start(NodeOptions::for_testing(dir.path()), mesh.stack())
            .await
            .unwrap();

        let identity = node
            .wait_for_identity(&node.destination_hash_hex(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(identity.public_key, node.inner.identity.public_key());

        node.close().await;
    }

    #[tokio::test]
    async fn test_wait_for_identity_unknown_peer_reports_no_identity() {
        let mesh = TestMesh::new();
        let dir = tempfile::tempdir().unwrap();
        let node = Node::start(NodeOptions::for_testing(dir.path()), mesh.stack())
            .await
            .unwrap();

        let result = node
            .wait_for_identity(&hex::encode([7u8; 16]), Duration::from_millis(300))
            .await;
        assert!(matches!(result, Err(FetchError::NoIdentity)));

        node.close().await;
    }

    #[tokio::test]
    async fn test_wait_for_identity_resolves_after_path_request() {
        let mesh = TestMesh::new();
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();

        let node_a = Node::start(NodeOptions::for_testing(dir_a.path()), mesh.stack())
            .await
            .unwrap();
        let node_b = Node::start(NodeOptions::for_testing(dir_b.path()), mesh.stack())
            .await
            .unwrap();

        // No announce from B; the path request alone resolves the identity
        // (the mesh answers path requests for registered destinations).
        let identity = node_a
            .wait_for_identity(&node_b.destination_hash_hex(), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(identity.public_key, node_b.inner.identity.public_key());

        node_a.close().await;
        node_b.close().await;
    }
}
