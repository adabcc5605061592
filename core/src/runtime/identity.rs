//! Node identity and destination addressing.
//!
//! The identity is an Ed25519 key pair persisted as raw private-key bytes
//! under `<dir>/identity`. Destination hashes are derived from a name hash
//! over `app.aspect` plus the identity hash, truncated to 16 bytes.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use ed25519_dalek::SigningKey;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Truncated hash length used for destinations, links and identity hashes.
pub const ADDRESS_LENGTH: usize = 16;

/// Bytes taken from the name hash when deriving a destination hash.
const NAME_HASH_LENGTH: usize = 10;

/// A 16-byte truncated destination address.
pub type DestinationHash = [u8; ADDRESS_LENGTH];

/// A 16-byte link session identifier.
pub type LinkId = [u8; ADDRESS_LENGTH];

/// The node's own long-lived key pair.
///
/// The private key is zeroed from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct LocalIdentity {
    /// 32-byte Ed25519 private key.
    private_key: [u8; 32],
    /// 32-byte public key.
    #[zeroize(skip)]
    public_key: [u8; 32],
}

impl fmt::Debug for LocalIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalIdentity")
            .field("private_key", &"[REDACTED]")
            .field("public_key", &hex::encode(self.public_key))
            .finish()
    }
}

impl LocalIdentity {
    /// Generate a fresh random identity.
    pub fn generate() -> Self {
        let mut secret = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut secret);
        let signing = SigningKey::from_bytes(&secret);
        let identity = Self {
            private_key: signing.to_bytes(),
            public_key: signing.verifying_key().to_bytes(),
        };
        secret.zeroize();
        identity
    }

    /// Load an identity from its on-disk private-key file.
    pub fn from_file(path: &Path) -> io::Result<Self> {
        let bytes = fs::read(path)?;
        if bytes.len() < 32 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "identity file shorter than 32 bytes",
            ));
        }
        let mut secret = [0u8; 32];
        secret.copy_from_slice(&bytes[..32]);
        let signing = SigningKey::from_bytes(&secret);
        let identity = Self {
            private_key: signing.to_bytes(),
            public_key: signing.verifying_key().to_bytes(),
        };
        secret.zeroize();
        Ok(identity)
    }

    /// Persist the private key to disk.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        fs::write(path, self.private_key)
    }

    /// The public key.
    pub fn public_key(&self) -> [u8; 32] {
        self.public_key
    }

    /// 16-byte identity hash (leading bytes of SHA-256 over the public key).
    pub fn hash(&self) -> [u8; ADDRESS_LENGTH] {
        identity_hash(&self.public_key)
    }
}

/// A peer identity recalled from the transport's cache.
///
/// `app_data` is whatever the peer attached to its most recent announce;
/// empty when the identity is known but no announce has been observed.
#[derive(Debug, Clone)]
pub struct RecalledIdentity {
    /// The peer's 32-byte public key.
    pub public_key: [u8; 32],
    /// App-data from the most recent announce, possibly empty.
    pub app_data: Vec<u8>,
}

impl RecalledIdentity {
    /// 16-byte identity hash.
    pub fn hash(&self) -> [u8; ADDRESS_LENGTH] {
        identity_hash(&self.public_key)
    }
}

fn identity_hash(public_key: &[u8; 32]) -> [u8; ADDRESS_LENGTH] {
    let digest = Sha256::digest(public_key);
    let mut out = [0u8; ADDRESS_LENGTH];
    out.copy_from_slice(&digest[..ADDRESS_LENGTH]);
    out
}

/// Derive the destination hash for an identity under an `(app, aspect)` name.
pub fn destination_hash(public_key: &[u8; 32], app: &str, aspect: &str) -> DestinationHash {
    let name_digest = Sha256::digest(format!("{app}.{aspect}").as_bytes());
    let mut hasher = Sha256::new();
    hasher.update(&name_digest[..NAME_HASH_LENGTH]);
    hasher.update(identity_hash(public_key));
    let digest = hasher.finalize();
    let mut out = [0u8; ADDRESS_LENGTH];
    out.copy_from_slice(&digest[..ADDRESS_LENGTH]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_unique_identities() {
        let a = LocalIdentity::generate();
        let b = LocalIdentity::generate();
        assert_ne!(a.public_key(), b.public_key());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity");

        let identity = LocalIdentity::generate();
        identity.save(&path).unwrap();

        let loaded = LocalIdentity::from_file(&path).unwrap();
        assert_eq!(identity.public_key(), loaded.public_key());
        assert_eq!(identity.hash(), loaded.hash());
    }

    #[test]
    fn test_load_rejects_short_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity");
        std::fs::write(&path, [0u8; 16]).unwrap();

        assert!(LocalIdentity::from_file(&path).is_err());
    }

    #[test]
    fn test_destination_hash_depends_on_name() {
        let identity = LocalIdentity::generate();
        let delivery = destination_hash(&identity.public_key(), "lxmf", "delivery");
        let profile = destination_hash(&identity.public_key(), "lantern", "profile");
        assert_ne!(delivery, profile);
    }

    #[test]
    fn test_destination_hash_is_stable() {
        let identity = LocalIdentity::generate();
        let a = destination_hash(&identity.public_key(), "lxmf", "delivery");
        let b = destination_hash(&identity.public_key(), "lxmf", "delivery");
        assert_eq!(a, b);
    }

    #[test]
    fn test_debug_redacts_private_key() {
        let identity = LocalIdentity::generate();
        let debug = format!("{:?}", identity);
        assert!(debug.contains("[REDACTED]"));
    }
}
