//! Content-addressed attachment storage.
//!
//! Outgoing attachments live under `attachments/out/` as
//! `<sha256-hex>.bin` with optional `.mime` and `.name` sidecars; the bin
//! write is idempotent. Incoming attachments are cached per peer under
//! `attachments/in/<remote-hex>/` in the same shape. Readers tolerate
//! missing sidecars.

use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Maximum stored attachment name length in characters.
const MAX_NAME_LENGTH: usize = 180;

/// Metadata for one stored attachment.
#[derive(Debug, Clone, Serialize)]
pub struct AttachmentInfo {
    /// Full SHA-256 content hash, hex-encoded.
    pub hash_hex: String,
    /// Mime type, possibly empty.
    pub mime: String,
    /// Sanitised file name, possibly empty.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// Unix mtime of the stored blob.
    pub updated: u64,
    /// Whether this is an outgoing attachment.
    pub outgoing: bool,
}

/// A locally cached incoming attachment.
#[derive(Debug, Clone, Serialize)]
pub struct CachedAttachment {
    /// Content hash, hex-encoded.
    pub hash_hex: String,
    /// Path of the cached blob.
    pub path: PathBuf,
    /// Mime type, possibly empty.
    pub mime: String,
    /// Sanitised name, possibly empty.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
}

/// On-disk attachment store rooted at the node state directory.
#[derive(Debug, Clone)]
pub struct AttachmentStore {
    root: PathBuf,
}

impl AttachmentStore {
    /// Create a store rooted at the node state directory. Directories are
    /// created lazily on first write.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Directory of outgoing attachments.
    pub fn outgoing_dir(&self) -> PathBuf {
        self.root.join("attachments").join("out")
    }

    /// Per-peer cache directory for incoming attachments.
    pub fn incoming_dir(&self, remote_hex: &str) -> PathBuf {
        self.root
            .join("attachments")
            .join("in")
            .join(remote_hex.trim().to_ascii_lowercase())
    }

    /// Store an outgoing attachment.
    ///
    /// The blob is written only when not already present; sidecars are
    /// written best-effort and only when non-empty.
    pub fn store_outgoing(
        &self,
        data: &[u8],
        mime: &str,
        name: &str,
    ) -> io::Result<AttachmentInfo> {
        if data.is_empty() {
            return Err(io::Error::new(ErrorKind::InvalidInput, "empty attachment"));
        }

        let hash_hex = hex::encode(Sha256::digest(data));
        let out_dir = self.outgoing_dir();
        fs::create_dir_all(&out_dir)?;

        let bin_path = out_dir.join(format!("{hash_hex}.bin"));
        if !bin_path.exists() {
            fs::write(&bin_path, data)?;
        }

        let mime = mime.trim();
        if !mime.is_empty() {
            let _ = fs::write(out_dir.join(format!("{hash_hex}.mime")), mime);
        }
        let name = sanitize_name(name);
        if !name.is_empty() {
            let _ = fs::write(out_dir.join(format!("{hash_hex}.name")), &name);
        }

        Ok(AttachmentInfo {
            hash_hex,
            mime: mime.to_string(),
            name,
            size: data.len() as u64,
            updated: file_mtime(&bin_path),
            outgoing: true,
        })
    }

    /// Load an outgoing attachment by content hash.
    pub fn load_outgoing(&self, hash_hex: &str) -> io::Result<(AttachmentInfo, Vec<u8>)> {
        let hash_hex = hash_hex.trim().to_ascii_lowercase();
        if hash_hex.is_empty() {
            return Err(io::Error::new(ErrorKind::InvalidInput, "empty hash"));
        }
        let out_dir = self.outgoing_dir();
        let bin_path = out_dir.join(format!("{hash_hex}.bin"));
        let data = fs::read(&bin_path)?;

        let info = AttachmentInfo {
            hash_hex: hash_hex.clone(),
            mime: read_sidecar(&out_dir.join(format!("{hash_hex}.mime"))),
            name: read_sidecar(&out_dir.join(format!("{hash_hex}.name"))),
            size: data.len() as u64,
            updated: file_mtime(&bin_path),
            outgoing: true,
        };
        Ok((info, data))
    }

    /// Look up a cached incoming attachment. A non-empty blob file is a
    /// cache hit.
    pub fn cached_incoming(&self, remote_hex: &str, hash_hex: &str) -> Option<CachedAttachment> {
        let hash_hex = hash_hex.trim().to_ascii_lowercase();
        let in_dir = self.incoming_dir(remote_hex);
        let bin_path = in_dir.join(format!("{hash_hex}.bin"));
        let meta = fs::metadata(&bin_path).ok()?;
        if meta.len() == 0 {
            return None;
        }
        Some(CachedAttachment {
            hash_hex: hash_hex.clone(),
            path: bin_path,
            mime: read_sidecar(&in_dir.join(format!("{hash_hex}.mime"))),
            name: read_sidecar(&in_dir.join(format!("{hash_hex}.name"))),
            size: meta.len(),
        })
    }

    /// Write an incoming attachment into the per-peer cache.
    pub fn cache_incoming(
        &self,
        remote_hex: &str,
        hash_hex: &str,
        data: &[u8],
        mime: &str,
        name: &str,
    ) -> io::Result<CachedAttachment> {
        let hash_hex = hash_hex.trim().to_ascii_lowercase();
        let in_dir = self.incoming_dir(remote_hex);
        fs::create_dir_all(&in_dir)?;

        let bin_path = in_dir.join(format!("{hash_hex}.bin"));
        fs::write(&bin_path, data)?;

        let mime = mime.trim();
        if !mime.is_empty() {
            let _ = fs::write(in_dir.join(format!("{hash_hex}.mime")), mime);
        }
        let name = sanitize_name(name);
        if !name.is_empty() {
            let _ = fs::write(in_dir.join(format!("{hash_hex}.name")), &name);
        }

        Ok(CachedAttachment {
            hash_hex,
            path: bin_path,
            mime: mime.to_string(),
            name,
            size: data.len() as u64,
        })
    }
}

/// Sanitise an attachment name: basename only, forbidden characters
/// rewritten, control characters removed, capped at 180 characters.
pub fn sanitize_name(name: &str) -> String {
    let name = name.trim();
    if name.is_empty() {
        return String::new();
    }

    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(name);

    let cleaned: String = base
        .chars()
        .filter_map(|c| match c {
            '\0' | '/' | '\\' | ':' => Some('-'),
            c if (c as u32) < 0x20 => None,
            c => Some(c),
        })
        .collect();

    let cleaned = cleaned.trim();
    cleaned.chars().take(MAX_NAME_LENGTH).collect()
}

fn read_sidecar(path: &Path) -> String {
    fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

fn file_mtime(path: &Path) -> u64 {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|mtime| mtime.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
