//! Local avatar persistence.
//!
//! The avatar is a single app-managed blob under the state directory:
//! `avatar.bin` plus an `avatar.mime` sidecar. A legacy `avatar.png` is
//! still read for installations that predate the mime sidecar.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};

/// Fingerprint length: leading bytes of SHA-256 over the avatar bytes.
pub const FINGERPRINT_LENGTH: usize = 16;

/// The local avatar blob and its derived metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Avatar {
    /// Raw image bytes.
    pub bytes: Vec<u8>,
    /// Leading 16 bytes of SHA-256 over `bytes`.
    pub fingerprint: [u8; FINGERPRINT_LENGTH],
    /// Mime type; one of image/png, image/jpeg, image/heic.
    pub mime: String,
    /// Unix seconds of the last change.
    pub updated: u64,
}

impl Avatar {
    /// Build an avatar record from raw bytes, stamping it with now.
    pub fn from_bytes(bytes: Vec<u8>, mime: String) -> Self {
        let fingerprint = fingerprint(&bytes);
        Self {
            bytes,
            fingerprint,
            mime,
            updated: unix_now(),
        }
    }
}

/// Leading 16 bytes of SHA-256 over the given bytes.
pub fn fingerprint(bytes: &[u8]) -> [u8; FINGERPRINT_LENGTH] {
    let digest = Sha256::digest(bytes);
    let mut out = [0u8; FINGERPRINT_LENGTH];
    out.copy_from_slice(&digest[..FINGERPRINT_LENGTH]);
    out
}

/// Detect the avatar mime type from magic bytes. Empty string when the
/// format is not one of PNG, JPEG, or the HEIC/HEIF brand family.
pub fn detect_mime(data: &[u8]) -> &'static str {
    if data.len() >= 8 && data[..8] == [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a] {
        return "image/png";
    }
    if data.len() >= 3 && data[0] == 0xff && data[1] == 0xd8 && data[2] == 0xff {
        return "image/jpeg";
    }
    if data.len() >= 12 && &data[4..8] == b"ftyp" {
        match &data[8..12] {
            b"heic" | b"heix" | b"hevc" | b"hevx" | b"mif1" | b"msf1" => return "image/heic",
            _ => {}
        }
    }
    ""
}

pub(crate) fn avatar_path(dir: &Path) -> PathBuf {
    dir.join("avatar.bin")
}

pub(crate) fn avatar_mime_path(dir: &Path) -> PathBuf {
    dir.join("avatar.mime")
}

/// Load the avatar from disk. `None` when no avatar is stored.
pub fn load_avatar(dir: &Path) -> Option<Avatar> {
    let mut path = avatar_path(dir);
    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(_) => {
            path = dir.join("avatar.png");
            fs::read(&path).ok()?
        }
    };
    if bytes.is_empty() {
        return None;
    }

    let updated = fs::metadata(&path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|mtime| mtime.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let mut mime = fs::read_to_string(avatar_mime_path(dir))
        .map(|s| s.trim().to_string())
        .unwrap_or_default();
    if mime.is_empty() {
        mime = detect_mime(&bytes).to_string();
    }

    Some(Avatar {
        fingerprint: fingerprint(&bytes),
        bytes,
        mime,
        updated,
    })
}

/// Persist the avatar blob and its mime sidecar. The sidecar write is
/// best-effort; the blob write is not.
pub fn save_avatar(dir: &Path, avatar: &Avatar) -> io::Result<()> {
    if avatar.bytes.is_empty() {
        return Ok(());
    }
    fs::write(avatar_path(dir), &avatar.bytes)?;
    if !avatar.mime.is_empty() {
        let _ = fs::write(avatar_mime_path(dir), &avatar.mime);
    }
    Ok(())
}

/// Remove the avatar files. Missing files are not an error.
pub fn remove_avatar(dir: &Path) {
    let _ = fs::remove_file(avatar_path(dir));
    let _ = fs::remove_file(avatar_mime_path(dir));
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

    fn png_bytes() -> Vec<u8> {
        let mut bytes = PNG_HEADER.to_vec();
        bytes.extend_from_slice(b"payload");
        bytes
    }

    #[test]
    fn test_fingerprint_is_sha256_prefix() {
        let bytes = b"abc";
        let digest = Sha256::digest(bytes);
        assert_eq!(fingerprint(bytes), digest[..16]);
    }

    #[test]
    fn test_detect_mime() {
        assert_eq!(detect_mime(&png_bytes()), "image/png");
        assert_eq!(detect_mime(&[0xff, 0xd8, 0xff, 0xe0]), "image/jpeg");

        let mut heic = vec![0, 0, 0, 0x18];
        heic.extend_from_slice(b"ftypheic");
        heic.extend_from_slice(&[0; 8]);
        assert_eq!(detect_mime(&heic), "image/heic");

        assert_eq!(detect_mime(b"plain text"), "");
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let avatar = Avatar::from_bytes(png_bytes(), "image/png".into());
        save_avatar(dir.path(), &avatar).unwrap();

        let loaded = load_avatar(dir.path()).unwrap();
        assert_eq!(loaded.bytes, avatar.bytes);
        assert_eq!(loaded.fingerprint, avatar.fingerprint);
        assert_eq!(loaded.mime, "image/png");
    }

    #[test]
    fn test_load_legacy_png_path() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("avatar.png"), png_bytes()).unwrap();

        let loaded = load_avatar(dir.path()).unwrap();
        assert_eq!(loaded.mime, "image/png");
        assert_eq!(loaded.fingerprint, fingerprint(&png_bytes()));
    }

    #[test]
    fn test_load_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_avatar(dir.path()).is_none());
    }

    #[test]
    fn test_remove_avatar() {
        let dir = tempfile::tempdir().unwrap();
        let avatar = Avatar::from_bytes(png_bytes(), "image/png".into());
        save_avatar(dir.path(), &avatar).unwrap();

        remove_avatar(dir.path());
        assert!(load_avatar(dir.path()).is_none());
        // Removing again is fine.
        remove_avatar(dir.path());
    }
}
