//! Embedding-at-rest encryption.
//!
//! Vector blobs are sealed with AES-256-GCM under a key loaded from (or
//! generated into) a key file next to the database. Losing the key file
//! means re-enrolling every identity; the daemon logs the key
//! fingerprint at startup so operators can tell key files apart.

use std::io::Write;
use std::path::Path;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use lineage_core::{Error, Result};

const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;

/// AES-256-GCM key for sealing embedding blobs.
#[derive(Clone)]
pub struct VaultKey {
    key: [u8; KEY_LEN],
}

impl VaultKey {
    /// Load the key from `path`, or generate one and write it with
    /// owner-only permissions if the file does not exist yet.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let bytes = std::fs::read(path)
                .map_err(|err| Error::StorageUnavailable(format!("read key file: {err}")))?;
            let key: [u8; KEY_LEN] = bytes.as_slice().try_into().map_err(|_| {
                Error::StorageUnavailable(format!(
                    "key file {} is {} bytes, expected {KEY_LEN}",
                    path.display(),
                    bytes.len()
                ))
            })?;
            return Ok(Self { key });
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| Error::StorageUnavailable(format!("create key dir: {err}")))?;
        }

        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);

        let mut file = std::fs::File::create(path)
            .map_err(|err| Error::StorageUnavailable(format!("create key file: {err}")))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))
                .map_err(|err| Error::StorageUnavailable(format!("chmod key file: {err}")))?;
        }
        file.write_all(&key)
            .map_err(|err| Error::StorageUnavailable(format!("write key file: {err}")))?;

        tracing::info!(path = %path.display(), "generated new vault key");
        Ok(Self { key })
    }

    /// Short SHA-256 fingerprint for logs — never the key itself.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.key);
        digest[..4].iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Encrypt `plaintext` under a fresh random nonce.
    pub fn seal(&self, plaintext: &[u8]) -> Result<(Vec<u8>, [u8; NONCE_LEN])> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| Error::StorageUnavailable("embedding encryption failed".to_string()))?;
        Ok((ciphertext, nonce))
    }

    /// Decrypt a blob sealed by [`seal`](Self::seal).
    pub fn open(&self, ciphertext: &[u8], nonce: &[u8]) -> Result<Vec<u8>> {
        if nonce.len() != NONCE_LEN {
            return Err(Error::StorageUnavailable(format!(
                "corrupt nonce: expected {NONCE_LEN} bytes, got {}",
                nonce.len()
            )));
        }
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| {
                Error::StorageUnavailable(
                    "embedding decryption failed — wrong key or corrupt blob".to_string(),
                )
            })
    }
}
