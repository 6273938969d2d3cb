//! Payload encryption for sync blobs.
//!
//! - HKDF-SHA256 derives the payload key from the group secret
//! - XChaCha20-Poly1305 with random 192-bit nonces seals each payload
//! - The group id is bound in as associated data, so a blob replayed into
//!   another group does not open
//!
//! Sealed layout: `nonce (24 bytes) || ciphertext+tag`.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    Key, XChaCha20Poly1305, XNonce,
};
use hkdf::Hkdf;
use sha2::Sha256;
use sync_core::GroupSecret;
use sync_types::GroupId;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Nonce size for XChaCha20-Poly1305 (192 bits = 24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Key size for XChaCha20-Poly1305 (256 bits = 32 bytes).
pub const KEY_SIZE: usize = 32;

/// Poly1305 tag size.
pub const TAG_SIZE: usize = 16;

const HKDF_SALT: &[u8] = b"sealsync-group-key-v1";
const HKDF_INFO_PAYLOAD: &[u8] = b"blob-payload";

/// Crypto errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Encryption failed.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Authentication failed: wrong key, wrong group, or corrupted data.
    #[error("decryption failed: authentication error")]
    DecryptionFailed,

    /// Sealed payload shorter than nonce + tag.
    #[error("sealed payload too short: {0} bytes")]
    Truncated(usize),

    /// The OS random source failed.
    #[error("nonce generation failed: {0}")]
    Entropy(String),
}

/// Payload key for one sync group.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct GroupKey {
    key: [u8; KEY_SIZE],
    #[zeroize(skip)]
    group_id: GroupId,
}

impl GroupKey {
    /// Derive the payload key from a group secret.
    pub fn derive(secret: &GroupSecret) -> Self {
        let hkdf = Hkdf::<Sha256>::new(Some(HKDF_SALT), secret.as_bytes());
        let mut key = [0u8; KEY_SIZE];
        // 32 bytes is far below HKDF-SHA256's 8160-byte output limit.
        if hkdf.expand(HKDF_INFO_PAYLOAD, &mut key).is_err() {
            unreachable!("hkdf output length is fixed at {KEY_SIZE} bytes");
        }

        Self {
            key,
            group_id: secret.group_id(),
        }
    }

    /// The group this key belongs to.
    pub fn group_id(&self) -> &GroupId {
        &self.group_id
    }

    /// Encrypt a payload. Output is `nonce || ciphertext`.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce = [0u8; NONCE_SIZE];
        getrandom::getrandom(&mut nonce).map_err(|e| CryptoError::Entropy(e.to_string()))?;

        let ciphertext = self
            .cipher()
            .encrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: self.group_id.as_bytes(),
                },
            )
            .map_err(|_| CryptoError::EncryptionFailed("aead encrypt failed".into()))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Decrypt a payload produced by [`seal`](Self::seal).
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::Truncated(sealed.len()));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);

        self.cipher()
            .decrypt(
                XNonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: self.group_id.as_bytes(),
                },
            )
            .map_err(|_| CryptoError::DecryptionFailed)
    }

    fn cipher(&self) -> XChaCha20Poly1305 {
        XChaCha20Poly1305::new(Key::from_slice(&self.key))
    }
}

// Don't leak keys in debug output
impl std::fmt::Debug for GroupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupKey")
            .field("key", &"[REDACTED]")
            .field("group_id", &self.group_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> GroupKey {
        GroupKey::derive(&GroupSecret::generate().unwrap())
    }

    #[test]
    fn seal_then_open() {
        let key = key();
        let sealed = key.seal(b"Hello, sync world!").unwrap();

        assert_eq!(sealed.len(), NONCE_SIZE + 18 + TAG_SIZE);
        assert_eq!(key.open(&sealed).unwrap(), b"Hello, sync world!");
    }

    #[test]
    fn random_nonces_give_distinct_ciphertexts() {
        let key = key();
        let a = key.seal(b"Same message").unwrap();
        let b = key.seal(b"Same message").unwrap();

        assert_ne!(a[..NONCE_SIZE], b[..NONCE_SIZE]);
        assert_ne!(a, b);
        assert_eq!(key.open(&a).unwrap(), key.open(&b).unwrap());
    }

    #[test]
    fn derivation_is_deterministic() {
        let secret = GroupSecret::from_bytes([5; 32]);
        let sealed = GroupKey::derive(&secret).seal(b"data").unwrap();
        assert_eq!(GroupKey::derive(&secret).open(&sealed).unwrap(), b"data");
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = key().seal(b"Secret message").unwrap();
        assert_eq!(key().open(&sealed), Err(CryptoError::DecryptionFailed));
    }

    #[test]
    fn corrupted_ciphertext_fails() {
        let key = key();
        let mut sealed = key.seal(b"Secret message").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xFF;
        assert_eq!(key.open(&sealed), Err(CryptoError::DecryptionFailed));
    }

    #[test]
    fn short_input_is_truncated() {
        assert_eq!(key().open(&[0u8; 10]), Err(CryptoError::Truncated(10)));
    }

    #[test]
    fn empty_and_large_payloads() {
        let key = key();
        assert!(key.open(&key.seal(b"").unwrap()).unwrap().is_empty());

        let large = vec![0x42u8; 1024 * 1024];
        assert_eq!(key.open(&key.seal(&large).unwrap()).unwrap(), large);
    }

    #[test]
    fn key_carries_group_id() {
        let secret = GroupSecret::from_bytes([9; 32]);
        assert_eq!(GroupKey::derive(&secret).group_id(), &secret.group_id());
    }

    #[test]
    fn debug_is_redacted() {
        let debug = format!("{:?}", key());
        assert!(debug.contains("REDACTED"));
    }
}
